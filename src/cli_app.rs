//! Top-level CLI definition and dispatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use thiserror::Error;

use palioxis::client::dispatch::Dispatcher;
use palioxis::client::nodes;
use palioxis::core::errors::PalioxisError;
use palioxis::core::settings::{
    CertificatePaths, ClientSettings, DaemonSettings, DestroyerSettings, Settings,
};
use palioxis::core::targets::TargetRegistry;
use palioxis::logger::audit::{AuditLog, Event, Severity};
use palioxis::server::Server;

/// Palioxis — remotely triggered self-destruct agent.
#[derive(Debug, Parser)]
#[command(
    name = "palioxis",
    author,
    version,
    about = "Palioxis - remotely triggered self-destruct agent",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the agent server and wait for an authenticated destroy signal.
    Server,
    /// Send destroy signals to every node in the fleet list.
    Client(ClientArgs),
    /// Load the configuration and report what the agent would do.
    CheckConfig,
}

#[derive(Debug, Clone, Args)]
struct ClientArgs {
    /// Node list file (overrides `Client.nodes_list`).
    #[arg(long, value_name = "PATH")]
    nodes: Option<PathBuf>,
}

/// CLI-level failures; anything here exits 1.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Agent(#[from] PalioxisError),
    #[error("{0}")]
    Fleet(String),
}

/// Entry point called from `main`.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = Settings::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Server => run_server(&settings),
        Command::Client(args) => run_client(&settings, args),
        Command::CheckConfig => check_config(&settings),
    }
}

fn open_log(settings: &Settings) -> AuditLog {
    let daemon = DaemonSettings::from_settings(settings);
    let log = AuditLog::to_file_with_level(
        &daemon.log_file,
        Severity::from_level_name(&daemon.log_level),
    );
    match settings.source() {
        Some(source) => log.info(
            Event::ConfigLoaded,
            format!("configuration from {}", source.display()),
        ),
        None => log.warn(Event::ConfigLoaded, "no configuration file found, using defaults"),
    }
    log
}

fn run_server(settings: &Settings) -> Result<(), CliError> {
    let log = open_log(settings);
    let server = Server::new(settings, log)?;
    eprintln!("palioxis: listening on {}", server.local_addr()?);
    server.run()?;
    Ok(())
}

fn run_client(settings: &Settings, args: &ClientArgs) -> Result<(), CliError> {
    let log = open_log(settings);
    let client = ClientSettings::from_settings(settings);
    let nodes_path = args.nodes.clone().unwrap_or(client.nodes_list);

    let specs = nodes::load_node_list(&nodes_path)?;
    if specs.is_empty() {
        return Err(CliError::Fleet(format!(
            "no usable entries in {}",
            nodes_path.display()
        )));
    }

    let dispatcher = Dispatcher::new(settings, log)?;
    let result = dispatcher.dispatch(&specs);

    for outcome in &result.outcomes {
        let tag = if outcome.success {
            "SUCCESS".green()
        } else {
            "FAILED".red()
        };
        println!(
            "[{tag}] {}:{} - {}",
            outcome.host, outcome.port, outcome.message
        );
    }
    println!("{}", result.summary());

    if result.is_success() {
        Ok(())
    } else {
        Err(CliError::Fleet(result.summary()))
    }
}

fn check_config(settings: &Settings) -> Result<(), CliError> {
    match settings.source() {
        Some(source) => println!("config: {}", source.display()),
        None => println!("config: built-in defaults (no file found)"),
    }

    let host = settings.get_or("Server", "host", "0.0.0.0");
    let port = settings.get_int("Server", "port", 8443);
    let has_key = settings
        .get("Server", "key")
        .is_some_and(|k| !k.trim().is_empty());
    println!("server: {host}:{port} (destroy key {})", present(has_key));

    let certs = CertificatePaths::from_settings(settings);
    for (label, path) in [
        ("ca_cert", &certs.ca_cert),
        ("server_cert", &certs.server_cert),
        ("server_key", &certs.server_key),
        ("client_cert", &certs.client_cert),
        ("client_key", &certs.client_key),
    ] {
        println!("{label}: {} ({})", path.display(), present(path.exists()));
    }

    let destroyer = DestroyerSettings::from_settings(settings);
    println!(
        "destroyer: {} (fast_passes {}, shred_passes {}, shutdown_on_partial_failure {})",
        destroyer.module,
        destroyer.fast_passes,
        destroyer.shred_passes,
        destroyer.shutdown_on_partial_failure
    );

    let registry = TargetRegistry::from_settings(settings)?;
    println!("targets: {} registered", registry.len());
    for target in registry.iter() {
        println!("  {}", target.path.display());
    }

    let client = ClientSettings::from_settings(settings);
    println!(
        "client: nodes_list {} ({}), parallelism {}",
        client.nodes_list.display(),
        present(client.nodes_list.exists()),
        client.parallelism
    );

    Ok(())
}

const fn present(yes: bool) -> &'static str {
    if yes { "present" } else { "missing" }
}
