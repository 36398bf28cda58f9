#![forbid(unsafe_code)]

//! palioxis — self-destruct agent CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("palioxis: {e}");
        std::process::exit(1);
    }
}
