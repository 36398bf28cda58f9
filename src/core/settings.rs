//! Settings: read-only typed view over configuration.
//!
//! The model is a flat `section.key -> string` map with typed accessors;
//! missing keys yield a caller-supplied default. Values come from a TOML
//! file (explicit path, `palioxis.toml`, `~/.palioxis.toml`, or
//! `/etc/palioxis.toml`, first hit wins) and are immutable for the rest of
//! the run.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::errors::{PalioxisError, Result};

/// Default TLS port for the destroy channel.
pub const DEFAULT_PORT: u16 = 8443;

/// Read-only configuration map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
    /// File the settings were loaded from, if any.
    source: Option<PathBuf>,
}

impl Settings {
    /// Load settings, searching the conventional locations when no explicit
    /// path is given. An explicit path that does not exist is an error; an
    /// empty search yields built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(PalioxisError::ConfigMissing {
                    what: format!("configuration file {}", path.display()),
                });
            }
            return Self::from_file(path);
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                return Self::from_file(&candidate);
            }
        }

        Ok(Self::defaults())
    }

    /// Parse a TOML file into the flat section/key map.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| PalioxisError::io(path, source))?;
        let mut settings = Self::from_toml_str(&raw)?;
        settings.source = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Parse TOML text. Only one level of tables is recognised: top-level
    /// tables become sections, their scalar entries become keys. String
    /// arrays are joined with newlines so `get_list` splits them back.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(raw)?;
        let table = value.as_table().ok_or_else(|| PalioxisError::ConfigParse {
            context: "settings",
            details: "top level must be a table".to_string(),
        })?;

        let mut values = BTreeMap::new();
        for (section, entry) in table {
            let section_table = entry.as_table().ok_or_else(|| PalioxisError::ConfigParse {
                context: "settings",
                details: format!("`{section}` must be a [section] table"),
            })?;
            for (key, raw_value) in section_table {
                let rendered = render_value(raw_value).ok_or_else(|| {
                    PalioxisError::ConfigParse {
                        context: "settings",
                        details: format!("`{section}.{key}` has an unsupported value type"),
                    }
                })?;
                values.insert(format!("{section}.{key}"), rendered);
            }
        }

        Ok(Self {
            values,
            source: None,
        })
    }

    /// Built-in defaults, used when no configuration file is found.
    /// Deliberately contains no destroy key: the server refuses to start
    /// without an explicit `Server.key`.
    #[must_use]
    pub fn defaults() -> Self {
        let mut values = BTreeMap::new();
        let pairs = [
            ("Server.host", "0.0.0.0"),
            ("Server.port", "8443"),
            ("Certificates.ca_cert", "palioxis-ca.crt"),
            ("Certificates.server_cert", "palioxis-server.crt"),
            ("Certificates.server_key", "palioxis-server.key"),
            ("Certificates.client_cert", "palioxis-client.crt"),
            ("Certificates.client_key", "palioxis-client.key"),
            ("Destroyer.module", "fast"),
            ("Destroyer.fast_passes", "3"),
            ("Destroyer.shred_passes", "9"),
            ("Client.nodes_list", "nodes.txt"),
            ("Daemon.log_file", "palioxis.log"),
            ("Daemon.log_level", "INFO"),
        ];
        for (k, v) in pairs {
            values.insert(k.to_string(), v.to_string());
        }
        Self {
            values,
            source: None,
        }
    }

    /// File the settings were loaded from (`None` for built-in defaults).
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    // ──────────────────── typed accessors ────────────────────

    /// Raw lookup.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.values.get(&format!("{section}.{key}")).map(String::as_str)
    }

    /// String value with default.
    #[must_use]
    pub fn get_or(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key)
            .map_or_else(|| default.to_string(), ToString::to_string)
    }

    /// Integer value with default (unparseable values fall back too).
    #[must_use]
    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Boolean value with default. Accepts `true/false`, `yes/no`, `on/off`,
    /// `1/0`, case-insensitive.
    #[must_use]
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get(section, key)
            .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    /// Float value with default.
    #[must_use]
    pub fn get_float(&self, section: &str, key: &str, default: f64) -> f64 {
        self.get(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Multi-line value split into trimmed, non-empty lines.
    #[must_use]
    pub fn get_list(&self, section: &str, key: &str) -> Vec<String> {
        self.get(section, key)
            .map(|v| {
                v.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("palioxis.toml")];
        if let Some(home) = env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".palioxis.toml"));
        }
        paths.push(PathBuf::from("/etc/palioxis.toml"));
        paths
    }
}

fn render_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Array(items) => {
            let mut lines = Vec::with_capacity(items.len());
            for item in items {
                lines.push(match item {
                    toml::Value::String(s) => s.clone(),
                    other => render_value(other)?,
                });
            }
            Some(lines.join("\n"))
        }
        _ => None,
    }
}

// ──────────────────── typed views ────────────────────

/// Server-side settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// The destroy key a trigger body must byte-match.
    pub key: String,
}

impl ServerSettings {
    /// Extract server settings; `Server.key` is required.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let key = settings
            .get("Server", "key")
            .map(ToString::to_string)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PalioxisError::ConfigMissing {
                what: "Server.key".to_string(),
            })?;
        Ok(Self {
            host: settings.get_or("Server", "host", "0.0.0.0"),
            port: port_from(settings),
            key,
        })
    }
}

fn port_from(settings: &Settings) -> u16 {
    let raw = settings.get_int("Server", "port", i64::from(DEFAULT_PORT));
    u16::try_from(raw).unwrap_or(DEFAULT_PORT)
}

/// Certificate material paths shared by server and client.
#[derive(Debug, Clone)]
pub struct CertificatePaths {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl CertificatePaths {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let get = |key: &str, default: &str| {
            PathBuf::from(settings.get_or("Certificates", key, default))
        };
        Self {
            ca_cert: get("ca_cert", "palioxis-ca.crt"),
            server_cert: get("server_cert", "palioxis-server.crt"),
            server_key: get("server_key", "palioxis-server.key"),
            client_cert: get("client_cert", "palioxis-client.crt"),
            client_key: get("client_key", "palioxis-client.key"),
        }
    }
}

/// Destroyer selection and policy knobs.
#[derive(Debug, Clone)]
pub struct DestroyerSettings {
    pub module: String,
    pub fast_passes: u8,
    pub shred_passes: u8,
    /// When false, a partially failed destroy run skips host shutdown.
    pub shutdown_on_partial_failure: bool,
}

impl DestroyerSettings {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            module: settings.get_or("Destroyer", "module", "fast"),
            fast_passes: passes(settings, "fast_passes", 3),
            shred_passes: passes(settings, "shred_passes", 9),
            shutdown_on_partial_failure: settings.get_bool(
                "Destroyer",
                "shutdown_on_partial_failure",
                true,
            ),
        }
    }
}

fn passes(settings: &Settings, key: &str, default: u8) -> u8 {
    let raw = settings.get_int("Destroyer", key, i64::from(default));
    u8::try_from(raw).ok().filter(|p| *p > 0).unwrap_or(default)
}

/// Client-side settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub nodes_list: PathBuf,
    /// Worker count for fleet dispatch; 1 means the reference serial order.
    pub parallelism: usize,
    pub connect_timeout: Duration,
}

impl ClientSettings {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let parallelism =
            usize::try_from(settings.get_int("Client", "parallelism", 1)).unwrap_or(1).max(1);
        let timeout_secs =
            u64::try_from(settings.get_int("Client", "connect_timeout_secs", 10)).unwrap_or(10);
        Self {
            nodes_list: PathBuf::from(settings.get_or("Client", "nodes_list", "nodes.txt")),
            parallelism,
            connect_timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

/// Log sink settings.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub log_file: PathBuf,
    pub log_level: String,
}

impl DaemonSettings {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            log_file: PathBuf::from(settings.get_or("Daemon", "log_file", "palioxis.log")),
            log_level: settings.get_or("Daemon", "log_level", "INFO"),
        }
    }
}
