//! PLX-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::net::dpop::DpopReason;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PalioxisError>;

/// Top-level error type for Palioxis.
#[derive(Debug, Error)]
pub enum PalioxisError {
    #[error("[PLX-1001] missing configuration: {what}")]
    ConfigMissing { what: String },

    #[error("[PLX-1002] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PLX-2001] TLS setup failure: {details}")]
    TlsSetup { details: String },

    #[error("[PLX-2002] TLS handshake failure: {details}")]
    TlsHandshake { details: String },

    #[error("[PLX-3001] malformed request: {details}")]
    RequestMalformed { details: String },

    #[error("[PLX-3002] DpopInvalid/{reason}")]
    DpopInvalid { reason: DpopReason },

    #[error("[PLX-3003] destroy key mismatch")]
    KeyMismatch,

    #[error("[PLX-4001] destroyer IO failure at {path}: {details}")]
    DestroyerIo { path: PathBuf, details: String },

    #[error("[PLX-4002] host shutdown failure: {details}")]
    ShutdownFailed { details: String },

    #[error("[PLX-5001] node unreachable {host}:{port}: {details}")]
    NodeUnreachable {
        host: String,
        port: u16,
        details: String,
    },

    #[error("[PLX-9001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PalioxisError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigMissing { .. } => "PLX-1001",
            Self::ConfigParse { .. } => "PLX-1002",
            Self::TlsSetup { .. } => "PLX-2001",
            Self::TlsHandshake { .. } => "PLX-2002",
            Self::RequestMalformed { .. } => "PLX-3001",
            Self::DpopInvalid { .. } => "PLX-3002",
            Self::KeyMismatch => "PLX-3003",
            Self::DestroyerIo { .. } => "PLX-4001",
            Self::ShutdownFailed { .. } => "PLX-4002",
            Self::NodeUnreachable { .. } => "PLX-5001",
            Self::Io { .. } => "PLX-9001",
        }
    }

    /// Whether the failure must abort startup (vs. being handled per
    /// connection or per node while the process keeps running).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigMissing { .. } | Self::ConfigParse { .. } | Self::TlsSetup { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<toml::de::Error> for PalioxisError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for PalioxisError {
    fn from(value: serde_json::Error) -> Self {
        Self::ConfigParse {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_errors() -> Vec<PalioxisError> {
        vec![
            PalioxisError::ConfigMissing {
                what: String::new(),
            },
            PalioxisError::ConfigParse {
                context: "",
                details: String::new(),
            },
            PalioxisError::TlsSetup {
                details: String::new(),
            },
            PalioxisError::TlsHandshake {
                details: String::new(),
            },
            PalioxisError::RequestMalformed {
                details: String::new(),
            },
            PalioxisError::DpopInvalid {
                reason: DpopReason::Iat,
            },
            PalioxisError::KeyMismatch,
            PalioxisError::DestroyerIo {
                path: PathBuf::new(),
                details: String::new(),
            },
            PalioxisError::ShutdownFailed {
                details: String::new(),
            },
            PalioxisError::NodeUnreachable {
                host: String::new(),
                port: 0,
                details: String::new(),
            },
            PalioxisError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let codes: Vec<&str> = sample_errors().iter().map(PalioxisError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_plx_prefix() {
        for err in &sample_errors() {
            assert!(
                err.code().starts_with("PLX-"),
                "code {} must start with PLX-",
                err.code()
            );
        }
    }

    #[test]
    fn only_startup_errors_are_fatal() {
        assert!(
            PalioxisError::ConfigMissing {
                what: "Server.key".to_string()
            }
            .is_fatal()
        );
        assert!(
            PalioxisError::TlsSetup {
                details: String::new()
            }
            .is_fatal()
        );

        assert!(
            !PalioxisError::TlsHandshake {
                details: String::new()
            }
            .is_fatal()
        );
        assert!(!PalioxisError::KeyMismatch.is_fatal());
        assert!(
            !PalioxisError::NodeUnreachable {
                host: "10.0.0.1".to_string(),
                port: 8443,
                details: String::new()
            }
            .is_fatal()
        );
    }

    #[test]
    fn dpop_display_carries_reason_code() {
        let err = PalioxisError::DpopInvalid {
            reason: DpopReason::Iat,
        };
        let msg = err.to_string();
        assert!(msg.contains("DpopInvalid/iat"), "got: {msg}");
    }

    #[test]
    fn io_convenience_constructor() {
        let err = PalioxisError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "PLX-9001");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }
}
