//! Audit log: append-only line-delimited JSON.
//!
//! Each line is a self-contained JSON object, assembled in memory and written
//! atomically via `write_all` so a tailing process never sees a partial line.
//!
//! Degradation chain — the agent must never fail because logging failed:
//! 1. Primary file path
//! 2. stderr with `[PLX-AUDIT]` prefix
//! 3. Silent discard

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity level for audit events. Ordered so a minimum level can gate
/// what reaches the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Parse a configured level name; unknown names default to `Info` so a
    /// typo never silences the log.
    #[must_use]
    pub fn from_level_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "WARNING" | "WARN" => Self::Warning,
            "CRITICAL" | "ERROR" => Self::Critical,
            _ => Self::Info,
        }
    }
}

/// Audit event types covering the agent lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    ConfigLoaded,
    ServerStarted,
    ServerStopped,
    ConnectionHandled,
    DpopRejected,
    DestroyStarted,
    PathDestroyed,
    PathSkipped,
    PathFailed,
    DestroyCompleted,
    VolumeHook,
    ShutdownInvoked,
    ShutdownSkipped,
    ShutdownFailed,
    NodeDispatched,
    FleetCompleted,
    SignalReceived,
}

/// A single audit line. Optional fields are omitted from the JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: Event,
    pub severity: Severity,
    /// Peer common name (server side) or `host:port` (client side).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Affected filesystem path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Whether the action succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

impl AuditRecord {
    /// Create a record stamped with the current UTC time.
    #[must_use]
    pub fn new(event: Event, severity: Severity) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
            severity,
            peer: None,
            path: None,
            detail: None,
            ok: None,
        }
    }

    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub const fn with_ok(mut self, ok: bool) -> Self {
        self.ok = Some(ok);
        self
    }
}

/// Degradation state of the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    File,
    Stderr,
    Discard,
}

struct AuditWriter {
    state: SinkState,
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    min_severity: Severity,
}

impl AuditWriter {
    fn open(path: &Path, min_severity: Severity) -> Self {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self {
                state: SinkState::File,
                writer: Some(BufWriter::new(file)),
                path: Some(path.to_path_buf()),
                min_severity,
            },
            Err(err) => {
                eprintln!(
                    "[PLX-AUDIT] cannot open {}: {err}; logging to stderr",
                    path.display()
                );
                Self::stderr(min_severity)
            }
        }
    }

    const fn stderr(min_severity: Severity) -> Self {
        Self {
            state: SinkState::Stderr,
            writer: None,
            path: None,
            min_severity,
        }
    }

    const fn discard() -> Self {
        Self {
            state: SinkState::Discard,
            writer: None,
            path: None,
            min_severity: Severity::Info,
        }
    }

    fn write_record(&mut self, record: &AuditRecord) {
        if record.severity < self.min_severity {
            return;
        }
        let Ok(mut line) = serde_json::to_string(record) else {
            return;
        };
        line.push('\n');

        match self.state {
            SinkState::File => {
                if self.write_line(&line).is_err() {
                    eprintln!(
                        "[PLX-AUDIT] write to {} failed; degrading to stderr",
                        self.path
                            .as_deref()
                            .map_or_else(|| "<audit log>".to_string(), |p| p.display().to_string())
                    );
                    self.state = SinkState::Stderr;
                    self.writer = None;
                    eprint!("[PLX-AUDIT] {line}");
                }
            }
            SinkState::Stderr => eprint!("[PLX-AUDIT] {line}"),
            SinkState::Discard => {}
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("no writer"))?;
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }
}

/// Shareable audit log handle. Clones share one sink; writes are serialized
/// through a mutex so parallel dispatch workers can log safely.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Mutex<AuditWriter>>,
}

impl AuditLog {
    /// Log everything to a file, degrading to stderr if it cannot be opened.
    #[must_use]
    pub fn to_file(path: &Path) -> Self {
        Self::to_file_with_level(path, Severity::Info)
    }

    /// Log to a file, dropping records below `min_severity`.
    #[must_use]
    pub fn to_file_with_level(path: &Path, min_severity: Severity) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditWriter::open(path, min_severity))),
        }
    }

    /// Log to stderr only.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditWriter::stderr(Severity::Info))),
        }
    }

    /// Drop everything (tests and library embedders that log elsewhere).
    #[must_use]
    pub fn discard() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditWriter::discard())),
        }
    }

    /// Write one record.
    pub fn record(&self, record: AuditRecord) {
        self.inner.lock().write_record(&record);
    }

    /// Convenience: info-level event with a detail string.
    pub fn info(&self, event: Event, detail: impl Into<String>) {
        self.record(AuditRecord::new(event, Severity::Info).with_detail(detail));
    }

    /// Convenience: warning-level event with a detail string.
    pub fn warn(&self, event: Event, detail: impl Into<String>) {
        self.record(AuditRecord::new(event, Severity::Warning).with_detail(detail));
    }

    /// Convenience: critical-level event with a detail string.
    pub fn critical(&self, event: Event, detail: impl Into<String>) {
        self.record(AuditRecord::new(event, Severity::Critical).with_detail(detail));
    }
}
