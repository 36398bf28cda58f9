//! Pluggable secure-erasure of files and directory trees.
//!
//! The destroyer set is small and closed, so a tagged variant beats a trait
//! hierarchy: one kind is selected per run and dispatch happens per file,
//! not per call site.

pub mod engine;
pub mod external;
pub mod outcome;
pub mod overwrite;

pub use engine::Destroyer;

use crate::core::settings::DestroyerSettings;
use crate::logger::audit::{AuditLog, Event};

/// The active erasure strategy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyerKind {
    /// In-process overwrite with random data, then unlink.
    FastOverwrite {
        /// Overwrite passes per file.
        passes: u8,
    },
    /// Host `shred` utility (`-n <passes> -z -f -u`).
    ShredExternal {
        /// Overwrite passes handed to shred.
        passes: u8,
    },
    /// Host `wipe` utility, recursive.
    WipeExternal,
    /// One random overwrite plus `cipher /w:` slack scrub.
    WindowsCipher,
}

impl DestroyerKind {
    /// Map a configured module name to a kind.
    ///
    /// Unknown names fall back to `FastOverwrite(3)`. A kind unavailable on
    /// the current platform is substituted with the platform-native one and
    /// a warning; selection never fails.
    #[must_use]
    pub fn select(settings: &DestroyerSettings, log: &AuditLog) -> Self {
        let requested = settings.module.trim().to_ascii_lowercase();
        let kind = match requested.as_str() {
            "fast" => Self::FastOverwrite {
                passes: settings.fast_passes,
            },
            "shred" => Self::ShredExternal {
                passes: settings.shred_passes,
            },
            "wipe" => Self::WipeExternal,
            "windows" => Self::WindowsCipher,
            other => {
                log.warn(
                    Event::DestroyStarted,
                    format!("unknown destroyer module `{other}`, falling back to fast"),
                );
                Self::FastOverwrite { passes: 3 }
            }
        };

        kind.for_platform(settings, log)
    }

    fn for_platform(self, settings: &DestroyerSettings, log: &AuditLog) -> Self {
        if cfg!(windows) {
            if matches!(self, Self::ShredExternal { .. } | Self::WipeExternal) {
                log.warn(
                    Event::DestroyStarted,
                    format!("{} unavailable on Windows, using windows cipher", self.name()),
                );
                return Self::WindowsCipher;
            }
        } else if self == Self::WindowsCipher {
            log.warn(
                Event::DestroyStarted,
                "windows cipher unavailable on this platform, using fast overwrite",
            );
            return Self::FastOverwrite {
                passes: settings.fast_passes,
            };
        }
        self
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FastOverwrite { .. } => "fast",
            Self::ShredExternal { .. } => "shred",
            Self::WipeExternal => "wipe",
            Self::WindowsCipher => "windows",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(module: &str) -> DestroyerSettings {
        DestroyerSettings {
            module: module.to_string(),
            fast_passes: 4,
            shred_passes: 7,
            shutdown_on_partial_failure: true,
        }
    }

    #[test]
    fn known_names_map_to_kinds() {
        let log = AuditLog::discard();
        assert_eq!(
            DestroyerKind::select(&settings("fast"), &log),
            DestroyerKind::FastOverwrite { passes: 4 }
        );
        #[cfg(not(windows))]
        {
            assert_eq!(
                DestroyerKind::select(&settings("shred"), &log),
                DestroyerKind::ShredExternal { passes: 7 }
            );
            assert_eq!(
                DestroyerKind::select(&settings("wipe"), &log),
                DestroyerKind::WipeExternal
            );
        }
    }

    #[test]
    fn unknown_name_falls_back_to_fast_three() {
        let log = AuditLog::discard();
        assert_eq!(
            DestroyerKind::select(&settings("degausser"), &log),
            DestroyerKind::FastOverwrite { passes: 3 }
        );
    }

    #[test]
    fn names_are_case_insensitive() {
        let log = AuditLog::discard();
        assert_eq!(
            DestroyerKind::select(&settings("  FAST "), &log),
            DestroyerKind::FastOverwrite { passes: 4 }
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn windows_kind_substituted_on_unix() {
        let log = AuditLog::discard();
        assert_eq!(
            DestroyerKind::select(&settings("windows"), &log),
            DestroyerKind::FastOverwrite { passes: 4 }
        );
    }

    #[cfg(windows)]
    #[test]
    fn external_kinds_substituted_on_windows() {
        let log = AuditLog::discard();
        assert_eq!(
            DestroyerKind::select(&settings("shred"), &log),
            DestroyerKind::WindowsCipher
        );
        assert_eq!(
            DestroyerKind::select(&settings("wipe"), &log),
            DestroyerKind::WindowsCipher
        );
    }
}
