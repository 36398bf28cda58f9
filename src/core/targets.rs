//! Target registry: the ordered list of paths to be destroyed.
//!
//! The registry is append-only while the agent is starting up and frozen
//! (by value) before a destroy run begins, so the destruction phase can
//! never observe a mutating list. Non-existent paths are accepted at
//! registration time; they surface as per-item skips at destruction time,
//! never as an overall failure.

#![allow(missing_docs)]

use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::errors::{PalioxisError, Result};
use crate::core::settings::Settings;

/// Fallback target list file, one path per line.
pub const TARGETS_FILE: &str = "targets.txt";

/// What a registered path is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    File,
    Directory,
}

/// A single path registered for destruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: PathBuf,
    pub kind: TargetKind,
}

impl Target {
    /// Classify a path by looking at it (without following a symlink).
    /// Paths that do not exist yet are assumed to be directories, matching
    /// the `Targets.directories` configuration surface.
    #[must_use]
    pub fn classify(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_dir() => TargetKind::Directory,
            Ok(_) => TargetKind::File,
            Err(_) => TargetKind::Directory,
        };
        Self { path, kind }
    }
}

/// Ordered, append-only registry of destruction targets.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from `Targets.directories` in the settings, or,
    /// when that key is absent, from a `targets.txt` file in the working
    /// directory. An empty registry is legal (the trigger then only runs
    /// the encrypted-volume hook and shutdown).
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut registry = Self::new();

        let configured = settings.get_list("Targets", "directories");
        if configured.is_empty() {
            let fallback = Path::new(TARGETS_FILE);
            if fallback.exists() {
                let raw = fs::read_to_string(fallback)
                    .map_err(|source| PalioxisError::io(fallback, source))?;
                for line in raw.lines() {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() && !trimmed.starts_with('#') {
                        registry.register(trimmed);
                    }
                }
            }
        } else {
            for path in configured {
                registry.register(path);
            }
        }

        Ok(registry)
    }

    /// Append a target. Registration order is preserved; duplicates are
    /// kept as specified (the destroyer tolerates an already-gone path).
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.targets.push(Target::classify(path));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    /// Freeze the registry for the destroy run. Consuming `self` makes
    /// later registration a type error rather than a runtime one.
    #[must_use]
    pub fn freeze(self) -> FrozenTargets {
        FrozenTargets {
            targets: Arc::from(self.targets),
        }
    }
}

/// Immutable snapshot of the registry handed to the destruction phase.
#[derive(Debug, Clone)]
pub struct FrozenTargets {
    targets: Arc<[Target]>,
}

impl Deref for FrozenTargets {
    type Target = [Target];

    fn deref(&self) -> &[Target] {
        &self.targets
    }
}
