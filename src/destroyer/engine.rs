//! The destruction engine: post-order walk plus per-file erasure dispatch.
//!
//! Walk invariants:
//! - Children are destroyed before their parent directory is removed
//! - Symlinks are unlinked, never traversed; the link target is untouched
//! - Special files (sockets, FIFOs, devices) are unlinked, not overwritten
//! - Zero-size files are unlinked directly
//! - Iteration never short-circuits: a failure is recorded and the walk
//!   continues with the next path

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Instant;

use crate::core::settings::DestroyerSettings;
use crate::core::targets::Target;
use crate::destroyer::outcome::{DestroyOutcome, DestroyReport};
use crate::destroyer::{DestroyerKind, external, overwrite};
use crate::logger::audit::{AuditLog, AuditRecord, Event, Severity};

/// Executes a destroy run with one active [`DestroyerKind`].
pub struct Destroyer {
    kind: DestroyerKind,
    log: AuditLog,
}

impl Destroyer {
    #[must_use]
    pub fn new(kind: DestroyerKind, log: AuditLog) -> Self {
        Self { kind, log }
    }

    /// Build the destroyer the settings ask for, with platform substitution.
    #[must_use]
    pub fn from_settings(settings: &DestroyerSettings, log: &AuditLog) -> Self {
        Self::new(DestroyerKind::select(settings, log), log.clone())
    }

    #[must_use]
    pub const fn kind(&self) -> DestroyerKind {
        self.kind
    }

    /// Destroy every target in order. The aggregate is the union of all
    /// per-path outcomes; an empty target list yields a zero-failure report.
    #[must_use]
    pub fn destroy_paths(&self, targets: &[Target]) -> DestroyReport {
        let start = Instant::now();
        let mut report = DestroyReport::new();

        for target in targets {
            self.destroy_registered(&target.path, &mut report);
        }

        report.duration = start.elapsed();
        self.log.record(
            AuditRecord::new(Event::DestroyCompleted, Severity::Info)
                .with_detail(report.summary())
                .with_ok(report.is_success()),
        );
        report
    }

    /// Destroy a directory tree post-order, recording one outcome per
    /// filesystem object plus one for the directory itself.
    pub fn destroy_dir(&self, dir: &Path, report: &mut DestroyReport) {
        match fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries {
                    let Ok(entry) = entry else {
                        self.note(dir, report, DestroyOutcome::Failed(
                            "directory entry unreadable".to_string(),
                        ));
                        continue;
                    };
                    let child = entry.path();
                    match fs::symlink_metadata(&child) {
                        Ok(meta) if meta.file_type().is_dir() => {
                            self.destroy_dir(&child, report);
                        }
                        Ok(meta) => {
                            let outcome = self.destroy_node(&child, &meta);
                            self.note(&child, report, outcome);
                        }
                        Err(err) if err.kind() == ErrorKind::NotFound => {
                            self.note(&child, report, DestroyOutcome::SkippedMissing);
                        }
                        Err(err) => {
                            self.note(&child, report, DestroyOutcome::Failed(format!("stat: {err}")));
                        }
                    }
                }
            }
            Err(err) => {
                self.note(dir, report, DestroyOutcome::Failed(format!("read_dir: {err}")));
                return;
            }
        }

        // Children handled; now the directory itself.
        let outcome = match fs::remove_dir(dir) {
            Ok(()) => DestroyOutcome::Destroyed,
            Err(err) => DestroyOutcome::Failed(format!("rmdir: {err}")),
        };
        self.note(dir, report, outcome);
    }

    /// Destroy a single non-directory path.
    #[must_use]
    pub fn destroy_file(&self, path: &Path) -> DestroyOutcome {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_dir() => {
                DestroyOutcome::Failed("is a directory".to_string())
            }
            Ok(meta) => self.destroy_node(path, &meta),
            Err(err) if err.kind() == ErrorKind::NotFound => DestroyOutcome::SkippedMissing,
            Err(err) => DestroyOutcome::Failed(format!("stat: {err}")),
        }
    }

    fn destroy_registered(&self, path: &Path, report: &mut DestroyReport) {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_dir() => self.destroy_dir(path, report),
            Ok(meta) => {
                let outcome = self.destroy_node(path, &meta);
                self.note(path, report, outcome);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.note(path, report, DestroyOutcome::SkippedMissing);
            }
            Err(err) => {
                self.note(path, report, DestroyOutcome::Failed(format!("stat: {err}")));
            }
        }
    }

    /// Erase one non-directory filesystem object according to the active
    /// kind. The metadata has already been taken with `symlink_metadata`,
    /// so a symlink is still a symlink here.
    fn destroy_node(&self, path: &Path, meta: &fs::Metadata) -> DestroyOutcome {
        let file_type = meta.file_type();

        if file_type.is_symlink() || is_special(&file_type) {
            return unlink(path);
        }
        if meta.len() == 0 {
            return unlink(path);
        }

        match self.kind {
            DestroyerKind::FastOverwrite { passes } => {
                match overwrite::overwrite_file(path, meta.len(), passes) {
                    Ok(()) => unlink(path),
                    Err(err) => DestroyOutcome::Failed(format!("overwrite: {err}")),
                }
            }
            DestroyerKind::ShredExternal { passes } => external::shred_file(path, passes),
            DestroyerKind::WipeExternal => external::wipe_file(path),
            DestroyerKind::WindowsCipher => external::cipher_file(path, meta.len()),
        }
    }

    fn note(&self, path: &Path, report: &mut DestroyReport, outcome: DestroyOutcome) {
        match &outcome {
            DestroyOutcome::Destroyed => {
                self.log
                    .record(AuditRecord::new(Event::PathDestroyed, Severity::Info).with_path(path));
            }
            DestroyOutcome::SkippedMissing => {
                self.log.record(
                    AuditRecord::new(Event::PathSkipped, Severity::Warning)
                        .with_path(path)
                        .with_detail("path does not exist"),
                );
            }
            DestroyOutcome::Failed(reason) => {
                self.log.record(
                    AuditRecord::new(Event::PathFailed, Severity::Critical)
                        .with_path(path)
                        .with_detail(reason.clone()),
                );
            }
        }
        report.record(path, outcome);
    }
}

fn unlink(path: &Path) -> DestroyOutcome {
    match fs::remove_file(path) {
        Ok(()) => DestroyOutcome::Destroyed,
        Err(err) => DestroyOutcome::Failed(format!("unlink: {err}")),
    }
}

#[cfg(unix)]
fn is_special(file_type: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_fifo()
        || file_type.is_socket()
        || file_type.is_block_device()
        || file_type.is_char_device()
}

#[cfg(not(unix))]
fn is_special(_file_type: &fs::FileType) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::targets::TargetRegistry;

    fn fast(passes: u8) -> Destroyer {
        Destroyer::new(DestroyerKind::FastOverwrite { passes }, AuditLog::discard())
    }

    #[test]
    fn empty_target_list_yields_zero_failures() {
        let report = fast(1).destroy_paths(&[]);
        assert!(report.is_success());
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn missing_target_is_skipped_not_failed() {
        let mut registry = TargetRegistry::new();
        registry.register("/definitely/not/here");
        let frozen = registry.freeze();

        let report = fast(1).destroy_paths(&frozen);
        assert!(report.is_success());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.destroyed, 0);
    }

    #[test]
    fn zero_size_file_is_unlinked_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        let outcome = fast(3).destroy_file(&path);
        assert_eq!(outcome, DestroyOutcome::Destroyed);
        assert!(!path.exists());
    }

    #[test]
    fn file_target_is_overwritten_and_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.db");
        fs::write(&path, vec![7u8; 2048]).unwrap();

        let mut registry = TargetRegistry::new();
        registry.register(&path);
        let report = fast(2).destroy_paths(&registry.freeze());

        assert!(report.is_success());
        assert_eq!(report.destroyed, 1);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_unlinked_and_target_survives() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside.txt");
        fs::write(&outside, "must survive").unwrap();

        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();
        let link = tree.join("link");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let mut report = DestroyReport::new();
        fast(1).destroy_dir(&tree, &mut report);

        assert!(report.is_success());
        assert!(!tree.exists());
        assert_eq!(fs::read_to_string(&outside).unwrap(), "must survive");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_not_traversed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("keep.txt"), "keep").unwrap();

        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();
        std::os::unix::fs::symlink(&outside, tree.join("dirlink")).unwrap();

        let mut report = DestroyReport::new();
        fast(1).destroy_dir(&tree, &mut report);

        assert!(!tree.exists());
        assert!(outside.join("keep.txt").exists());
    }

    #[test]
    fn directory_removed_only_after_children() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("sub").join("deep.txt"), "x").unwrap();
        fs::write(tree.join("top.txt"), "y").unwrap();

        let mut registry = TargetRegistry::new();
        registry.register(&tree);
        let report = fast(1).destroy_paths(&registry.freeze());

        assert!(report.is_success());
        assert!(!tree.exists());

        // Post-order: every child outcome precedes its parent's record.
        let position = |p: &Path| {
            report
                .outcomes
                .iter()
                .position(|o| o.path == p)
                .unwrap_or_else(|| panic!("no outcome for {}", p.display()))
        };
        assert!(position(&tree.join("sub").join("deep.txt")) < position(&tree.join("sub")));
        assert!(position(&tree.join("sub")) < position(&tree));
        assert!(position(&tree.join("top.txt")) < position(&tree));
    }

    #[test]
    fn destroy_file_on_directory_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = fast(1).destroy_file(dir.path());
        assert!(outcome.is_failure());
    }
}
