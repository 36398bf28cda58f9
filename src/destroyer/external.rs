//! External erasure utilities: `shred`, `wipe`, and Windows `cipher`.
//!
//! Each runner turns a non-zero exit (or a spawn failure) into a `Failed`
//! outcome carrying the reason; callers record it and move on.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::destroyer::outcome::DestroyOutcome;
use crate::destroyer::overwrite;

/// `shred -n <passes> -z -f -u <path>`: overwrite, zero, force, unlink.
pub(crate) fn shred_file(path: &Path, passes: u8) -> DestroyOutcome {
    let mut cmd = Command::new("shred");
    cmd.arg("-n")
        .arg(passes.max(1).to_string())
        .arg("-z")
        .arg("-f")
        .arg("-u")
        .arg(path);
    run_utility(cmd, "shred")
}

/// `wipe -rf <path>`: recursive, force.
pub(crate) fn wipe_file(path: &Path) -> DestroyOutcome {
    let mut cmd = Command::new("wipe");
    cmd.arg("-rf").arg(path);
    run_utility(cmd, "wipe")
}

/// Windows-native erasure: one random overwrite pass, then `cipher /w:`
/// over the containing directory to scrub slack space, then unlink.
/// A cipher failure downgrades to plain overwrite-and-unlink rather than
/// aborting the path.
pub(crate) fn cipher_file(path: &Path, size: u64) -> DestroyOutcome {
    if size > 0 {
        if let Err(err) = overwrite::overwrite_file(path, size, 1) {
            return DestroyOutcome::Failed(format!("overwrite: {err}"));
        }
    }

    if let Some(dir) = path.parent() {
        let mut cmd = Command::new("cipher");
        cmd.arg(format!("/w:{}", dir.display()));
        // Slack-space scrub is best effort; the overwrite above already hit
        // the file's own blocks.
        let _ = run_utility(cmd, "cipher");
    }

    match fs::remove_file(path) {
        Ok(()) => DestroyOutcome::Destroyed,
        Err(err) => DestroyOutcome::Failed(format!("unlink: {err}")),
    }
}

fn run_utility(mut cmd: Command, name: &str) -> DestroyOutcome {
    let status = cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).status();
    match status {
        Ok(status) if status.success() => DestroyOutcome::Destroyed,
        Ok(status) => DestroyOutcome::Failed(format!("{name} exited with {status}")),
        Err(err) => DestroyOutcome::Failed(format!("{name} failed to start: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_utility_reports_failed_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("victim");
        std::fs::write(&path, "x").unwrap();

        let mut cmd = Command::new("palioxis-test-no-such-utility");
        cmd.arg(&path);
        let outcome = run_utility(cmd, "palioxis-test-no-such-utility");
        assert!(outcome.is_failure());
    }

    #[cfg(unix)]
    #[test]
    fn shred_removes_file_when_available() {
        // Only meaningful on hosts that ship coreutils shred.
        if Command::new("shred").arg("--version").stdout(Stdio::null()).stderr(Stdio::null()).status().is_err() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.txt");
        std::fs::write(&path, "sensitive").unwrap();

        let outcome = shred_file(&path, 1);
        assert_eq!(outcome, DestroyOutcome::Destroyed);
        assert!(!path.exists());
    }
}
