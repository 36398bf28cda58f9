//! The self-destruct sequence: erasure, encrypted-volume hook, host halt.
//!
//! By the time this module runs, the acknowledgement has already been
//! flushed to the trigger connection. Ordering from here: destroyer over the
//! frozen registry, then the encrypted-volume hook, then host shutdown.
//! Shutdown is attempted even on partial destruction failure unless the
//! policy knob says otherwise: denying the adversary beats waiting for a
//! clean run.

#![allow(missing_docs)]

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::errors::{PalioxisError, Result};
use crate::core::targets::Target;
use crate::destroyer::Destroyer;
use crate::destroyer::outcome::DestroyReport;
use crate::logger::audit::{AuditLog, AuditRecord, Event, Severity};
use crate::platform::pal;

/// Where removable encrypted volumes get mounted.
const MEDIA_ROOT: &str = "/media";

/// Marker substring identifying TrueCrypt mounts under the media root.
const TRUECRYPT_MARKER: &str = "truecrypt";

/// Seam for halting the host, so tests and drills can observe the trigger
/// without losing the machine.
pub trait HostPower: Send + Sync {
    /// Halt the host. Returns only if the halt could not be issued.
    fn halt(&self) -> Result<()>;
}

/// Issues the platform shutdown command.
#[derive(Debug, Default)]
pub struct SystemPower;

impl HostPower for SystemPower {
    fn halt(&self) -> Result<()> {
        let (program, args) = pal::shutdown_command();
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| PalioxisError::ShutdownFailed {
                details: format!("{program} failed to start: {err}"),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(PalioxisError::ShutdownFailed {
                details: format!("{program} exited with {status}"),
            })
        }
    }
}

/// Counts halt requests instead of issuing them.
#[derive(Debug, Default)]
pub struct NoopPower {
    halts: AtomicUsize,
}

impl NoopPower {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn halt_count(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }
}

impl HostPower for NoopPower {
    fn halt(&self) -> Result<()> {
        self.halts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Runs the post-acknowledgement sequence.
pub struct SelfDestructSequence<'a> {
    destroyer: &'a Destroyer,
    targets: &'a [Target],
    shutdown_on_partial_failure: bool,
    power: &'a dyn HostPower,
    log: &'a AuditLog,
}

impl<'a> SelfDestructSequence<'a> {
    #[must_use]
    pub fn new(
        destroyer: &'a Destroyer,
        targets: &'a [Target],
        shutdown_on_partial_failure: bool,
        power: &'a dyn HostPower,
        log: &'a AuditLog,
    ) -> Self {
        Self {
            destroyer,
            targets,
            shutdown_on_partial_failure,
            power,
            log,
        }
    }

    /// Execute erasure, the encrypted-volume hook, and host shutdown.
    /// Never returns early: every step runs regardless of earlier failures,
    /// except shutdown when the policy knob forbids it on partial failure.
    pub fn execute(&self) -> DestroyReport {
        self.log.record(
            AuditRecord::new(Event::DestroyStarted, Severity::Critical)
                .with_detail(format!("{} target(s)", self.targets.len())),
        );
        if self.targets.is_empty() {
            self.log
                .warn(Event::DestroyStarted, "no targets registered for destruction");
        }

        let mut report = self.destroyer.destroy_paths(self.targets);
        self.dismount_encrypted_volumes(&mut report);

        if report.is_success() || self.shutdown_on_partial_failure {
            self.log.record(
                AuditRecord::new(Event::ShutdownInvoked, Severity::Critical)
                    .with_detail(report.summary()),
            );
            if let Err(err) = self.power.halt() {
                // Logged, not propagated: the process exits normally so a
                // supervisor can notice.
                self.log.critical(Event::ShutdownFailed, err.to_string());
            }
        } else {
            self.log.record(
                AuditRecord::new(Event::ShutdownSkipped, Severity::Critical)
                    .with_detail(format!("partial failure: {}", report.summary())),
            );
        }

        report
    }

    /// If the host `truecrypt` utility is present and any mount under
    /// `/media` contains `truecrypt`, destroy each such mount with the same
    /// destroyer and then dismount all volumes. Silent when absent.
    fn dismount_encrypted_volumes(&self, report: &mut DestroyReport) {
        if pal::utility_on_path("truecrypt").is_none() {
            return;
        }

        let mounts = match pal::mount_points() {
            Ok(mounts) => mounts,
            Err(err) => {
                self.log
                    .warn(Event::VolumeHook, format!("mount enumeration failed: {err}"));
                return;
            }
        };

        let media = Path::new(MEDIA_ROOT);
        let volumes: Vec<_> = mounts
            .iter()
            .filter(|m| {
                m.path.starts_with(media)
                    && m.path.to_string_lossy().to_lowercase().contains(TRUECRYPT_MARKER)
            })
            .collect();
        if volumes.is_empty() {
            return;
        }

        for volume in &volumes {
            self.log.record(
                AuditRecord::new(Event::VolumeHook, Severity::Critical)
                    .with_path(&volume.path)
                    .with_detail("destroying encrypted volume contents"),
            );
            self.destroyer.destroy_dir(&volume.path, report);
        }

        let dismount = Command::new("truecrypt")
            .arg("-d")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match dismount {
            Ok(status) if status.success() => {
                self.log.info(Event::VolumeHook, "volumes dismounted");
            }
            Ok(status) => {
                self.log
                    .warn(Event::VolumeHook, format!("dismount exited with {status}"));
            }
            Err(err) => {
                self.log
                    .warn(Event::VolumeHook, format!("dismount failed to start: {err}"));
            }
        }
    }
}
