//! The agent server: serial accept loop and per-connection state machine.
//!
//! Connection states: `Accepted -> ParsedRequest -> Authenticated ->
//! Executing -> Terminated`. Any failure sends the matching status and jumps
//! straight to `Terminated`. The only trigger path is `POST /destroy` with a
//! valid DPoP proof bound to the mTLS peer key and a body byte-equal to the
//! configured destroy key.
//!
//! The loop is deliberately serial: the trigger is a rare one-shot event and
//! serial handling removes TOCTOU windows around the self-destruct
//! transition. Once destruction begins no further connection is accepted.

#![allow(missing_docs)]

pub mod signals;
pub mod trigger;

use std::fmt;
use std::io::{ErrorKind, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::errors::{PalioxisError, Result};
use crate::core::settings::{
    CertificatePaths, DestroyerSettings, ServerSettings, Settings,
};
use crate::core::targets::{FrozenTargets, TargetRegistry};
use crate::destroyer::Destroyer;
use crate::logger::audit::{AuditLog, AuditRecord, Event, Severity};
use crate::net::codec::{self, Response, Status};
use crate::net::dpop::DpopVerifier;
use crate::net::tls::{ServerStream, TlsServer};
use crate::server::signals::SignalHandler;
use crate::server::trigger::{HostPower, SelfDestructSequence, SystemPower};

/// Acknowledgement sent on the trigger path, flushed before any destruction.
pub const ACK_PHRASE: &str = "Signal accepted. Initiating self-destruct.";

/// How often the idle accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Per-connection protocol state, tracked for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Accepted,
    ParsedRequest,
    Authenticated,
    Executing,
    Terminated,
}

impl ConnState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::ParsedRequest => "parsed-request",
            Self::Authenticated => "authenticated",
            Self::Executing => "executing",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handled connection means for the accept loop.
enum Verdict {
    Rejected,
    Triggered,
}

/// The Palioxis agent server.
pub struct Server {
    settings: ServerSettings,
    destroyer_settings: DestroyerSettings,
    tls: TlsServer,
    verifier: DpopVerifier,
    targets: FrozenTargets,
    signals: SignalHandler,
    power: Arc<dyn HostPower>,
    log: AuditLog,
}

impl Server {
    /// Build the server from settings: bind the listener, freeze the target
    /// registry, register signal handlers. Failures here are fatal.
    pub fn new(settings: &Settings, log: AuditLog) -> Result<Self> {
        let server_settings = ServerSettings::from_settings(settings)?;
        let certs = CertificatePaths::from_settings(settings);
        let destroyer_settings = DestroyerSettings::from_settings(settings);
        let registry = TargetRegistry::from_settings(settings)?;
        let tls = TlsServer::bind(&server_settings.host, server_settings.port, &certs)?;

        Ok(Self {
            settings: server_settings,
            destroyer_settings,
            tls,
            verifier: DpopVerifier::new(),
            targets: registry.freeze(),
            signals: SignalHandler::new(),
            power: Arc::new(SystemPower),
            log,
        })
    }

    /// Replace the host power seam (drills and tests).
    pub fn set_power(&mut self, power: Arc<dyn HostPower>) {
        self.power = power;
    }

    /// A handle that can request a clean idle shutdown.
    #[must_use]
    pub fn signal_handler(&self) -> SignalHandler {
        self.signals.clone()
    }

    /// The bound listener address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tls.local_addr()
    }

    /// Serve until a destroy trigger completes or shutdown is requested.
    ///
    /// The listener polls in non-blocking mode so a SIGINT/SIGTERM is
    /// noticed within one poll interval even with no client in sight
    /// (signal handlers are installed with SA_RESTART, so a blocking accept
    /// would otherwise resume and swallow the interruption).
    pub fn run(&self) -> Result<()> {
        let addr = self.local_addr()?;
        self.log.record(
            AuditRecord::new(Event::ServerStarted, Severity::Info).with_detail(format!(
                "listening on {addr}, {} target(s), destroyer `{}`",
                self.targets.len(),
                self.destroyer_settings.module
            )),
        );

        if let Err(err) = self.tls.set_nonblocking(true) {
            self.log
                .warn(Event::ServerStarted, format!("non-blocking accept unavailable: {err}"));
        }

        loop {
            if self.signals.should_shutdown() {
                self.log
                    .info(Event::ServerStopped, "shutdown signal received while idle");
                return Ok(());
            }

            let (sock, _) = match self.tls.accept_tcp() {
                Ok(pair) => pair,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.log
                        .warn(Event::ConnectionHandled, format!("accept failed: {err}"));
                    continue;
                }
            };

            let stream = match self.tls.handshake(sock) {
                Ok(stream) => stream,
                Err(err) => {
                    // Network-level failure: local, logged, connection dropped.
                    self.log
                        .warn(Event::ConnectionHandled, err.to_string());
                    continue;
                }
            };

            match self.handle_connection(stream) {
                Verdict::Rejected => {}
                Verdict::Triggered => {
                    // Acknowledgement is on the wire; the accept loop ends
                    // here so destruction never races a new connection.
                    let destroyer =
                        Destroyer::from_settings(&self.destroyer_settings, &self.log);
                    let report = SelfDestructSequence::new(
                        &destroyer,
                        &self.targets,
                        self.destroyer_settings.shutdown_on_partial_failure,
                        self.power.as_ref(),
                        &self.log,
                    )
                    .execute();
                    self.log.record(
                        AuditRecord::new(Event::ServerStopped, Severity::Critical)
                            .with_detail(format!("self-destruct complete: {}", report.summary()))
                            .with_ok(report.is_success()),
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Drive one connection through the state machine.
    fn handle_connection(&self, mut stream: ServerStream) -> Verdict {
        let peer_cn = stream.peer().common_name.clone();
        let mut state = ConnState::Accepted;

        let request = match codec::read_request(&mut stream) {
            Ok(request) => {
                state = ConnState::ParsedRequest;
                request
            }
            Err(err) => {
                return self.reject(
                    stream,
                    &peer_cn,
                    state,
                    Status::BadRequest,
                    "Malformed Request",
                    &err.to_string(),
                );
            }
        };

        let Some(token) = request.header("DPoP").map(ToString::to_string) else {
            return self.reject(
                stream,
                &peer_cn,
                state,
                Status::Unauthorized,
                "Missing DPoP Proof",
                "no DPoP header",
            );
        };

        let expected_url = format!(
            "https://{}:{}{}",
            self.settings.host,
            self.advertised_port(),
            request.path
        );
        let proof = match self.verifier.verify(
            &token,
            &request.method,
            &expected_url,
            &stream.peer().spki_der,
        ) {
            Ok(proof) => {
                state = ConnState::Authenticated;
                proof
            }
            Err(err) => {
                self.log.record(
                    AuditRecord::new(Event::DpopRejected, Severity::Warning)
                        .with_peer(peer_cn.clone())
                        .with_detail(err.to_string()),
                );
                return self.reject(
                    stream,
                    &peer_cn,
                    state,
                    Status::Unauthorized,
                    "Invalid DPoP Proof",
                    &err.to_string(),
                );
            }
        };

        if request.method != "POST" || request.path != "/destroy" {
            return self.reject(
                stream,
                &peer_cn,
                state,
                Status::MethodNotAllowed,
                "Unsupported Request",
                &format!("{} {}", request.method, request.path),
            );
        }

        if request.body_trimmed() != self.settings.key.as_bytes() {
            let err = PalioxisError::KeyMismatch;
            return self.reject(
                stream,
                &peer_cn,
                state,
                Status::Forbidden,
                "Invalid Key",
                &err.to_string(),
            );
        }

        state = ConnState::Executing;

        // Invariant: the 200 must be fully flushed and the connection closed
        // before the destroyer opens anything. If the acknowledgement cannot
        // be delivered the trigger is abandoned, matching the contract that
        // the operator learns of acceptance first.
        let ack = Response::new(Status::Ok, ACK_PHRASE);
        let sent = stream
            .write_all(&ack.render())
            .and_then(|()| stream.flush());
        if let Err(err) = sent {
            self.log.record(
                AuditRecord::new(Event::ConnectionHandled, Severity::Critical)
                    .with_peer(peer_cn)
                    .with_ok(false)
                    .with_detail(format!("{state}: acknowledgement write failed: {err}")),
            );
            stream.finish();
            return Verdict::Rejected;
        }
        stream.finish();

        self.log.record(
            AuditRecord::new(Event::ConnectionHandled, Severity::Critical)
                .with_peer(peer_cn)
                .with_ok(true)
                .with_detail(format!(
                    "destroy accepted, key thumbprint {}",
                    proof.thumbprint.as_deref().unwrap_or("<none>")
                )),
        );
        Verdict::Triggered
    }

    fn reject(
        &self,
        mut stream: ServerStream,
        peer_cn: &str,
        state: ConnState,
        status: Status,
        message: &str,
        detail: &str,
    ) -> Verdict {
        let response = Response::new(status, message);
        let _ = stream
            .write_all(&response.render())
            .and_then(|()| stream.flush());
        stream.finish();

        self.log.record(
            AuditRecord::new(Event::ConnectionHandled, Severity::Warning)
                .with_peer(peer_cn)
                .with_ok(false)
                .with_detail(format!(
                    "{state} -> {}: {} ({detail})",
                    ConnState::Terminated,
                    status.code()
                )),
        );
        Verdict::Rejected
    }

    /// Port for DPoP `htu` comparison: the configured port, or the actually
    /// bound one when configured as 0 (tests, ephemeral deployments).
    fn advertised_port(&self) -> u16 {
        if self.settings.port != 0 {
            self.settings.port
        } else {
            self.tls.local_addr().map_or(0, |addr| addr.port())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_states_render_for_logs() {
        let states = [
            ConnState::Accepted,
            ConnState::ParsedRequest,
            ConnState::Authenticated,
            ConnState::Executing,
            ConnState::Terminated,
        ];
        let rendered: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            rendered,
            vec![
                "accepted",
                "parsed-request",
                "authenticated",
                "executing",
                "terminated"
            ]
        );
    }

    #[test]
    fn ack_phrase_mentions_self_destruct() {
        assert!(ACK_PHRASE.contains("self-destruct"));
    }
}
