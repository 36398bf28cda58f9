//! Fleet dispatcher: per-node mTLS connect, DPoP proof, framed request,
//! outcome classification.
//!
//! The reference behaviour is strictly sequential in file order. With
//! `Client.parallelism > 1` nodes are fanned out over a bounded worker pool;
//! each node is independent, so only the output aggregation needs care
//! (results are re-ordered back to input order).

#![allow(missing_docs)]

use std::io::{ErrorKind, Read, Write};
use std::thread;

use crossbeam_channel as channel;

use crate::client::nodes::{Node, NodeSpec};
use crate::core::errors::{PalioxisError, Result};
use crate::core::settings::{CertificatePaths, ClientSettings, Settings};
use crate::logger::audit::{AuditLog, AuditRecord, Event, Severity};
use crate::net::codec;
use crate::net::dpop::ProofSigner;
use crate::net::tls::{ClientStream, TlsClient};

/// Per-node result of a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    pub host: String,
    pub port: u16,
    pub success: bool,
    pub message: String,
}

/// Aggregate of a fleet run. The run counts as a success iff at least one
/// node accepted: the client's value is triggering as much as possible, and
/// all-or-nothing semantics would be strictly worse in this threat model.
#[derive(Debug, Clone, Default)]
pub struct FleetResult {
    pub outcomes: Vec<NodeOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl FleetResult {
    #[must_use]
    pub fn from_outcomes(outcomes: Vec<NodeOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes.len() - succeeded;
        Self {
            outcomes,
            succeeded,
            failed,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.succeeded > 0
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Processed {} node(s): {} succeeded, {} failed",
            self.outcomes.len(),
            self.succeeded,
            self.failed
        )
    }
}

/// Sends the destroy signal across a fleet of agents.
pub struct Dispatcher {
    tls: TlsClient,
    signer: ProofSigner,
    parallelism: usize,
    log: AuditLog,
}

impl Dispatcher {
    /// Build from settings: TLS dialer plus the DPoP signer over the same
    /// client key the certificate was issued for.
    pub fn new(settings: &Settings, log: AuditLog) -> Result<Self> {
        let certs = CertificatePaths::from_settings(settings);
        let client = ClientSettings::from_settings(settings);
        let tls = TlsClient::new(&certs, client.connect_timeout)?;
        let signer = ProofSigner::from_key_file(&certs.client_key)?;
        Ok(Self {
            tls,
            signer,
            parallelism: client.parallelism,
            log,
        })
    }

    /// Dispatch to every entry, valid or not, and aggregate the outcomes in
    /// input order.
    #[must_use]
    pub fn dispatch(&self, specs: &[NodeSpec]) -> FleetResult {
        let outcomes = if self.parallelism > 1 && specs.len() > 1 {
            self.dispatch_parallel(specs)
        } else {
            specs.iter().map(|spec| self.run_one(spec)).collect()
        };

        let result = FleetResult::from_outcomes(outcomes);
        self.log.record(
            AuditRecord::new(Event::FleetCompleted, Severity::Info)
                .with_detail(result.summary())
                .with_ok(result.is_success()),
        );
        result
    }

    fn dispatch_parallel(&self, specs: &[NodeSpec]) -> Vec<NodeOutcome> {
        let workers = self.parallelism.min(specs.len());
        let (work_tx, work_rx) = channel::bounded::<(usize, &NodeSpec)>(specs.len());
        let (result_tx, result_rx) = channel::unbounded::<(usize, NodeOutcome)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok((index, spec)) = work_rx.recv() {
                        let outcome = self.run_one(spec);
                        let _ = result_tx.send((index, outcome));
                    }
                });
            }

            for item in specs.iter().enumerate() {
                let _ = work_tx.send(item);
            }
            drop(work_tx);
            drop(result_tx);

            let mut slots: Vec<Option<NodeOutcome>> = specs.iter().map(|_| None).collect();
            for (index, outcome) in result_rx {
                slots[index] = Some(outcome);
            }
            slots.into_iter().flatten().collect()
        })
    }

    fn run_one(&self, spec: &NodeSpec) -> NodeOutcome {
        let outcome = match spec {
            NodeSpec::Invalid { line, raw, reason } => NodeOutcome {
                host: "unknown".to_string(),
                port: 0,
                success: false,
                message: format!("invalid entry at line {line}: {reason} ({raw})"),
            },
            NodeSpec::Valid(node) => match self.send_signal(node) {
                Ok((200, message)) => NodeOutcome {
                    host: node.host.clone(),
                    port: node.port,
                    success: true,
                    message: if message.is_empty() {
                        format!("Signal accepted by {}:{}", node.host, node.port)
                    } else {
                        message
                    },
                },
                Ok((code, message)) => NodeOutcome {
                    host: node.host.clone(),
                    port: node.port,
                    success: false,
                    message: format!("Signal rejected: {code} {message}"),
                },
                Err(err) => NodeOutcome {
                    host: node.host.clone(),
                    port: node.port,
                    success: false,
                    message: err.to_string(),
                },
            },
        };

        self.log.record(
            AuditRecord::new(Event::NodeDispatched, Severity::Info)
                .with_peer(format!("{}:{}", outcome.host, outcome.port))
                .with_ok(outcome.success)
                .with_detail(outcome.message.clone()),
        );
        outcome
    }

    /// Send one destroy signal; returns the response status and message.
    pub fn send_signal(&self, node: &Node) -> Result<(u16, String)> {
        let mut stream = self.tls.connect(&node.host, node.port)?;

        let url = format!("https://{}:{}/destroy", node.host, node.port);
        let proof = self.signer.proof("POST", &url)?;
        let request = codec::render_request(&node.host, node.port, &proof, node.key.as_bytes());

        stream
            .write_all(&request)
            .and_then(|()| stream.flush())
            .map_err(|err| PalioxisError::NodeUnreachable {
                host: node.host.clone(),
                port: node.port,
                details: format!("send: {err}"),
            })?;

        let raw = read_to_close(&mut stream);
        if raw.is_empty() {
            return Err(PalioxisError::NodeUnreachable {
                host: node.host.clone(),
                port: node.port,
                details: "connection closed without a response".to_string(),
            });
        }

        codec::parse_response(&raw)
    }
}

/// Read until the server closes the connection. The server always closes
/// after one response, so EOF (clean or abrupt) terminates the read.
fn read_to_close(stream: &mut ClientStream) -> Vec<u8> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    buf
}
