#![forbid(unsafe_code)]

//! Palioxis — remotely triggered data-destruction agent.
//!
//! A long-lived server process that, upon receipt of an authenticated
//! "destroy" command, irreversibly overwrites a configured set of files and
//! directories and then halts the host. A companion client dispatches that
//! command to a fleet of such agents.
//!
//! Three subsystems carry the weight:
//! 1. **Control channel** — mutual TLS carrying a minimal HTTP/1.1-shaped
//!    framing, layered with a DPoP proof-of-possession token bound to the
//!    presenting client certificate key
//! 2. **Destruction engine** — pluggable, pass-based secure erasure walking
//!    a frozen set of targets with partial-failure accounting
//! 3. **Self-destruct sequencing** — authentication, acknowledgement,
//!    erasure, host shutdown, in that order

pub mod client;
pub mod core;
pub mod destroyer;
pub mod logger;
pub mod net;
pub mod platform;
pub mod prelude;
pub mod server;
