//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use palioxis::prelude::*;
//! ```

// Core
pub use crate::core::errors::{PalioxisError, Result};
pub use crate::core::settings::Settings;
pub use crate::core::targets::{FrozenTargets, Target, TargetKind, TargetRegistry};

// Destroyer
pub use crate::destroyer::outcome::{DestroyOutcome, DestroyReport, PathOutcome};
pub use crate::destroyer::{Destroyer, DestroyerKind};

// Control channel
pub use crate::net::codec::{Request, Response, Status};
pub use crate::net::dpop::{DpopVerifier, ProofSigner};
pub use crate::net::tls::{PeerIdentity, TlsClient, TlsServer};

// Server / client
pub use crate::client::dispatch::{Dispatcher, FleetResult, NodeOutcome};
pub use crate::server::Server;

// Logging
pub use crate::logger::audit::{AuditLog, Event, Severity};
