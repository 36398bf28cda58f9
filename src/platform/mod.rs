//! Platform abstraction: mounts, utilities, shutdown command.

pub mod pal;
