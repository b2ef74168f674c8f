//! Generic resource codec
//!
//! Listing, serialization, and structural cleanup for the Kubernetes
//! objects the operator backs up and restores. The per-kind handler table
//! in `collector` is the extension point for new kinds.

mod cleanup;
mod collector;

pub use cleanup::*;
pub use collector::*;
