//! S3-compatible object store access
//!
//! The store is consumed through a narrow surface: bucket bootstrap, put,
//! get, and prefix listing. A client is built per reconcile from the
//! credentials carried on the resource spec.

mod client;
pub mod layout;

pub use client::*;
