//! linehub-client library entry point.
//!
//! Re-exports the public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod client;

pub use client::{Client, ClientConfig, ClientEvent, ClientState};
