//! # linehub-core
//!
//! Shared library for LineHub containing the line-framing codec and the
//! `Connection` abstraction used on both sides of the wire.
//!
//! This crate is used by both the hub (server) and client applications.
//! It has no knowledge of who accepted or dialed the socket it is handed.
//!
//! - **`framing`** – How messages travel over the network.  Payloads are
//!   plain UTF-8 text terminated by a fixed CRLF delimiter; `FrameBuffer`
//!   reassembles complete frames from an arbitrarily fragmented byte stream.
//!
//! - **`connection`** – One live TCP socket wrapped in a receive loop, an
//!   ordered writer task, and a forward-only lifecycle state machine.
//!   Consumers observe the connection through an event channel handed in at
//!   construction time.

pub mod connection;
pub mod framing;

pub use connection::{
    ConnState, Connection, ConnectionConfig, ConnectionEvent, ConnectionId,
};
pub use framing::{decode, encode, FrameBuffer, FrameError, DELIMITER};
