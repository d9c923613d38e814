//! Room-based chat relay.
//!
//! Clients enter a room by id and the relay rebroadcasts `enterEvent`,
//! `exitEvent`, `publishEvent` and `publishExistEvent` frames to every current
//! member of that room. See `README.md` for the wire format.
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`config`] turns parsed arguments into a [`config::RelayConfig`].
//! - [`message`] defines the wire events and newline-delimited JSON framing.
//! - [`hub`] owns room membership and per-connection outboxes.
//! - [`relay`] maps each inbound event onto hub operations for one connection
//!   and drives a connection over any [`relay::FrameSource`] /
//!   [`relay::FrameSink`] pair.
//! - [`tcp`] and [`ws`] plug plain TCP and WebSocket connections into the relay.
//! - [`server`] binds both listeners and runs them until shutdown.
//! - [`client`] is a terminal participant speaking the TCP framing.

pub mod cli;
pub mod client;
pub mod config;
pub mod hub;
pub mod message;
pub mod relay;
pub mod server;
pub mod tcp;
pub mod ws;
