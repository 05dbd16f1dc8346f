//! Line-oriented chat relay with a login gate, and its console client.
//!
//! Clients connect over TCP, claim an identity with `#login <id>`, and every
//! line they send afterwards is broadcast to all connected clients as
//! `"<id>: <line>"`. Both programs also accept `#` commands on their
//! console.
//!
//! - [`cli`] parses the command line for relay and client modes.
//! - [`protocol`] splits lines into commands and chat, and frames them on
//!   the wire.
//! - [`session`] holds per-connection state and the login handshake.
//! - [`registry`] and [`router`] track live connections and fan chat out.
//! - [`server`] runs the accept loop and drives a [`server::ConnectionHandler`].
//! - [`command`] resolves console commands for either shell.
//! - [`relay`] and [`client`] are the two programs.

pub mod cli;
pub mod client;
pub mod command;
pub mod console;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod session;
