//! Error types shared by the relay and the client.
//!
//! The three enums mirror how each failure is handled:
//!
//! - [`ProtocolViolation`] ends the offending session only. Its `Display`
//!   output is exactly the line sent back to the peer.
//! - [`ConfigError`] is a local operator mistake; it is printed and nothing
//!   changes.
//! - [`TransportError`] is an I/O failure. The client shuts down on it, the
//!   relay drops the affected session and keeps going.

use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("ERROR: You must login first.")]
    NotLoggedIn,
    #[error("ERROR: You are already logged in.")]
    AlreadyLoggedIn,
    #[error("ERROR: Invalid login command. Usage: #login <loginId>")]
    InvalidLogin,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("usage: {0}")]
    MissingArgument(&'static str),
    #[error("cannot set host while connected")]
    HostWhileConnected,
    #[error("cannot set port while connected")]
    PortWhileConnected,
    #[error("cannot change port while listening")]
    PortWhileListening,
    #[error("already connected")]
    AlreadyConnected,
    #[error("already listening")]
    AlreadyListening,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("could not listen for clients on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("not connected to a relay")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("peer is not reading, connection dropped")]
    Lagging,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parses a port argument the way both shells and the CLI accept it.
pub fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidPort(raw.trim().to_string()))
}
