//! Per-connection state on the relay and the login gate in front of chat.
//!
//! Every session starts `Unauthenticated`. The first line it sends must be
//! `#login <identity>`; anything else, a login without an identity, or a
//! second login ends the session. Any line starting with `#login` counts as
//! a login attempt. Once authenticated, every non-login line
//! is chat.

use std::net::SocketAddr;

use crate::{error::ProtocolViolation, protocol::Line};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unauthenticated,
    Authenticated,
    Terminated,
}

/// What the relay should do with one inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// The session just claimed this identity. Nothing is sent back.
    LoggedIn(&'a str),
    /// Authenticated chat payload, ready for the router.
    Chat(&'a str),
    /// The session broke the protocol and is now terminated.
    Rejected(ProtocolViolation),
    /// The session was already terminated; the line is dropped.
    Ignored,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    identity: Option<String>,
    state: HandshakeState,
}

impl Session {
    pub fn new(id: SessionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            identity: None,
            state: HandshakeState::Unauthenticated,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == HandshakeState::Authenticated
    }

    /// Runs one inbound line through the handshake.
    pub fn accept_line<'a>(&mut self, line: &'a str) -> Inbound<'a> {
        if self.state == HandshakeState::Terminated {
            return Inbound::Ignored;
        }

        let login = Line::parse(line).login_identity();
        match (self.state, login) {
            (HandshakeState::Unauthenticated, Some("")) => {
                self.reject(ProtocolViolation::InvalidLogin)
            }
            (HandshakeState::Unauthenticated, Some(identity)) => {
                self.identity = Some(identity.to_string());
                self.state = HandshakeState::Authenticated;
                Inbound::LoggedIn(identity)
            }
            (HandshakeState::Unauthenticated, None) => self.reject(ProtocolViolation::NotLoggedIn),
            (HandshakeState::Authenticated, Some(_)) => {
                self.reject(ProtocolViolation::AlreadyLoggedIn)
            }
            (HandshakeState::Authenticated, None) => Inbound::Chat(line),
            (HandshakeState::Terminated, _) => Inbound::Ignored,
        }
    }

    /// Moves the session to its terminal state. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        self.state = HandshakeState::Terminated;
    }

    fn reject<'a>(&mut self, violation: ProtocolViolation) -> Inbound<'a> {
        self.terminate();
        Inbound::Rejected(violation)
    }
}
