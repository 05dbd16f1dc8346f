use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    error::ProtocolViolation,
    protocol::{ANNOUNCEMENT_PREFIX, ChatMessage},
    registry::ConnectionRegistry,
    session::Session,
};

/// Fans chat out to every registered connection, the sender included.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcasts `text` as `"<identity>: <text>"` and returns how many
    /// connections accepted it.
    ///
    /// Only authenticated sessions may route; anyone else gets
    /// [`ProtocolViolation::NotLoggedIn`] and nothing is sent.
    pub fn route(&self, session: &Session, text: &str) -> Result<usize, ProtocolViolation> {
        let sender = match session.identity() {
            Some(identity) if session.is_authenticated() => identity,
            _ => return Err(ProtocolViolation::NotLoggedIn),
        };

        let message = ChatMessage {
            sender: sender.to_string(),
            payload: text.to_string(),
        };
        info!("message received: {message}");
        Ok(self.broadcast(&message.to_string()))
    }

    /// Sends an operator message from the relay console to every
    /// connection, logged in or not.
    pub fn announce(&self, text: &str) -> usize {
        let line = format!("{ANNOUNCEMENT_PREFIX}{text}");
        info!("{line}");
        self.broadcast(&line)
    }

    fn broadcast(&self, line: &str) -> usize {
        let mut delivered = 0;
        self.registry.for_each(|connection| match connection.send(line) {
            Ok(()) => delivered += 1,
            Err(error) => {
                debug!(peer = %connection.peer(), %error, "skipping recipient");
            }
        });
        delivered
    }
}
