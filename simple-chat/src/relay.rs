//! The relay: login gate, broadcast and operator shell.
//!
//! [`ChatHub`] is the [`ConnectionHandler`] the listener drives. It keeps the
//! registry current and pushes every inbound line through the session's
//! handshake. [`Relay`] owns the listening state the operator controls from
//! the console (`#start`, `#stop`, `#close`, ...).

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, atomic::AtomicU64},
};

use anyhow::{Context, Result};
use tokio::select;
use tracing::{info, warn};

use crate::{
    cli::RelayArgs,
    command::{RelayAction, Reply, dispatch_relay},
    console::{self, ConsoleLines},
    error::{ConfigError, ProtocolViolation, TransportError},
    protocol::{ANNOUNCEMENT_PREFIX, Line, read_frame},
    registry::ConnectionRegistry,
    router::BroadcastRouter,
    server::{Connection, ConnectionHandler, Flow, Listener},
    session::{Inbound, Session},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl RelayConfig {
    fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&RelayArgs> for RelayConfig {
    fn from(args: &RelayArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
        }
    }
}

pub struct ChatHub {
    registry: Arc<ConnectionRegistry>,
    router: BroadcastRouter,
}

impl ChatHub {
    pub fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(Arc::clone(&registry));
        Self { registry, router }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    fn reject(
        &self,
        session: &Session,
        connection: &Connection,
        violation: ProtocolViolation,
    ) -> Flow {
        warn!(
            peer = %session.peer(),
            identity = session.identity().unwrap_or("-"),
            %violation,
            "protocol violation, closing connection"
        );
        // Best effort: the peer may already be gone.
        let _ = connection.send(violation.to_string());
        Flow::Close
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandler for ChatHub {
    fn on_connected(&self, connection: &Connection) {
        info!(peer = %connection.peer(), session = connection.id(), "client connected");
        self.registry.register(connection.clone());
    }

    fn on_message(&self, session: &mut Session, connection: &Connection, line: &str) -> Flow {
        match session.accept_line(line) {
            Inbound::LoggedIn(identity) => {
                info!(peer = %session.peer(), "client logged in as {identity}");
                Flow::Continue
            }
            Inbound::Chat(text) => match self.router.route(session, text) {
                Ok(_) => Flow::Continue,
                Err(violation) => {
                    session.terminate();
                    self.reject(session, connection, violation)
                }
            },
            Inbound::Rejected(violation) => self.reject(session, connection, violation),
            Inbound::Ignored => Flow::Close,
        }
    }

    fn on_disconnected(&self, session: &Session) {
        self.registry.unregister(session.id());
        info!(
            peer = %session.peer(),
            identity = session.identity().unwrap_or("-"),
            "client disconnected"
        );
    }

    fn on_error(&self, session: &Session, error: &io::Error) {
        warn!(peer = %session.peer(), ?error, "dropping session after transport error");
    }
}

pub struct Relay {
    config: RelayConfig,
    hub: Arc<ChatHub>,
    ids: Arc<AtomicU64>,
    listener: Option<Listener>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            hub: Arc::new(ChatHub::new()),
            ids: Arc::new(AtomicU64::new(1)),
            listener: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Address actually bound, which differs from the configured port when
    /// that port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Listener::local_addr)
    }

    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if self.is_listening() {
            return Err(ConfigError::PortWhileListening);
        }
        self.config.port = port;
        Ok(())
    }

    /// Starts accepting connections. Already listening is not an error.
    pub async fn start(&mut self) -> Result<SocketAddr, TransportError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let listener = Listener::bind(
            &self.config.bind_addr(),
            Arc::clone(&self.hub),
            Arc::clone(&self.ids),
        )
        .await?;
        let addr = listener.local_addr();
        info!("relay listening for connections on {addr}");
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Stops accepting new connections; live sessions are untouched.
    /// Returns whether the relay was listening.
    pub async fn stop(&mut self) -> bool {
        let Some(listener) = self.listener.take() else {
            return false;
        };
        listener.shutdown().await;
        info!("relay has stopped listening for connections");
        true
    }

    /// Stops listening and disconnects every session.
    pub async fn close(&mut self) -> usize {
        self.stop().await;
        let disconnected = self.hub.registry().disconnect_all();
        info!(disconnected, "relay closed");
        disconnected
    }

    pub fn announce(&self, text: &str) -> usize {
        self.hub.router().announce(text)
    }

    pub async fn apply(&mut self, action: RelayAction) -> Result<Reply, TransportError> {
        let reply = match action {
            RelayAction::Quit => {
                self.close().await;
                return Ok(Reply::Quit);
            }
            RelayAction::Stop => {
                self.stop().await;
                "stopped listening for new clients".to_string()
            }
            RelayAction::Close => {
                let disconnected = self.close().await;
                format!("relay closed, {disconnected} client(s) disconnected")
            }
            RelayAction::Start => {
                let addr = self.start().await?;
                format!("listening on {addr}")
            }
            RelayAction::SetPort(port) => match self.set_port(port) {
                Ok(()) => format!("port set to: {port}"),
                Err(error) => error.to_string(),
            },
            RelayAction::GetPort => format!("current port: {}", self.port()),
        };
        Ok(Reply::Info(reply))
    }
}

pub async fn run(args: RelayArgs) -> Result<()> {
    let mut relay = Relay::new(RelayConfig::from(&args));
    relay
        .start()
        .await
        .context("could not listen for clients")?;

    let mut input = console::stdin_lines();
    run_shell(&mut relay, &mut input).await?;
    relay.close().await;

    Ok(())
}

async fn run_shell(relay: &mut Relay, input: &mut ConsoleLines) -> Result<()> {
    let mut console_open = true;

    loop {
        select! {
            line = read_frame(input), if console_open => match line {
                Ok(Some(line)) => {
                    if handle_console_line(relay, &line).await? == Reply::Quit {
                        break;
                    }
                }
                Ok(None) => {
                    info!("console closed, relay keeps running until ctrl-c");
                    console_open = false;
                }
                Err(error) => {
                    warn!(?error, "console read failed, relay keeps running until ctrl-c");
                    console_open = false;
                }
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    Ok(())
}

async fn handle_console_line(relay: &mut Relay, line: &str) -> Result<Reply> {
    let command = match Line::parse(line) {
        Line::Command(command) => command,
        Line::Chat(text) => {
            relay.announce(text);
            let echo = format!("{ANNOUNCEMENT_PREFIX}{text}");
            console::write_stdout(&echo).await?;
            return Ok(Reply::Info(echo));
        }
    };

    let action = match dispatch_relay(&command, relay.is_listening()) {
        Ok(action) => action,
        Err(rejection) => {
            console::alert(&rejection.to_string()).await?;
            return Ok(Reply::Info(rejection.to_string()));
        }
    };

    match relay.apply(action).await {
        Ok(Reply::Info(message)) => {
            console::notice(&message).await?;
            Ok(Reply::Info(message))
        }
        Ok(Reply::Quit) => Ok(Reply::Quit),
        Err(error) => {
            // Transport failures on the relay never end the process.
            warn!(%error, "relay command failed");
            console::alert(&error.to_string()).await?;
            Ok(Reply::Info(error.to_string()))
        }
    }
}
