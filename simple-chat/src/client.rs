//! Console chat client.
//!
//! Two tasks run side by side while connected: a receiver that prints
//! whatever the relay sends, and the shell loop that reads stdin, sends chat
//! and applies `#` commands. The receiver reports a lost connection back to
//! the shell through a channel; the shell decides whether that ends the run.

use std::io;

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    command::{ClientAction, Reply, dispatch_client},
    console::{self, ConsoleLines},
    error::{ConfigError, TransportError},
    protocol::{Line, login_command, read_frame, write_line},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
}

impl ClientConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ClientArgs> for ClientConfig {
    fn from(args: &ClientArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
        }
    }
}

/// Reported by the receiver task when its connection ends on the relay's
/// side. `generation` identifies which connection it was.
#[derive(Debug)]
pub enum ClientEvent {
    Closed { generation: u64 },
    Failed { generation: u64, error: io::Error },
}

impl ClientEvent {
    fn generation(&self) -> u64 {
        match self {
            ClientEvent::Closed { generation } | ClientEvent::Failed { generation, .. } => {
                *generation
            }
        }
    }
}

struct ActiveConnection {
    generation: u64,
    writer: OwnedWriteHalf,
    receiver: JoinHandle<()>,
}

pub struct ChatClient {
    identity: String,
    config: ClientConfig,
    connection: Option<ActiveConnection>,
    generation: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ChatClient {
    pub fn new(
        identity: impl Into<String>,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let client = Self {
            identity: identity.into(),
            config,
            connection: None,
            generation: 0,
            events,
        };
        (client, events_rx)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn set_host(&mut self, host: impl Into<String>) -> Result<(), ConfigError> {
        if self.is_connected() {
            return Err(ConfigError::HostWhileConnected);
        }
        self.config.host = host.into();
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if self.is_connected() {
            return Err(ConfigError::PortWhileConnected);
        }
        self.config.port = port;
        Ok(())
    }

    /// Opens a connection and sends the login line for it, exactly once.
    /// Does nothing if a connection is already open.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        let addr = self.config.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, &login_command(&self.identity)).await?;

        self.generation += 1;
        let receiver = tokio::spawn(receive(reader, self.generation, self.events.clone()));
        self.connection = Some(ActiveConnection {
            generation: self.generation,
            writer,
            receiver,
        });
        debug!(%addr, identity = %self.identity, "connected and logged in");
        Ok(())
    }

    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(TransportError::NotConnected)?;
        write_line(&mut connection.writer, text).await?;
        Ok(())
    }

    /// Closes the active connection. Calling it while disconnected is a
    /// no-op.
    pub async fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.receiver.abort();
        if let Err(error) = connection.writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
    }

    /// Whether `event` concerns the connection currently open. Events from
    /// a connection the operator already closed are stale.
    pub fn is_current(&self, event: &ClientEvent) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.generation == event.generation())
    }

    pub async fn apply(&mut self, action: ClientAction) -> Result<Reply, TransportError> {
        let reply = match action {
            ClientAction::Quit => {
                self.disconnect().await;
                return Ok(Reply::Quit);
            }
            ClientAction::Logoff => {
                self.disconnect().await;
                "logged off".to_string()
            }
            ClientAction::SetHost(host) => match self.set_host(host) {
                Ok(()) => format!("host set to: {}", self.host()),
                Err(error) => error.to_string(),
            },
            ClientAction::SetPort(port) => match self.set_port(port) {
                Ok(()) => format!("port set to: {port}"),
                Err(error) => error.to_string(),
            },
            ClientAction::Login => {
                self.connect().await?;
                self.connected_banner()
            }
            ClientAction::GetHost => format!("current host: {}", self.host()),
            ClientAction::GetPort => format!("current port: {}", self.port()),
        };
        Ok(Reply::Info(reply))
    }

    fn connected_banner(&self) -> String {
        format!("connected to {} as {}", self.config.addr(), self.identity)
    }
}

async fn receive(
    reader: OwnedReadHalf,
    generation: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut lines = BufReader::new(reader).lines();
    let event = loop {
        match read_frame(&mut lines).await {
            Ok(Some(line)) => {
                if let Err(error) = console::write_stdout(&format!("> {line}")).await {
                    warn!(?error, "failed to display relay message");
                }
            }
            Ok(None) => break ClientEvent::Closed { generation },
            Err(error) => break ClientEvent::Failed { generation, error },
        }
    };
    let _ = events.send(event);
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let config = ClientConfig::from(&args);
    let (mut client, mut events) = ChatClient::new(args.login_id, config);

    client.connect().await?;
    console::notice(&client.connected_banner()).await?;

    let mut input = console::stdin_lines();
    let result = run_shell(&mut client, &mut events, &mut input).await;
    client.disconnect().await;

    result
}

async fn run_shell(
    client: &mut ChatClient,
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    input: &mut ConsoleLines,
) -> Result<()> {
    loop {
        select! {
            line = read_frame(input) => match line? {
                Some(line) => {
                    if !handle_console_line(client, &line).await? {
                        console::notice("leaving chat").await?;
                        break;
                    }
                }
                None => break,
            },
            Some(event) = events.recv() => {
                if !client.is_current(&event) {
                    continue;
                }
                match event {
                    ClientEvent::Closed { .. } => {
                        console::notice("connection closed by relay").await?;
                        break;
                    }
                    ClientEvent::Failed { error, .. } => {
                        console::alert("relay connection failed").await?;
                        return Err(TransportError::Io(error).into());
                    }
                }
            }
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

/// Returns whether the shell should keep running.
async fn handle_console_line(client: &mut ChatClient, line: &str) -> Result<bool> {
    let command = match Line::parse(line) {
        Line::Command(command) => command,
        Line::Chat(text) => {
            if let Err(error) = client.send(text).await {
                console::alert("could not send message to relay, terminating client").await?;
                return Err(error.into());
            }
            return Ok(true);
        }
    };

    let action = match dispatch_client(&command, client.is_connected()) {
        Ok(action) => action,
        Err(rejection) => {
            console::alert(&rejection.to_string()).await?;
            return Ok(true);
        }
    };

    match client.apply(action).await? {
        Reply::Info(message) => {
            console::notice(&message).await?;
            Ok(true)
        }
        Reply::Quit => Ok(false),
    }
}
