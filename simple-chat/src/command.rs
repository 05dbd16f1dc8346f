//! Console command parsing for the client and relay shells.
//!
//! Both shells share the same syntax: a line starting with `#` is a
//! command, the first word is the verb and the rest is its argument.
//! Each role has its own verb table and checks its own preconditions
//! against a snapshot of the shell's state, so dispatch itself never
//! mutates anything. The shell applies the returned action.
//!
//! Rejections are never fatal. An unknown verb or a violated precondition
//! produces a message for the operator and leaves everything as it was.

use thiserror::Error;

use crate::{
    error::{ConfigError, parse_port},
    protocol::CommandLine,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    Quit,
    Logoff,
    SetHost(String),
    SetPort(u16),
    Login,
    GetHost,
    GetPort,
}

/// What a shell reports back after applying an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Info(String),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    Quit,
    Stop,
    Close,
    Start,
    SetPort(u16),
    GetPort,
}

/// Resolves a client command. `connected` is whether the client currently
/// holds a relay connection.
pub fn dispatch_client(
    command: &CommandLine<'_>,
    connected: bool,
) -> Result<ClientAction, CommandError> {
    match command.verb {
        "quit" => Ok(ClientAction::Quit),
        "logoff" => Ok(ClientAction::Logoff),
        "sethost" => {
            if connected {
                return Err(ConfigError::HostWhileConnected.into());
            }
            let host = command
                .first_arg()
                .ok_or(ConfigError::MissingArgument("#sethost <host>"))?;
            Ok(ClientAction::SetHost(host.to_string()))
        }
        "setport" => {
            if connected {
                return Err(ConfigError::PortWhileConnected.into());
            }
            Ok(ClientAction::SetPort(port_argument(command)?))
        }
        "login" => {
            if connected {
                return Err(ConfigError::AlreadyConnected.into());
            }
            Ok(ClientAction::Login)
        }
        "gethost" => Ok(ClientAction::GetHost),
        "getport" => Ok(ClientAction::GetPort),
        _ => Err(CommandError::Unknown(command.raw.to_string())),
    }
}

/// Resolves a relay command. `listening` is whether the relay is currently
/// accepting connections.
pub fn dispatch_relay(
    command: &CommandLine<'_>,
    listening: bool,
) -> Result<RelayAction, CommandError> {
    match command.verb {
        "quit" => Ok(RelayAction::Quit),
        "stop" => Ok(RelayAction::Stop),
        "close" => Ok(RelayAction::Close),
        "start" => {
            if listening {
                return Err(ConfigError::AlreadyListening.into());
            }
            Ok(RelayAction::Start)
        }
        "setport" => {
            if listening {
                return Err(ConfigError::PortWhileListening.into());
            }
            Ok(RelayAction::SetPort(port_argument(command)?))
        }
        "getport" => Ok(RelayAction::GetPort),
        _ => Err(CommandError::Unknown(command.raw.to_string())),
    }
}

fn port_argument(command: &CommandLine<'_>) -> Result<u16, ConfigError> {
    let raw = command
        .first_arg()
        .ok_or(ConfigError::MissingArgument("#setport <port>"))?;
    parse_port(raw)
}
