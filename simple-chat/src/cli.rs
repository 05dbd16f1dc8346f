use clap::{Args, Parser, Subcommand};

pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, broadcasting chat between logged-in clients.
    Relay(RelayArgs),
    /// Connect to a relay and chat under a login id.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Interface to bind.
    #[arg(long, default_value = DEFAULT_BIND_HOST)]
    pub host: String,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Identity announced to the relay on every connection.
    #[arg(value_parser = parse_login_id)]
    pub login_id: String,

    /// Relay host.
    #[arg(default_value = DEFAULT_HOST)]
    pub host: String,

    /// Relay port.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

fn parse_login_id(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("login id cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}
