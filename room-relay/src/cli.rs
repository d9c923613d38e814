use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the room relay for TCP and WebSocket clients.
    Serve(ServeArgs),
    /// Enter a room on a running relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address for newline-delimited JSON clients. Use port 0 for an ephemeral port.
    #[arg(long, env = "RELAY_LISTEN", default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Address for the HTTP server that upgrades `/ws` to WebSocket.
    #[arg(long, env = "RELAY_HTTP", default_value = "127.0.0.1:8080")]
    pub http: SocketAddr,

    /// Frames buffered per connection before further frames are dropped.
    #[arg(long, env = "RELAY_OUTBOX_CAPACITY", default_value_t = 128)]
    pub outbox_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name shown to the other members of the room.
    #[arg(long)]
    pub user: String,

    /// Room to enter.
    #[arg(long)]
    pub room: String,

    /// Address of the relay's TCP listener.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,
}
