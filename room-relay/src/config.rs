use std::net::SocketAddr;

use crate::cli::ServeArgs;

/// Runtime settings for [`crate::server::RelayServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub tcp_listen: SocketAddr,
    pub http_listen: SocketAddr,
    pub outbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tcp_listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            http_listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            outbox_capacity: 128,
        }
    }
}

impl RelayConfig {
    /// Both listeners on ephemeral loopback ports.
    pub fn ephemeral() -> Self {
        Self {
            tcp_listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            http_listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }
}

impl From<&ServeArgs> for RelayConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            tcp_listen: args.listen,
            http_listen: args.http,
            outbox_capacity: args.outbox_capacity,
        }
    }
}
