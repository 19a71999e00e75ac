//! TCP listener and per-connection limits (spec.md §6 "server:").

use serde_derive::{Deserialize, Serialize};

use crate::messages::{DEFAULT_MAX_COPY_MESSAGE_SIZE, DEFAULT_MAX_MESSAGE_SIZE};

/// Listener and framing configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Server {
    #[serde(default = "Server::default_host")]
    pub host: String,

    #[serde(default = "Server::default_port")]
    pub port: u16,

    #[serde(default = "Server::default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "Server::default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "Server::default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "Server::default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "Server::default_max_copy_message_size")]
    pub max_copy_message_size: usize,
}

impl Server {
    pub fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    pub fn default_port() -> u16 {
        5432
    }
    pub fn default_max_connections() -> usize {
        500
    }
    pub fn default_connection_timeout_ms() -> u64 {
        30_000
    }
    pub fn default_shutdown_timeout_ms() -> u64 {
        10_000
    }
    pub fn default_max_message_size() -> usize {
        DEFAULT_MAX_MESSAGE_SIZE
    }
    pub fn default_max_copy_message_size() -> usize {
        DEFAULT_MAX_COPY_MESSAGE_SIZE
    }
}

impl Default for Server {
    fn default() -> Self {
        Server {
            host: Server::default_host(),
            port: Server::default_port(),
            max_connections: Server::default_max_connections(),
            connection_timeout_ms: Server::default_connection_timeout_ms(),
            shutdown_timeout_ms: Server::default_shutdown_timeout_ms(),
            max_message_size: Server::default_max_message_size(),
            max_copy_message_size: Server::default_max_copy_message_size(),
        }
    }
}
