//! Configuration for the server host and the client connection

use std::time::Duration;

/// Per-message size ceiling in each direction (5 MiB)
pub const MAX_MESSAGE_SIZE: usize = 5 * 1024 * 1024;

/// Default port the server binds
pub const DEFAULT_PORT: u16 = 5001;

/// Default interface the server binds
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default address clients connect to
pub const DEFAULT_ADDRESS: &str = "http://localhost:5001";

/// Default time connections get to drain on shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-connection outbound queue length on the server
pub const CONNECTION_BUFFER_SIZE: usize = 32;

/// Server host settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// 0 lets the OS pick a free port
    pub port: u16,
    pub shutdown_grace: Duration,
    pub max_message_size: usize,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Client connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
        }
    }
}
