use std::net::{AddrParseError, SocketAddr};

use common_config::{env_or, service_port};

pub const PORT_ENV: &str = "PORT";
pub const HOST_ENV: &str = "HOST";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or(HOST_ENV, DEFAULT_HOST),
            port: service_port(PORT_ENV, DEFAULT_PORT),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}
