use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::domain::descriptor::is_valid_segment;
use crate::registry::DEFAULT_HEALTH_TIMEOUT;

pub const DEFAULT_HOST_NAME: &str = "app";

#[derive(Debug, Clone)]
pub struct Config {
    pub host_name: String,
    pub api_token: Option<String>,
    pub bind_addr: String,
    pub bind_port: u16,
    pub disabled_providers: Vec<String>,
    pub health_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_HOST_NAME must match ^[a-z][a-z0-9-]*$")]
    InvalidHostName,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_HEALTH_TIMEOUT_MS must be a positive number of milliseconds")]
    InvalidHealthTimeout,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host_name =
            non_empty_var("MCP_HOST_NAME").unwrap_or_else(|| DEFAULT_HOST_NAME.to_string());
        if !is_valid_segment(&host_name) {
            return Err(ConfigError::InvalidHostName);
        }

        let api_token = non_empty_var("MCP_API_TOKEN");
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let disabled_providers = non_empty_var("MCP_DISABLED_PROVIDERS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let health_timeout = non_empty_var("MCP_HEALTH_TIMEOUT_MS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|millis| *millis > 0)
                    .map(Duration::from_millis)
                    .ok_or(ConfigError::InvalidHealthTimeout)
            })
            .transpose()?
            .unwrap_or(DEFAULT_HEALTH_TIMEOUT);

        let config = Self {
            host_name,
            api_token,
            bind_addr,
            bind_port,
            disabled_providers,
            health_timeout,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    /// Overrides the bind address and port given on the command line.
    pub fn with_bind(
        mut self,
        bind_addr: Option<String>,
        bind_port: Option<u16>,
    ) -> Result<Self, ConfigError> {
        if let Some(bind_addr) = bind_addr {
            self.bind_addr = bind_addr;
        }
        if let Some(bind_port) = bind_port {
            self.bind_port = bind_port;
        }
        let _ = self.bind_socket()?;
        Ok(self)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
