//! HTTP server configuration settings.

use std::net::SocketAddr;

use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// TLS configuration for secure connections.
    pub tls: Option<TlsServerConfig>,
    /// Health endpoint configuration.
    pub health: HealthConfig,
}

/// TLS certificate/key paths for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsServerConfig {
    /// Path to the PEM certificate chain.
    pub certificate: String,
    /// Path to the PEM private key.
    pub key: String,
}

/// Health check endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is served.
    pub enabled: bool,
    /// Optional separate listen address for the health endpoint.
    pub listen: Option<SocketAddr>,
    /// Path the health endpoint is mounted at.
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: None,
            path: "/health".to_string(),
        }
    }
}
