//! Gateway configuration structures, mapping the TOML configuration file.

#![deny(missing_docs)]

mod error;
mod http_types;
mod llm;
mod loader;
mod server;
mod telemetry;

use std::path::Path;

pub use error::Error;
pub use http_types::{HeaderName, HeaderValue};
pub use llm::{AccountConfig, ApiKeyConfig, LlmConfig, Permission};
use serde::Deserialize;
pub use server::{HealthConfig, ServerConfig, TlsServerConfig};
pub use telemetry::OtlpProtocol;
pub use telemetry::exporters::{
    ExportersConfig, GrpcHeaders, HttpHeaders, OtlpExporterConfig, OtlpGrpcConfig, OtlpHttpConfig,
};
pub use telemetry::tracing::TracingConfig;
pub use telemetry::{LogsConfig, MetricsConfig, TelemetryConfig};

/// Top-level configuration for the gateway binary.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// LLM gateway configuration settings.
    pub llm: LlmConfig,
    /// Telemetry configuration settings.
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration has at least one functional upstream account.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_has_downstreams(self)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                tls: None,
                health: HealthConfig {
                    enabled: true,
                    listen: None,
                    path: "/health",
                },
            },
            llm: LlmConfig {
                enabled: true,
                path: "/v1/messages",
                request_timeout_secs: 600,
                accounts: {},
                api_keys: {},
            },
            telemetry: TelemetryConfig {
                service_name: None,
                resource_attributes: {},
                exporters: ExportersConfig {
                    otlp: OtlpExporterConfig {
                        enabled: false,
                        endpoint: Url {
                            scheme: "http",
                            cannot_be_a_base: false,
                            username: "",
                            password: None,
                            host: Some(
                                Domain(
                                    "localhost",
                                ),
                            ),
                            port: Some(
                                4317,
                            ),
                            path: "/",
                            query: None,
                            fragment: None,
                        },
                        protocol: Grpc,
                        timeout: 60s,
                        batch_export: BatchExportConfig {
                            scheduled_delay: 5s,
                            max_queue_size: 2048,
                            max_export_batch_size: 512,
                            max_concurrent_exports: 1,
                        },
                        grpc: None,
                        http: None,
                    },
                },
                tracing: TracingConfig {
                    exporters: None,
                    sampling: 1.0,
                    parent_based_sampler: true,
                },
                metrics: MetricsConfig {
                    exporters: None,
                },
                logs: LogsConfig {
                    exporters: None,
                },
            },
        }
        "#);
    }
}
