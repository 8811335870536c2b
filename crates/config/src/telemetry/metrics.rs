use serde::Deserialize;

use super::ExportersConfig;

/// Metrics-specific telemetry configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Exporters configuration specific to metrics, falling back to the
    /// global exporters configuration when absent.
    exporters: Option<ExportersConfig>,
}

impl MetricsConfig {
    pub fn exporters(&self) -> Option<&ExportersConfig> {
        self.exporters.as_ref()
    }
}
