use serde::Deserialize;

use super::ExportersConfig;

/// Logs-specific telemetry configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct LogsConfig {
    /// Exporters configuration specific to logs, falling back to the global
    /// exporters configuration when absent.
    exporters: Option<ExportersConfig>,
}

impl LogsConfig {
    pub fn exporters(&self) -> Option<&ExportersConfig> {
        self.exporters.as_ref()
    }
}
