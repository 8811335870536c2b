use serde::Deserialize;

use super::ExportersConfig;

fn default_sampling() -> f64 {
    1.0
}

fn default_parent_based_sampler() -> bool {
    true
}

/// Tracing-specific telemetry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracingConfig {
    /// Exporters configuration specific to traces, falling back to the
    /// global exporters configuration when absent.
    exporters: Option<ExportersConfig>,

    /// Fraction of traces to sample, in `[0.0, 1.0]`.
    #[serde(default = "default_sampling")]
    pub sampling: f64,

    /// Whether to respect a sampled parent context instead of re-sampling.
    #[serde(default = "default_parent_based_sampler")]
    pub parent_based_sampler: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            exporters: None,
            sampling: default_sampling(),
            parent_based_sampler: default_parent_based_sampler(),
        }
    }
}

impl TracingConfig {
    pub fn exporters(&self) -> Option<&ExportersConfig> {
        self.exporters.as_ref()
    }
}
