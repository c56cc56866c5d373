//! Environment-derived pipeline configuration.
//!
//! Configuration is loaded with figment in two layers (later overrides
//! earlier):
//! 1. Compiled-in defaults
//! 2. Environment variables with the `OTEL_` prefix
//!
//! Code-level overrides supplied through [`PipelineBuilder`] are applied on
//! top of the extracted struct, in call order.
//!
//! # Supported environment variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Exporter endpoint URL, or `stdout` |
//! | `OTEL_SERVICE_NAME` | Logical service name |
//! | `OTEL_TRACES_EXPORTER` | Trace exporter kind (`otlp`) |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `grpc` or `http/protobuf` |
//! | `OTEL_TRACES_SAMPLER` | Sampler kind (only `always_on` is wired) |
//! | `OTEL_TRACES_SAMPLER_ARG` | Sampler argument |
//! | `OTEL_METRICS_EXPORTER` | Metric exporter kind (`otlp` enables metrics) |
//! | `OTEL_COLLECTOR_NAME` | Collector identity resource attribute |
//! | `OTEL_RESOURCE_ATTRIBUTES` | Comma-separated `key=value` pairs |
//! | `OTEL_BSP_MAX_EXPORT_BATCH_SIZE` | Span export batch size |
//! | `OTEL_METRIC_EXPORT_INTERVAL` | Metric export interval in milliseconds |
//!
//! [`PipelineBuilder`]: crate::PipelineBuilder

use crate::error::{PipelineError, Result};
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "OTEL_";

/// Aggregated pipeline configuration.
///
/// Validity requires a non-empty endpoint and service name; every other
/// field may stay empty without aborting startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// OTLP endpoint URL, `stdout` for local debugging, or empty to disable.
    pub exporter_otlp_endpoint: String,
    /// Logical service name attached as `service.name`.
    pub service_name: String,
    /// Trace exporter kind. Only `otlp` is recognized.
    pub traces_exporter: String,
    /// OTLP transport hint: `grpc` (default) or `http/protobuf`.
    pub exporter_otlp_protocol: String,
    /// Sampler kind. Parsed, but only `always_on` is wired.
    pub traces_sampler: String,
    /// Sampler argument, unused until further samplers are wired.
    pub traces_sampler_arg: String,
    /// Metric exporter kind; `otlp` enables the metrics signal.
    pub metrics_exporter: String,
    /// Collector identity, attached as the `collector.name` resource
    /// attribute when non-empty.
    pub collector_name: String,
    /// Free-form resource attributes as comma-separated `key=value` pairs.
    pub resource_attributes: String,
    /// Maximum number of spans per export batch.
    pub bsp_max_export_batch_size: usize,
    /// Interval between metric exports, in milliseconds.
    pub metric_export_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exporter_otlp_endpoint: String::new(),
            service_name: String::new(),
            traces_exporter: "otlp".to_string(),
            exporter_otlp_protocol: "grpc".to_string(),
            traces_sampler: "always_on".to_string(),
            traces_sampler_arg: String::new(),
            metrics_exporter: "none".to_string(),
            collector_name: String::new(),
            resource_attributes: String::new(),
            bsp_max_export_batch_size: 512,
            metric_export_interval: 15_000,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from defaults and `OTEL_`-prefixed environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if extraction fails (for example a
    /// non-numeric batch size).
    pub fn load() -> Result<Self> {
        let config = Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)
            .map_err(PipelineError::Config)?;
        Ok(config)
    }

    /// Checks the validity invariant: non-empty endpoint and service name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigInvalid`] naming the missing field.
    /// A pipeline with an invalid config must never start.
    pub fn validate(&self) -> Result<()> {
        if self.exporter_otlp_endpoint.is_empty() {
            return Err(PipelineError::ConfigInvalid("empty exporter endpoint"));
        }
        if self.service_name.is_empty() {
            return Err(PipelineError::ConfigInvalid("empty service name"));
        }
        Ok(())
    }

    /// Whether the metrics signal was requested.
    pub fn metrics_requested(&self) -> bool {
        self.metrics_exporter == "otlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.exporter_otlp_endpoint, "");
        assert_eq!(config.service_name, "");
        assert_eq!(config.traces_exporter, "otlp");
        assert_eq!(config.exporter_otlp_protocol, "grpc");
        assert_eq!(config.traces_sampler, "always_on");
        assert_eq!(config.metrics_exporter, "none");
        assert_eq!(config.bsp_max_export_batch_size, 512);
        assert_eq!(config.metric_export_interval, 15_000);
        assert!(!config.metrics_requested());
    }

    #[test]
    fn test_load_from_env() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("collector:4317")),
                ("OTEL_SERVICE_NAME", Some("orders")),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", Some("http/protobuf")),
                ("OTEL_METRICS_EXPORTER", Some("otlp")),
                ("OTEL_METRIC_EXPORT_INTERVAL", Some("30000")),
            ],
            || {
                let config = PipelineConfig::load().unwrap();
                assert_eq!(config.exporter_otlp_endpoint, "collector:4317");
                assert_eq!(config.service_name, "orders");
                assert_eq!(config.exporter_otlp_protocol, "http/protobuf");
                assert!(config.metrics_requested());
                assert_eq!(config.metric_export_interval, 30_000);
                // Untouched fields keep their defaults.
                assert_eq!(config.traces_exporter, "otlp");
            },
        );
    }

    #[test]
    fn test_validate_requires_endpoint_and_service_name() {
        let mut config = PipelineConfig::default();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::ConfigInvalid("empty exporter endpoint"))
        ));

        config.exporter_otlp_endpoint = "stdout".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::ConfigInvalid("empty service name"))
        ));

        config.service_name = "orders".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tolerates_other_empty_fields() {
        let config = PipelineConfig {
            exporter_otlp_endpoint: "stdout".to_string(),
            service_name: "orders".to_string(),
            traces_sampler: String::new(),
            traces_sampler_arg: String::new(),
            collector_name: String::new(),
            resource_attributes: String::new(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
