//! Pipeline lifecycle management.
//!
//! [`PipelineBuilder`] loads environment configuration, applies code-level
//! overrides in call order, assembles the resource, and starts the exporters.
//! The returned [`Pipeline`] owns the tracer and meter providers. There is
//! no global tracer registration; instrumentation adapters receive the handle
//! and go through it.
//!
//! Startup is fail-fast: an invalid config or an unreachable trace endpoint
//! aborts with an error and nothing runs. A failing metrics exporter only
//! logs a warning; traces are the primary signal.

use crate::config::PipelineConfig;
use crate::error::{Result, ShutdownError};
use crate::exporter::{self, ExporterRuntime};
use crate::resource::{self, ResourceAttributeSet};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider};
use std::fmt;
use std::time::Instant;

type ConfigOverride = Box<dyn FnOnce(&mut PipelineConfig)>;
type TeardownFn = Box<dyn FnOnce() -> OTelSdkResult + Send>;

/// Builder for [`Pipeline`].
///
/// Each method records one configuration override; overrides are applied
/// after the environment load, in call order, so later calls win on the same
/// field.
///
/// # Example
///
/// ```no_run
/// use otel_db_pipeline::Pipeline;
///
/// # fn main() -> otel_db_pipeline::Result<()> {
/// let mut pipeline = Pipeline::builder()
///     .endpoint("collector.internal:4317")
///     .service_name("orders")
///     .build()?;
///
/// // ... run the application ...
///
/// pipeline.shutdown().ok();
/// # Ok(())
/// # }
/// ```
#[must_use = "builders do nothing unless .build() is called"]
#[derive(Default)]
pub struct PipelineBuilder {
    overrides: Vec<ConfigOverride>,
    caller_resource: ResourceAttributeSet,
}

impl PipelineBuilder {
    /// Creates a builder with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the exporter endpoint (`stdout` prints spans locally).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.overrides
            .push(Box::new(move |c| c.exporter_otlp_endpoint = endpoint));
        self
    }

    /// Overrides the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.overrides.push(Box::new(move |c| c.service_name = name));
        self
    }

    /// Overrides the OTLP protocol hint (`grpc` or `http/protobuf`).
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        let protocol = protocol.into();
        self.overrides
            .push(Box::new(move |c| c.exporter_otlp_protocol = protocol));
        self
    }

    /// Overrides the metric exporter kind (`otlp` enables metrics).
    pub fn metrics_exporter(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        self.overrides.push(Box::new(move |c| c.metrics_exporter = kind));
        self
    }

    /// Overrides the collector identity attribute.
    pub fn collector_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.overrides.push(Box::new(move |c| c.collector_name = name));
        self
    }

    /// Overrides the sampler kind.
    pub fn sampler(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        self.overrides.push(Box::new(move |c| c.traces_sampler = kind));
        self
    }

    /// Overrides the span export batch size.
    pub fn span_batch_size(mut self, size: usize) -> Self {
        self.overrides
            .push(Box::new(move |c| c.bsp_max_export_batch_size = size));
        self
    }

    /// Overrides the metric export interval in milliseconds.
    pub fn metric_export_interval_ms(mut self, millis: u64) -> Self {
        self.overrides
            .push(Box::new(move |c| c.metric_export_interval = millis));
        self
    }

    /// Adds a caller-supplied resource attribute.
    ///
    /// Caller attributes override detected ones on key collision.
    pub fn resource_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::resource::AttributeValue>,
    ) -> Self {
        self.caller_resource.insert(key, value);
        self
    }

    /// Validates the configuration and starts the pipeline.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config (empty endpoint or service name), a
    /// resource schema conflict, or an unreachable/unbuildable trace
    /// exporter. The pipeline never runs after a failure. A metrics exporter
    /// failure is logged and does not abort startup.
    pub fn build(self) -> Result<Pipeline> {
        let mut config = PipelineConfig::load()?;
        for apply in self.overrides {
            apply(&mut config);
        }

        let assembled = resource::assemble(&config, &self.caller_resource)?;
        for pair in &assembled.invalid_pairs {
            tracing::warn!(pair = %pair, "skipping resource attribute without '='");
        }

        config.validate()?;

        let sampler = parse_sampler(&config);
        let sdk_resource = assembled.attributes.to_sdk_resource();

        // The tonic transport panics without a reactor; gRPC endpoints get a
        // pipeline-owned runtime that outlives the export threads.
        let runtime = if exporter::uses_grpc(&config) {
            Some(ExporterRuntime::start()?)
        } else {
            None
        };

        let mut teardown: Vec<TeardownFn> = Vec::new();

        let tracer_provider = exporter::build_tracer_provider(
            &config,
            sdk_resource.clone(),
            sampler,
            runtime.as_ref(),
        )?;
        let tracer = tracer_provider.as_ref().map(|provider| {
            let flush = provider.clone();
            teardown.push(Box::new(move || flush.force_flush()));
            let shutdown = provider.clone();
            teardown.push(Box::new(move || shutdown.shutdown()));
            provider.tracer(env!("CARGO_PKG_NAME"))
        });

        let meter_provider = if config.metrics_requested() {
            match exporter::build_meter_provider(&config, sdk_resource, runtime.as_ref()) {
                Ok(Some(provider)) => {
                    register_runtime_metrics(&provider);
                    let shutdown = provider.clone();
                    teardown.push(Box::new(move || shutdown.shutdown()));
                    Some(provider)
                }
                Ok(None) => None,
                Err(err) => {
                    tracing::warn!(error = %err, "metrics exporter unavailable, continuing traces-only");
                    None
                }
            }
        } else {
            None
        };

        opentelemetry::global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(Pipeline {
            tracer,
            tracer_provider,
            meter_provider,
            resource: assembled.attributes,
            teardown,
            runtime,
        })
    }
}

/// Only always-on sampling is wired; other kinds are parsed and fall back.
fn parse_sampler(config: &PipelineConfig) -> Sampler {
    match config.traces_sampler.as_str() {
        "" | "always_on" => Sampler::AlwaysOn,
        other => {
            tracing::warn!(
                sampler = other,
                argument = %config.traces_sampler_arg,
                "unsupported sampler kind, falling back to always_on"
            );
            Sampler::AlwaysOn
        }
    }
}

/// Registers the process-uptime gauge on the pipeline's meter.
fn register_runtime_metrics(provider: &SdkMeterProvider) {
    use opentelemetry::metrics::MeterProvider as _;

    let meter = provider.meter(env!("CARGO_PKG_NAME"));
    let started = Instant::now();
    let _gauge = meter
        .u64_observable_gauge("process.uptime")
        .with_unit("s")
        .with_description("Seconds since the telemetry pipeline started")
        .with_callback(move |observer| observer.observe(started.elapsed().as_secs(), &[]))
        .build();
}

/// A running telemetry pipeline.
///
/// Owns the providers and the teardown callbacks. Spans reach the exporter
/// through the tracer exposed here; submission is buffered and never blocks
/// on network I/O. Call [`shutdown`](Pipeline::shutdown) before process exit
/// to flush buffered telemetry; dropping the pipeline flushes best-effort.
pub struct Pipeline {
    tracer: Option<SdkTracer>,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    resource: ResourceAttributeSet,
    teardown: Vec<TeardownFn>,
    runtime: Option<ExporterRuntime>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("tracer_enabled", &self.tracer.is_some())
            .field("metrics_enabled", &self.meter_provider.is_some())
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// The tracer spans are created against, when tracing is enabled.
    pub fn tracer(&self) -> Option<&SdkTracer> {
        self.tracer.as_ref()
    }

    /// The tracer provider, when tracing is enabled.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }

    /// The meter provider, when metrics were requested and started.
    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.meter_provider.as_ref()
    }

    /// The assembled resource attribute set.
    pub fn resource(&self) -> &ResourceAttributeSet {
        &self.resource
    }

    /// Flushes buffered telemetry and releases the exporters.
    ///
    /// Every teardown callback runs even when an earlier one fails; failures
    /// are collected into the returned [`ShutdownError`]. A second call is a
    /// no-op returning `Ok`.
    pub fn shutdown(&mut self) -> std::result::Result<(), ShutdownError> {
        let mut errors = Vec::new();
        for stop in self.teardown.drain(..) {
            if let Err(err) = stop() {
                errors.push(err);
            }
        }
        self.tracer = None;
        self.tracer_provider = None;
        self.meter_provider = None;
        // Released after the providers so in-flight exports can finish.
        self.runtime = None;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { errors })
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for stop in self.teardown.drain(..) {
            if let Err(err) = stop() {
                tracing::warn!(error = %err, "telemetry teardown failed during drop");
            }
        }
    }
}
