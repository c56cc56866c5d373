//! Exporter selection and transport construction.
//!
//! The decision procedure maps `(endpoint, protocol hint, signal)` to one of
//! four transports: disabled, stdout pretty-printing, OTLP/gRPC, or
//! OTLP/HTTP-protobuf with an optional collector subpath. Shape resolution is
//! a pure function so the endpoint arithmetic stays unit-testable; transport
//! construction happens afterwards.
//!
//! gRPC endpoints are checked for reachability with a bounded blocking
//! connect before the exporter is built, and are dialled over a plaintext
//! channel: the pipeline performs no TLS trust evaluation for gRPC. Deploy a
//! trusted network path in front of the collector, or use `http/protobuf`
//! with an `https` endpoint.
//!
//! The tonic transport needs a Tokio reactor; [`ExporterRuntime`] carries a
//! dedicated single-worker runtime that gRPC exporters are built inside and
//! that stays alive for the background export threads.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracerProvider,
    SpanExporter as SdkSpanExporter,
};
use opentelemetry_sdk::Resource;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Bound on the blocking bootstrap connection check.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Span buffer bound; submission past this is dropped by the processor,
/// delivery is fire-and-forget best-effort.
const MAX_QUEUE_SIZE: usize = 10_000;

/// Telemetry signal, determining the default OTLP ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Trace spans.
    Traces,
    /// Metrics.
    Metrics,
}

impl Signal {
    /// Default OTLP ingestion path for the signal.
    pub fn default_path(&self) -> &'static str {
        match self {
            Signal::Traces => "v1/traces",
            Signal::Metrics => "v1/metrics",
        }
    }
}

/// Resolved transport shape for an exporter endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointShape {
    /// Empty endpoint: telemetry is off. Not an error.
    Disabled,
    /// `stdout`: local pretty-printing exporter for debugging.
    Stdout,
    /// Connection-oriented OTLP/gRPC channel.
    Grpc {
        /// Network authority (`host:port`).
        authority: String,
        /// True unless the original endpoint began with `https`.
        insecure: bool,
    },
    /// OTLP over HTTP with binary protobuf encoding.
    HttpProtobuf {
        /// Network authority (`host:port`).
        authority: String,
        /// URL path including any collector subpath and the signal's
        /// default ingestion suffix, without a leading slash.
        path: String,
        /// True unless the original endpoint began with `https`.
        insecure: bool,
    },
}

impl EndpointShape {
    /// Resolves an endpoint string and protocol hint into a transport shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use otel_db_pipeline::exporter::{EndpointShape, Signal};
    ///
    /// let shape = EndpointShape::resolve(
    ///     "collector.example.com/ingest",
    ///     "http/protobuf",
    ///     Signal::Traces,
    /// );
    /// assert_eq!(
    ///     shape,
    ///     EndpointShape::HttpProtobuf {
    ///         authority: "collector.example.com".to_string(),
    ///         path: "ingest/v1/traces".to_string(),
    ///         insecure: true,
    ///     }
    /// );
    /// ```
    pub fn resolve(endpoint: &str, protocol_hint: &str, signal: Signal) -> Self {
        if endpoint == "stdout" {
            return EndpointShape::Stdout;
        }
        if endpoint.is_empty() {
            return EndpointShape::Disabled;
        }

        let insecure = !endpoint.starts_with("https");
        let stripped = endpoint
            .strip_prefix("http://")
            .or_else(|| endpoint.strip_prefix("https://"))
            .unwrap_or(endpoint);

        if protocol_hint == "http/protobuf" {
            match stripped.split_once('/') {
                None => EndpointShape::HttpProtobuf {
                    authority: stripped.to_string(),
                    path: signal.default_path().to_string(),
                    insecure,
                },
                Some((authority, subpath)) => EndpointShape::HttpProtobuf {
                    authority: authority.to_string(),
                    path: format!("{}/{}", subpath, signal.default_path()),
                    insecure,
                },
            }
        } else {
            EndpointShape::Grpc {
                authority: stripped.to_string(),
                insecure,
            }
        }
    }

    /// Full URL for HTTP-shaped endpoints.
    fn http_url(authority: &str, path: &str, insecure: bool) -> String {
        let scheme = if insecure { "http" } else { "https" };
        format!("{scheme}://{authority}/{path}")
    }
}

/// Tokio runtime backing the gRPC exporter channels.
///
/// The tonic channel spawns its connection tasks onto the runtime that is
/// current while the exporter is built, so gRPC exporters are constructed
/// under [`enter`](ExporterRuntime::enter) and the runtime must outlive the
/// providers it serves.
pub(crate) struct ExporterRuntime {
    runtime: tokio::runtime::Runtime,
}

impl ExporterRuntime {
    /// Starts a single-worker runtime for exporter I/O.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Runtime`] when the runtime cannot start.
    pub(crate) fn start() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("otlp-exporter")
            .enable_all()
            .build()
            .map_err(PipelineError::Runtime)?;
        Ok(Self { runtime })
    }

    fn enter(&self) -> tokio::runtime::EnterGuard<'_> {
        self.runtime.enter()
    }
}

/// Whether any configured signal resolves to the gRPC transport.
pub(crate) fn uses_grpc(config: &PipelineConfig) -> bool {
    let traces = EndpointShape::resolve(
        &config.exporter_otlp_endpoint,
        trace_protocol_hint(config),
        Signal::Traces,
    );
    if matches!(traces, EndpointShape::Grpc { .. }) {
        return true;
    }
    config.metrics_requested()
        && matches!(
            EndpointShape::resolve(
                &config.exporter_otlp_endpoint,
                &config.exporter_otlp_protocol,
                Signal::Metrics,
            ),
            EndpointShape::Grpc { .. }
        )
}

/// Blocking reachability check against a gRPC authority.
///
/// Bootstrap happens once at process start, so failure is propagated rather
/// than retried.
fn preflight(authority: &str) -> Result<()> {
    let connect_err = |source| PipelineError::ExporterConnect {
        endpoint: authority.to_string(),
        source,
    };

    let mut addrs = authority.to_socket_addrs().map_err(connect_err)?;
    let addr = addrs.next().ok_or_else(|| {
        connect_err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "address resolved to nothing",
        ))
    })?;
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(connect_err)?;
    Ok(())
}

/// Builds the tracer provider for the configured endpoint.
///
/// Returns `Ok(None)` when the endpoint is empty (telemetry disabled).
/// `runtime` must be supplied when the endpoint resolves to gRPC (see
/// [`uses_grpc`]).
///
/// # Errors
///
/// Fails on unreachable gRPC endpoints or exporter construction failure;
/// both are fatal for the trace signal.
pub(crate) fn build_tracer_provider(
    config: &PipelineConfig,
    resource: Resource,
    sampler: Sampler,
    runtime: Option<&ExporterRuntime>,
) -> Result<Option<SdkTracerProvider>> {
    let hint = trace_protocol_hint(config);
    let shape = EndpointShape::resolve(&config.exporter_otlp_endpoint, hint, Signal::Traces);

    let provider = match shape {
        EndpointShape::Disabled => return Ok(None),
        EndpointShape::Stdout => tracer_provider_with(
            opentelemetry_stdout::SpanExporter::default(),
            config,
            resource,
            sampler,
        ),
        EndpointShape::Grpc { authority, .. } => {
            preflight(&authority)?;
            let _guard = runtime.map(ExporterRuntime::enter);
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(format!("http://{authority}"))
                .build()?;
            tracer_provider_with(exporter, config, resource, sampler)
        }
        EndpointShape::HttpProtobuf {
            authority,
            path,
            insecure,
        } => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(EndpointShape::http_url(&authority, &path, insecure))
                .with_protocol(Protocol::HttpBinary)
                .build()?;
            tracer_provider_with(exporter, config, resource, sampler)
        }
    };

    Ok(Some(provider))
}

/// Builds the meter provider for the configured endpoint.
///
/// Same decision procedure as traces with the metrics ingestion path. The
/// caller treats failure as non-fatal: metrics are best-effort, traces are
/// primary.
pub(crate) fn build_meter_provider(
    config: &PipelineConfig,
    resource: Resource,
    runtime: Option<&ExporterRuntime>,
) -> Result<Option<SdkMeterProvider>> {
    let shape = EndpointShape::resolve(
        &config.exporter_otlp_endpoint,
        &config.exporter_otlp_protocol,
        Signal::Metrics,
    );

    let provider = match shape {
        EndpointShape::Disabled => return Ok(None),
        EndpointShape::Stdout => meter_provider_with(
            opentelemetry_stdout::MetricExporter::default(),
            config,
            resource,
        ),
        EndpointShape::Grpc { authority, .. } => {
            preflight(&authority)?;
            let _guard = runtime.map(ExporterRuntime::enter);
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(format!("http://{authority}"))
                .build()?;
            meter_provider_with(exporter, config, resource)
        }
        EndpointShape::HttpProtobuf {
            authority,
            path,
            insecure,
        } => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_endpoint(EndpointShape::http_url(&authority, &path, insecure))
                .with_protocol(Protocol::HttpBinary)
                .build()?;
            meter_provider_with(exporter, config, resource)
        }
    };

    Ok(Some(provider))
}

/// The protocol hint only applies when the trace exporter kind is `otlp`.
fn trace_protocol_hint(config: &PipelineConfig) -> &str {
    if config.traces_exporter == "otlp" {
        &config.exporter_otlp_protocol
    } else {
        ""
    }
}

fn tracer_provider_with<E>(
    exporter: E,
    config: &PipelineConfig,
    resource: Resource,
    sampler: Sampler,
) -> SdkTracerProvider
where
    E: SdkSpanExporter + 'static,
{
    let batch_config = BatchConfigBuilder::default()
        .with_max_queue_size(MAX_QUEUE_SIZE)
        .with_max_export_batch_size(config.bsp_max_export_batch_size)
        .build();

    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch_config)
        .build();

    SdkTracerProvider::builder()
        .with_sampler(sampler)
        .with_span_processor(processor)
        .with_resource(resource)
        .build()
}

fn meter_provider_with<E>(
    exporter: E,
    config: &PipelineConfig,
    resource: Resource,
) -> SdkMeterProvider
where
    E: PushMetricExporter + 'static,
{
    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_millis(config.metric_export_interval))
        .build();

    SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build()
}
