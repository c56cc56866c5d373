//! Error types for pipeline bootstrap and teardown.

use opentelemetry_sdk::error::OTelSdkError;
use thiserror::Error;

/// A specialised Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can abort pipeline startup.
///
/// All variants are fatal for the trace signal. For the metrics signal,
/// exporter failures are logged and telemetry continues traces-only.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required configuration field is empty. The pipeline never runs.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(&'static str),

    /// Environment configuration could not be extracted.
    #[error("configuration error")]
    Config(#[source] Box<figment::Error>),

    /// Two merged resource sets carry contradictory schema URLs.
    #[error("resource schema conflict: {existing} vs {incoming}")]
    ResourceMergeConflict {
        /// Schema URL already established by earlier merges.
        existing: String,
        /// Conflicting schema URL of the incoming set.
        incoming: String,
    },

    /// The exporter endpoint could not be reached during bootstrap.
    ///
    /// There is no retry: bootstrap happens once at process start and the
    /// caller decides whether to run without telemetry or abort.
    #[error("failed to reach exporter endpoint {endpoint}")]
    ExporterConnect {
        /// The resolved network authority.
        endpoint: String,
        /// Underlying resolution or connection failure.
        #[source]
        source: std::io::Error,
    },

    /// The OTLP exporter could not be constructed.
    #[error("failed to build exporter")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// The runtime backing the gRPC exporter channels could not start.
    #[error("failed to start exporter runtime")]
    Runtime(#[source] std::io::Error),
}

impl From<figment::Error> for PipelineError {
    fn from(err: figment::Error) -> Self {
        PipelineError::Config(Box::new(err))
    }
}

/// Teardown failures collected during shutdown.
///
/// Every registered teardown callback runs even when an earlier one fails;
/// the failures are gathered here instead of short-circuiting.
#[derive(Debug, Error)]
#[error("shutdown completed with {} error(s)", errors.len())]
pub struct ShutdownError {
    /// The individual provider shutdown failures, in teardown order.
    pub errors: Vec<OTelSdkError>,
}
