//! Tracing subscriber setup
//!
//! Logs go to stderr, or to a file in diagnostic mode. stdout carries the
//! protocol and is never written to.

use std::path::PathBuf;

use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace::SdkTracerProvider;

#[cfg(feature = "otel")]
static OTEL_PROVIDER: std::sync::OnceLock<SdkTracerProvider> = std::sync::OnceLock::new();

const SERVICE_NAME: &str = "acp-bridge";

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Write to a file instead of stderr
    pub diagnostic: bool,
    /// Log directory (implies diagnostic mode)
    pub log_dir: Option<PathBuf>,
    /// Log file name (implies diagnostic mode)
    pub log_file: Option<String>,
    /// Level used when RUST_LOG is unset
    pub level: tracing::Level,
    /// Emit JSON lines instead of text
    pub json: bool,
    /// OTLP endpoint; tracing is exported only when set
    pub otel_endpoint: Option<String>,
    pub otel_service_name: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            diagnostic: false,
            log_dir: None,
            log_file: None,
            level: tracing::Level::INFO,
            json: false,
            otel_endpoint: None,
            otel_service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl LogOptions {
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Log file path for diagnostic mode
    ///
    /// Defaults to `acp-bridge-{timestamp}.log` in the system temp directory.
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);
        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("{SERVICE_NAME}-{timestamp}.log")
        });
        dir.join(filename)
    }
}

/// RUST_LOG wins over the configured level
pub fn build_env_filter(options: &LogOptions) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }
    tracing_subscriber::EnvFilter::from_default_env().add_directive(options.level.into())
}

/// Install the global subscriber
pub fn init_logging(options: &LogOptions) -> anyhow::Result<()> {
    let filter = build_env_filter(options);

    let writer = if options.is_diagnostic() {
        let log_path = options.log_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&log_path)?;
        eprintln!("Diagnostic mode: logging to {}", log_path.display());
        tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::sync::Mutex::new(file))
    } else {
        tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr)
    };

    let fmt_layer = if options.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = &options.otel_endpoint {
            eprintln!(
                "OpenTelemetry enabled: endpoint={}, service={}",
                endpoint, options.otel_service_name
            );
            let provider = init_otel(endpoint, &options.otel_service_name)?;
            let tracer = provider.tracer(SERVICE_NAME);
            drop(OTEL_PROVIDER.set(provider));
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            return Ok(());
        }
    }

    registry.try_init()?;
    Ok(())
}

#[cfg(feature = "otel")]
fn init_otel(endpoint: &str, service_name: &str) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_sdk::Resource;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// Flush pending spans
#[cfg(feature = "otel")]
pub fn shutdown_otel() {
    if let Some(provider) = OTEL_PROVIDER.get() {
        tracing::info!("Shutting down OpenTelemetry provider...");
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to shutdown OpenTelemetry provider: {:?}", e);
        }
    }
}

#[cfg(not(feature = "otel"))]
pub fn shutdown_otel() {}
