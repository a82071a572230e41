//! Logging, tracing export and panic reporting

pub mod error_ext;
pub mod logging;
pub mod panic;

pub use error_ext::{ErrorTraceExt, ResultTraceExt};
pub use logging::{LogOptions, build_env_filter, init_logging, shutdown_otel};
pub use panic::install_panic_hook;
