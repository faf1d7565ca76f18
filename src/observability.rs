//! Logging Initialization
//!
//! Thin wrapper over `tracing-subscriber` so deployments get consistent,
//! structured output without each binary re-assembling the subscriber. The
//! rest of the crate only ever uses `tracing` macros (directly or through
//! `audit_event!`) and does not care which sink is configured.
//!
//! # Usage
//!
//! ```ignore
//! use portcullis::observability::{init_tracing, LogFormat};
//!
//! // Honors RUST_LOG; "info" when unset
//! init_tracing(LogFormat::Json);
//! ```

use tracing_subscriber::{fmt, EnvFilter};

/// Output format for the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-oriented single-line output for development
    #[default]
    Compact,
    /// One JSON object per record, for shippers and collectors
    Json,
}

impl LogFormat {
    /// Parse "json"/"compact" (case-insensitive); anything else is compact.
    pub fn from_str_loose(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Filtering comes from `RUST_LOG`, defaulting to `info`. Calling this a
/// second time is a no-op (the first subscriber wins), which keeps tests
/// that race to initialize harmless.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        LogFormat::Compact => fmt()
            .with_env_filter(filter)
            .compact()
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Initialize from the `LOG_FORMAT` environment variable.
pub fn init_tracing_from_env() {
    let format = std::env::var("LOG_FORMAT")
        .map(|v| LogFormat::from_str_loose(&v))
        .unwrap_or_default();
    init_tracing(format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::from_str_loose("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_loose("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_loose("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::from_str_loose("anything"), LogFormat::Compact);
    }

    #[test]
    fn test_double_init_is_harmless() {
        init_tracing(LogFormat::Compact);
        init_tracing(LogFormat::Json);
    }
}
