use thiserror::Error;

/// Exporter error types
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// A pattern in the library failed to compile or declares invalid roles
    #[error("Pattern '{pattern}' is invalid: {reason}")]
    Pattern { pattern: &'static str, reason: String },
    /// Device probe failed
    #[error("Probe of {address} failed: {message}")]
    Probe { address: String, message: String },
    /// Line-protocol forwarding failed
    #[error("Forwarding failed: {0}")]
    Forward(String),
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    /// Socket or file error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ExporterError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Short, stable name used as a log field and metric label
pub fn error_kind(error: &ExporterError) -> &'static str {
    match error {
        ExporterError::Config(_) => "config_error",
        ExporterError::Pattern { .. } => "pattern_error",
        ExporterError::Probe { .. } => "probe_error",
        ExporterError::Forward(_) => "forward_error",
        ExporterError::HttpRequest(_) => "http_request_error",
        ExporterError::Io(_) => "io_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ExporterError::Pattern {
            pattern: "n_v",
            reason: "missing name role".to_string(),
        };
        assert_eq!(error.to_string(), "Pattern 'n_v' is invalid: missing name role");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(error_kind(&ExporterError::Config("x".to_string())), "config_error");
        assert_eq!(error_kind(&ExporterError::Forward("status 500".to_string())), "forward_error");

        let err: ExporterError = config::Config::builder()
            .set_override("syslog.ttl_seconds", "sixty")
            .and_then(|b| b.build())
            .and_then(|c| c.get::<u64>("syslog.ttl_seconds"))
            .unwrap_err()
            .into();
        assert_eq!(error_kind(&err), "config_error");
    }
}
