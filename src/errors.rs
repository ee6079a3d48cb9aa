//! Custom error types for proxy speed testing.
//!
//! This module provides user-friendly error types that wrap underlying
//! errors with clear, actionable messages. Probe failures are expressed
//! with the same type so they can be logged uniformly, but they never
//! leave the prober that produced them.

use std::error::Error;
use std::fmt;

/// Exit codes for the application.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Network error (connection failed, timeout, etc.).
    pub const NETWORK_ERROR: i32 = 1;
    /// Configuration error (invalid arguments, unreadable documents).
    pub const CONFIG_ERROR: i32 = 3;
    /// The run finished but no proxy passed the usability thresholds.
    pub const PARTIAL_FAILURE: i32 = 4;
    /// Unknown/unexpected error.
    pub const UNKNOWN_ERROR: i32 = 99;
}

/// Categories of errors that can occur while testing proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network connectivity issues, including failed proxy handshakes.
    Network,
    /// DNS resolution failures.
    Dns,
    /// A probe exceeded its deadline.
    Timeout,
    /// TLS/SSL handshake failures.
    Tls,
    /// The server answered with a non-success status or a malformed response.
    Status,
    /// Invalid configuration or arguments.
    Config,
    /// The proxy kind cannot be dialed by this build.
    Unsupported,
    /// Unknown or unexpected errors.
    Unknown,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Network => exit_codes::NETWORK_ERROR,
            ErrorKind::Dns => exit_codes::NETWORK_ERROR,
            ErrorKind::Timeout => exit_codes::NETWORK_ERROR,
            ErrorKind::Tls => exit_codes::NETWORK_ERROR,
            ErrorKind::Status => exit_codes::NETWORK_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Unsupported => exit_codes::CONFIG_ERROR,
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::Dns => "DNS resolution error",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Tls => "TLS/SSL error",
            ErrorKind::Status => "Unexpected response",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Unsupported => "Unsupported proxy",
            ErrorKind::Unknown => "Unknown error",
        }
    }
}

/// A user-friendly error type for speed test operations.
#[derive(Debug)]
pub struct SpeedTestError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// User-friendly error message.
    pub message: String,
    /// Optional suggestion for how to resolve the error.
    pub suggestion: Option<String>,
    /// The underlying error, if any.
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl SpeedTestError {
    /// Create a new SpeedTestError.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None, source: None }
    }

    /// Add a suggestion for how to resolve the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add the underlying error source.
    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create an error for a non-success or unparseable response.
    pub fn status(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Status, message)
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Create an error for a proxy kind that cannot be dialed.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message).with_suggestion(
            "Only direct, socks5 and http proxies can be tunnelled; \
             filter the others out with --filter or --block.",
        )
    }
}

impl fmt::Display for SpeedTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)?;

        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl Error for SpeedTestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<std::io::Error> for SpeedTestError {
    fn from(error: std::io::Error) -> Self {
        to_speed_test_error(Box::new(error), "i/o")
    }
}

/// Classify an error into an ErrorKind based on its message.
pub fn classify_error(error: &dyn Error) -> ErrorKind {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("dns")
        || error_str.contains("resolve")
        || error_str.contains("no such host")
        || error_str.contains("no record")
    {
        return ErrorKind::Dns;
    }

    if error_str.contains("timeout")
        || error_str.contains("timed out")
        || error_str.contains("deadline")
    {
        return ErrorKind::Timeout;
    }

    if error_str.contains("tls")
        || error_str.contains("ssl")
        || error_str.contains("certificate")
        || error_str.contains("handshake")
    {
        return ErrorKind::Tls;
    }

    if error_str.contains("connection refused")
        || error_str.contains("connection reset")
        || error_str.contains("network unreachable")
        || error_str.contains("host unreachable")
        || error_str.contains("no route")
        || error_str.contains("broken pipe")
        || error_str.contains("unexpected end of file")
        || error_str.contains("socks")
        || error_str.contains("proxy")
    {
        return ErrorKind::Network;
    }

    ErrorKind::Unknown
}

/// Convert a generic error into a SpeedTestError with appropriate classification.
pub fn to_speed_test_error(
    error: Box<dyn Error + Send + Sync>,
    context: &str,
) -> SpeedTestError {
    let kind = classify_error(error.as_ref());
    let message = format!("{}: {}", context, error);

    let mut speed_error = SpeedTestError::new(kind, message);
    speed_error.source = Some(error);

    speed_error
}

/// Format an error for user display.
///
/// This function creates a user-friendly error message that includes
/// the error description and any available suggestions.
pub fn format_error_for_display(error: &SpeedTestError) -> String {
    let mut output =
        format!("Error: {} ({})", error.message, error.kind.description());

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\nSuggestion: {}", suggestion));
    }

    output
}
