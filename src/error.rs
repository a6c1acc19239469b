//! Error types for nlsql.

use thiserror::Error;

/// The main error type for nlsql operations.
///
/// "No pattern matched" is deliberately absent: the matcher reports it as
/// `None` and the engine routes the request to the fallback dispatcher.
#[derive(Debug, Error)]
pub enum NlsqlError {
    /// A slot trigger was recognized but its value could not be parsed.
    #[error("Could not parse {slot} from '{text}': {reason}")]
    SlotParse {
        slot: &'static str,
        text: String,
        reason: String,
    },

    /// A matched pattern references a placeholder with no extracted slot.
    #[error("Pattern '{pattern}' has no value bound for placeholder '{placeholder}'")]
    IncompleteBinding { pattern: String, placeholder: String },

    /// The query references a table, column or value the schema does not allow.
    #[error("Schema violation on '{identifier}': {reason}")]
    SchemaViolation { identifier: String, reason: String },

    /// The external sequence generator is down, timed out, or unconfigured.
    #[error("Fallback generator unavailable: {0}")]
    FallbackUnavailable(String),

    /// The pattern store or feedback log could not be written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// SQL text outside the supported SELECT subset.
    #[error("SQL parse error at position {position}: {message}")]
    SqlParse { position: usize, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NlsqlError {
    /// Create a slot parse error.
    pub fn slot_parse(slot: &'static str, text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SlotParse {
            slot,
            text: text.into(),
            reason: reason.into(),
        }
    }

    /// Create a schema violation naming the offending identifier.
    pub fn violation(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a SQL parse error at the given position.
    pub fn sql_parse(position: usize, message: impl Into<String>) -> Self {
        Self::SqlParse {
            position,
            message: message.into(),
        }
    }

    /// Whether the error aborts a request without touching shared state.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::SlotParse { .. }
                | Self::IncompleteBinding { .. }
                | Self::SchemaViolation { .. }
                | Self::SqlParse { .. }
        )
    }
}

/// Result type alias for nlsql operations.
pub type NlsqlResult<T> = Result<T, NlsqlError>;
