use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Unsupported,
    /// A heatmap table with at least one missing cell.
    MissingData,
    /// Unparseable tree text, or subset identifiers unknown to the session.
    Structural,
    Io,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Structural, message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::new(ErrorCode::Io, err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::new(ErrorCode::InvalidInput, format!("JSON error: {err}"))
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        let code = if err.is_io_error() {
            ErrorCode::Io
        } else {
            ErrorCode::InvalidInput
        };
        EngineError::new(code, format!("CSV error: {err}"))
    }
}

/// Failure to evaluate a numeric condition. Never propagated past the query
/// evaluator: the leaf simply does not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The condition is not of the form `(a,b)`.
    Malformed(String),
    /// A value or bound did not parse as a number.
    NotNumeric(String),
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(spec) => write!(f, "malformed range condition '{spec}'"),
            Self::NotNumeric(text) => write!(f, "'{text}' is not a number"),
        }
    }
}

impl Error for EvaluationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = EngineError::structural("unbalanced parentheses");
        assert_eq!(err.to_string(), "Structural: unbalanced parentheses");
    }

    #[test]
    fn test_io_error_maps_to_io_code() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EngineError = io.into();
        assert_eq!(err.code, ErrorCode::Io);
    }
}
