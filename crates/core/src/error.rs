//! The closed error taxonomy every fallible Roux operation returns (spec §7).

use std::fmt;

/// A Roux failure, tagged with one of the closed set of kinds from §7.
///
/// Deliberately hand-rolled rather than built on `thiserror`: the teacher
/// repo this engine is modeled on never pulls in an error-derive crate,
/// preferring a plain enum with manual `Display`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouxError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NodeNotFound,
    NodeExists,
    LinkIntegrity,
    DimensionMismatch,
    ProviderError,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NodeNotFound => "node_not_found",
            ErrorKind::NodeExists => "node_exists",
            ErrorKind::LinkIntegrity => "link_integrity",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl RouxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn node_not_found(id: &str) -> Self {
        Self::new(ErrorKind::NodeNotFound, format!("node not found: {id}"))
    }

    pub fn node_exists(id: &str) -> Self {
        Self::new(ErrorKind::NodeExists, format!("node already exists: {id}"))
    }

    pub fn link_integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LinkIntegrity, message)
    }

    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::new(
            ErrorKind::DimensionMismatch,
            format!("dimension mismatch: expected {expected}, got {got}"),
        )
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for RouxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for RouxError {}

pub type RouxResult<T> = Result<T, RouxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let e = RouxError::node_not_found("notes/a.md");
        assert_eq!(e.kind.code(), "node_not_found");
        assert!(e.to_string().contains("notes/a.md"));
    }
}
