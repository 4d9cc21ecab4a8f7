//! Error types for the sandbox pipeline

use std::fmt;

use crate::types::ConsoleEntry;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Which piece of caller code a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Script,
    Module,
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeKind::Script => f.write_str("Script"),
            CodeKind::Module => f.write_str("Module"),
        }
    }
}

/// Sandbox pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Caller code is empty or whitespace only
    #[error("{kind} cannot be empty")]
    EmptyCode { kind: CodeKind },

    /// Caller code is longer than the configured limit
    #[error("{kind} exceeds maximum size of {limit} characters (got {actual})")]
    OversizedCode {
        kind: CodeKind,
        /// Maximum allowed size in characters
        limit: usize,
        /// Actual size in characters
        actual: usize,
    },

    /// Caller code failed to compile
    #[error("{kind} has invalid syntax: {message}")]
    SyntaxInvalid { kind: CodeKind, message: String },

    /// The execution host answered with a non-success response
    #[error("host returned status {status}: {message}")]
    HostInvocation {
        status: u16,
        message: String,
        /// Console output the module captured before failing
        console: Option<Vec<ConsoleEntry>>,
    },

    /// Caller code threw while running
    #[error("{0}")]
    Runtime(String),

    /// The execution host could not be allocated
    #[error("Failed to allocate execution host: {0}")]
    Loader(String),

    /// Named-host management endpoint answered with a non-success status
    #[error("Workers API returned status {status}: {body}")]
    WorkerApi { status: u16, body: String },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SandboxError {
    /// True when the code was rejected before anything ran.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SandboxError::EmptyCode { .. }
                | SandboxError::OversizedCode { .. }
                | SandboxError::SyntaxInvalid { .. }
        )
    }

    /// True for a 404 from the named-host management endpoint.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SandboxError::WorkerApi { status: 404, .. })
    }

    /// Render the message placed in the `error` field of an `ExecutionResult`.
    ///
    /// The prefixes are part of the response contract.
    pub fn envelope_message(&self) -> String {
        match self {
            err if err.is_validation() => format!("Validation error: {}", err),
            SandboxError::HostInvocation { message, .. } => {
                format!("Worker execution failed: {}", message)
            }
            err => format!("Execution error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_prefix() {
        let err = SandboxError::EmptyCode {
            kind: CodeKind::Script,
        };
        assert!(err.is_validation());
        assert_eq!(
            err.envelope_message(),
            "Validation error: Script cannot be empty"
        );
    }

    #[test]
    fn test_oversized_message_names_limit() {
        let err = SandboxError::OversizedCode {
            kind: CodeKind::Module,
            limit: 1_000_000,
            actual: 1_000_001,
        };
        assert!(err.to_string().contains("1000000"));
        assert!(err.envelope_message().starts_with("Validation error: Module"));
    }

    #[test]
    fn test_host_and_runtime_prefixes() {
        let host = SandboxError::HostInvocation {
            status: 500,
            message: "boom".to_string(),
            console: None,
        };
        assert_eq!(host.envelope_message(), "Worker execution failed: boom");
        assert!(!host.is_validation());

        let runtime = SandboxError::Runtime("x is not defined".to_string());
        assert_eq!(
            runtime.envelope_message(),
            "Execution error: x is not defined"
        );
    }

    #[test]
    fn test_not_found() {
        let err = SandboxError::WorkerApi {
            status: 404,
            body: "Not Found".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_validation());
    }
}
