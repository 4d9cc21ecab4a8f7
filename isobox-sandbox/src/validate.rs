//! Pre-flight checks on caller code

use std::sync::Arc;

use crate::error::{CodeKind, Result, SandboxError};
use crate::limits::CodeLimits;

/// Compile-only syntax check.
///
/// Whether one is available depends on where the pipeline runs: hosts that
/// forbid dynamic compilation have to leave syntax errors to the execution
/// host's own compile step.
///
/// The sandbox loader and workers client call checkers from tokio's
/// blocking pool, so implementations may block.
pub trait SyntaxChecker: Send + Sync {
    /// Check that `code` compiles as the given kind, without running it.
    fn check(&self, code: &str, kind: CodeKind) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Skips syntax checking; the execution host reports compile errors instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredSyntaxCheck;

impl SyntaxChecker for DeferredSyntaxCheck {
    fn check(&self, _code: &str, kind: CodeKind) -> Result<()> {
        tracing::trace!(%kind, "Syntax check deferred to execution host");
        Ok(())
    }

    fn name(&self) -> &str {
        "deferred"
    }
}

/// Reject empty or oversized code.
///
/// Length is counted in characters, not bytes.
pub fn validate_code(code: &str, max_size: usize, kind: CodeKind) -> Result<()> {
    if code.trim().is_empty() {
        return Err(SandboxError::EmptyCode { kind });
    }

    let actual = code.chars().count();
    if actual > max_size {
        return Err(SandboxError::OversizedCode {
            kind,
            limit: max_size,
            actual,
        });
    }

    Ok(())
}

/// Size limits plus an optional syntax checker
#[derive(Clone)]
pub struct Validator {
    limits: CodeLimits,
    checker: Arc<dyn SyntaxChecker>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("limits", &self.limits)
            .field("checker", &self.checker.name())
            .finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(CodeLimits::default())
    }
}

impl Validator {
    pub fn new(limits: CodeLimits) -> Self {
        Self {
            limits,
            checker: Arc::new(DeferredSyntaxCheck),
        }
    }

    /// Use a real syntax checker instead of deferring to the host
    pub fn with_checker(mut self, checker: impl SyntaxChecker + 'static) -> Self {
        self.checker = Arc::new(checker);
        self
    }

    pub fn limits(&self) -> &CodeLimits {
        &self.limits
    }

    pub fn validate_script(&self, script: &str) -> Result<()> {
        validate_code(script, self.limits.max_script_size, CodeKind::Script)?;
        self.checker.check(script, CodeKind::Script)
    }

    /// Module code is optional; an absent or zero-length module passes.
    pub fn validate_module(&self, module: Option<&str>) -> Result<()> {
        match module {
            Some(code) if !code.is_empty() => {
                validate_code(code, self.limits.max_module_size, CodeKind::Module)?;
                self.checker.check(code, CodeKind::Module)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectAll;

    impl SyntaxChecker for RejectAll {
        fn check(&self, _code: &str, kind: CodeKind) -> Result<()> {
            Err(SandboxError::SyntaxInvalid {
                kind,
                message: "Unexpected token".to_string(),
            })
        }

        fn name(&self) -> &str {
            "reject-all"
        }
    }

    #[test]
    fn test_empty_code() {
        let err = validate_code("", 10, CodeKind::Script).unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCode { .. }));
        assert_eq!(err.to_string(), "Script cannot be empty");

        let err = validate_code("  \n\t", 10, CodeKind::Script).unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCode { .. }));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        assert!(validate_code("12345", 5, CodeKind::Script).is_ok());

        let err = validate_code("123456", 5, CodeKind::Script).unwrap_err();
        match err {
            SandboxError::OversizedCode { limit, actual, .. } => {
                assert_eq!(limit, 5);
                assert_eq!(actual, 6);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_size_counts_characters() {
        // four characters, twelve bytes
        assert!(validate_code("日本語!", 4, CodeKind::Module).is_ok());
    }

    #[test]
    fn test_default_limit() {
        let validator = Validator::default();
        let big = "x".repeat(1_000_001);
        let err = validator.validate_script(&big).unwrap_err();
        assert!(err.to_string().contains("1000000"));
        assert!(validator.validate_script(&"x".repeat(1_000_000)).is_ok());
    }

    #[test]
    fn test_module_is_optional() {
        let validator = Validator::default();
        assert!(validator.validate_module(None).is_ok());
        assert!(validator.validate_module(Some("")).is_ok());
        assert!(validator.validate_module(Some("exports.a = 1")).is_ok());

        let err = validator.validate_module(Some("   ")).unwrap_err();
        assert_eq!(err.to_string(), "Module cannot be empty");
    }

    #[test]
    fn test_checker_runs_after_size_checks() {
        let validator = Validator::default().with_checker(RejectAll);

        let err = validator.validate_script("").unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCode { .. }));

        let err = validator.validate_script("1 +").unwrap_err();
        assert!(matches!(err, SandboxError::SyntaxInvalid { .. }));
        assert!(err.is_validation());
    }
}
