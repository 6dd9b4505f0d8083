//! Error types for affine extraction.
//!
//! Only malformed input is an error. An expression that simply has no
//! affine value is not: it extracts to the NaN sentinel (see
//! [`crate::polyhedral::PwAff::nan_on_domain`]). Broken internal invariants
//! (wrong node kind handed to a kind-specific accessor, changing the depth of
//! an access whose relations are materialized, mixing spaces of different
//! dimension) panic at the point of detection.

use thiserror::Error;
use std::fmt;

/// Top-level error type for the extraction engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// An operator node has the wrong number of arguments.
    #[error("operator `{op}` expects {expected} argument(s), found {found}")]
    Arity {
        /// Operator spelling
        op: String,
        /// Arity of the operator
        expected: usize,
        /// Number of arguments on the node
        found: usize,
    },

    /// A builtin call has the wrong number of arguments.
    #[error("call to `{name}` expects {expected} argument(s), found {found}")]
    CallArity {
        /// Called function
        name: String,
        /// Arity of the builtin
        expected: usize,
        /// Number of arguments on the node
        found: usize,
    },

    /// An entry point received a node of the wrong kind.
    #[error("expected {expected} expression, found {found}")]
    UnexpectedKind {
        /// The kind the entry point works on
        expected: ExprKindName,
        /// The kind that was passed
        found: ExprKindName,
    },

    /// The expression's domain does not match the context it is evaluated in.
    #[error("dimension mismatch: context has {context} dimension(s), expression has {expr}")]
    DimensionMismatch {
        /// Dimensions of the context domain
        context: usize,
        /// Dimensions of the expression's domain
        expr: usize,
    },

    /// A call summary does not line up with the call it is applied to.
    #[error("summary for `{name}` describes {summary} argument(s), call has {call}")]
    SummaryMismatch {
        /// Called function
        name: String,
        /// Arguments described by the summary
        summary: usize,
        /// Arguments at the call site
        call: usize,
    },

    /// An offset assumed to be zero while patching an address argument could
    /// not be shown to be zero (strict offset policy only).
    #[error("assumed-zero offset into `{array}` is not provably zero")]
    NonZeroOffset {
        /// The array the address points into
        array: String,
    },
}

/// Printable name of an expression kind, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKindName {
    /// [`ExprKind::Access`](crate::ir::ExprKind::Access)
    Access,
    /// [`ExprKind::Call`](crate::ir::ExprKind::Call)
    Call,
    /// [`ExprKind::Cast`](crate::ir::ExprKind::Cast)
    Cast,
    /// [`ExprKind::Int`](crate::ir::ExprKind::Int)
    Int,
    /// [`ExprKind::Double`](crate::ir::ExprKind::Double)
    Double,
    /// [`ExprKind::Op`](crate::ir::ExprKind::Op)
    Op,
    /// [`ExprKind::Error`](crate::ir::ExprKind::Error)
    Error,
}

impl fmt::Display for ExprKindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExprKindName::Access => "access",
            ExprKindName::Call => "call",
            ExprKindName::Cast => "cast",
            ExprKindName::Int => "integer literal",
            ExprKindName::Double => "floating point literal",
            ExprKindName::Op => "operation",
            ExprKindName::Error => "malformed",
        };
        write!(f, "{}", name)
    }
}

/// Result type using ExtractError.
pub type ExtractResult<T> = Result<T, ExtractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExtractError::Arity {
            op: "+".to_string(),
            expected: 2,
            found: 1,
        };
        let s = format!("{}", err);
        assert!(s.contains("`+`"));
        assert!(s.contains("expects 2"));
    }

    #[test]
    fn test_kind_mismatch_display() {
        let err = ExtractError::UnexpectedKind {
            expected: ExprKindName::Call,
            found: ExprKindName::Int,
        };
        assert_eq!(err.to_string(), "expected call expression, found integer literal");
    }
}
