//! # PolyExtract - Affine Extraction for Polyhedral Modeling
//!
//! Computes piecewise quasi-affine values of program expressions relative to
//! an evaluation context, the building block of a polyhedral model:
//! - Affine extraction of expressions and conditions
//! - Evaluation contexts with known variable values and loop domains
//! - Opaque capture of non-affine subexpressions and their resolution into
//!   statement arguments
//! - Composition of array accesses across subscripts, members and calls
//!
//! ## Architecture
//!
//! ```text
//! Expression tree + Context → extract_affine → PwAff (NaN where not affine)
//!                                   ↓
//!                         nested captures → resolve_nested → statement arguments
//! ```
//!
//! ## Example
//!
//! ```rust
//! use polyextract::prelude::*;
//!
//! let mut ctx = Context::new();
//! ctx.add_inner_iterator(Symbol::new("i"));
//! let i = Expr::scalar(Symbol::new("i"), &ctx.space()).with_type_size(-32);
//! let expr = Expr::binary(OpType::Mul, Expr::int(2), i);
//!
//! let value = extract_affine(&expr, &ctx, &ExtractOptions::default()).unwrap();
//! assert_eq!(value.eval_point(&[5]), Some(Val::Int(10)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod utils;
pub mod polyhedral;
pub mod ir;
pub mod analysis;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{
        apply_summary, extract_affine, extract_affine_condition, member, patch_access,
        patch_relation, resolve_nested, subscript, Capture, Context,
    };
    pub use crate::ir::{AccessType, ArrayAccesses, Expr, ExprKind, FunctionSummary, OpType, Stmt, SummaryArg};
    pub use crate::polyhedral::{
        AffineExpr, AffineMap, Constraint, Int, IntegerSet, MultiPwAff, Param, PwAff, Space, Tuple, Val,
    };
    pub use crate::utils::errors::*;
    pub use crate::utils::intern::Symbol;
    pub use crate::ExtractOptions;
}

/// Configuration of the extraction engine.
///
/// Options are passed explicitly to every entry point and take part in the
/// memo key of a context, so results computed under different options are
/// never mixed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Restrict signed results to the domain where they do not overflow
    pub avoid_overflow: bool,
    /// Recognize the relaxed builtins (`imin`, `intFloor`, `floord`, ...)
    pub allow_pencil_builtins: bool,
    /// Report offsets assumed to be zero that cannot be shown to be zero as
    /// errors instead of warnings
    pub strict_offsets: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            avoid_overflow: true,
            allow_pencil_builtins: false,
            strict_offsets: false,
        }
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_options() {
        let opts = ExtractOptions::default();
        assert!(opts.avoid_overflow);
        assert!(!opts.allow_pencil_builtins);
        assert!(!opts.strict_offsets);
    }
}
