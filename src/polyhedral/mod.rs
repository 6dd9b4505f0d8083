//! Polyhedral data structures and operations.
//!
//! This module provides the value library the extraction engine computes with:
//! - Spaces and parameters
//! - Quasi-affine expressions and constraints
//! - Integer sets and relations (unions of polyhedra)
//! - Piecewise quasi-affine functions with a NaN value
//! - Affine maps used for pullbacks

pub mod space;
pub mod expr;
pub mod constraint;
pub mod operations;
pub mod set;
pub mod map;
pub mod pw;

/// Integer type of coefficients and values; wide enough for 2^64 moduli.
pub type Int = i128;

pub use space::{Param, Space, Tuple, TupleKind};
pub use expr::{AffineExpr, Div, Val};
pub use constraint::{Constraint, ConstraintKind, ConstraintSystem};
pub use set::IntegerSet;
pub use map::AffineMap;
pub use pw::{CmpOp, MultiPwAff, Piece, PwAff};
