//! Intermediate representation consumed by the extraction engine.
//!
//! - Expression trees with access, call, cast, literal and operator nodes
//! - Access payloads and their access relations
//! - Statements, the unit capture resolution works on
//! - Function summaries for interprocedural access composition

pub mod access;
pub mod expr;
pub mod stmt;
pub mod summary;

pub use access::{AccessData, AccessType};
pub use expr::{CallData, Expr, ExprKind, OpType};
pub use stmt::Stmt;
pub use summary::{ArrayAccesses, FunctionSummary, SummaryArg};
