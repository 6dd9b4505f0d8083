//! Extraction passes.

pub mod affine;
pub mod compose;
pub mod context;
pub mod nest;

pub use affine::{extract_affine, extract_affine_condition};
pub use compose::{apply_summary, member, patch_access, patch_relation, subscript};
pub use context::Context;
pub use nest::{resolve_nested, Capture};
