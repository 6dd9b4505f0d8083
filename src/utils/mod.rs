//! Utility modules shared by the extraction engine:
//! - Error types
//! - Symbol interning

pub mod errors;
pub mod intern;

// Re-exports
pub use errors::*;
pub use intern::{intern, Symbol};
