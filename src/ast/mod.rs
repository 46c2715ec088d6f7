//! Abstract Syntax Tree
//!
//! Node types for type-checked HLB modules. The parser produces these and
//! the checker annotates them; codegen only consumes them.

pub mod build;
pub mod types;

pub use types::*;
