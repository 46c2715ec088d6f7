//! hlb - codegen for the HLB container-build language
//!
//! This library compiles type-checked HLB modules into graphs of low-level
//! build (LLB) operations that a remote build daemon can solve. It owns the
//! runtime value model, the builtin dispatch table, scoped identifier
//! resolution, the chain evaluator, export-request building, session and
//! solve concurrency, and the replay debugger.
//!
//! The lexer/parser, the type checker, and the daemon RPC transport are
//! external collaborators; this crate defines the AST data model and the
//! traits those collaborators implement.

pub mod ast;
pub mod builtin;
pub mod codegen;
pub mod debugger;
pub mod image;
pub mod llb;
pub mod options;
pub mod resolver;
pub mod scope;
pub mod session;
pub mod solver;
pub mod value;

pub use ast::{Kind, Module, Position, Span};
pub use codegen::{CodeGen, CodeGenOptions, CodegenError, Target};
pub use debugger::{DebugMode, Debugger, Direction};
pub use solver::{Request, SolveClient, SolveResponse};
pub use value::Value;
