//! Codegen Errors
//!
//! Error types distinguish structural failures (a checker gap or a bug),
//! user-input failures (bad references and modes), cyclic bindings, and the
//! debugger-exit sentinel. Every chain step wraps its error with the current
//! call site; on terminal failure the evaluator's frame stack is attached so
//! renderers can highlight the failing lines.

use std::sync::Arc;

use thiserror::Error;

use crate::ast::Span;
use crate::llb::StateError;
use crate::session::SessionError;
use crate::solver::ClientError;

/// One layer of the evaluator's logical call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Enclosing function name, or the builtin being evaluated.
    pub name: String,
    pub span: Span,
    pub filename: String,
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} in {}", self.filename, self.span.start, self.name)
    }
}

/// Unified error type for codegen.
#[derive(Error, Debug)]
pub enum CodegenError {
    // -- Structural: a bug or a checker gap --
    #[error("cannot coerce {actual} to {expected}")]
    BadCast { expected: String, actual: String },

    #[error("undefined reference '{name}'")]
    UndefinedReference { name: String, span: Span },

    #[error("ambiguous callable '{name}'")]
    AmbiguousCallable { name: String },

    #[error("unknown object kind for '{name}'")]
    UnknownObject { name: String, span: Span },

    #[error("wrong number of arguments to '{name}': expected {expected}, got {actual}")]
    WrongArity { name: String, expected: usize, actual: usize },

    // -- User input --
    #[error("invalid image reference '{reference}'")]
    InvalidImageRef { reference: String },

    #[error("invalid network mode '{mode}', must be sandbox, host or none")]
    InvalidNetworkMode { mode: String },

    #[error("invalid security mode '{mode}', must be sandbox or insecure")]
    InvalidSecurityMode { mode: String },

    #[error("invalid sharing mode '{mode}', must be shared, private or locked")]
    InvalidSharingMode { mode: String },

    #[error("cache mounts cannot be bound")]
    BindCacheMount { span: Span },

    #[error("docker engine does not support {feature}")]
    DockerEngineUnsupported { feature: String },

    #[error("invalid argument: {message}")]
    InvalidArg { message: String },

    // -- Cyclic computation --
    #[error("binding cycle through '{binding}'")]
    BindingCycle { binding: String, span: Span },

    // -- Debugger --
    #[error("debugger exited")]
    DebugExit,

    #[error("cannot exec into non-run op")]
    CannotExecNonRunOp,

    #[error("breakpoint already exists at {span}")]
    DuplicateBreakpoint { span: Span },

    #[error("breakpoint at {span} is source-defined and cannot be deleted")]
    SourceBreakpoint { span: Span },

    /// An error stored in a binding cell, re-raised at a later read.
    #[error(transparent)]
    Shared(#[from] SharedError),

    // -- Collaborators --
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    // -- Wrappers --
    /// The error annotated with the call site it surfaced from.
    #[error("{source}")]
    At {
        span: Span,
        #[source]
        source: Box<CodegenError>,
    },

    /// The error with the evaluator's backtrace materialised.
    #[error("{source}")]
    Traced {
        frames: Vec<Frame>,
        #[source]
        source: Box<CodegenError>,
    },
}

impl CodegenError {
    /// Annotate with a call-site span. Wrapping the same span twice is a
    /// no-op so chain steps can wrap unconditionally.
    pub fn at(self, span: Span) -> Self {
        match &self {
            CodegenError::At { span: existing, .. } if *existing == span => self,
            _ => CodegenError::At { span, source: Box::new(self) },
        }
    }

    /// Attach the evaluator's frame stack, innermost last.
    pub fn traced(self, frames: Vec<Frame>) -> Self {
        match self {
            CodegenError::Traced { .. } => self,
            other => CodegenError::Traced { frames, source: Box::new(other) },
        }
    }

    /// The error with wrappers peeled off.
    pub fn root(&self) -> &CodegenError {
        match self {
            CodegenError::At { source, .. } | CodegenError::Traced { source, .. } => source.root(),
            CodegenError::Shared(shared) => shared.0.root(),
            other => other,
        }
    }

    /// The attached backtrace, if materialised.
    pub fn frames(&self) -> Option<&[Frame]> {
        match self {
            CodegenError::Traced { frames, .. } => Some(frames),
            CodegenError::At { source, .. } => source.frames(),
            _ => None,
        }
    }

    /// Whether this is the debugger-exit sentinel, through any wrapping.
    pub fn is_debug_exit(&self) -> bool {
        matches!(self.root(), CodegenError::DebugExit)
    }

    /// The binding a cycle sentinel points at, through any wrapping.
    pub fn binding_cycle_target(&self) -> Option<&str> {
        match self.root() {
            CodegenError::BindingCycle { binding, .. } => Some(binding),
            _ => None,
        }
    }

    /// The bind-clause position a cycle sentinel points at.
    pub fn binding_cycle_span(&self) -> Option<Span> {
        match self.root() {
            CodegenError::BindingCycle { span, .. } => Some(*span),
            _ => None,
        }
    }
}

/// A reference-counted error, shared between a binding cell and every read
/// of it.
#[derive(Debug, Clone)]
pub struct SharedError(pub Arc<CodegenError>);

impl std::fmt::Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&*self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;

    fn span(line: usize) -> Span {
        Span::point(Position::new(line, 1, 0))
    }

    #[test]
    fn test_at_does_not_double_wrap_same_span() {
        let err = CodegenError::DebugExit.at(span(3)).at(span(3));
        match err {
            CodegenError::At { source, .. } => assert!(source.is_debug_exit()),
            other => panic!("expected At, got {:?}", other),
        }
    }

    #[test]
    fn test_matchers_see_through_wrappers() {
        let err = CodegenError::BindingCycle { binding: "built".into(), span: span(2) }
            .at(span(2))
            .traced(vec![]);
        assert_eq!(err.binding_cycle_target(), Some("built"));
        assert!(!err.is_debug_exit());
        assert!(CodegenError::DebugExit.at(span(1)).is_debug_exit());
    }

    #[test]
    fn test_traced_keeps_first_backtrace() {
        let frames = vec![Frame { name: "default".into(), span: span(1), filename: "build.hlb".into() }];
        let err = CodegenError::DebugExit.traced(frames.clone()).traced(vec![]);
        assert_eq!(err.frames(), Some(frames.as_slice()));
    }
}
