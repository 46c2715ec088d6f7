//! Codegen
//!
//! The engine that turns a checked module and a set of targets into a
//! request tree. Evaluation folds each target's statement chain into a
//! value, resolving builtins through the registry and named references
//! through the scope tree; export statements queue sibling requests; the
//! debugger, when attached, is consulted at every significant step.

pub mod binding;
pub mod call;
pub mod chain;
pub mod errors;
pub mod lowering;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::ast::{Kind, Module, Span};
use crate::debugger::Debugger;
use crate::resolver::{CachedResolver, ImageResolver};
use crate::scope::{self, ObjNode, Scope};
use crate::session::SessionTransport;
use crate::solver::{ClientError, Request, SolveClient, SolveContext};

pub use binding::BindingCell;
pub use errors::{CodegenError, Frame};

/// A user-named top-level function to compile.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Construction options for [`CodeGen`].
pub struct CodeGenOptions {
    /// Remote-build client, required for synchronous exports and `exec`.
    pub client: Option<Arc<dyn SolveClient>>,
    /// Session transport serving attachables during solves.
    pub transport: Option<Arc<dyn SessionTransport>>,
    /// Registry metadata resolver, required for `resolve` and `manifest`.
    pub resolver: Option<Arc<dyn ImageResolver>>,
    /// Cooperative debugger.
    pub debugger: Option<Arc<Debugger>>,
    /// Exported scopes of imported modules, keyed by import name.
    pub imports: HashMap<String, Arc<Scope>>,
    /// Whether the attached Docker engine supports tarball loads.
    pub supports_docker_load: bool,
}

impl Default for CodeGenOptions {
    fn default() -> Self {
        Self {
            client: None,
            transport: None,
            resolver: None,
            debugger: None,
            imports: HashMap::new(),
            supports_docker_load: true,
        }
    }
}

/// The codegen engine. One instance evaluates one module's targets; the
/// chain evaluator itself is single-threaded per target.
pub struct CodeGen {
    client: Option<Arc<dyn SolveClient>>,
    transport: Option<Arc<dyn SessionTransport>>,
    resolver: Option<Arc<CachedResolver>>,
    debugger: Option<Arc<Debugger>>,
    imports: HashMap<String, Arc<Scope>>,
    supports_docker_load: bool,

    /// Current module filename, for frames.
    filename: String,
    /// The evaluator's logical call stack.
    frames: Vec<Frame>,
    /// Binding value cells, keyed by bind-clause identity.
    cells: HashMap<(Span, String), BindingCell>,
    /// Export requests queued as siblings of the main target.
    export_requests: Vec<Request>,
}

impl CodeGen {
    pub fn new(options: CodeGenOptions) -> Self {
        Self {
            client: options.client,
            transport: options.transport,
            resolver: options.resolver.map(|r| Arc::new(CachedResolver::new(r))),
            debugger: options.debugger,
            imports: options.imports,
            supports_docker_load: options.supports_docker_load,
            filename: String::new(),
            frames: vec![],
            cells: HashMap::new(),
            export_requests: vec![],
        }
    }

    /// Compile the named targets into a single request tree. Multiple
    /// targets and queued export requests solve as siblings.
    pub async fn generate(
        &mut self,
        module: &Module,
        targets: &[Target],
    ) -> Result<Request, CodegenError> {
        self.filename = module.filename.clone();
        let scope = scope::module_scope(module, &self.imports)?;

        let mut requests = vec![];
        for target in targets {
            info!(target = %target.name, file = %module.filename, "compiling target");
            match self.generate_target(&scope, target).await {
                Ok(request) => requests.push(request),
                Err(err) => {
                    let err = err.traced(self.frames.clone());
                    if let Some(debugger) = &self.debugger {
                        debugger.finish();
                    }
                    return Err(err);
                }
            }
            self.frames.clear();
        }
        if let Some(debugger) = &self.debugger {
            debugger.finish();
        }
        requests.extend(self.export_requests.drain(..));
        Ok(Request::parallel(requests))
    }

    async fn generate_target(
        &mut self,
        scope: &Arc<Scope>,
        target: &Target,
    ) -> Result<Request, CodegenError> {
        let func = match scope.lookup(&target.name) {
            Some(obj) => match &obj.node {
                ObjNode::Func(func) => func.clone(),
                _ => {
                    return Err(CodegenError::UnknownObject {
                        name: target.name.clone(),
                        span: Span::default(),
                    })
                }
            },
            None => {
                return Err(CodegenError::UndefinedReference {
                    name: target.name.clone(),
                    span: Span::default(),
                })
            }
        };
        if !matches!(func.kind, Kind::Filesystem | Kind::Pipeline) {
            return Err(CodegenError::InvalidArg {
                message: format!(
                    "target '{}' must be fs or group, not {}",
                    target.name, func.kind
                ),
            });
        }

        let value = call::emit_func_call(self, scope, func, vec![]).await?;
        value.request()
    }

    // -- Collaborator access for builtins --

    pub(crate) fn resolver(&self) -> Result<&CachedResolver, CodegenError> {
        self.resolver.as_deref().ok_or_else(|| CodegenError::InvalidArg {
            message: "no image resolver configured".to_string(),
        })
    }

    pub(crate) fn solve_context(&self) -> Result<SolveContext, CodegenError> {
        let client = self.client.clone().ok_or_else(|| {
            CodegenError::Client(ClientError::Solve {
                message: "no build client configured".to_string(),
            })
        })?;
        Ok(SolveContext { client, transport: self.transport.clone() })
    }

    pub(crate) fn debugger(&self) -> Option<Arc<Debugger>> {
        self.debugger.clone()
    }

    pub(crate) fn supports_docker_load(&self) -> bool {
        self.supports_docker_load
    }

    /// Queue an export request as a sibling of the main target.
    pub(crate) fn push_export(&mut self, request: Request) {
        self.export_requests.push(request);
    }

    /// The value cell for a binding, creating it unset on first use.
    pub(crate) fn cell(&mut self, span: Span, target: &str) -> BindingCell {
        self.cells
            .entry((span, target.to_string()))
            .or_insert_with(BindingCell::new)
            .clone()
    }

    pub(crate) fn push_frame(&mut self, name: &str, span: Span) {
        self.frames.push(Frame { name: name.to_string(), span, filename: self.filename.clone() });
    }

    pub(crate) fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

// =============================================================================
// Tests
// =============================================================================
