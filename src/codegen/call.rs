//! Function Calls & Named References
//!
//! Expression evaluation, the named-reference resolution order, and the
//! function-call engine. User functions evaluate their body chain from the
//! zero value of their return kind inside a fresh callee scope, so argument
//! identifiers shadow outer declarations only inside the callee.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::ast::{CallName, Expr, FieldDecl, FuncDecl, Kind, OptionFamily, Span};
use crate::builtin::{registry, BindingHandle, CallContext, Callable};
use crate::debugger::{DebugSnapshot, StopReason};
use crate::scope::{self, ObjNode, Scope, ScopeLevel};
use crate::value::Value;

use super::{binding, chain, CodeGen, CodegenError};

type ValueFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, CodegenError>> + Send + 'a>>;

/// Evaluate one expression. `expected` is the kind the call site requires;
/// it specializes generic option literals and picks the registry namespace
/// for bare builtin references.
pub(crate) fn emit_expr<'a>(
    cg: &'a mut CodeGen,
    scope: &'a Arc<Scope>,
    expr: &'a Expr,
    expected: Kind,
) -> ValueFuture<'a> {
    Box::pin(async move {
        match expr {
            Expr::Bool(lit) => Ok(Value::Int(lit.value as i64)),
            Expr::Int(lit) => Ok(Value::Int(lit.value)),
            Expr::Str(lit) => Ok(Value::String(lit.value.clone())),
            Expr::Heredoc(doc) => Ok(Value::String(doc.value())),
            Expr::FuncLit(lit) => {
                let kind = match (lit.kind, expected) {
                    // A generic `option { ... }` literal takes the family
                    // the call site requires.
                    (Kind::Option(None), Kind::Option(family)) => Kind::Option(family),
                    (kind, _) => kind,
                };
                let block = Arc::new(Scope::child(scope.clone(), ScopeLevel::Block));
                chain::emit_chain(cg, &block, kind, &lit.body, Value::zero(kind)).await
            }
            Expr::Call(call) => {
                emit_named(
                    cg,
                    scope,
                    &call.name,
                    &call.args,
                    call.with.as_deref(),
                    expected,
                    call.span,
                )
                .await
            }
        }
    })
}

/// Resolve a named reference and evaluate it. Resolution order: scope chain
/// first (declarations shadow builtins), then the builtin registry for the
/// expected kind.
pub(crate) async fn emit_named(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    name: &CallName,
    args: &[Expr],
    with: Option<&Expr>,
    expected: Kind,
    span: Span,
) -> Result<Value, CodegenError> {
    match name {
        CallName::Ident(ident) => {
            if let Some(obj) = scope.lookup(&ident.text) {
                let node = obj.node.clone();
                let data = obj.data.clone();
                return emit_object(cg, scope, &ident.text, node, data, args, span).await;
            }
            let found = match expected {
                Kind::Option(None) => registry().lookup_unqualified_option(&ident.text)?,
                _ => registry().lookup(expected, &ident.text),
            };
            if let Some(callable) = found {
                let callable = callable.clone();
                return dispatch(
                    cg,
                    scope,
                    &callable,
                    args,
                    with,
                    span,
                    Value::zero(expected),
                    None,
                )
                .await;
            }
            Err(CodegenError::UndefinedReference { name: ident.text.clone(), span })
        }
        CallName::Selector { module, field } => {
            let foreign = match scope.lookup(&module.text) {
                Some(obj) => match &obj.node {
                    ObjNode::Import { scope: foreign, .. } => foreign.clone(),
                    _ => {
                        return Err(CodegenError::UnknownObject {
                            name: module.text.clone(),
                            span,
                        })
                    }
                },
                None => {
                    return Err(CodegenError::UndefinedReference {
                        name: module.text.clone(),
                        span,
                    })
                }
            };
            match foreign.lookup(&field.text) {
                Some(obj) => {
                    let node = obj.node.clone();
                    let data = obj.data.clone();
                    // Arguments evaluate in the caller's scope; the callee
                    // evaluates in the foreign module's scope.
                    match node {
                        ObjNode::Func(func) => {
                            let values = eval_args(cg, scope, &func.params, args).await?;
                            emit_func_call(cg, &foreign, func, values).await
                        }
                        ObjNode::Bind(bind) => {
                            let values = eval_args(cg, scope, &bind.func.params, args).await?;
                            binding::emit_binding(cg, &foreign, &bind, values).await
                        }
                        _ => emit_object(cg, scope, &field.text, node, data, args, span).await,
                    }
                }
                None => Err(CodegenError::UndefinedReference {
                    name: format!("{}.{}", module.text, field.text),
                    span,
                }),
            }
        }
    }
}

/// Evaluate a resolved scope object.
async fn emit_object(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    name: &str,
    node: ObjNode,
    data: Option<Value>,
    args: &[Expr],
    span: Span,
) -> Result<Value, CodegenError> {
    match node {
        ObjNode::Func(func) => {
            let values = eval_args(cg, scope, &func.params, args).await?;
            let declaring = scope.module_root();
            emit_func_call(cg, &declaring, func, values).await
        }
        ObjNode::Bind(bind) => {
            let values = eval_args(cg, scope, &bind.func.params, args).await?;
            binding::emit_binding(cg, scope, &bind, values).await
        }
        ObjNode::Field(_) => {
            if !args.is_empty() {
                return Err(CodegenError::WrongArity {
                    name: name.to_string(),
                    expected: 0,
                    actual: args.len(),
                });
            }
            data.ok_or_else(|| CodegenError::UnknownObject { name: name.to_string(), span })
        }
        ObjNode::Import { .. } => {
            Err(CodegenError::UnknownObject { name: name.to_string(), span })
        }
    }
}

/// Evaluate call arguments left-to-right against the declared parameters.
pub(crate) async fn eval_args(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    params: &[FieldDecl],
    exprs: &[Expr],
) -> Result<Vec<Value>, CodegenError> {
    if params.len() != exprs.len() {
        return Err(CodegenError::WrongArity {
            name: params
                .first()
                .map(|p| p.name.text.clone())
                .unwrap_or_else(|| "function".to_string()),
            expected: params.len(),
            actual: exprs.len(),
        });
    }
    let mut values = Vec::with_capacity(exprs.len());
    for (param, expr) in params.iter().zip(exprs) {
        values.push(emit_expr(cg, scope, expr, param.kind).await?);
    }
    Ok(values)
}

/// Evaluate a function declaration with already-evaluated arguments.
pub(crate) async fn emit_func_call(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    func: Arc<FuncDecl>,
    args: Vec<Value>,
) -> Result<Value, CodegenError> {
    if args.len() != func.params.len() {
        return Err(CodegenError::WrongArity {
            name: func.name.text.clone(),
            expected: func.params.len(),
            actual: args.len(),
        });
    }

    let callee = scope::function_scope(scope.clone(), &func, args);
    cg.push_frame(&func.name.text, func.span);

    if let Some(debugger) = cg.debugger() {
        let snapshot = DebugSnapshot {
            scope: callee.clone(),
            span: func.span,
            value: Value::zero(func.kind),
            options: vec![],
            reason: StopReason::Call,
            error: None,
            frames: cg.frames().to_vec(),
        };
        if let Err(err) = debugger.yield_state(snapshot).await {
            cg.pop_frame();
            return Err(err);
        }
    }

    let result =
        chain::emit_chain(cg, &callee, func.kind, &func.body, Value::zero(func.kind)).await;
    cg.pop_frame();
    result
}

/// Dispatch a builtin: marshal arguments against its signature, evaluate
/// the `with` clause in the builtin's option namespace, and invoke it with
/// the register.
pub(crate) async fn dispatch(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    callable: &Arc<dyn Callable>,
    args: &[Expr],
    with: Option<&Expr>,
    span: Span,
    register: Value,
    binding: Option<&crate::ast::BindClause>,
) -> Result<Value, CodegenError> {
    let sig = callable.signature();
    sig.check_arity(callable.name(), args.len())?;

    let mut values = Vec::with_capacity(args.len());
    for (i, expr) in args.iter().enumerate() {
        let param = match sig.params.get(i).copied().or(sig.variadic) {
            Some(param) => param,
            None => {
                return Err(CodegenError::WrongArity {
                    name: callable.name().to_string(),
                    expected: sig.params.len(),
                    actual: args.len(),
                })
            }
        };
        values.push(emit_expr(cg, scope, expr, param.expr_kind()).await?);
    }

    let options = match with {
        Some(expr) => {
            let family = OptionFamily::from_parent(callable.name());
            emit_expr(cg, scope, expr, Kind::Option(family)).await?.option()?
        }
        None => vec![],
    };

    let (handle, has_binding) = match binding {
        Some(clause) => {
            let handle = callable.bind_output().and_then(|output| {
                clause
                    .source_target(output)
                    .or_else(|| clause.default_target())
                    .map(|target| BindingHandle {
                        target: target.target.text.clone(),
                        cell: cg.cell(clause.span, &target.target.text),
                    })
            });
            (handle, true)
        }
        None => (None, false),
    };

    let mut ctx = CallContext { cg, span, register, options, binding: handle, has_binding };
    callable.call(&mut ctx, values).await.map_err(|err| err.at(span))
}
