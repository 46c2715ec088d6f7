//! Chain Evaluator
//!
//! Folds a statement list into a single value of the chain's kind. Each
//! statement resolves to a transformer of the accumulator: builtins mutate
//! it, named references replace it with their result. Filesystem states are
//! validated after every step; `as` clauses record the produced sub-value
//! into the binding cell; a `breakpoint` statement hands control to the
//! debugger.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::ast::{BlockStmt, CallName, CallStmt, Kind};
use crate::builtin::registry;
use crate::debugger::{DebugSnapshot, StopReason};
use crate::scope::Scope;
use crate::value::Value;

use super::binding::CellState;
use super::errors::SharedError;
use super::{call, CodeGen, CodegenError};

type ValueFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, CodegenError>> + Send + 'a>>;

/// Fold a block of statements into a value, starting from `start`.
pub(crate) fn emit_chain<'a>(
    cg: &'a mut CodeGen,
    scope: &'a Arc<Scope>,
    kind: Kind,
    block: &'a BlockStmt,
    start: Value,
) -> ValueFuture<'a> {
    Box::pin(async move {
        let mut acc = start;
        for stmt in block.non_empty_stmts() {
            acc = emit_stmt(cg, scope, kind, stmt, acc).await?;
        }
        Ok(acc)
    })
}

async fn emit_stmt(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    kind: Kind,
    stmt: &CallStmt,
    acc: Value,
) -> Result<Value, CodegenError> {
    // A `breakpoint` statement is not a call; it hands the current state to
    // the debugger and the chain continues.
    if stmt.head() == "breakpoint" && stmt.args.is_empty() {
        if let Some(debugger) = cg.debugger() {
            debugger
                .yield_state(snapshot(cg, scope, stmt, &acc, StopReason::Breakpoint, None))
                .await?;
        }
        return Ok(acc);
    }

    if let Some(debugger) = cg.debugger() {
        debugger
            .yield_state(snapshot(cg, scope, stmt, &acc, StopReason::Statement, None))
            .await?;
    }

    let result = emit_call(cg, scope, kind, stmt, acc).await;
    let (value, bound_by_builtin) = match result {
        Ok(pair) => pair,
        Err(err) => {
            // Attach the call site and the frame stack here, while the
            // frames are still live; outer wraps keep the first backtrace.
            let err = err.at(stmt.span).traced(cg.frames().to_vec());
            if let Some(debugger) = cg.debugger() {
                if !err.is_debug_exit() {
                    // Freeze the cursor at the failing state so the
                    // operator can inspect it.
                    let snap = snapshot(
                        cg,
                        scope,
                        stmt,
                        &Value::zero(kind),
                        StopReason::Error,
                        Some(err.to_string()),
                    );
                    debugger.yield_state(snap).await?;
                }
            }
            return Err(err);
        }
    };

    if kind == Kind::Filesystem {
        if let Value::Filesystem(fs) = &value {
            fs.state.validate().map_err(|err| CodegenError::from(err).at(stmt.span))?;
        }
    }

    if let Some(clause) = &stmt.binding {
        if !bound_by_builtin {
            record_binding(cg, clause, &value)?;
        }
    }
    Ok(value)
}

/// Resolve the statement head and apply it to the accumulator. Returns the
/// new accumulator and whether the statement's binding was consumed by the
/// builtin itself.
async fn emit_call(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    kind: Kind,
    stmt: &CallStmt,
    acc: Value,
) -> Result<(Value, bool), CodegenError> {
    if let CallName::Ident(ident) = &stmt.name {
        if scope.lookup(&ident.text).is_none() {
            let found = match kind {
                Kind::Option(None) => registry().lookup_unqualified_option(&ident.text)?,
                _ => registry().lookup(kind, &ident.text),
            };
            if let Some(callable) = found {
                let callable = callable.clone();
                let consumed = callable.bind_output().is_some() && stmt.binding.is_some();
                let value = call::dispatch(
                    cg,
                    scope,
                    &callable,
                    &stmt.args,
                    stmt.with.as_ref(),
                    stmt.span,
                    acc,
                    stmt.binding.as_ref(),
                )
                .await?;
                return Ok((value, consumed));
            }
        }
    }

    let value = call::emit_named(
        cg,
        scope,
        &stmt.name,
        &stmt.args,
        stmt.with.as_ref(),
        kind,
        stmt.span,
    )
    .await?;

    // Named references replace the accumulator, except in option chains,
    // where lists compose: the referenced function's records append to the
    // accumulated sequence.
    if let Kind::Option(_) = kind {
        let mut items = acc.option()?;
        items.extend(value.option()?);
        return Ok((Value::Option(items), false));
    }
    Ok((value, false))
}

/// Record a statement's value into its binding cells. Recording into a cell
/// marked in-progress writes the value and unwinds with the cycle sentinel
/// the forcing caller catches; recording into a failed cell re-raises its
/// error.
fn record_binding(
    cg: &mut CodeGen,
    clause: &crate::ast::BindClause,
    value: &Value,
) -> Result<(), CodegenError> {
    for target in &clause.targets {
        if target.source.is_some() {
            // Named side-outputs belong to the builtin that produces them.
            continue;
        }
        let cell = cg.cell(clause.span, &target.target.text);
        match cell.state() {
            CellState::InProgress => {
                cell.set(CellState::Computed(value.clone()));
                return Err(CodegenError::BindingCycle {
                    binding: target.target.text.clone(),
                    span: clause.span,
                });
            }
            CellState::Failed(err) => return Err(SharedError(err).into()),
            CellState::Unset | CellState::Computed(_) => {
                cell.set(CellState::Computed(value.clone()));
            }
        }
    }
    Ok(())
}

fn snapshot(
    cg: &CodeGen,
    scope: &Arc<Scope>,
    stmt: &CallStmt,
    value: &Value,
    reason: StopReason,
    error: Option<String>,
) -> DebugSnapshot {
    DebugSnapshot {
        scope: scope.clone(),
        span: stmt.span,
        value: value.clone(),
        options: vec![],
        reason,
        error,
        frames: cg.frames().to_vec(),
    }
}
