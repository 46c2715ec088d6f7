//! Binding Cells
//!
//! A binding (`... as name`) has its own value cell, initially unset.
//! Evaluating the binding forces evaluation of its containing function; the
//! chain evaluator writes the cell when the bound statement completes and
//! unwinds with a cycle sentinel that the original caller catches by
//! binding identity. A genuine cycle - reading a binding whose cell is
//! already in progress - fails with the same sentinel, uncaught.

use std::sync::{Arc, Mutex};

use crate::codegen::errors::{CodegenError, SharedError};
use crate::scope::BindingRef;
use crate::value::Value;

use super::{call, CodeGen};
use crate::scope::Scope;

/// State of a binding's value cell.
#[derive(Debug, Clone, Default)]
pub enum CellState {
    #[default]
    Unset,
    InProgress,
    Computed(Value),
    Failed(Arc<CodegenError>),
}

/// A shared value cell for one binding.
#[derive(Debug, Clone, Default)]
pub struct BindingCell(Arc<Mutex<CellState>>);

impl BindingCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CellState {
        self.0.lock().expect("binding cell poisoned").clone()
    }

    pub fn set(&self, state: CellState) {
        *self.0.lock().expect("binding cell poisoned") = state;
    }
}

/// Evaluate a binding reference: return the computed cell value, forcing
/// evaluation of the containing function if needed.
pub(crate) async fn emit_binding(
    cg: &mut CodeGen,
    scope: &Arc<Scope>,
    binding: &BindingRef,
    args: Vec<Value>,
) -> Result<Value, CodegenError> {
    let cell = cg.cell(binding.span, &binding.target);
    match cell.state() {
        CellState::Computed(value) => return Ok(value),
        CellState::Failed(err) => return Err(SharedError(err).into()),
        CellState::InProgress => {
            return Err(CodegenError::BindingCycle {
                binding: binding.target.clone(),
                span: binding.span,
            })
        }
        CellState::Unset => {}
    }

    cell.set(CellState::InProgress);
    let declaring = scope.module_root();
    let result = call::emit_func_call(cg, &declaring, binding.func.clone(), args).await;
    match result {
        // The bound statement completed and unwound the rest of the
        // function; the cell now holds the value.
        Err(err)
            if err.binding_cycle_target() == Some(binding.target.as_str())
                && err.binding_cycle_span() == Some(binding.span) =>
        {
            match cell.state() {
                CellState::Computed(value) => Ok(value),
                _ => Err(err),
            }
        }
        Err(err) => {
            let shared = Arc::new(err);
            cell.set(CellState::Failed(shared.clone()));
            Err(SharedError(shared).into())
        }
        Ok(_) => match cell.state() {
            CellState::Computed(value) => Ok(value),
            _ => {
                let err = CodegenError::InvalidArg {
                    message: format!(
                        "binding '{}' was never produced by '{}'",
                        binding.target, binding.func.name
                    ),
                };
                let shared = Arc::new(err);
                cell.set(CellState::Failed(shared.clone()));
                Err(SharedError(shared).into())
            }
        },
    }
}
