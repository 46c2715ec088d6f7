//! Pipeline Builtins
//!
//! A `group` chain accumulates an ordered sequence of solve requests.
//! `parallel` appends one entry that fans its arguments out concurrently;
//! `stage` appends one entry that runs them strictly in order. Nesting
//! falls out of the request tree.

use async_trait::async_trait;

use crate::ast::Kind;
use crate::codegen::CodegenError;
use crate::solver::Request;
use crate::value::Value;

use super::{CallContext, Callable, ParamKind, Signature};

fn append(register: &Value, entry: Request) -> Result<Value, CodegenError> {
    let acc = register.request()?;
    let mut entries = match acc {
        Request::Sequence(entries) => entries,
        other => vec![other],
    };
    entries.push(entry);
    Ok(Value::Pipeline(Request::Sequence(entries)))
}

pub struct Parallel;

#[async_trait]
impl Callable for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn signature(&self) -> Signature {
        Signature::variadic(Kind::Pipeline, &[], ParamKind::Pipeline)
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let children: Vec<Request> = args.iter().map(|a| a.request()).collect::<Result<_, _>>()?;
        append(&ctx.register, Request::parallel(children))
    }
}

pub struct Stage;

#[async_trait]
impl Callable for Stage {
    fn name(&self) -> &'static str {
        "stage"
    }

    fn signature(&self) -> Signature {
        Signature::variadic(Kind::Pipeline, &[], ParamKind::Pipeline)
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let children: Vec<Request> = args.iter().map(|a| a.request()).collect::<Result<_, _>>()?;
        append(&ctx.register, Request::sequence(children))
    }
}
