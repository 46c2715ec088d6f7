//! Export Builtins
//!
//! Terminal directives that materialise a filesystem: push, engine load,
//! and the download family. Each appends export-specific solve and session
//! options to a copy of the current filesystem and queues it as a sibling
//! request of the main target. A bound `digest` forces the solve to run
//! synchronously so the cell holds the exporter's digest before the caller
//! continues.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::Kind;
use crate::codegen::binding::CellState;
use crate::codegen::{BindingCell, CodegenError};
use crate::session::SessionOption;
use crate::solver::{ClientError, SolveCallback, SolveOption, SolveResponse};
use crate::value::Value;

use super::fs::check_image_ref;
use super::{CallContext, Callable, ParamKind, Signature};

/// Writes the exporter's image digest into a binding cell.
struct DigestCallback {
    cell: BindingCell,
}

#[async_trait]
impl SolveCallback for DigestCallback {
    async fn done(&self, resp: &SolveResponse) -> Result<(), ClientError> {
        match resp.image_digest() {
            Some(digest) => {
                self.cell.set(CellState::Computed(Value::String(digest.to_string())));
                Ok(())
            }
            None => Err(ClientError::Solve {
                message: "exporter response carried no image digest".to_string(),
            }),
        }
    }
}

/// Queue (or, with a digest binding, immediately run) an export of the
/// current filesystem with the extra options applied.
async fn emit_export(
    ctx: &mut CallContext<'_>,
    solve_opt: SolveOption,
    session_opt: Option<SessionOption>,
) -> Result<Value, CodegenError> {
    let fs = ctx.register.filesystem()?;
    let mut export_fs = fs.clone();
    // Image exporters ship the accumulated config and history alongside the
    // layers.
    let spec_json = serde_json::to_string(&fs.image)
        .map_err(|err| CodegenError::InvalidArg { message: err.to_string() })?;
    export_fs.solve_opts.push(SolveOption::ImageSpec { json: spec_json });
    export_fs.solve_opts.push(solve_opt);
    if let Some(opt) = session_opt {
        export_fs.session_opts.push(opt);
    }
    let mut request = export_fs.request()?;

    match ctx.binding.take() {
        Some(handle) => {
            request = request.with_callback(Arc::new(DigestCallback { cell: handle.cell }));
            let solve_ctx = ctx.cg.solve_context()?;
            request.solve(&solve_ctx).await?;
        }
        None => ctx.cg.push_export(request),
    }
    Ok(Value::Filesystem(fs))
}

pub struct DockerPush;

#[async_trait]
impl Callable for DockerPush {
    fn name(&self) -> &'static str {
        "dockerPush"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    fn bind_output(&self) -> Option<&'static str> {
        Some("digest")
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let reference = args[0].string()?;
        check_image_ref(&reference)?;
        emit_export(ctx, SolveOption::PushImage { reference }, None).await
    }
}

pub struct DockerLoad;

#[async_trait]
impl Callable for DockerLoad {
    fn name(&self) -> &'static str {
        "dockerLoad"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let reference = args[0].string()?;
        check_image_ref(&reference)?;
        if !ctx.cg.supports_docker_load() {
            return Err(CodegenError::DockerEngineUnsupported {
                feature: "tarball image load".to_string(),
            });
        }
        emit_export(
            ctx,
            SolveOption::DockerLoad { reference },
            Some(SessionOption::DockerLoad),
        )
        .await
    }
}

pub struct Download;

#[async_trait]
impl Callable for Download {
    fn name(&self) -> &'static str {
        "download"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let path = args[0].string()?;
        emit_export(
            ctx,
            SolveOption::DownloadDir { path: path.clone() },
            Some(SessionOption::OutputDir { path }),
        )
        .await
    }
}

pub struct DownloadTarball;

#[async_trait]
impl Callable for DownloadTarball {
    fn name(&self) -> &'static str {
        "downloadTarball"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let path = args[0].string()?;
        emit_export(
            ctx,
            SolveOption::DownloadTarball { path: path.clone() },
            Some(SessionOption::OutputTarball { path }),
        )
        .await
    }
}

pub struct DownloadOCITarball;

#[async_trait]
impl Callable for DownloadOCITarball {
    fn name(&self) -> &'static str {
        "downloadOCITarball"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let path = args[0].string()?;
        emit_export(
            ctx,
            SolveOption::DownloadOCITarball { path: path.clone() },
            Some(SessionOption::OutputTarball { path }),
        )
        .await
    }
}

pub struct DownloadDockerTarball;

#[async_trait]
impl Callable for DownloadDockerTarball {
    fn name(&self) -> &'static str {
        "downloadDockerTarball"
    }

    fn signature(&self) -> Signature {
        Signature::new(Kind::Filesystem, &[ParamKind::String, ParamKind::String])
    }

    async fn call(
        &self,
        ctx: &mut CallContext<'_>,
        args: Vec<Value>,
    ) -> Result<Value, CodegenError> {
        let path = args[0].string()?;
        let reference = args[1].string()?;
        check_image_ref(&reference)?;
        emit_export(
            ctx,
            SolveOption::DownloadDockerTarball { path: path.clone(), reference },
            Some(SessionOption::OutputTarball { path }),
        )
        .await
    }
}
