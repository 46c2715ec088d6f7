//! Remote-Build Client Contract
//!
//! The daemon RPC transport is an external collaborator; this module pins
//! down exactly what the codegen core needs from it: solving marshalled
//! definitions and starting one-off container processes for the debugger.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::llb::Definition;
use crate::session::{Session, SessionError};

use super::request::SolveOption;

/// Errors surfaced by the remote-build client and its session plumbing.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("solve failed: {message}")]
    Solve { message: String },

    #[error("container request failed: {message}")]
    Container { message: String },

    #[error("image resolution failed for '{reference}': {message}")]
    Resolve { reference: String, message: String },

    #[error("solve canceled")]
    Canceled,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The daemon's answer to a solve. Exporter metadata is keyed the way the
/// daemon keys it; the image digest lives under `containerimage.digest`.
#[derive(Debug, Clone, Default)]
pub struct SolveResponse {
    pub exporter_response: HashMap<String, String>,
}

impl SolveResponse {
    /// The pushed image's content digest, when the solve exported one.
    pub fn image_digest(&self) -> Option<&str> {
        self.exporter_response.get("containerimage.digest").map(String::as_str)
    }
}

/// Stdio plumbing for a debug container process.
pub struct ExecStdio {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
    /// Whether the local stdin is a terminal; drives TTY resize wiring.
    pub tty: bool,
}

/// A request to start a one-off process in a solved filesystem state.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub def: Definition,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub user: String,
}

/// A running debug container process. Implementations handle their own
/// interior synchronisation so waiters and resizers can share the handle.
#[async_trait]
pub trait ContainerProcess: Send + Sync {
    /// Wait for the process to exit, returning its status code.
    async fn wait(&self) -> Result<i32, ClientError>;

    /// Resize the process TTY.
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), ClientError>;
}

/// The remote-build client.
#[async_trait]
pub trait SolveClient: Send + Sync {
    /// Solve a marshalled definition with the given options, attaching the
    /// session for the duration.
    async fn solve(
        &self,
        def: &Definition,
        opts: &[SolveOption],
        session: &Session,
    ) -> Result<SolveResponse, ClientError>;

    /// Start a container process for the debugger's `exec`.
    async fn new_container(
        &self,
        req: ContainerRequest,
        stdio: ExecStdio,
    ) -> Result<std::sync::Arc<dyn ContainerProcess>, ClientError>;
}
