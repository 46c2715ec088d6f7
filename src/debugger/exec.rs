//! Debug Exec
//!
//! Start a one-off process in the filesystem state the debugger is stopped
//! at, via the remote-build client's container API. Only exec ops can be
//! entered; anything else refuses cleanly. When local stdin is a terminal,
//! window resizes are forwarded to the container.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use crate::codegen::CodegenError;
use crate::llb::Op;
use crate::solver::{ContainerProcess, ContainerRequest, ExecStdio, SolveClient};
use crate::value::Value;

use super::Debugger;

impl Debugger {
    /// Exec into the current state (including a failed-solve state, whose
    /// snapshot carries the error) and wait for the process to exit.
    pub async fn exec(
        &self,
        client: Arc<dyn SolveClient>,
        stdio: ExecStdio,
        args: Vec<String>,
    ) -> Result<i32, CodegenError> {
        let state = self.get_state().await?;
        let fs = match &state.value {
            Value::Filesystem(fs) => fs.clone(),
            _ => return Err(CodegenError::CannotExecNonRunOp),
        };
        match fs.state.op() {
            Some(op) if matches!(op.as_ref(), Op::Exec { .. }) => {}
            _ => return Err(CodegenError::CannotExecNonRunOp),
        }

        let def = fs.state.marshal()?;
        let args = if args.is_empty() { vec!["/bin/sh".to_string()] } else { args };
        let tty = stdio.tty;
        let req = ContainerRequest {
            def,
            args,
            env: fs.image.config.env.clone(),
            cwd: if fs.image.config.working_dir.is_empty() {
                "/".to_string()
            } else {
                fs.image.config.working_dir.clone()
            },
            user: fs.image.config.user.clone(),
        };

        debug!(args = ?req.args, "starting debug container");
        let process = client.new_container(req, stdio).await?;

        let mut aux: JoinSet<()> = JoinSet::new();
        if tty {
            spawn_resize_task(&mut aux, process.clone());
        }
        let exit = process.wait().await;
        aux.abort_all();
        Ok(exit?)
    }
}

/// Whether local stdin is a terminal.
#[cfg(unix)]
pub fn stdin_is_tty() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

#[cfg(not(unix))]
pub fn stdin_is_tty() -> bool {
    false
}

/// The local terminal's (cols, rows), if stdin has one.
#[cfg(unix)]
fn terminal_size() -> Option<(u16, u16)> {
    // SAFETY: TIOCGWINSZ writes only into the winsize out-param.
    unsafe {
        let mut ws: libc::winsize = std::mem::zeroed();
        if libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut ws) == 0 && ws.ws_col > 0 {
            Some((ws.ws_col, ws.ws_row))
        } else {
            None
        }
    }
}

#[cfg(unix)]
fn spawn_resize_task(aux: &mut JoinSet<()>, process: Arc<dyn ContainerProcess>) {
    aux.spawn(async move {
        if let Some((cols, rows)) = terminal_size() {
            let _ = process.resize(cols, rows).await;
        }
        let mut winch = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
        {
            Ok(stream) => stream,
            Err(_) => return,
        };
        while winch.recv().await.is_some() {
            if let Some((cols, rows)) = terminal_size() {
                let _ = process.resize(cols, rows).await;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_resize_task(_aux: &mut JoinSet<()>, _process: Arc<dyn ContainerProcess>) {}
