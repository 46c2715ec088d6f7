//! Debugger
//!
//! A cooperative interceptor over the evaluator. The evaluator yields at
//! every significant step - call boundaries, statement boundaries,
//! breakpoints - and blocks while a control decides what happens next.
//! Every yielded state lands in a linear recording, so stepping works in
//! both directions: backward motion replays the recording, forward motion
//! replays until the recording runs out and only then resumes the
//! evaluator. A mutex serialises controls against the evaluator's yield;
//! exactly one control is in flight at a time.

pub mod exec;

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

use crate::ast::Span;
use crate::codegen::{CodegenError, Frame};
use crate::options::OptionItem;
use crate::scope::Scope;
use crate::value::Value;

/// Motion direction through the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// What the evaluator should do at its next yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    /// Run until a breakpoint or program end.
    Continue,
    /// Stop at the next state no deeper than the control depth.
    Next,
    /// Stop at the next state.
    Step,
    /// Stop once the stack is strictly shallower than the control depth.
    StepOut,
}

/// Why the evaluator yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Entering a function call.
    Call,
    /// About to evaluate a statement.
    Statement,
    /// A source-defined `breakpoint` statement.
    Breakpoint,
    /// A statement failed; the state carries the error.
    Error,
}

/// A recorded evaluator state.
#[derive(Debug, Clone)]
pub struct DebugSnapshot {
    pub scope: Arc<Scope>,
    pub span: Span,
    pub value: Value,
    pub options: Vec<OptionItem>,
    pub reason: StopReason,
    pub error: Option<String>,
    pub frames: Vec<Frame>,
}

/// A breakpoint, equal by source position. Source-defined breakpoints come
/// from `breakpoint` statements and cannot be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub span: Span,
    pub source_defined: bool,
}

struct Shared {
    recording: Vec<DebugSnapshot>,
    cursor: usize,
    mode: DebugMode,
    /// Stack depth captured when the pending control was issued; `Next` and
    /// `StepOut` compare against it.
    control_depth: usize,
    breakpoints: Vec<Breakpoint>,
    /// The evaluator is blocked waiting for a control.
    stopped: bool,
    /// The program ran to completion (or failed terminally).
    ended: bool,
    /// `Terminate` was called; every waiter unwinds with `DebugExit`.
    exited: bool,
}

/// The debugger. Shared between the evaluator (which yields into it) and
/// any number of control callers.
pub struct Debugger {
    shared: Mutex<Shared>,
    /// Signalled when a new stopped state (or termination) is observable.
    yielded: Notify,
    /// Signalled to resume the blocked evaluator.
    resume: Notify,
    /// Serialises control calls.
    control: tokio::sync::Mutex<()>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared {
                recording: vec![],
                cursor: 0,
                // Stop at the first yielded state, like stopping on entry.
                mode: DebugMode::Step,
                control_depth: 0,
                breakpoints: vec![],
                stopped: false,
                ended: false,
                exited: false,
            }),
            yielded: Notify::new(),
            resume: Notify::new(),
            control: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("debugger state poisoned")
    }

    // -- Evaluator side --

    /// Record a state and, depending on the pending control, block until
    /// the next control arrives. Returns `DebugExit` once terminated.
    pub async fn yield_state(&self, snapshot: DebugSnapshot) -> Result<(), CodegenError> {
        let should_stop;
        {
            let mut shared = self.lock();
            if shared.exited {
                return Err(CodegenError::DebugExit);
            }
            if snapshot.reason == StopReason::Breakpoint {
                let bp = Breakpoint { span: snapshot.span, source_defined: true };
                if !shared.breakpoints.contains(&bp) {
                    shared.breakpoints.push(bp);
                }
            }

            let depth = snapshot.frames.len();
            should_stop = match shared.mode {
                DebugMode::Step => true,
                DebugMode::Next => depth <= shared.control_depth,
                DebugMode::StepOut => depth < shared.control_depth,
                DebugMode::Continue => {
                    snapshot.reason == StopReason::Breakpoint
                        || snapshot.reason == StopReason::Error
                        || shared
                            .breakpoints
                            .iter()
                            .any(|bp| !bp.source_defined && bp.span == snapshot.span)
                }
            };

            shared.recording.push(snapshot);
            shared.cursor = shared.recording.len() - 1;
            if should_stop {
                shared.stopped = true;
            }
        }

        if !should_stop {
            return Ok(());
        }

        debug!("evaluator stopped, waiting for control");
        self.yielded.notify_waiters();
        self.resume.notified().await;

        let shared = self.lock();
        if shared.exited {
            return Err(CodegenError::DebugExit);
        }
        Ok(())
    }

    /// Mark the program as finished so controls stop waiting for new
    /// states.
    pub fn finish(&self) {
        self.lock().ended = true;
        self.yielded.notify_waiters();
    }

    // -- Control side --

    /// Block until the evaluator has a stopped state (or the program ended)
    /// and return it. Returns `DebugExit` once terminated.
    pub async fn get_state(&self) -> Result<DebugSnapshot, CodegenError> {
        loop {
            let notified = self.yielded.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let shared = self.lock();
                if shared.exited {
                    return Err(CodegenError::DebugExit);
                }
                if shared.stopped || shared.ended {
                    if let Some(state) = shared.recording.get(shared.cursor) {
                        return Ok(state.clone());
                    }
                    if shared.ended {
                        return Err(CodegenError::DebugExit);
                    }
                }
            }
            notified.await;
        }
    }

    /// Advance or rewind one recorded state.
    pub async fn step(&self, direction: Direction) -> Result<DebugSnapshot, CodegenError> {
        let _control = self.control.lock().await;
        match direction {
            Direction::Backward => {
                let mut shared = self.lock();
                shared.cursor = shared.cursor.saturating_sub(1);
                drop(shared);
                self.get_state().await
            }
            Direction::Forward => {
                {
                    let mut shared = self.lock();
                    if shared.cursor + 1 < shared.recording.len() {
                        shared.cursor += 1;
                        drop(shared);
                        return self.get_state().await;
                    }
                }
                self.resume_with(DebugMode::Step, 0).await
            }
        }
    }

    /// Run until a breakpoint, program end, or program start.
    pub async fn continue_(&self, direction: Direction) -> Result<DebugSnapshot, CodegenError> {
        let _control = self.control.lock().await;
        match direction {
            Direction::Backward => {
                let mut shared = self.lock();
                let target = (0..shared.cursor)
                    .rev()
                    .find(|&i| {
                        let state = &shared.recording[i];
                        shared.breakpoints.iter().any(|bp| bp.span == state.span)
                    })
                    .unwrap_or(0);
                shared.cursor = target;
                drop(shared);
                self.get_state().await
            }
            Direction::Forward => {
                {
                    let mut shared = self.lock();
                    let hit = (shared.cursor + 1..shared.recording.len()).find(|&i| {
                        let state = &shared.recording[i];
                        shared.breakpoints.iter().any(|bp| bp.span == state.span)
                    });
                    if let Some(i) = hit {
                        shared.cursor = i;
                        drop(shared);
                        return self.get_state().await;
                    }
                    if shared.ended {
                        shared.cursor = shared.recording.len().saturating_sub(1);
                        drop(shared);
                        return self.get_state().await;
                    }
                }
                self.resume_with(DebugMode::Continue, 0).await
            }
        }
    }

    /// Like step, but skip over frames deeper than the cursor.
    pub async fn next(&self, direction: Direction) -> Result<DebugSnapshot, CodegenError> {
        let _control = self.control.lock().await;
        let depth = self.cursor_depth();
        self.move_until(direction, DebugMode::Next, depth, |state| state.frames.len() <= depth)
            .await
    }

    /// Run until the stack is strictly shallower than the cursor.
    pub async fn step_out(&self, direction: Direction) -> Result<DebugSnapshot, CodegenError> {
        let _control = self.control.lock().await;
        let depth = self.cursor_depth();
        self.move_until(direction, DebugMode::StepOut, depth, |state| state.frames.len() < depth)
            .await
    }

    /// Rewind the recording to its first state and face forward.
    pub async fn restart(&self) -> Result<DebugSnapshot, CodegenError> {
        let _control = self.control.lock().await;
        self.lock().cursor = 0;
        self.get_state().await
    }

    /// Set the exit sentinel and wake every waiter.
    pub fn terminate(&self) {
        {
            let mut shared = self.lock();
            shared.exited = true;
        }
        self.resume.notify_one();
        self.yielded.notify_waiters();
    }

    /// The recorded call stack of the current state.
    pub async fn backtrace(&self) -> Result<Vec<Frame>, CodegenError> {
        Ok(self.get_state().await?.frames)
    }

    // -- Breakpoints --

    /// Create a user breakpoint at a normalized source position.
    pub fn create_breakpoint(&self, span: Span) -> Result<Breakpoint, CodegenError> {
        let mut shared = self.lock();
        if shared.breakpoints.iter().any(|bp| bp.span == span) {
            return Err(CodegenError::DuplicateBreakpoint { span });
        }
        let bp = Breakpoint { span, source_defined: false };
        shared.breakpoints.push(bp.clone());
        Ok(bp)
    }

    /// Delete a user breakpoint. Source-defined breakpoints refuse.
    pub fn clear_breakpoint(&self, span: Span) -> Result<(), CodegenError> {
        let mut shared = self.lock();
        match shared.breakpoints.iter().position(|bp| bp.span == span) {
            Some(i) if shared.breakpoints[i].source_defined => {
                Err(CodegenError::SourceBreakpoint { span })
            }
            Some(i) => {
                shared.breakpoints.remove(i);
                Ok(())
            }
            None => Err(CodegenError::UndefinedReference {
                name: format!("breakpoint at {}", span),
                span,
            }),
        }
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.lock().breakpoints.clone()
    }

    // -- Internals --

    fn cursor_depth(&self) -> usize {
        let shared = self.lock();
        shared.recording.get(shared.cursor).map(|s| s.frames.len()).unwrap_or(0)
    }

    async fn move_until<F>(
        &self,
        direction: Direction,
        mode: DebugMode,
        depth: usize,
        pred: F,
    ) -> Result<DebugSnapshot, CodegenError>
    where
        F: Fn(&DebugSnapshot) -> bool,
    {
        match direction {
            Direction::Backward => {
                let mut shared = self.lock();
                let target = (0..shared.cursor)
                    .rev()
                    .find(|&i| pred(&shared.recording[i]))
                    .unwrap_or(0);
                shared.cursor = target;
                drop(shared);
                self.get_state().await
            }
            Direction::Forward => {
                {
                    let mut shared = self.lock();
                    let hit =
                        (shared.cursor + 1..shared.recording.len()).find(|&i| pred(&shared.recording[i]));
                    if let Some(i) = hit {
                        shared.cursor = i;
                        drop(shared);
                        return self.get_state().await;
                    }
                    if shared.ended {
                        shared.cursor = shared.recording.len().saturating_sub(1);
                        drop(shared);
                        return self.get_state().await;
                    }
                }
                self.resume_with(mode, depth).await
            }
        }
    }

    /// Hand control back to the evaluator with the given mode, then wait
    /// for the next stop.
    async fn resume_with(&self, mode: DebugMode, depth: usize) -> Result<DebugSnapshot, CodegenError> {
        {
            let mut shared = self.lock();
            if shared.ended || shared.exited {
                drop(shared);
                return self.get_state().await;
            }
            shared.mode = mode;
            shared.control_depth = depth;
            // Clear the stop before waking the evaluator so the wait below
            // cannot observe the previous stop as the new one.
            shared.stopped = false;
        }
        self.resume.notify_one();
        // The evaluator clears `stopped` when it wakes; wait for the next
        // stopped state or program end.
        loop {
            let notified = self.yielded.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let shared = self.lock();
                if shared.exited {
                    return Err(CodegenError::DebugExit);
                }
                if shared.stopped || shared.ended {
                    if let Some(state) = shared.recording.get(shared.cursor) {
                        return Ok(state.clone());
                    }
                    if shared.ended {
                        return Err(CodegenError::DebugExit);
                    }
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;

    fn snapshot(line: usize, depth: usize, reason: StopReason) -> DebugSnapshot {
        DebugSnapshot {
            scope: Arc::new(crate::scope::Scope::root(crate::scope::ScopeLevel::Module)),
            span: Span::point(Position::new(line, 1, 0)),
            value: Value::None,
            options: vec![],
            reason,
            error: None,
            frames: (0..depth)
                .map(|i| Frame {
                    name: format!("f{}", i),
                    span: Span::default(),
                    filename: "test.hlb".into(),
                })
                .collect(),
        }
    }

    /// Drive a canned sequence of yields on a background task.
    fn spawn_program(debugger: Arc<Debugger>, states: Vec<DebugSnapshot>) {
        tokio::spawn(async move {
            for state in states {
                if debugger.yield_state(state).await.is_err() {
                    return;
                }
            }
            debugger.finish();
        });
    }

    #[tokio::test]
    async fn test_step_forward_then_backward_round_trips() {
        let debugger = Arc::new(Debugger::new());
        spawn_program(
            debugger.clone(),
            vec![
                snapshot(1, 1, StopReason::Statement),
                snapshot(2, 1, StopReason::Statement),
                snapshot(3, 1, StopReason::Statement),
            ],
        );

        let first = debugger.get_state().await.unwrap();
        assert_eq!(first.span.start.line, 1);

        let second = debugger.step(Direction::Forward).await.unwrap();
        assert_eq!(second.span.start.line, 2);

        let back = debugger.step(Direction::Backward).await.unwrap();
        assert_eq!(back.span.start.line, 1);

        // Forward again replays the recording without re-running.
        let again = debugger.step(Direction::Forward).await.unwrap();
        assert_eq!(again.span.start.line, 2);
    }

    #[tokio::test]
    async fn test_continue_stops_at_breakpoint() {
        let debugger = Arc::new(Debugger::new());
        debugger.create_breakpoint(Span::point(Position::new(3, 1, 0))).unwrap();
        spawn_program(
            debugger.clone(),
            vec![
                snapshot(1, 1, StopReason::Statement),
                snapshot(2, 1, StopReason::Statement),
                snapshot(3, 1, StopReason::Statement),
                snapshot(4, 1, StopReason::Statement),
            ],
        );

        debugger.get_state().await.unwrap();
        let stopped = debugger.continue_(Direction::Forward).await.unwrap();
        assert_eq!(stopped.span.start.line, 3);
    }

    #[tokio::test]
    async fn test_continue_to_end_and_restart() {
        let debugger = Arc::new(Debugger::new());
        spawn_program(
            debugger.clone(),
            vec![snapshot(1, 1, StopReason::Statement), snapshot(2, 1, StopReason::Statement)],
        );

        debugger.get_state().await.unwrap();
        let last = debugger.continue_(Direction::Forward).await.unwrap();
        assert_eq!(last.span.start.line, 2);

        let first = debugger.restart().await.unwrap();
        assert_eq!(first.span.start.line, 1);
    }

    #[tokio::test]
    async fn test_next_skips_deeper_frames() {
        let debugger = Arc::new(Debugger::new());
        spawn_program(
            debugger.clone(),
            vec![
                snapshot(1, 1, StopReason::Statement),
                snapshot(10, 2, StopReason::Call),
                snapshot(11, 2, StopReason::Statement),
                snapshot(2, 1, StopReason::Statement),
            ],
        );

        debugger.get_state().await.unwrap();
        let stopped = debugger.next(Direction::Forward).await.unwrap();
        assert_eq!(stopped.span.start.line, 2);
    }

    #[tokio::test]
    async fn test_step_out_stops_on_shallower_frame() {
        let debugger = Arc::new(Debugger::new());
        spawn_program(
            debugger.clone(),
            vec![
                snapshot(10, 2, StopReason::Statement),
                snapshot(11, 2, StopReason::Statement),
                snapshot(2, 1, StopReason::Statement),
            ],
        );

        debugger.get_state().await.unwrap();
        let stopped = debugger.step_out(Direction::Forward).await.unwrap();
        assert_eq!(stopped.span.start.line, 2);
    }

    #[tokio::test]
    async fn test_terminate_unwinds_evaluator_with_debug_exit() {
        let debugger = Arc::new(Debugger::new());
        let eval = {
            let debugger = debugger.clone();
            tokio::spawn(async move {
                debugger.yield_state(snapshot(1, 1, StopReason::Statement)).await
            })
        };

        debugger.get_state().await.unwrap();
        debugger.terminate();
        let result = eval.await.unwrap();
        assert!(result.unwrap_err().is_debug_exit());
        assert!(debugger.get_state().await.unwrap_err().is_debug_exit());
    }

    #[tokio::test]
    async fn test_breakpoint_management() {
        let debugger = Debugger::new();
        let span = Span::point(Position::new(5, 1, 0));
        debugger.create_breakpoint(span).unwrap();
        assert!(matches!(
            debugger.create_breakpoint(span),
            Err(CodegenError::DuplicateBreakpoint { .. })
        ));
        debugger.clear_breakpoint(span).unwrap();
        assert!(debugger.breakpoints().is_empty());
    }

    #[tokio::test]
    async fn test_source_breakpoints_cannot_be_deleted() {
        let debugger = Arc::new(Debugger::new());
        spawn_program(debugger.clone(), vec![snapshot(7, 1, StopReason::Breakpoint)]);

        let state = debugger.get_state().await.unwrap();
        assert_eq!(state.reason, StopReason::Breakpoint);
        let err = debugger.clear_breakpoint(state.span).unwrap_err();
        assert!(matches!(err, CodegenError::SourceBreakpoint { .. }));
    }
}
