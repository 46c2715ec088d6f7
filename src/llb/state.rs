//! LLB State Graph
//!
//! A [`State`] is an immutable handle onto a DAG of build ops. Combinators
//! return new states whose op references the receiver, so chains share
//! structure and clones are cheap. The empty state is scratch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::exec::{ExecMeta, Mount, SecretMount, SshMount};
use super::marshal::Digest;

/// Structural errors found while validating or marshalling a state.
#[derive(Error, Debug, Clone)]
pub enum StateError {
    #[error("invalid state: {reason}")]
    Invalid { reason: String },

    #[error("invalid digest '{value}'")]
    BadDigest { value: String },
}

/// Target platform for an image source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self { os: "linux".to_string(), arch: "amd64".to_string() }
    }
}

/// An immutable filesystem state handle. `None` is the scratch state.
#[derive(Debug, Clone, Default)]
pub struct State {
    op: Option<Arc<Op>>,
}

/// Ownership for created filesystem entries, as `user:group`.
pub type Chown = Option<String>;

/// A build operation node. Inputs are held as [`State`]s so the graph shares
/// structure.
#[derive(Debug, Clone)]
pub enum Op {
    Image {
        reference: String,
        platform: Option<Platform>,
        /// Pinned content digest, once resolved.
        digest: Option<Digest>,
    },
    Http {
        url: String,
        checksum: Option<Digest>,
        chmod: Option<u32>,
        filename: Option<String>,
    },
    Git {
        remote: String,
        reference: String,
        keep_git_dir: bool,
    },
    Local {
        name: String,
        include_patterns: Vec<String>,
        exclude_patterns: Vec<String>,
        follow_paths: Vec<String>,
    },
    Frontend {
        source: String,
        inputs: Vec<(String, State)>,
        opts: Vec<(String, String)>,
    },
    Exec {
        meta: ExecMeta,
        mounts: Vec<Mount>,
        secrets: Vec<SecretMount>,
        ssh: Vec<SshMount>,
    },
    File {
        input: State,
        action: FileAction,
    },
    Merge {
        inputs: Vec<State>,
    },
    Diff {
        lower: State,
        upper: State,
    },
}

/// A single file-op action.
#[derive(Debug, Clone)]
pub enum FileAction {
    Mkdir {
        path: String,
        mode: u32,
        make_parents: bool,
        chown: Chown,
        created: Option<DateTime<Utc>>,
    },
    Mkfile {
        path: String,
        mode: u32,
        data: String,
        chown: Chown,
        created: Option<DateTime<Utc>>,
    },
    Rm {
        path: String,
        allow_not_found: bool,
        allow_wildcard: bool,
    },
    Copy {
        src: State,
        src_path: String,
        dest_path: String,
        info: CopyInfo,
    },
}

/// Options applied to a copy action.
#[derive(Debug, Clone, Default)]
pub struct CopyInfo {
    pub follow_symlinks: bool,
    pub contents_only: bool,
    pub unpack: bool,
    pub create_dest_path: bool,
    pub allow_wildcard: bool,
    pub allow_empty_wildcard: bool,
    pub chown: Chown,
    pub chmod: Option<u32>,
    pub created: Option<DateTime<Utc>>,
}

impl State {
    /// The empty state.
    pub fn scratch() -> Self {
        Self { op: None }
    }

    pub fn from_op(op: Op) -> Self {
        Self { op: Some(Arc::new(op)) }
    }

    pub fn op(&self) -> Option<&Arc<Op>> {
        self.op.as_ref()
    }

    pub fn is_scratch(&self) -> bool {
        self.op.is_none()
    }

    pub fn image(reference: impl Into<String>) -> Self {
        Self::from_op(Op::Image { reference: reference.into(), platform: None, digest: None })
    }

    pub fn git(remote: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::from_op(Op::Git {
            remote: remote.into(),
            reference: reference.into(),
            keep_git_dir: false,
        })
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::from_op(Op::Http { url: url.into(), checksum: None, chmod: None, filename: None })
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::from_op(Op::Local {
            name: name.into(),
            include_patterns: vec![],
            exclude_patterns: vec![],
            follow_paths: vec![],
        })
    }

    /// The state after running a process. The root mount's filesystem is the
    /// output.
    pub fn exec(
        meta: ExecMeta,
        mounts: Vec<Mount>,
        secrets: Vec<SecretMount>,
        ssh: Vec<SshMount>,
    ) -> Self {
        Self::from_op(Op::Exec { meta, mounts, secrets, ssh })
    }

    pub fn file(self, action: FileAction) -> Self {
        Self::from_op(Op::File { input: self, action })
    }

    pub fn mkdir(self, path: impl Into<String>, mode: u32, make_parents: bool) -> Self {
        self.file(FileAction::Mkdir {
            path: path.into(),
            mode,
            make_parents,
            chown: None,
            created: None,
        })
    }

    pub fn mkfile(self, path: impl Into<String>, mode: u32, data: impl Into<String>) -> Self {
        self.file(FileAction::Mkfile {
            path: path.into(),
            mode,
            data: data.into(),
            chown: None,
            created: None,
        })
    }

    pub fn merge(inputs: Vec<State>) -> Self {
        Self::from_op(Op::Merge { inputs })
    }

    pub fn diff(lower: State, upper: State) -> Self {
        Self::from_op(Op::Diff { lower, upper })
    }

    /// Collect the file actions applied on top of this state's deepest
    /// non-file input, in application order.
    pub fn file_actions(&self) -> Vec<&FileAction> {
        let mut actions = vec![];
        let mut cur = self;
        while let Some(op) = cur.op() {
            match op.as_ref() {
                Op::File { input, action } => {
                    actions.push(action);
                    cur = input;
                }
                _ => break,
            }
        }
        actions.reverse();
        actions
    }

    /// Check that every reachable op has a well-formed output vertex.
    pub fn validate(&self) -> Result<(), StateError> {
        let mut seen = std::collections::HashSet::new();
        self.validate_inner(&mut seen)
    }

    fn validate_inner(
        &self,
        seen: &mut std::collections::HashSet<*const Op>,
    ) -> Result<(), StateError> {
        let op = match self.op() {
            Some(op) => op,
            None => return Ok(()),
        };
        if !seen.insert(Arc::as_ptr(op)) {
            return Ok(());
        }
        match op.as_ref() {
            Op::Image { reference, .. } => {
                if reference.is_empty() {
                    return Err(StateError::Invalid { reason: "image with empty reference".into() });
                }
            }
            Op::Http { url, .. } => {
                if url.is_empty() {
                    return Err(StateError::Invalid { reason: "http with empty url".into() });
                }
            }
            Op::Git { remote, .. } => {
                if remote.is_empty() {
                    return Err(StateError::Invalid { reason: "git with empty remote".into() });
                }
            }
            Op::Local { name, .. } => {
                if name.is_empty() {
                    return Err(StateError::Invalid { reason: "local with empty path".into() });
                }
            }
            Op::Frontend { source, inputs, .. } => {
                if source.is_empty() {
                    return Err(StateError::Invalid { reason: "frontend with empty source".into() });
                }
                for (_, input) in inputs {
                    input.validate_inner(seen)?;
                }
            }
            Op::Exec { meta, mounts, .. } => {
                if meta.args.is_empty() {
                    return Err(StateError::Invalid { reason: "exec with empty args".into() });
                }
                if mounts.is_empty() {
                    return Err(StateError::Invalid { reason: "exec with no mounts".into() });
                }
                if !mounts.iter().any(|m| m.dest == "/") {
                    return Err(StateError::Invalid { reason: "exec with no root mount".into() });
                }
                for mount in mounts {
                    mount.input.validate_inner(seen)?;
                }
            }
            Op::File { input, action } => {
                input.validate_inner(seen)?;
                if let FileAction::Copy { src, .. } = action {
                    src.validate_inner(seen)?;
                }
            }
            Op::Merge { inputs } => {
                if inputs.len() < 2 {
                    return Err(StateError::Invalid {
                        reason: format!("merge with {} inputs", inputs.len()),
                    });
                }
                for input in inputs {
                    input.validate_inner(seen)?;
                }
            }
            Op::Diff { lower, upper } => {
                lower.validate_inner(seen)?;
                upper.validate_inner(seen)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_is_valid() {
        assert!(State::scratch().validate().is_ok());
    }

    #[test]
    fn test_empty_image_ref_invalid() {
        assert!(State::image("").validate().is_err());
        assert!(State::image("alpine").validate().is_ok());
    }

    #[test]
    fn test_exec_requires_root_mount() {
        let meta = ExecMeta { args: vec!["sh".into()], ..Default::default() };
        let state = State::exec(
            meta.clone(),
            vec![Mount::bind(State::image("alpine"), "/work")],
            vec![],
            vec![],
        );
        assert!(state.validate().is_err());

        let state =
            State::exec(meta, vec![Mount::bind(State::image("alpine"), "/")], vec![], vec![]);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_merge_needs_two_inputs() {
        assert!(State::merge(vec![State::image("alpine")]).validate().is_err());
        assert!(State::merge(vec![State::image("a"), State::image("b")]).validate().is_ok());
    }

    #[test]
    fn test_file_actions_in_application_order() {
        let state = State::scratch().mkdir("a", 0o755, true).mkfile("a/f", 0o644, "x").mkdir(
            "b",
            0o755,
            false,
        );
        let actions = state.file_actions();
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[0], FileAction::Mkdir { path, .. } if path == "a"));
        assert!(matches!(actions[1], FileAction::Mkfile { path, .. } if path == "a/f"));
        assert!(matches!(actions[2], FileAction::Mkdir { path, .. } if path == "b"));
    }
}
