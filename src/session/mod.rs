//! Sessions
//!
//! A session carries the attachables a solve needs from the local side:
//! synced local directories, an SSH agent socket, secret sources, forward
//! proxies, and export writers. Attachables are registered at construction
//! and read-only thereafter; the transport collaborator serves them until
//! its context is cancelled.

pub mod forward;

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

pub use forward::ForwardProxy;

/// Errors raised while assembling or serving session resources.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid forward target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid sync pattern '{pattern}'")]
    InvalidPattern { pattern: String },

    #[error("forwarding is not supported on this platform")]
    Unsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One session attachable, described declaratively. The transport turns
/// these into wire services.
#[derive(Debug, Clone)]
pub enum SessionOption {
    /// Sync a local directory into the build.
    LocalDir {
        id: String,
        path: String,
        include_patterns: Vec<String>,
        exclude_patterns: Vec<String>,
        follow_paths: Vec<String>,
    },
    /// Forward the local SSH agent (or explicit key paths).
    SshAgent { id: String, paths: Vec<String> },
    /// Provide a secret from a local file.
    SecretFile { id: String, path: String },
    /// Expose a proxied socket under a session-scoped id.
    Forward { id: String, socket_path: String },
    /// Write a solved filesystem into a local directory.
    OutputDir { path: String },
    /// Write a solved filesystem as a tarball file.
    OutputTarball { path: String },
    /// Stream a solved image into the local Docker engine.
    DockerLoad,
}

/// Validate local-dir sync patterns up front so a bad pattern fails at
/// codegen time, not mid-transfer.
pub fn validate_patterns(patterns: &[String]) -> Result<(), SessionError> {
    for pattern in patterns {
        if glob::Pattern::new(pattern).is_err() {
            return Err(SessionError::InvalidPattern { pattern: pattern.clone() });
        }
    }
    Ok(())
}

/// A session for one target: an identifier, the registered attachables, and
/// any live forward proxies that must be served for the duration of the
/// solve.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: String,
    pub attachables: Vec<SessionOption>,
    pub proxies: Vec<Arc<ForwardProxy>>,
}

impl Session {
    pub fn new() -> Self {
        Self { id: new_session_id(), attachables: vec![], proxies: vec![] }
    }

    pub fn with_attachables(attachables: Vec<SessionOption>) -> Self {
        Self { attachables, ..Self::new() }
    }

    /// Find an attachable by kind using the caller's predicate.
    pub fn attachable<F>(&self, pred: F) -> Option<&SessionOption>
    where
        F: Fn(&SessionOption) -> bool,
    {
        self.attachables.iter().find(|a| pred(a))
    }
}

/// The transport collaborator: serves a session's attachables until the
/// future is dropped or the remote side hangs up.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn run(&self, session: &Session) -> Result<(), SessionError>;
}

/// Random session identifiers; uniqueness matters, stability does not.
fn new_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..25).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 25);
    }

    #[test]
    fn test_validate_patterns() {
        assert!(validate_patterns(&["src/**/*.rs".to_string()]).is_ok());
        assert!(validate_patterns(&["src/[".to_string()]).is_err());
    }

    #[test]
    fn test_attachable_lookup() {
        let session = Session::with_attachables(vec![
            SessionOption::SecretFile { id: "s".into(), path: "/etc/token".into() },
            SessionOption::DockerLoad,
        ]);
        let found = session.attachable(|a| matches!(a, SessionOption::DockerLoad));
        assert!(found.is_some());
    }
}
