//! Exec Operation Types
//!
//! Process metadata and mount records for `run` operations, plus the mode
//! enums (`network`, `security`, cache sharing) with their string forms.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value as Json};

use super::state::State;

/// Process metadata for an exec op.
#[derive(Debug, Clone, Default)]
pub struct ExecMeta {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub user: String,
    pub hosts: Vec<HostIp>,
    pub network: NetworkMode,
    pub security: SecurityMode,
    pub ignore_cache: bool,
}

impl ExecMeta {
    pub(crate) fn payload(&self) -> Json {
        json!({
            "args": self.args,
            "env": self.env,
            "cwd": self.cwd,
            "user": self.user,
            "hosts": self.hosts.iter().map(|h| format!("{} {}", h.host, h.ip)).collect::<Vec<_>>(),
            "network": self.network.to_string(),
            "security": self.security.to_string(),
            "ignoreCache": self.ignore_cache,
        })
    }
}

/// An extra hosts entry (`host <name> <ip>`).
#[derive(Debug, Clone)]
pub struct HostIp {
    pub host: String,
    pub ip: std::net::IpAddr,
}

/// A filesystem mount on an exec op. The root mount has `dest == "/"` and is
/// the op's output.
#[derive(Debug, Clone)]
pub struct Mount {
    pub input: State,
    pub dest: String,
    /// Subpath of the source state to mount (`sourcePath`).
    pub selector: Option<String>,
    pub readonly: bool,
    pub mount_type: MountType,
}

impl Mount {
    pub fn bind(input: State, dest: impl Into<String>) -> Self {
        Self {
            input,
            dest: dest.into(),
            selector: None,
            readonly: false,
            mount_type: MountType::Bind,
        }
    }
}

/// Mount backing type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountType {
    Bind,
    Tmpfs,
    Cache { id: String, sharing: CacheSharingMode },
}

impl MountType {
    pub(crate) fn payload(&self) -> Json {
        match self {
            MountType::Bind => json!("bind"),
            MountType::Tmpfs => json!("tmpfs"),
            MountType::Cache { id, sharing } => {
                json!({"cache": {"id": id, "sharing": sharing.to_string()}})
            }
        }
    }
}

/// A secret file mounted into an exec.
#[derive(Debug, Clone)]
pub struct SecretMount {
    /// Session source identifier for the secret bytes.
    pub id: String,
    pub dest: String,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl SecretMount {
    pub fn new(id: impl Into<String>, dest: impl Into<String>) -> Self {
        Self { id: id.into(), dest: dest.into(), uid: 0, gid: 0, mode: 0o400 }
    }
}

/// An SSH agent socket forwarded into an exec.
#[derive(Debug, Clone)]
pub struct SshMount {
    pub id: String,
    pub dest: String,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl Default for SshMount {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            dest: "/run/buildkit/ssh_agent.0".to_string(),
            uid: 0,
            gid: 0,
            mode: 0o600,
        }
    }
}

/// Network isolation mode for an exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Sandbox,
    Host,
    None,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Sandbox => write!(f, "sandbox"),
            NetworkMode::Host => write!(f, "host"),
            NetworkMode::None => write!(f, "none"),
        }
    }
}

impl FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(NetworkMode::Sandbox),
            "host" => Ok(NetworkMode::Host),
            "none" => Ok(NetworkMode::None),
            other => Err(other.to_string()),
        }
    }
}

/// Security mode for an exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    #[default]
    Sandbox,
    Insecure,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::Sandbox => write!(f, "sandbox"),
            SecurityMode::Insecure => write!(f, "insecure"),
        }
    }
}

impl FromStr for SecurityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(SecurityMode::Sandbox),
            "insecure" => Ok(SecurityMode::Insecure),
            other => Err(other.to_string()),
        }
    }
}

/// Sharing mode for cache mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheSharingMode {
    #[default]
    Shared,
    Private,
    Locked,
}

impl fmt::Display for CacheSharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSharingMode::Shared => write!(f, "shared"),
            CacheSharingMode::Private => write!(f, "private"),
            CacheSharingMode::Locked => write!(f, "locked"),
        }
    }
}

impl FromStr for CacheSharingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(CacheSharingMode::Shared),
            "private" => Ok(CacheSharingMode::Private),
            "locked" => Ok(CacheSharingMode::Locked),
            other => Err(other.to_string()),
        }
    }
}
