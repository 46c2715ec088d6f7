//! Low-Level Build (LLB) States
//!
//! The operation-graph model that filesystem values accumulate. A [`State`]
//! is an immutable handle onto a DAG of build operations; combinators return
//! new states sharing structure with their inputs. States marshal into a
//! deterministic, digest-addressed [`Definition`] the remote build daemon
//! understands, and validate structurally before they are emitted.

pub mod exec;
pub mod marshal;
pub mod state;

pub use exec::{
    CacheSharingMode, ExecMeta, HostIp, Mount, MountType, NetworkMode, SecretMount, SecurityMode,
    SshMount,
};
pub use marshal::{Definition, Digest, MarshaledOp};
pub use state::{Chown, CopyInfo, FileAction, Op, Platform, State, StateError};
