//! Solver
//!
//! Request graphs and the remote-build client contract. A compiled target is
//! a tree of requests: single solves at the leaves, `stage` sequencing and
//! `parallel` fan-out above them. Auxiliary work for a solve (session
//! serving, forward proxies, callbacks) is owned by the solve that needs it.

pub mod client;
pub mod request;

pub use client::{
    ClientError, ContainerProcess, ContainerRequest, ExecStdio, SolveClient, SolveResponse,
};
pub use request::{Request, SingleRequest, SolveCallback, SolveContext, SolveOption};
