//! Solve Requests
//!
//! The compiled form of a target: a tree of solves. `Single` leaves carry a
//! marshalled definition, solve options, and the session to attach;
//! `Sequence` runs children strictly in order; `Parallel` fans children out
//! concurrently under one task set, errgroup-style. Callbacks registered on
//! a request run after its solve has returned and before the request is
//! marked complete.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::llb::Definition;
use crate::session::{Session, SessionTransport};

use super::client::{ClientError, SolveClient, SolveResponse};

/// Export directives attached to a solve.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOption {
    /// The serialized image spec (config + history) an image export ships.
    ImageSpec { json: String },
    /// Push the solved image to a registry.
    PushImage { reference: String },
    /// Load the solved image into the local Docker engine.
    DockerLoad { reference: String },
    /// Write the solved filesystem into a local directory.
    DownloadDir { path: String },
    /// Write the solved filesystem as a plain tarball.
    DownloadTarball { path: String },
    /// Write the solved image as an OCI image layout tarball.
    DownloadOCITarball { path: String },
    /// Write the solved image as a Docker-compatible tarball.
    DownloadDockerTarball { path: String, reference: String },
}

/// Completion hook for a single solve.
#[async_trait]
pub trait SolveCallback: Send + Sync {
    async fn done(&self, resp: &SolveResponse) -> Result<(), ClientError>;
}

/// Everything a solve needs from the environment.
#[derive(Clone)]
pub struct SolveContext {
    pub client: Arc<dyn SolveClient>,
    pub transport: Option<Arc<dyn SessionTransport>>,
}

/// One leaf solve.
#[derive(Clone)]
pub struct SingleRequest {
    pub def: Definition,
    pub solve_opts: Vec<SolveOption>,
    pub session: Session,
    pub callbacks: Vec<Arc<dyn SolveCallback>>,
}

impl fmt::Debug for SingleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleRequest")
            .field("def", &self.def.digest())
            .field("solve_opts", &self.solve_opts)
            .field("session", &self.session.id)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// A submittable request tree.
#[derive(Debug, Clone)]
pub enum Request {
    Single(Box<SingleRequest>),
    Sequence(Vec<Request>),
    Parallel(Vec<Request>),
}

impl Default for Request {
    fn default() -> Self {
        Request::Sequence(vec![])
    }
}

impl Request {
    pub fn single(def: Definition, solve_opts: Vec<SolveOption>, session: Session) -> Self {
        Request::Single(Box::new(SingleRequest { def, solve_opts, session, callbacks: vec![] }))
    }

    /// An empty request: solving it is a no-op.
    pub fn empty() -> Self {
        Request::default()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Request::Single(_) => false,
            Request::Sequence(reqs) | Request::Parallel(reqs) => reqs.iter().all(Request::is_empty),
        }
    }

    /// Sequence requests, flattening trivial nesting.
    pub fn sequence(reqs: Vec<Request>) -> Self {
        let mut reqs: Vec<Request> = reqs.into_iter().filter(|r| !r.is_empty()).collect();
        if reqs.len() == 1 {
            return reqs.remove(0);
        }
        Request::Sequence(reqs)
    }

    /// Fan requests out, flattening trivial nesting.
    pub fn parallel(reqs: Vec<Request>) -> Self {
        let mut reqs: Vec<Request> = reqs.into_iter().filter(|r| !r.is_empty()).collect();
        if reqs.len() == 1 {
            return reqs.remove(0);
        }
        Request::Parallel(reqs)
    }

    /// Register a completion callback. Only meaningful on leaves.
    pub fn with_callback(mut self, cb: Arc<dyn SolveCallback>) -> Self {
        if let Request::Single(ref mut single) = self {
            single.callbacks.push(cb);
        }
        self
    }

    /// Execute the request tree. Auxiliary tasks for each leaf (session
    /// transport, forward proxies) live exactly as long as its solve;
    /// cancellation of any branch aborts its siblings.
    pub fn solve<'a>(
        &'a self,
        ctx: &'a SolveContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), ClientError>> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Request::Single(single) => solve_single(single, ctx).await,
                Request::Sequence(reqs) => {
                    for req in reqs {
                        req.solve(ctx).await?;
                    }
                    Ok(())
                }
                Request::Parallel(reqs) => {
                    let mut set: JoinSet<Result<(), ClientError>> = JoinSet::new();
                    for req in reqs.iter().cloned() {
                        let ctx = ctx.clone();
                        set.spawn(async move { req.solve(&ctx).await });
                    }
                    while let Some(joined) = set.join_next().await {
                        match joined {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                set.abort_all();
                                return Err(err);
                            }
                            Err(join_err) if join_err.is_cancelled() => {}
                            Err(join_err) => {
                                set.abort_all();
                                return Err(ClientError::Solve { message: join_err.to_string() });
                            }
                        }
                    }
                    Ok(())
                }
            }
        })
    }
}

async fn solve_single(single: &SingleRequest, ctx: &SolveContext) -> Result<(), ClientError> {
    debug!(def = %single.def.digest(), session = %single.session.id, "starting solve");

    let mut aux: JoinSet<Result<(), ClientError>> = JoinSet::new();
    if let Some(transport) = &ctx.transport {
        let transport = transport.clone();
        let session = single.session.clone();
        aux.spawn(async move { transport.run(&session).await.map_err(ClientError::from) });
    }
    for proxy in &single.session.proxies {
        let proxy = proxy.clone();
        aux.spawn(async move { proxy.serve().await.map_err(ClientError::from) });
    }

    let solve = ctx.client.solve(&single.def, &single.solve_opts, &single.session);
    tokio::pin!(solve);

    let result = loop {
        tokio::select! {
            res = &mut solve => break res,
            Some(joined) = aux.join_next() => {
                match joined {
                    // An attachable finishing early is fine; one failing
                    // cancels the solve.
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(error = %err, "session task failed, aborting solve");
                        aux.abort_all();
                        return Err(err);
                    }
                    Err(join_err) if join_err.is_cancelled() => {}
                    Err(join_err) => {
                        aux.abort_all();
                        return Err(ClientError::Solve { message: join_err.to_string() });
                    }
                }
            }
        }
    };

    aux.abort_all();
    while aux.join_next().await.is_some() {}

    let resp = result?;
    for cb in &single.callbacks {
        cb.done(&resp).await?;
    }
    debug!(def = %single.def.digest(), "solve complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llb::State;
    use crate::solver::client::{ContainerProcess, ContainerRequest, ExecStdio};
    use std::sync::Mutex;

    struct RecordingClient {
        log: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self { log: Mutex::new(vec![]), fail_on: None })
        }

        fn failing_on(reference: &str) -> Arc<Self> {
            Arc::new(Self { log: Mutex::new(vec![]), fail_on: Some(reference.to_string()) })
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SolveClient for RecordingClient {
        async fn solve(
            &self,
            def: &Definition,
            _opts: &[SolveOption],
            _session: &Session,
        ) -> Result<SolveResponse, ClientError> {
            let name = def
                .ops
                .last()
                .and_then(|op| op.data.get("ref"))
                .and_then(|v| v.as_str())
                .unwrap_or("scratch")
                .to_string();
            self.log.lock().unwrap().push(name.clone());
            if self.fail_on.as_deref() == Some(name.as_str()) {
                return Err(ClientError::Solve { message: format!("{} failed", name) });
            }
            Ok(SolveResponse::default())
        }

        async fn new_container(
            &self,
            _req: ContainerRequest,
            _stdio: ExecStdio,
        ) -> Result<Arc<dyn ContainerProcess>, ClientError> {
            Err(ClientError::Container { message: "not supported".into() })
        }
    }

    fn image_request(reference: &str) -> Request {
        let def = State::image(reference).marshal().unwrap();
        Request::single(def, vec![], Session::new())
    }

    fn ctx(client: Arc<RecordingClient>) -> SolveContext {
        SolveContext { client, transport: None }
    }

    #[tokio::test]
    async fn test_sequence_solves_in_order() {
        let client = RecordingClient::new();
        let req = Request::Sequence(vec![
            image_request("a"),
            image_request("b"),
            image_request("c"),
        ]);
        req.solve(&ctx(client.clone())).await.unwrap();
        assert_eq!(client.log(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_parallel_solves_all_children() {
        let client = RecordingClient::new();
        let req = Request::Parallel(vec![
            image_request("a"),
            image_request("b"),
            image_request("c"),
        ]);
        req.solve(&ctx(client.clone())).await.unwrap();
        let mut log = client.log();
        log.sort();
        assert_eq!(log, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let client = RecordingClient::failing_on("b");
        let req = Request::Sequence(vec![
            image_request("a"),
            image_request("b"),
            image_request("c"),
        ]);
        let err = req.solve(&ctx(client.clone())).await.unwrap_err();
        assert!(matches!(err, ClientError::Solve { .. }));
        assert_eq!(client.log(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_callbacks_run_after_solve() {
        struct Flag(Mutex<bool>);

        #[async_trait]
        impl SolveCallback for Flag {
            async fn done(&self, _resp: &SolveResponse) -> Result<(), ClientError> {
                *self.0.lock().unwrap() = true;
                Ok(())
            }
        }

        let client = RecordingClient::new();
        let flag = Arc::new(Flag(Mutex::new(false)));
        let req = image_request("a").with_callback(flag.clone());
        req.solve(&ctx(client)).await.unwrap();
        assert!(*flag.0.lock().unwrap());
    }

    #[test]
    fn test_nesting_flattens_singletons() {
        let req = Request::parallel(vec![image_request("a")]);
        assert!(matches!(req, Request::Single(_)));
        let req = Request::sequence(vec![Request::empty(), image_request("a")]);
        assert!(matches!(req, Request::Single(_)));
        assert!(Request::sequence(vec![]).is_empty());
    }
}
