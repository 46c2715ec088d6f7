//! Forward Proxies
//!
//! `forward "tcp://localhost:5432" "/run/db.sock"` exposes a local service
//! inside the build container. The proxy listens on a unix socket in a
//! temporary directory, registered with the session like an agent socket;
//! each accepted connection is piped to the local target. The temp
//! directory is deleted when the proxy is dropped.

use std::path::PathBuf;

use rand::Rng;
use tempfile::TempDir;
use tokio::task::JoinSet;
use tracing::debug;

use super::SessionError;

/// Local target of a forward proxy.
#[derive(Debug, Clone)]
pub enum ForwardSrc {
    Tcp(String),
    Unix(PathBuf),
}

/// A live socket proxy for one `forward` option.
#[derive(Debug)]
pub struct ForwardProxy {
    pub id: String,
    pub socket_path: PathBuf,
    src: ForwardSrc,
    /// Owns the socket's directory; dropping the proxy removes it.
    _dir: TempDir,
}

impl ForwardProxy {
    /// Parse the forward source and allocate the proxy socket path.
    pub fn new(src: &str) -> Result<Self, SessionError> {
        let src = parse_src(src)?;
        let dir = TempDir::new()?;
        let socket_path = dir.path().join("proxy.sock");
        let mut rng = rand::thread_rng();
        let id: String = (0..12).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect();
        Ok(Self { id: format!("forward-{}", id), socket_path, src, _dir: dir })
    }

    /// Serve connections until the future is dropped. Per-connection tasks
    /// are owned by a local task set, so dropping the serve future tears
    /// them down with it.
    #[cfg(unix)]
    pub async fn serve(&self) -> Result<(), SessionError> {
        use tokio::net::{TcpStream, UnixListener, UnixStream};

        let listener = UnixListener::bind(&self.socket_path)?;
        debug!(id = %self.id, socket = %self.socket_path.display(), "forward proxy listening");
        let mut conns: JoinSet<std::io::Result<()>> = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (mut downstream, _) = accepted?;
                    let src = self.src.clone();
                    conns.spawn(async move {
                        match src {
                            ForwardSrc::Tcp(addr) => {
                                let mut upstream = TcpStream::connect(&addr).await?;
                                tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await?;
                            }
                            ForwardSrc::Unix(path) => {
                                let mut upstream = UnixStream::connect(&path).await?;
                                tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await?;
                            }
                        }
                        Ok(())
                    });
                }
                Some(done) = conns.join_next() => {
                    if let Ok(Err(err)) = done {
                        debug!(id = %self.id, error = %err, "forward connection ended");
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    pub async fn serve(&self) -> Result<(), SessionError> {
        Err(SessionError::Unsupported)
    }
}

fn parse_src(src: &str) -> Result<ForwardSrc, SessionError> {
    if let Some(addr) = src.strip_prefix("tcp://") {
        if addr.is_empty() {
            return Err(SessionError::InvalidTarget {
                target: src.to_string(),
                reason: "empty address".to_string(),
            });
        }
        return Ok(ForwardSrc::Tcp(addr.to_string()));
    }
    if let Some(path) = src.strip_prefix("unix://") {
        if path.is_empty() {
            return Err(SessionError::InvalidTarget {
                target: src.to_string(),
                reason: "empty path".to_string(),
            });
        }
        return Ok(ForwardSrc::Unix(PathBuf::from(path)));
    }
    Err(SessionError::InvalidTarget {
        target: src.to_string(),
        reason: "expected tcp:// or unix:// scheme".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_src_schemes() {
        assert!(matches!(parse_src("tcp://localhost:5432"), Ok(ForwardSrc::Tcp(_))));
        assert!(matches!(parse_src("unix:///tmp/db.sock"), Ok(ForwardSrc::Unix(_))));
        assert!(parse_src("http://localhost").is_err());
        assert!(parse_src("tcp://").is_err());
    }

    #[test]
    fn test_proxy_allocates_socket_dir() {
        let proxy = ForwardProxy::new("tcp://localhost:8080").unwrap();
        assert!(proxy.socket_path.parent().unwrap().exists());
        assert!(proxy.id.starts_with("forward-"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_proxy_pipes_to_tcp_target() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, UnixStream};

        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(b"pong").await.unwrap();
        });

        let proxy = ForwardProxy::new(&format!("tcp://{}", addr)).unwrap();
        let socket = proxy.socket_path.clone();
        let serve = tokio::spawn(async move { proxy.serve().await });

        // The listener binds inside serve; give it a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let mut conn = UnixStream::connect(&socket).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        serve.abort();
    }
}
