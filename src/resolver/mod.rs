//! Image Metadata Resolution
//!
//! Resolving a reference fetches its content digest and image config from
//! the registry. Results are cached by (reference, os, arch); concurrent
//! callers for the same key share the in-flight fetch, and cache hits skip
//! the network entirely. Failures surface the original error unchanged and
//! are not cached.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

use crate::image::ImageConfig;
use crate::llb::{Digest, Platform};
use crate::solver::ClientError;

/// The registry-facing collaborator.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolve a normalized reference to its content digest and config.
    async fn resolve(
        &self,
        reference: &str,
        platform: Option<&Platform>,
    ) -> Result<(Digest, ImageConfig), ClientError>;
}

type CacheKey = (String, Option<(String, String)>);
type CacheEntry = Arc<OnceCell<(Digest, ImageConfig)>>;

/// A caching, deduplicating wrapper around an [`ImageResolver`].
pub struct CachedResolver {
    inner: Arc<dyn ImageResolver>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn ImageResolver>) -> Self {
        Self { inner, cache: RwLock::new(HashMap::new()) }
    }

    pub async fn resolve(
        &self,
        reference: &str,
        platform: Option<&Platform>,
    ) -> Result<(Digest, ImageConfig), ClientError> {
        let key: CacheKey = (
            reference.to_string(),
            platform.map(|p| (p.os.clone(), p.arch.clone())),
        );

        let cell = {
            let cache = self.cache.read().await;
            cache.get(&key).cloned()
        };
        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut cache = self.cache.write().await;
                cache.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone()
            }
        };

        if let Some(cached) = cell.get() {
            debug!(reference, "image config cache hit");
            return Ok(cached.clone());
        }

        let resolved = cell
            .get_or_try_init(|| async {
                debug!(reference, "resolving image config");
                self.inner.resolve(reference, platform).await
            })
            .await?;
        Ok(resolved.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingResolver {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingResolver {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), delay: Duration::ZERO, fail: false })
        }

        fn slow() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), delay: Duration::ZERO, fail: true })
        }
    }

    #[async_trait]
    impl ImageResolver for CountingResolver {
        async fn resolve(
            &self,
            reference: &str,
            _platform: Option<&Platform>,
        ) -> Result<(Digest, ImageConfig), ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ClientError::Resolve {
                    reference: reference.to_string(),
                    message: "registry unavailable".into(),
                });
            }
            Ok((Digest::sha256(reference.as_bytes()), ImageConfig::default()))
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let counting = CountingResolver::new();
        let resolver = CachedResolver::new(counting.clone());
        resolver.resolve("alpine", None).await.unwrap();
        resolver.resolve("alpine", None).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_platforms_fetch_separately() {
        let counting = CountingResolver::new();
        let resolver = CachedResolver::new(counting.clone());
        let arm = Platform { os: "linux".into(), arch: "arm64".into() };
        resolver.resolve("alpine", None).await.unwrap();
        resolver.resolve("alpine", Some(&arm)).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_inflight_fetch() {
        let counting = CountingResolver::slow();
        let resolver = Arc::new(CachedResolver::new(counting.clone()));
        let a = resolver.clone();
        let b = resolver.clone();
        let (ra, rb) = tokio::join!(
            async move { a.resolve("alpine", None).await },
            async move { b.resolve("alpine", None).await },
        );
        assert_eq!(ra.unwrap().0, rb.unwrap().0);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_pass_through_and_are_not_cached() {
        let counting = CountingResolver::failing();
        let resolver = CachedResolver::new(counting.clone());
        let err = resolver.resolve("alpine", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Resolve { .. }));
        let _ = resolver.resolve("alpine", None).await.unwrap_err();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }
}
