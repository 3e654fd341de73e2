//! Result cache with single-flight computation.
//!
//! Keys combine the effective metric's content hash, the dialect, the bound
//! parameter values and the tenant scope, so two tenants never share an
//! entry. Concurrent requests for one key share a single in-flight
//! computation; a request that gives up only cancels that computation when
//! it was the last one waiting.
//!
//! # Key Format
//!
//! ```text
//! sha256({content_hash, dialect, parameters, environment_id, consumer_hash})
//! ```

pub mod hash;
mod store;

pub use hash::compute_hash;
pub use store::{CacheEntry, CacheStore, MemoryStore, TenantScope};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::binder::{BoundParameters, TenantContext};
use crate::error::MetricError;
use crate::execution::ExecutionResult;
use crate::sql::Dialect;

/// Errors raised by cache keys and stores. Never surfaced to callers: the
/// cache degrades to direct computation instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("failed to hash cache key material: {0}")]
    Hash(String),

    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Hash(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Cache key: a SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMaterial<'a> {
    content_hash: &'a str,
    dialect: Dialect,
    parameters: &'a BoundParameters,
    environment_id: &'a str,
    consumer_hash: &'a str,
}

impl CacheKey {
    pub fn compute(
        content_hash: &str,
        dialect: Dialect,
        parameters: &BoundParameters,
        scope: &TenantScope,
    ) -> CacheResult<Self> {
        let material = KeyMaterial {
            content_hash,
            dialect,
            parameters,
            environment_id: &scope.environment_id,
            consumer_hash: &scope.consumer_hash,
        };
        Ok(Self(compute_hash(&material)?))
    }

    pub(crate) fn from_raw(key: &str) -> Self {
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TenantScope {
    pub fn from_tenant(tenant: &TenantContext) -> CacheResult<Self> {
        Ok(Self {
            environment_id: tenant.environment_id.clone(),
            consumer_hash: tenant.consumer_hash()?,
        })
    }
}

/// A cached or freshly computed result.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub result: Arc<ExecutionResult>,
    /// Served from the store rather than computed for this request.
    pub hit: bool,
}

/// The result and whether it was found in the store after all.
type Computed = (Arc<ExecutionResult>, bool);

type SharedCompute = Shared<BoxFuture<'static, Result<Computed, MetricError>>>;

struct InFlight {
    id: Uuid,
    future: SharedCompute,
    waiters: Arc<AtomicUsize>,
}

type Registry = Arc<DashMap<CacheKey, InFlight>>;

/// Held by each request waiting on an in-flight computation.
struct WaiterGuard {
    registry: Registry,
    key: CacheKey,
    id: Uuid,
    waiters: Arc<AtomicUsize>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if self.waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Joiners increment under the shard lock, so re-check there.
            self.registry.remove_if(&self.key, |_, flight| {
                flight.id == self.id && flight.waiters.load(Ordering::Acquire) == 0
            });
        }
    }
}

pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    in_flight: Registry,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Number of keys with a computation in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Serve `key` from the store, join an in-flight computation for it, or
    /// start one with `compute`.
    ///
    /// Errors are shared with every waiter but never stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        scope: TenantScope,
        compute: F,
    ) -> Result<CacheLookup, MetricError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ExecutionResult, MetricError>> + Send + 'static,
    {
        match self.store.get(&key).await {
            Ok(Some(entry)) => {
                debug!(target: "cache", key = %key, "cache hit");
                return Ok(CacheLookup {
                    result: entry.payload,
                    hit: true,
                });
            }
            Ok(None) => {}
            Err(err) => warn!(target: "cache", key = %key, error = %err, "cache read failed; computing directly"),
        }

        let (id, future, waiters) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let flight = occupied.get();
                flight.waiters.fetch_add(1, Ordering::AcqRel);
                debug!(target: "cache", key = %key, "joining in-flight computation");
                (
                    flight.id,
                    flight.future.clone(),
                    Arc::clone(&flight.waiters),
                )
            }
            Entry::Vacant(vacant) => {
                let id = Uuid::new_v4();
                let waiters = Arc::new(AtomicUsize::new(1));
                let future = self.start(key.clone(), id, scope, compute());
                vacant.insert(InFlight {
                    id,
                    future: future.clone(),
                    waiters: Arc::clone(&waiters),
                });
                (id, future, waiters)
            }
        };

        let _guard = WaiterGuard {
            registry: Arc::clone(&self.in_flight),
            key,
            id,
            waiters,
        };
        let (result, hit) = future.await?;
        Ok(CacheLookup { result, hit })
    }

    fn start<Fut>(&self, key: CacheKey, id: Uuid, scope: TenantScope, compute: Fut) -> SharedCompute
    where
        Fut: Future<Output = Result<ExecutionResult, MetricError>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.in_flight);
        let ttl = self.ttl;

        async move {
            // A flight for this key may have filled the store after our first
            // read and left the registry before we registered.
            if let Ok(Some(entry)) = store.get(&key).await {
                debug!(target: "cache", key = %key, "filled while registering");
                registry.remove_if(&key, |_, flight| flight.id == id);
                return Ok((entry.payload, true));
            }

            let result = compute.await.map(Arc::new);
            if let Ok(payload) = &result {
                let entry = CacheEntry {
                    key: key.clone(),
                    payload: Arc::clone(payload),
                    created_at: Utc::now(),
                    ttl,
                    scope,
                };
                match store.insert(entry).await {
                    Ok(()) => info!(target: "cache", key = %key, ttl_ms = ttl.as_millis() as u64, "cache filled"),
                    Err(err) => warn!(target: "cache", key = %key, error = %err, "cache write failed"),
                }
            }
            registry.remove_if(&key, |_, flight| flight.id == id);
            result.map(|payload| (payload, false))
        }
        .boxed()
        .shared()
    }
}
