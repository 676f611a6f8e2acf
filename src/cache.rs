use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::rpc::{FetchExecutor, Params, RemoteError, ResultEnvelope};

pub type SharedResponse = Shared<BoxFuture<'static, Arc<ResultEnvelope>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(procedure: &str, params: &Params) -> Self {
        let canonical = serde_json::to_string(params).unwrap_or_default();
        Self(format!("{procedure}:{canonical}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct InFlightEntry {
    generation: u64,
    response: SharedResponse,
}

type Registry = Arc<Mutex<HashMap<CacheKey, InFlightEntry>>>;

/// Entries live only while their call is pending: the entry is removed the
/// moment the call settles, so a later `acquire` with the same key issues a
/// fresh call. This is not a result cache.
#[derive(Clone)]
pub struct RequestCache {
    executor: FetchExecutor,
    in_flight: Registry,
    generations: Arc<AtomicU64>,
}

impl RequestCache {
    pub fn new(executor: FetchExecutor) -> Self {
        Self {
            executor,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    /// Returns the pending response for `key`, or starts the call and
    /// registers it before returning. Outside a tokio runtime the response is
    /// an immediate `no_runtime` error.
    pub fn acquire(&self, key: CacheKey, procedure: &str, params: Params) -> SharedResponse {
        let Ok(runtime) = Handle::try_current() else {
            warn!(key = %key, "no async runtime, request not issued");
            let envelope = Arc::new(ResultEnvelope::failure(RemoteError::with_code(
                "request issued outside an async runtime",
                "no_runtime",
            )));
            return future::ready(envelope).boxed().shared();
        };

        let mut in_flight = lock(&self.in_flight);
        if let Some(entry) = in_flight.get(&key) {
            debug!(key = %key, "joining in-flight request");
            return entry.response.clone();
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, generation, "issuing request");

        let executor = self.executor.clone();
        let procedure = procedure.to_string();
        let guard = SettleGuard {
            registry: Arc::clone(&self.in_flight),
            key: key.clone(),
            generation,
        };
        let handle = runtime.spawn(async move {
            let _guard = guard;
            Arc::new(executor.execute(&procedure, &params).await)
        });

        let task_key = key.clone();
        let response = async move {
            match handle.await {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(key = %task_key, error = %err, "fetch task did not complete");
                    Arc::new(ResultEnvelope::failure(RemoteError::with_code(
                        err.to_string(),
                        "task_failed",
                    )))
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key,
            InFlightEntry {
                generation,
                response: response.clone(),
            },
        );
        response
    }

    pub async fn fetch(&self, procedure: &str, params: Params) -> Arc<ResultEnvelope> {
        let key = CacheKey::new(procedure, &params);
        self.acquire(key, procedure, params).await
    }
}

/// Removes the registry entry when the fetch task finishes, panics or is
/// aborted.
struct SettleGuard {
    registry: Registry,
    key: CacheKey,
    generation: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.registry);
        if in_flight
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            in_flight.remove(&self.key);
            debug!(key = %self.key, "request settled");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
