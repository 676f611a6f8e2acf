use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::debounce::Debouncer;

pub type QueryMap = BTreeMap<String, String>;
pub type FilterState = BTreeMap<String, Option<String>>;

const QUERY_BASE: &str = "http://localhost/";

pub trait AddressBar: Send + Sync {
    fn query(&self) -> QueryMap;
    fn replace(&self, query: QueryMap);
}

#[derive(Debug, Default)]
pub struct MemoryAddressBar {
    query: Mutex<QueryMap>,
    writes: Mutex<Vec<QueryMap>>,
}

impl MemoryAddressBar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_query_string(query: &str) -> Self {
        Self {
            query: Mutex::new(decode_query(query)),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn navigate(&self, query: QueryMap) {
        *lock(&self.query) = query;
    }

    pub fn query_string(&self) -> String {
        encode_query(&lock(&self.query))
    }

    pub fn writes(&self) -> usize {
        lock(&self.writes).len()
    }

    pub fn history(&self) -> Vec<QueryMap> {
        lock(&self.writes).clone()
    }
}

impl AddressBar for MemoryAddressBar {
    fn query(&self) -> QueryMap {
        lock(&self.query).clone()
    }

    fn replace(&self, query: QueryMap) {
        lock(&self.writes).push(query.clone());
        *lock(&self.query) = query;
    }
}

pub fn encode_query(query: &QueryMap) -> String {
    let Ok(mut url) = Url::parse(QUERY_BASE) else {
        return String::new();
    };
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter());
    }
    url.query().unwrap_or_default().to_string()
}

pub fn decode_query(query: &str) -> QueryMap {
    let query = query.trim_start_matches('?');
    let Ok(mut url) = Url::parse(QUERY_BASE) else {
        return QueryMap::new();
    };
    url.set_query(Some(query));
    url.query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedField {
    pub field: String,
    #[serde(default)]
    pub query_key: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

impl TrackedField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            query_key: None,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_query_key(mut self, key: impl Into<String>) -> Self {
        self.query_key = Some(key.into());
        self
    }

    pub fn query_key(&self) -> &str {
        self.query_key.as_deref().unwrap_or(&self.field)
    }
}

pub struct StateSynchronizer<B: AddressBar> {
    bar: Arc<B>,
    fields: Vec<TrackedField>,
    state: FilterState,
    loaded: bool,
}

impl<B: AddressBar> StateSynchronizer<B> {
    pub fn new(bar: Arc<B>, fields: Vec<TrackedField>) -> Self {
        let state = fields
            .iter()
            .map(|field| (field.field.clone(), non_empty(field.default.as_deref())))
            .collect();
        Self {
            bar,
            fields,
            state,
            loaded: false,
        }
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.state.get(field).and_then(|value| value.as_deref())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn load(&mut self) -> bool {
        if self.loaded {
            return false;
        }
        let query = self.bar.query();
        for field in &self.fields {
            if let Some(value) = non_empty(query.get(field.query_key()).map(String::as_str)) {
                self.state.insert(field.field.clone(), Some(value));
            }
        }
        self.loaded = true;
        debug!(state = ?self.state, "filter state loaded from address bar");
        true
    }

    pub fn set(&mut self, field: &str, value: Option<&str>) -> bool {
        let Some(slot) = self.state.get_mut(field) else {
            return false;
        };
        let value = non_empty(value);
        if *slot == value {
            return false;
        }
        *slot = value;
        true
    }

    pub fn candidate_query(&self) -> QueryMap {
        let mut query = self.bar.query();
        for field in &self.fields {
            query.remove(field.query_key());
            if let Some(Some(value)) = self.state.get(&field.field) {
                query.insert(field.query_key().to_string(), value.clone());
            }
        }
        query
    }

    /// Writes the state to the address bar if it differs from what is there.
    /// Returns whether a write happened. Does nothing before `load`.
    pub fn commit(&mut self) -> bool {
        if !self.loaded {
            return false;
        }
        let current = encode_query(&self.bar.query());
        let candidate = self.candidate_query();
        if encode_query(&candidate) == current {
            return false;
        }
        debug!(query = %encode_query(&candidate), "replacing address bar query");
        self.bar.replace(candidate);
        true
    }
}

pub struct DebouncedSync<B: AddressBar + 'static> {
    inner: Arc<Mutex<StateSynchronizer<B>>>,
    debouncer: Debouncer,
}

impl<B: AddressBar + 'static> DebouncedSync<B> {
    pub fn new(sync: StateSynchronizer<B>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sync)),
            debouncer: Debouncer::new(delay),
        }
    }

    pub fn load(&self) -> bool {
        lock(&self.inner).load()
    }

    pub fn state(&self) -> FilterState {
        lock(&self.inner).state().clone()
    }

    pub fn set(&mut self, field: &str, value: Option<&str>) -> bool {
        if !lock(&self.inner).set(field, value) {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        self.debouncer.schedule(move || {
            lock(&inner).commit();
        });
        true
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn flush(&mut self) -> bool {
        self.debouncer.cancel();
        lock(&self.inner).commit()
    }

    pub fn shutdown(&mut self) {
        self.debouncer.cancel();
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
