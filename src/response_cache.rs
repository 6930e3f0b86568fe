//! Response caching.
//!
//! Raw dataset responses are cached under a content-addressed key derived
//! from the dataset code and a canonical form of the request parameters, so
//! that semantically identical requests share one slot regardless of the
//! order their parameters were supplied in. Entries expire lazily: a stale
//! entry is pruned when it is next looked up, never by a background sweep.
//!
//! The whole mapping is persisted write-through on every store, via a temp
//! file and an atomic rename so a crash mid-write cannot truncate the
//! persisted state. Write volume is low (one write per upstream fetch) and
//! durability across restarts is wanted, so write-back buys nothing here.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{event, Level};

use crate::error::StatboardError;

/// Upstream request parameters: parameter name to value list. Single-valued
/// parameters are one-element lists.
pub type RequestParams = BTreeMap<String, Vec<String>>;

/// Canonical cache key: parameter names sorted, value lists sorted.
///
/// The source treats a dimension's requested code list as a set, so two
/// requests differing only in list order produce the same response and must
/// share a slot.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
struct CacheKey {
    dataset: String,
    params: Vec<(String, Vec<String>)>,
}

impl CacheKey {
    fn new(dataset: &str, params: &RequestParams) -> Self {
        let params = params
            .iter()
            .map(|(name, values)| {
                let mut values = values.clone();
                values.sort();
                (name.clone(), values)
            })
            .collect();
        CacheKey {
            dataset: dataset.to_string(),
            params,
        }
    }
}

/// One cached raw response and the time it was fetched.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct CacheEntry {
    raw: Value,
    fetched_at: i64,
}

/// Time-expiring store of raw dataset responses.
///
/// Process-wide mutable state: the map is guarded by a mutex and every
/// mutation (including the write-through persist) happens inside the
/// critical section.
pub struct ResponseCache {
    path: PathBuf,
    expiry_secs: i64,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    /// Open a cache backed by `path`, reloading any persisted entries.
    ///
    /// A missing or unreadable backing file yields an empty cache; startup
    /// never fails on cache state.
    pub fn new(path: PathBuf, expiry_secs: u64) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<(CacheKey, CacheEntry)>>(&contents) {
                Ok(pairs) => pairs.into_iter().collect(),
                Err(error) => {
                    event!(
                        Level::WARN,
                        "discarding unparseable response cache {}: {}",
                        path.display(),
                        error
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            expiry_secs: expiry_secs as i64,
            entries: Mutex::new(entries),
        }
    }

    /// Look up a raw response, returning None on absence or expiry.
    pub fn get(&self, dataset: &str, params: &RequestParams) -> Option<Value> {
        let key = CacheKey::new(dataset, params);
        let mut entries = self.entries.lock().expect("response cache mutex poisoned");
        match entries.get(&key) {
            Some(entry) if now_unix() - entry.fetched_at < self.expiry_secs => {
                Some(entry.raw.clone())
            }
            Some(_) => {
                // Lazy expiry: prune on access only.
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a raw response and persist the whole cache synchronously.
    pub fn put(
        &self,
        dataset: &str,
        params: &RequestParams,
        raw: &Value,
    ) -> Result<(), StatboardError> {
        let key = CacheKey::new(dataset, params);
        let entry = CacheEntry {
            raw: raw.clone(),
            fetched_at: now_unix(),
        };
        let mut entries = self.entries.lock().expect("response cache mutex poisoned");
        entries.insert(key, entry);
        self.persist(&entries)?;
        Ok(())
    }

    /// Number of cached entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("response cache mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole mapping to the backing file atomically.
    fn persist(&self, entries: &HashMap<CacheKey, CacheEntry>) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let pairs: Vec<(&CacheKey, &CacheEntry)> = entries.iter().collect();
        let contents = serde_json::to_string(&pairs)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
