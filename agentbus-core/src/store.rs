//! Shared persistence for agent replicas
//!
//! Replicas of one agent use the store to agree on what was already done,
//! typically by adding a value's fingerprint to a set and only processing it
//! when it was new:
//!
//! ```
//! # tokio_test::block_on(async {
//! use agentbus_core::store::{InMemoryPersistStore, PersistStore};
//!
//! let store = InMemoryPersistStore::new();
//! assert!(store.set_add("crawler_asset_dna", &["dna-1"]).await.unwrap());
//! assert!(!store.set_add("crawler_asset_dna", &["dna-1"]).await.unwrap());
//! # });
//! ```

use crate::config::AgentSettings;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Errors raised by store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("operation against key '{key}' holding the wrong kind of value: expected {expected}, found {found}")]
    WrongType {
        key: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Kind of value held at a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    None,
    String,
    Set,
    Hash,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::None => "none",
            ValueType::String => "string",
            ValueType::Set => "set",
            ValueType::Hash => "hash",
        };
        f.write_str(name)
    }
}

/// Key/value, set and hash storage shared between agent replicas.
#[async_trait]
pub trait PersistStore: Send + Sync {
    /// Adds `values` to the set at `key`. Returns true when at least one of
    /// them was not a member yet.
    async fn set_add(&self, key: &str, values: &[&str]) -> StoreResult<bool>;

    async fn set_is_member(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Cardinality of the set, 0 when the key does not exist.
    async fn set_len(&self, key: &str) -> StoreResult<usize>;

    async fn set_members(&self, key: &str) -> StoreResult<HashSet<String>>;

    /// Sets `key` to hold `value`, replacing whatever it held.
    async fn add(&self, key: &str, value: Bytes) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Merges `mapping` into the hash. Returns true when a new field was
    /// created; existing fields are overwritten.
    async fn hash_add(&self, hash_name: &str, mapping: &HashMap<String, String>) -> StoreResult<bool>;

    async fn hash_exists(&self, hash_name: &str, key: &str) -> StoreResult<bool>;

    async fn hash_get(&self, hash_name: &str, key: &str) -> StoreResult<Option<String>>;

    async fn hash_get_all(&self, hash_name: &str) -> StoreResult<HashMap<String, String>>;

    /// Returns true when the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn value_type(&self, key: &str) -> StoreResult<ValueType>;
}

#[derive(Debug, Clone)]
enum StoredValue {
    String(Bytes),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

impl StoredValue {
    fn value_type(&self) -> ValueType {
        match self {
            StoredValue::String(_) => ValueType::String,
            StoredValue::Set(_) => ValueType::Set,
            StoredValue::Hash(_) => ValueType::Hash,
        }
    }
}

fn wrong_type(key: &str, expected: ValueType, found: &StoredValue) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.value_type(),
    }
}

/// Process-local store. Handles obtained for the same `memory://<name>` URL
/// share their data.
#[derive(Debug, Default)]
pub struct InMemoryPersistStore {
    entries: DashMap<String, StoredValue>,
}

impl InMemoryPersistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PersistStore for InMemoryPersistStore {
    async fn set_add(&self, key: &str, values: &[&str]) -> StoreResult<bool> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::Set(HashSet::new()));
        match entry.value_mut() {
            StoredValue::Set(set) => {
                let mut added = false;
                for value in values {
                    added |= set.insert((*value).to_string());
                }
                Ok(added)
            }
            other => Err(wrong_type(key, ValueType::Set, other)),
        }
    }

    async fn set_is_member(&self, key: &str, value: &str) -> StoreResult<bool> {
        match self.entries.get(key).as_deref() {
            None => Ok(false),
            Some(StoredValue::Set(set)) => Ok(set.contains(value)),
            Some(other) => Err(wrong_type(key, ValueType::Set, other)),
        }
    }

    async fn set_len(&self, key: &str) -> StoreResult<usize> {
        match self.entries.get(key).as_deref() {
            None => Ok(0),
            Some(StoredValue::Set(set)) => Ok(set.len()),
            Some(other) => Err(wrong_type(key, ValueType::Set, other)),
        }
    }

    async fn set_members(&self, key: &str) -> StoreResult<HashSet<String>> {
        match self.entries.get(key).as_deref() {
            None => Ok(HashSet::new()),
            Some(StoredValue::Set(set)) => Ok(set.clone()),
            Some(other) => Err(wrong_type(key, ValueType::Set, other)),
        }
    }

    async fn add(&self, key: &str, value: Bytes) -> StoreResult<bool> {
        self.entries.insert(key.to_string(), StoredValue::String(value));
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        match self.entries.get(key).as_deref() {
            None => Ok(None),
            Some(StoredValue::String(value)) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, ValueType::String, other)),
        }
    }

    async fn hash_add(&self, hash_name: &str, mapping: &HashMap<String, String>) -> StoreResult<bool> {
        let mut entry = self
            .entries
            .entry(hash_name.to_string())
            .or_insert_with(|| StoredValue::Hash(HashMap::new()));
        match entry.value_mut() {
            StoredValue::Hash(hash) => {
                let mut created = false;
                for (field, value) in mapping {
                    created |= hash.insert(field.clone(), value.clone()).is_none();
                }
                Ok(created)
            }
            other => Err(wrong_type(hash_name, ValueType::Hash, other)),
        }
    }

    async fn hash_exists(&self, hash_name: &str, key: &str) -> StoreResult<bool> {
        Ok(self.hash_get(hash_name, key).await?.is_some())
    }

    async fn hash_get(&self, hash_name: &str, key: &str) -> StoreResult<Option<String>> {
        match self.entries.get(hash_name).as_deref() {
            None => Ok(None),
            Some(StoredValue::Hash(hash)) => Ok(hash.get(key).cloned()),
            Some(other) => Err(wrong_type(hash_name, ValueType::Hash, other)),
        }
    }

    async fn hash_get_all(&self, hash_name: &str) -> StoreResult<HashMap<String, String>> {
        match self.entries.get(hash_name).as_deref() {
            None => Ok(HashMap::new()),
            Some(StoredValue::Hash(hash)) => Ok(hash.clone()),
            Some(other) => Err(wrong_type(hash_name, ValueType::Hash, other)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn value_type(&self, key: &str) -> StoreResult<ValueType> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.value_type())
            .unwrap_or(ValueType::None))
    }
}

static MEMORY_STORES: Lazy<DashMap<String, Arc<InMemoryPersistStore>>> = Lazy::new(DashMap::new);

fn shared_memory_store(name: &str) -> Arc<InMemoryPersistStore> {
    match MEMORY_STORES.entry(name.to_string()) {
        Entry::Occupied(entry) => entry.get().clone(),
        Entry::Vacant(entry) => entry.insert(Arc::new(InMemoryPersistStore::new())).clone(),
    }
}

/// Opens the store named by `settings.store_url`.
///
/// Fails fast when the URL is missing, unparsable or uses a scheme with no
/// backend. `memory://<name>` returns the process-wide store registered
/// under `<name>`.
pub fn connect_store(settings: &AgentSettings) -> Result<Arc<dyn PersistStore>> {
    let raw = settings.store_url.as_deref().ok_or_else(|| ConfigError::MissingRequired {
        key: "store_url".to_string(),
    })?;
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: "store_url".to_string(),
        value: raw.to_string(),
        expected: format!("a URL ({})", e),
    })?;

    match url.scheme() {
        "memory" => {
            let name = url.host_str().unwrap_or_default();
            Ok(shared_memory_store(name))
        }
        other => Err(ConfigError::UnsupportedScheme {
            key: "store_url".to_string(),
            scheme: other.to_string(),
        }
        .into()),
    }
}
