use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::config::sequence_key;
use crate::core::errors::Result;

/// Raw byte storage. Every value the app keeps lives behind one of these.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn keys(&self) -> anyhow::Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut entries = self.entries.write().map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.write().map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(entries.keys().cloned().collect())
    }
}

/// The Spin component's default key-value store, opened per operation.
#[cfg(target_arch = "wasm32")]
pub struct SpinBackend;

#[cfg(target_arch = "wasm32")]
impl SpinBackend {
    fn store() -> anyhow::Result<spin_sdk::key_value::Store> {
        spin_sdk::key_value::Store::open_default()
            .map_err(|e| anyhow::anyhow!("KV store must exist: {}", e))
    }
}

#[cfg(target_arch = "wasm32")]
impl KvBackend for SpinBackend {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(Self::store()?.get(key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(Self::store()?.set(key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(Self::store()?.delete(key)?)
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(Self::store()?.get_keys()?)
    }
}

/// JSON document access over a [`KvBackend`].
///
/// Multi-key mutations (id allocation, record, index lists) run under
/// [`Db::write_guard`] so each logical write is applied as a unit.
#[derive(Clone)]
pub struct Db {
    backend: Arc<dyn KvBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl Db {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    pub fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.backend.get(key)?)
    }

    pub fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        Ok(self.backend.set(key, value)?)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        Ok(self.backend.set(key, &raw)?)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        Ok(self.backend.delete(key)?)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.backend.get(key)?.is_some())
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// An id list stored under `key`, empty when absent.
    pub fn get_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        Ok(self.get_json(key)?.unwrap_or_default())
    }

    /// Prepend `id` to the list under `key`, moving it to the front if present.
    pub fn list_push_front<T: Serialize + DeserializeOwned + PartialEq>(&self, key: &str, id: T) -> Result<()> {
        let mut list: Vec<T> = self.get_list(key)?;
        list.retain(|existing| *existing != id);
        list.insert(0, id);
        self.set_json(key, &list)
    }

    pub fn list_push_back<T: Serialize + DeserializeOwned + PartialEq>(&self, key: &str, id: T) -> Result<()> {
        let mut list: Vec<T> = self.get_list(key)?;
        if !list.contains(&id) {
            list.push(id);
            self.set_json(key, &list)?;
        }
        Ok(())
    }

    pub fn list_remove<T: Serialize + DeserializeOwned + PartialEq>(&self, key: &str, id: &T) -> Result<()> {
        let mut list: Vec<T> = self.get_list(key)?;
        let before = list.len();
        list.retain(|existing| existing != id);
        if list.len() != before {
            self.set_json(key, &list)?;
        }
        Ok(())
    }

    /// Next value of a named integer sequence, starting at 1.
    /// Callers must hold the write guard.
    pub fn next_id(&self, sequence: &str) -> Result<u64> {
        let key = sequence_key(sequence);
        let next = self.get_json::<u64>(&key)?.unwrap_or(0) + 1;
        self.set_json(&key, &next)?;
        Ok(next)
    }
}
