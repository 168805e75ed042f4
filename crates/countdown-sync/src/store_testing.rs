//! Store double whose writes can be made to fail.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tab_store::{InMemoryStore, KeyValueStore, StoreError};

/// In-memory store with switchable write and remove failures.
#[derive(Default)]
pub struct BrokenStore {
    inner: InMemoryStore,
    pub fail_writes: AtomicBool,
    pub fail_removes: AtomicBool,
}

impl BrokenStore {
    pub fn read_only() -> Arc<Self> {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store.fail_removes.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn stuck_removes() -> Arc<Self> {
        let store = Self::default();
        store.fail_removes.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    fn refuse(key: &str) -> StoreError {
        StoreError::Io {
            path: key.to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "quota exceeded"),
        }
    }
}

impl KeyValueStore for BrokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::refuse(key));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Self::refuse(key));
        }
        self.inner.remove(key)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear()
    }
}
