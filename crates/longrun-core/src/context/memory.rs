//! In-memory context store implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreError;

use super::{ContextStore, ContextStoreProvider, ContextValue};

/// Context store keeping everything in process memory.
///
/// State does not survive a restart; intended for tests and for runs
/// that never need to resume across process boundaries.
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    entries: RwLock<HashMap<String, ContextValue>>,
}

impl InMemoryContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn save(&self, key: &str, value: ContextValue) -> Result<(), CoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<ContextValue>, CoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn has_key(&self, key: &str) -> Result<bool, CoreError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn export(&self) -> Result<HashMap<String, ContextValue>, CoreError> {
        Ok(self.entries.read().await.clone())
    }

    async fn import(&self, entries: HashMap<String, ContextValue>) -> Result<(), CoreError> {
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn open(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Provider handing out fresh [`InMemoryContextStore`]s.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContextProvider;

#[async_trait]
impl ContextStoreProvider for InMemoryContextProvider {
    async fn create(&self, _workflow_name: &str) -> Result<Box<dyn ContextStore>, CoreError> {
        Ok(Box::new(InMemoryContextStore::new()))
    }
}
