//! Context store interfaces and backends for workflow runs.
//!
//! This module defines the store abstraction, the typed [`WorkflowContext`]
//! facade used by the workflow runner, and backend implementations.

pub mod memory;
pub mod sqlite;

pub use self::memory::{InMemoryContextProvider, InMemoryContextStore};
pub use self::sqlite::{SqliteContextProvider, SqliteContextStore};

use std::any::type_name;
use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// Reserved key holding the workflow run name.
pub const WORKFLOW_NAME_KEY: &str = "__workflow_name";
/// Reserved key holding the name of the action currently executing.
pub const WORKFLOW_ACTION_NAME_KEY: &str = "__workflow_action_name";
/// Reserved key holding the name of the step currently executing.
pub const WORKFLOW_STEP_NAME_KEY: &str = "__workflow_step_name";
/// Reserved key holding the index of the next step to execute.
pub const WORKFLOW_STEP_INDEX_KEY: &str = "__workflow_step_index";
/// Reserved key holding the last captured step failure.
pub const WORKFLOW_EXCEPTION_KEY: &str = "__workflow_exception";

/// All keys the engine manages itself. Ordinary callers may not write these.
pub const RESERVED_KEYS: [&str; 5] = [
    WORKFLOW_NAME_KEY,
    WORKFLOW_ACTION_NAME_KEY,
    WORKFLOW_STEP_NAME_KEY,
    WORKFLOW_STEP_INDEX_KEY,
    WORKFLOW_EXCEPTION_KEY,
];

/// Whether `key` is reserved for engine bookkeeping.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// A stored context value: the JSON rendering plus the type tag recorded
/// at the first write.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContextValue {
    /// Type name captured from `std::any::type_name` at write time.
    pub type_name: String,
    /// JSON rendering of the value.
    pub value: serde_json::Value,
}

impl ContextValue {
    /// Build a tagged value from any serializable type.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, CoreError> {
        Ok(Self {
            type_name: type_name::<T>().to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Decode the value as `T`, checking the type tag first.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> Result<T, CoreError> {
        let expected = type_name::<T>();
        if self.type_name != expected {
            return Err(CoreError::TypeMismatch {
                key: key.to_string(),
                expected: expected.to_string(),
                actual: self.type_name.clone(),
            });
        }
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// Raw key/value storage interface backing one workflow run.
///
/// Implementations only move tagged values in and out; all typing and
/// reserved-key rules live in [`WorkflowContext`].
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Save a value under `key`, overwriting any previous value.
    async fn save(&self, key: &str, value: ContextValue) -> Result<(), CoreError>;

    /// Load the value under `key`, or `None` if absent.
    async fn load(&self, key: &str) -> Result<Option<ContextValue>, CoreError>;

    /// Whether `key` is present.
    async fn has_key(&self, key: &str) -> Result<bool, CoreError>;

    /// Serialize every entry, for persistence or handoff.
    async fn export(&self) -> Result<HashMap<String, ContextValue>, CoreError>;

    /// Restore entries in bulk. This is the trusted restore path: values
    /// are not type-checked against prior state.
    async fn import(&self, entries: HashMap<String, ContextValue>) -> Result<(), CoreError>;

    /// Run store-specific initializers.
    async fn open(&self) -> Result<(), CoreError>;

    /// Run store-specific halt and cleanup.
    async fn close(&self) -> Result<(), CoreError>;
}

/// Creates the context store backing a new workflow run.
///
/// Injected into the runner manager so callers choose where run state
/// lives (in memory, SQLite file, ...).
#[async_trait]
pub trait ContextStoreProvider: Send + Sync {
    /// Create a store scoped to `workflow_name`.
    async fn create(&self, workflow_name: &str) -> Result<Box<dyn ContextStore>, CoreError>;
}

/// Typed variable space of one workflow run.
///
/// Enforces the context contract on top of a raw [`ContextStore`]:
/// - a key's type is fixed at its first write; later writes of a
///   different type fail with `TypeMismatch`
/// - reserved keys are only writable through the engine
/// - reads check the stored tag against the requested type
pub struct WorkflowContext {
    store: Box<dyn ContextStore>,
}

impl WorkflowContext {
    /// Wrap a raw store.
    pub fn new(store: Box<dyn ContextStore>) -> Self {
        Self { store }
    }

    /// Read `key` as `T`.
    ///
    /// Fails with `NotInContext` if the key was never written and with
    /// `TypeMismatch` if the stored tag differs from `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CoreError> {
        let Some(existing) = self.store.load(key).await? else {
            return Err(CoreError::NotInContext {
                key: key.to_string(),
            });
        };
        existing.decode(key)
    }

    /// Write `key`. Fails with `ReservedKey` for engine-managed keys and
    /// with `TypeMismatch` if a prior value of a different type exists.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), CoreError> {
        if is_reserved_key(key) {
            return Err(CoreError::ReservedKey {
                key: key.to_string(),
            });
        }
        let new_value = ContextValue::of(value)?;
        if let Some(existing) = self.store.load(key).await?
            && existing.type_name != new_value.type_name
        {
            return Err(CoreError::TypeMismatch {
                key: key.to_string(),
                expected: existing.type_name,
                actual: new_value.type_name,
            });
        }
        self.store.save(key, new_value).await
    }

    /// Engine-internal write path for reserved keys. Skips both the
    /// reserved-key guard and the type-drift check.
    pub(crate) async fn set_reserved<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CoreError> {
        self.store.save(key, ContextValue::of(value)?).await
    }

    /// Merge one step-output entry. The value arrives pre-tagged from
    /// [`StepOutputs`](crate::workflow::StepOutputs); reserved keys and
    /// type drift are still rejected.
    pub(crate) async fn merge_output(
        &self,
        key: &str,
        value: ContextValue,
    ) -> Result<(), CoreError> {
        if is_reserved_key(key) {
            return Err(CoreError::ReservedKey {
                key: key.to_string(),
            });
        }
        if let Some(existing) = self.store.load(key).await?
            && existing.type_name != value.type_name
        {
            return Err(CoreError::TypeMismatch {
                key: key.to_string(),
                expected: existing.type_name,
                actual: value.type_name,
            });
        }
        self.store.save(key, value).await
    }

    /// Load the raw tagged value under `key`, or `None`.
    pub(crate) async fn load_raw(&self, key: &str) -> Result<Option<ContextValue>, CoreError> {
        self.store.load(key).await
    }

    /// Whether `key` is present.
    pub async fn has(&self, key: &str) -> Result<bool, CoreError> {
        self.store.has_key(key).await
    }

    /// Serialize every entry for persistence.
    pub async fn export(&self) -> Result<HashMap<String, ContextValue>, CoreError> {
        self.store.export().await
    }

    /// Restore entries in bulk without type checks (trusted restore path).
    pub async fn import(&self, entries: HashMap<String, ContextValue>) -> Result<(), CoreError> {
        self.store.import(entries).await
    }

    /// Run store-specific initializers.
    pub async fn open(&self) -> Result<(), CoreError> {
        self.store.open().await
    }

    /// Run store-specific halt and cleanup.
    pub async fn close(&self) -> Result<(), CoreError> {
        self.store.close().await
    }
}
