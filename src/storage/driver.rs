use async_trait::async_trait;

use crate::error::Result;

/// A narrow key-value port over the shared storage surface.
///
/// The storage medium is partitioned into an ephemeral scope (gone when the
/// browsing context ends) and a persistent scope (survives restarts); both
/// sides implement this trait and no component ever touches a concrete
/// storage API directly.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Removes the value stored under `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists every key currently present.
    async fn keys(&self) -> Result<Vec<String>>;
}
