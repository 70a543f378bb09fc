use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Expiring key-value storage with an explicit TTL contract. Injected into
/// the components that need short-lived state (OTP codes) instead of
/// process-wide mutable globals.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Returns None for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, expires)| {
            if *expires > Instant::now() {
                Some(value.clone())
            } else {
                None
            }
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
