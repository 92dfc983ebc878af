use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::cache::CacheStore;
use crate::error::AppResult;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process store with per-key expiry. A TTL of 0 never expires.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> AppResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|entry| match entry.expires_at {
            Some(at) if at <= Instant::now() => None,
            _ => Some(entry.value.clone()),
        }))
    }

    async fn set_raw(&self, key: String, value: String, ttl: u64) {
        let expires_at = (ttl > 0).then(|| Instant::now() + Duration::from_secs(ttl));
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at.map_or(true, |at| at > Instant::now()));
        entries.insert(key, Entry { value, expires_at });
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
