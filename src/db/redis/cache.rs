use redis::AsyncCommands;
use redis::Client;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::models::{Season, Title, TitleFrame, TitleId};

/// Upper bound on a single cache round-trip
const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a failed store is skipped before it is tried again
const RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    AnimeList(String),
    MangaList(String),
    Seasonal { year: i32, season: Option<Season> },
    Related(TitleId),
    NsfwTags,
    Genres,
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::AnimeList(user) => write!(f, "anime-list:{}", user.to_lowercase()),
            CacheKey::MangaList(user) => write!(f, "manga-list:{}", user.to_lowercase()),
            CacheKey::Seasonal { year, season } => match season {
                Some(season) => write!(f, "seasonal:{}:{}", year, season),
                None => write!(f, "seasonal:{}:all", year),
            },
            CacheKey::Related(id) => write!(f, "related:{}", id),
            CacheKey::NsfwTags => write!(f, "vocab:nsfw-tags"),
            CacheKey::Genres => write!(f, "vocab:genres"),
        }
    }
}

impl CacheKey {
    /// Storage key: hex SHA-256 of the rendered key
    pub fn hashed(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Raw string storage behind the [`Cache`] facade
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> AppResult<Option<String>>;

    /// Stores a value; may complete after returning
    async fn set_raw(&self, key: String, value: String, ttl: u64);

    fn is_available(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Creates a Redis client for caching
///
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Tracks the last failed round-trip
#[derive(Default)]
struct Health {
    failed_at: Mutex<Option<Instant>>,
}

impl Health {
    fn is_available(&self) -> bool {
        match self.failed_at.lock() {
            Ok(failed_at) => failed_at.map_or(true, |at| at.elapsed() >= RETRY_AFTER),
            Err(_) => false,
        }
    }

    fn record(&self, ok: bool) {
        if let Ok(mut failed_at) = self.failed_at.lock() {
            *failed_at = if ok { None } else { Some(Instant::now()) };
        }
    }
}

/// Redis-backed store. Writes go through a background task.
pub struct RedisStore {
    client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
    health: Arc<Health>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task to flush pending writes and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl RedisStore {
    /// Creates the store and spawns its write task
    pub fn new(client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let health = Arc::new(Health::default());

        let task_client = client.clone();
        let task_health = health.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(task_client, task_health, write_rx, shutdown_rx).await;
        });

        let store = Self {
            client,
            write_tx,
            health,
        };

        (store, CacheWriterHandle { shutdown_tx })
    }

    /// Writes queued messages to Redis until shutdown, then flushes the rest
    async fn cache_writer_task(
        client: Client,
        health: Arc<Health>,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    let result = Self::write_to_redis(&client, msg).await;
                    health.record(result.is_ok());
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::warn!(error = %e, "Failed to flush cache write during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }
                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        tokio::time::timeout(ROUND_TRIP_TIMEOUT, async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
            Ok::<(), AppError>(())
        })
        .await
        .map_err(|_| AppError::Internal("Cache write timed out".to_string()))?
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisStore {
    async fn get_raw(&self, key: &str) -> AppResult<Option<String>> {
        let result = tokio::time::timeout(ROUND_TRIP_TIMEOUT, async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok::<_, AppError>(value)
        })
        .await
        .map_err(|_| AppError::Internal("Cache read timed out".to_string()))
        .and_then(|inner| inner);

        self.health.record(result.is_ok());
        result
    }

    async fn set_raw(&self, key: String, value: String, ttl: u64) {
        if let Err(e) = self.write_tx.send(CacheWriteMessage { key, value, ttl }) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }

    fn is_available(&self) -> bool {
        self.health.is_available()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Process-wide cache shared by all requests.
///
/// Every operation degrades to a miss when the store is unavailable or fails.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// In-process cache for local runs and tests
    pub fn in_memory() -> Self {
        Self::new(Arc::new(super::memory::MemoryStore::default()))
    }

    pub fn is_available(&self) -> bool {
        self.store.is_available()
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    async fn get_string(&self, key: &CacheKey) -> Option<String> {
        if !self.store.is_available() {
            return None;
        }
        match self.store.get_raw(&key.hashed()).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set_string(&self, key: &CacheKey, value: String, ttl: u64) {
        if !self.store.is_available() {
            return;
        }
        self.store.set_raw(key.hashed(), value, ttl).await;
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let json = self.get_string(key).await?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache deserialization error");
                None
            }
        }
    }

    pub async fn set_json<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        match serde_json::to_string(value) {
            Ok(json) => self.set_string(key, json, ttl).await,
            Err(e) => tracing::error!(key = %key, error = %e, "Cache serialization error"),
        }
    }

    /// Reads a title frame stored in columnar form
    pub async fn get_dataframe(&self, key: &CacheKey) -> Option<Vec<Title>> {
        let frame: TitleFrame = self.get_json(key).await?;
        match frame.into_rows() {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cached frame is malformed");
                None
            }
        }
    }

    pub async fn set_dataframe(&self, key: &CacheKey, rows: &[Title], ttl: u64) {
        self.set_json(key, &TitleFrame::from(rows), ttl).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Format, UserStatus};

    #[test]
    fn test_cache_key_display_lists_lowercase_user() {
        assert_eq!(CacheKey::AnimeList("Kira".to_string()).to_string(), "anime-list:kira");
        assert_eq!(CacheKey::MangaList("KIRA".to_string()).to_string(), "manga-list:kira");
    }

    #[test]
    fn test_cache_key_display_seasonal() {
        let key = CacheKey::Seasonal {
            year: 2024,
            season: Some(Season::Fall),
        };
        assert_eq!(key.to_string(), "seasonal:2024:fall");

        let key = CacheKey::Seasonal {
            year: 2024,
            season: None,
        };
        assert_eq!(key.to_string(), "seasonal:2024:all");
    }

    #[test]
    fn test_hashed_key_is_sha256_hex() {
        let hashed = CacheKey::Genres.hashed();
        assert_eq!(hashed.len(), 64);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hashed, CacheKey::Genres.hashed());
        assert_ne!(hashed, CacheKey::NsfwTags.hashed());
    }

    #[test]
    fn test_dataframe_round_trip() {
        let cache = Cache::in_memory();
        let key = CacheKey::AnimeList("user".to_string());

        let mut first = Title::new(1, "First");
        first.format = Some(Format::Tv);
        first.genres = vec!["Action".into()];
        first.ranks.insert("Action".into(), 75.0);
        first.user_status = Some(UserStatus::Completed);
        first.score = Some(8.0);
        let mut second = Title::new(2, "Second");
        second.continuation_to = vec![1];
        let rows = vec![first, second];

        tokio_test::block_on(cache.set_dataframe(&key, &rows, 60));
        let cached = tokio_test::block_on(cache.get_dataframe(&key));
        assert_eq!(cached, Some(rows));
    }

    #[test]
    fn test_json_miss() {
        let cache = Cache::in_memory();
        let value: Option<Vec<String>> = tokio_test::block_on(cache.get_json(&CacheKey::Genres));
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_unreachable_redis_degrades_to_miss() {
        let client = create_redis_client("redis://127.0.0.1:1").unwrap();
        let (store, _handle) = RedisStore::new(client);
        let cache = Cache::new(Arc::new(store));

        let value: Option<Vec<String>> = cache.get_json(&CacheKey::Genres).await;
        assert_eq!(value, None);
        assert!(!cache.is_available());

        // Skipped while unavailable
        cache.set_json(&CacheKey::Genres, &vec!["Action"], 60).await;
        let value: Option<Vec<String>> = cache.get_json(&CacheKey::Genres).await;
        assert_eq!(value, None);
    }
}
