use serde::Deserialize;

use crate::services::recommendations::{Metric, PipelineSettings};

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Redis connection URL. When unset, an in-process cache is used
    #[serde(default)]
    pub redis_url: Option<String>,

    /// AniList GraphQL endpoint
    #[serde(default = "default_anilist_api_url")]
    pub anilist_api_url: String,

    /// Path to a JSON catalogue fixture that replaces the AniList provider
    #[serde(default)]
    pub catalogue_fixture: Option<String>,

    /// Per-request timeout for catalogue provider calls, in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// `jaccard` (boolean encoding) or `cosine` (weighted encoding)
    #[serde(default = "default_similarity_metric")]
    pub similarity_metric: String,

    /// Linkage distance at or above which clusters are not merged
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,

    #[serde(default = "default_user_cache_ttl_secs")]
    pub user_cache_ttl_secs: u64,

    #[serde(default = "default_catalogue_cache_ttl_secs")]
    pub catalogue_cache_ttl_secs: u64,

    #[serde(default = "default_vocabulary_cache_ttl_secs")]
    pub vocabulary_cache_ttl_secs: u64,

    /// Period of the genre/tag vocabulary preload task, in seconds
    #[serde(default = "default_vocabulary_refresh_secs")]
    pub vocabulary_refresh_secs: u64,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_anilist_api_url() -> String {
    "https://graphql.anilist.co".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_similarity_metric() -> String {
    "jaccard".to_string()
}

fn default_distance_threshold() -> f64 {
    0.8
}

fn default_user_cache_ttl_secs() -> u64 {
    86_400 // 1 day
}

fn default_catalogue_cache_ttl_secs() -> u64 {
    604_800 // 1 week
}

fn default_vocabulary_cache_ttl_secs() -> u64 {
    2_592_000 // 30 days
}

fn default_vocabulary_refresh_secs() -> u64 {
    86_400
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Settings for the per-request recommendation pipeline
    pub fn pipeline_settings(&self) -> anyhow::Result<PipelineSettings> {
        let metric: Metric = self
            .similarity_metric
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid SIMILARITY_METRIC: {}", e))?;

        Ok(PipelineSettings {
            metric,
            distance_threshold: self.distance_threshold,
            n_clusters: None,
        })
    }
}
