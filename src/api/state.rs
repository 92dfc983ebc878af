use std::sync::Arc;

use crate::{
    db::Cache,
    services::{providers::CatalogueProvider, recommendations::Recommender},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn CatalogueProvider>,
    pub recommender: Recommender,
    pub cache: Cache,
}

impl AppState {
    pub fn new(provider: Arc<dyn CatalogueProvider>, recommender: Recommender, cache: Cache) -> Self {
        Self {
            provider,
            recommender,
            cache,
        }
    }
}
