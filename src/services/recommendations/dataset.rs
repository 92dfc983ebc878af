use ndarray::{Array2, ArrayView2};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::{
    error::{AppError, AppResult},
    models::{dedup_by_id, FeatureField, Title, TitleId},
};

use super::{
    clustering::{ClusterModel, UNCLUSTERED},
    encoder::{encoder_for, Encoder},
    profile::UserProfile,
    similarity::{Metric, SimilarityMatrix},
    stats::{mean_score_default, Exploded, ListColumn},
};

/// Score assumed for a user who has scored nothing
pub const DEFAULT_USER_MEAN: f64 = 5.0;

/// Knobs for the per-request pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub metric: Metric,
    pub distance_threshold: f64,
    pub n_clusters: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            metric: Metric::Jaccard,
            distance_threshold: 0.8,
            n_clusters: None,
        }
    }
}

/// Which frame of the dataset a derived value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Watchlist,
    Seasonal,
}

/// State produced by [`RecommendationDataset::fit`]
#[derive(Debug, Clone)]
pub struct FittedState {
    pub features: Vec<String>,
    pub watchlist_encoded: Array2<f64>,
    pub seasonal_encoded: Array2<f64>,
    pub watchlist_clusters: Vec<i32>,
    pub seasonal_clusters: Vec<i32>,
    pub similarity: SimilarityMatrix,
}

/// Everything one recommendation request knows about the user and the candidates
pub struct RecommendationDataset {
    pub watchlist: Vec<Title>,
    pub seasonal: Vec<Title>,
    pub mangalist: Option<Vec<Title>>,
    pub nsfw_tags: HashSet<String>,
    pub profile: UserProfile,
    settings: PipelineSettings,
    encoder: Box<dyn Encoder>,
    clusters: ClusterModel,
    fitted: Option<FittedState>,
    // At most one entry per (side, column) pair, so the memo never grows past 12
    exploded: Mutex<HashMap<(Side, ListColumn), Arc<Exploded>>>,
}

impl RecommendationDataset {
    /// Assembles and validates the dataset.
    ///
    /// Rows are deduplicated by id, features are rebuilt from `feature_fields`,
    /// and seasonal rows take the user columns of their watchlist entry.
    pub fn new(
        watchlist: Option<Vec<Title>>,
        seasonal: Option<Vec<Title>>,
        mangalist: Option<Vec<Title>>,
        nsfw_tags: HashSet<String>,
        feature_fields: &[FeatureField],
        settings: PipelineSettings,
    ) -> AppResult<Self> {
        validate(watchlist.as_deref(), seasonal.as_deref())?;

        let prepare = |rows: Vec<Title>| -> Vec<Title> {
            dedup_by_id(rows)
                .into_iter()
                .map(|mut row| {
                    row.rebuild_features(feature_fields);
                    row
                })
                .collect()
        };

        let watchlist = prepare(watchlist.unwrap_or_default());
        let mut seasonal = prepare(seasonal.unwrap_or_default());
        let mangalist = mangalist.map(dedup_by_id);

        let by_id: HashMap<TitleId, &Title> = watchlist.iter().map(|row| (row.id, row)).collect();
        for row in seasonal.iter_mut() {
            if let Some(entry) = by_id.get(&row.id) {
                row.user_status = entry.user_status;
                row.score = entry.score;
                row.user_complete_date = entry.user_complete_date;
            }
        }

        let profile = UserProfile::from_watchlist(Some(&watchlist));

        Ok(Self {
            watchlist,
            seasonal,
            mangalist,
            nsfw_tags,
            profile,
            settings,
            encoder: encoder_for(settings.metric),
            clusters: ClusterModel::new(
                settings.metric,
                settings.distance_threshold,
                settings.n_clusters,
            ),
            fitted: None,
            exploded: Mutex::new(HashMap::new()),
        })
    }

    /// Fits the encoder on the union vocabulary, encodes both frames, clusters
    /// the watchlist and computes the similarity matrix.
    pub fn fit(&mut self) -> AppResult<()> {
        let start = Instant::now();

        let features: Vec<String> = self
            .watchlist
            .iter()
            .chain(self.seasonal.iter())
            .flat_map(|row| row.features.iter().cloned())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        self.encoder.fit(features);
        let watchlist_encoded = self.encoder.encode(&self.watchlist)?;
        let seasonal_encoded = self.encoder.encode(&self.seasonal)?;

        let watchlist_ids: Vec<TitleId> = self.watchlist.iter().map(|row| row.id).collect();
        let seasonal_ids: Vec<TitleId> = self.seasonal.iter().map(|row| row.id).collect();

        let similarity = SimilarityMatrix::compute(
            self.encoder.metric(),
            watchlist_ids.clone(),
            watchlist_encoded.view(),
            seasonal_ids,
            seasonal_encoded.view(),
        );

        let (watchlist_clusters, seasonal_clusters) =
            match self.clusters.cluster_by_features(&watchlist_ids, watchlist_encoded.view()) {
                Some(labels) => {
                    let predicted = self
                        .clusters
                        .predict(seasonal_encoded.view(), Some(similarity.values()))?;
                    (labels, predicted)
                }
                None => {
                    tracing::warn!("Watchlist clustering produced no labels");
                    (
                        vec![UNCLUSTERED; self.watchlist.len()],
                        vec![UNCLUSTERED; self.seasonal.len()],
                    )
                }
            };

        tracing::info!(
            watchlist = self.watchlist.len(),
            seasonal = self.seasonal.len(),
            features = self.encoder.classes().len(),
            clusters = self.clusters.n_clusters().unwrap_or(0),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dataset fitted"
        );

        self.fitted = Some(FittedState {
            features: self.encoder.classes().to_vec(),
            watchlist_encoded,
            seasonal_encoded,
            watchlist_clusters,
            seasonal_clusters,
            similarity,
        });

        Ok(())
    }

    pub fn is_fit(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn metric(&self) -> Metric {
        self.encoder.metric()
    }

    /// Fitted state; a usage error before [`fit`](Self::fit)
    pub fn fitted(&self) -> AppResult<&FittedState> {
        self.fitted
            .as_ref()
            .ok_or_else(|| AppError::Usage("Dataset must be fit before scoring".to_string()))
    }

    pub fn similarity(&self) -> AppResult<&SimilarityMatrix> {
        self.fitted().map(|f| &f.similarity)
    }

    pub fn watchlist_encoded(&self) -> AppResult<ArrayView2<f64>> {
        self.fitted().map(|f| f.watchlist_encoded.view())
    }

    pub fn cluster_model(&self) -> &ClusterModel {
        &self.clusters
    }

    /// Mean of the user's scores, or [`DEFAULT_USER_MEAN`]
    pub fn user_mean_score(&self) -> f64 {
        mean_score_default(self.watchlist.iter().map(|row| row.score), DEFAULT_USER_MEAN)
    }

    pub fn watchlist_by_id(&self) -> HashMap<TitleId, &Title> {
        self.watchlist.iter().map(|row| (row.id, row)).collect()
    }

    pub fn seasonal_ids(&self) -> Vec<TitleId> {
        self.seasonal.iter().map(|row| row.id).collect()
    }

    /// Exploded list column, memoised for the lifetime of the dataset
    pub fn explode(&self, side: Side, column: ListColumn) -> Arc<Exploded> {
        let mut cache = match self.exploded.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache
            .entry((side, column))
            .or_insert_with(|| {
                let rows = match side {
                    Side::Watchlist => &self.watchlist,
                    Side::Seasonal => &self.seasonal,
                };
                Arc::new(Exploded::from_rows(rows, column))
            })
            .clone()
    }
}

/// Both the watchlist and the seasonal catalogue must be present and non-empty
pub fn validate(watchlist: Option<&[Title]>, seasonal: Option<&[Title]>) -> AppResult<()> {
    match watchlist {
        None => return Err(AppError::DataMissing("watchlist is missing".to_string())),
        Some(rows) if rows.is_empty() => {
            return Err(AppError::DataMissing("watchlist is empty".to_string()))
        }
        _ => {}
    }
    match seasonal {
        None => Err(AppError::DataMissing("seasonal catalogue is missing".to_string())),
        Some(rows) if rows.is_empty() => {
            Err(AppError::DataMissing("seasonal catalogue is empty".to_string()))
        }
        _ => Ok(()),
    }
}
