//! The scoring ensemble.
//!
//! Every scorer produces one column aligned with the seasonal rows. Values are
//! in [0, 1]; the format scorer is a penalty and carries a negative weight.

use ndarray::{ArrayView2, Axis};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use crate::{
    error::AppResult,
    models::{Format, Title, TitleId, UserStatus},
};

use super::{
    dataset::{RecommendationDataset, Side, DEFAULT_USER_MEAN},
    profile::UserProfile,
    similarity::SimilarityMatrix,
    stats::{
        catalogue_frequency, idymax, mean_score_default, median, rank_series,
        weight_encoded_categoricals_correlation, weighted_mean_for_categorical_values,
        CorrelationTable, Exploded, ListColumn,
    },
};

pub const DIRECT: &str = "directscore";
pub const FEATURE_CORRELATION: &str = "featurecorrelationscore";
pub const CLUSTER: &str = "clusterscore";
pub const CONTINUATION: &str = "continuationscore";
pub const ADAPTATION: &str = "adaptationscore";
pub const POPULARITY: &str = "popularityscore";
pub const GENRE: &str = "genrescore";
pub const FORMAT: &str = "formatscore";
pub const STUDIO: &str = "studiocorrelationscore";
pub const DIRECTOR: &str = "directorcorrelationscore";

pub const RECOMMEND_SCORE: &str = "recommend_score";
pub const FINAL_SCORE: &str = "final_score";
pub const DISCOURAGE_SCORE: &str = "discourage_score";

/// One column of the ensemble
pub trait Scorer: Send + Sync {
    /// Column key; stable across releases
    fn name(&self) -> &'static str;

    fn weight(&self) -> f64 {
        1.0
    }

    /// One value per seasonal row
    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>>;
}

fn user_scores(rows: &[Title], fallback: f64) -> HashMap<TitleId, f64> {
    rows.iter()
        .map(|row| (row.id, row.score.filter(|s| s.is_finite()).unwrap_or(fallback)))
        .collect()
}

/// Most similar watchlist title for every seasonal title.
///
/// Ties resolve to the higher watchlist id.
pub fn best_matches(similarity: &SimilarityMatrix) -> Vec<(TitleId, f64)> {
    idymax(similarity.watchlist_ids(), similarity.values())
}

/// Best similarity times the user's score for the matched watchlist title
pub fn direct_scores(
    similarity: &SimilarityMatrix,
    scores: &HashMap<TitleId, f64>,
    fallback: f64,
) -> Vec<Option<f64>> {
    best_matches(similarity)
        .into_iter()
        .map(|(id, best)| {
            if best.is_nan() {
                None
            } else {
                Some(best * scores.get(&id).copied().unwrap_or(fallback))
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSimilarityScorer;

impl Scorer for DirectSimilarityScorer {
    fn name(&self) -> &'static str {
        DIRECT
    }

    fn weight(&self) -> f64 {
        0.25
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        let similarity = dataset.similarity()?;
        let mean = dataset.user_mean_score();
        let scores = user_scores(&dataset.watchlist, mean);
        Ok(rank_series(&direct_scores(similarity, &scores, mean)))
    }
}

/// Debiased correlation between the user's scores and the features of each title
#[derive(Debug, Clone, Copy)]
pub struct FeatureCorrelationScorer {
    pub beta: f64,
    pub epsilon: f64,
    pub gamma: f64,
    pub lambda: f64,
}

impl Default for FeatureCorrelationScorer {
    fn default() -> Self {
        Self {
            beta: 0.7,
            epsilon: 1e-6,
            gamma: 0.5,
            lambda: 0.25,
        }
    }
}

impl FeatureCorrelationScorer {
    fn raw(
        &self,
        features: &[String],
        positive: &HashMap<String, f64>,
        negative: &HashMap<String, f64>,
        frequency: &HashMap<String, f64>,
    ) -> f64 {
        let unique: HashSet<&String> = features.iter().collect();
        if unique.is_empty() {
            return 0.0;
        }
        let k = unique.len() as f64;

        let mut pos = 0.0;
        let mut neg = 0.0;
        let mut base = 0.0;
        for feature in unique {
            let p_c = frequency.get(feature).copied().unwrap_or(0.0);
            let p = positive.get(feature).copied().unwrap_or(0.0);
            pos += p / (p_c.powf(self.beta) + self.epsilon);
            neg += negative.get(feature).copied().unwrap_or(0.0);
            base += p_c;
        }

        let raw = pos / k.powf(self.gamma) - neg / k - self.lambda * base / k;
        raw.max(0.0)
    }
}

impl Scorer for FeatureCorrelationScorer {
    fn name(&self) -> &'static str {
        FEATURE_CORRELATION
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        let fitted = dataset.fitted()?;
        let encoded = fitted.watchlist_encoded.view();

        // Unscored rows are left out of the sample
        let scored: Vec<usize> = dataset
            .watchlist
            .iter()
            .enumerate()
            .filter(|(_, row)| row.score.is_some_and(f64::is_finite))
            .map(|(i, _)| i)
            .collect();
        let positive = if scored.is_empty() {
            CorrelationTable::default()
        } else {
            let against: Vec<f64> = scored
                .iter()
                .map(|&i| dataset.watchlist[i].score.unwrap_or(0.0))
                .collect();
            let sample = encoded.select(Axis(0), &scored);
            weight_encoded_categoricals_correlation(sample.view(), &fitted.features, &against)
        }
        .to_map();

        let dropped: Vec<f64> = dataset
            .watchlist
            .iter()
            .map(|row| if row.dropped_or_paused() { 1.0 } else { 0.0 })
            .collect();
        let negative =
            weight_encoded_categoricals_correlation(encoded, &fitted.features, &dropped).to_map();

        let frequency = catalogue_frequency(&dataset.seasonal);

        let raw: Vec<Option<f64>> = dataset
            .seasonal
            .iter()
            .map(|row| Some(self.raw(&row.features, &positive, &negative, &frequency)))
            .collect();
        Ok(rank_series(&raw))
    }
}

/// Similarity to the user's taste clusters
#[derive(Debug, Clone, Copy)]
pub struct ClusterSimilarityScorer {
    /// Scale by the cluster's mean user score and the square root of its size
    pub weighted: bool,
}

impl Default for ClusterSimilarityScorer {
    fn default() -> Self {
        Self { weighted: true }
    }
}

impl Scorer for ClusterSimilarityScorer {
    fn name(&self) -> &'static str {
        CLUSTER
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        let fitted = dataset.fitted()?;
        let scores: Vec<Option<f64>> = dataset.watchlist.iter().map(|row| row.score).collect();

        match cluster_scores(
            fitted.similarity.values(),
            &fitted.watchlist_clusters,
            &scores,
            dataset.user_mean_score(),
            self.weighted,
        ) {
            Some(raw) => Ok(rank_series(&raw)),
            None => Ok(vec![Some(0.0); dataset.seasonal.len()]),
        }
    }
}

/// Best cluster similarity per seasonal column, before rank normalisation.
///
/// `similarity` is `watchlist x seasonal` and `labels` holds one cluster label
/// per watchlist row; rows labelled -1 belong to no cluster and are skipped.
/// `None` when no watchlist row is clustered.
fn cluster_scores(
    similarity: ArrayView2<f64>,
    labels: &[i32],
    scores: &[Option<f64>],
    fallback: f64,
    weighted: bool,
) -> Option<Vec<Option<f64>>> {
    let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        if label >= 0 {
            members.entry(label).or_default().push(row);
        }
    }
    if members.is_empty() {
        return None;
    }

    let factors: Vec<(&Vec<usize>, f64)> = members
        .values()
        .map(|rows| {
            let factor = if weighted {
                let avg = mean_score_default(
                    rows.iter().map(|&r| scores.get(r).copied().flatten()),
                    fallback,
                );
                avg * (rows.len() as f64).sqrt()
            } else {
                1.0
            };
            (rows, factor)
        })
        .collect();

    Some(
        (0..similarity.ncols())
            .map(|col| {
                factors
                    .iter()
                    .map(|(rows, factor)| {
                        let total: f64 = rows.iter().map(|&r| similarity[[r, col]]).sum();
                        total / rows.len() as f64 * factor
                    })
                    .fold(None, |best: Option<f64>, value| {
                        Some(best.map_or(value, |b| b.max(value)))
                    })
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PopularityScorer;

impl Scorer for PopularityScorer {
    fn name(&self) -> &'static str {
        POPULARITY
    }

    fn weight(&self) -> f64 {
        0.10
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        let popularity: Vec<Option<f64>> = dataset.seasonal.iter().map(|row| row.popularity).collect();
        Ok(rank_series(&popularity))
    }
}

const CONTINUATION_BONUS: f64 = 1.5;
const COMPLETION_BONUS: f64 = 1.0;

fn status_confidence(status: Option<UserStatus>) -> f64 {
    match status {
        Some(UserStatus::Completed) => 1.0,
        Some(UserStatus::Watching) | Some(UserStatus::Paused) => 0.5,
        _ => 0.2,
    }
}

/// Scores candidates by the user's scores for the list entries they relate to.
///
/// Each matched entry's score is shrunk towards the list mean by how far the
/// user got with it, then bonused. Unmatched rows score 0.
fn relation_scores<F>(candidates: &[Title], related: F, list: &[Title]) -> Vec<Option<f64>>
where
    F: Fn(&Title) -> &[TitleId],
{
    let baseline = mean_score_default(list.iter().map(|row| row.score), DEFAULT_USER_MEAN);
    let entries: HashMap<TitleId, &Title> = list.iter().map(|row| (row.id, row)).collect();

    candidates
        .iter()
        .map(|candidate| {
            let best = related(candidate)
                .iter()
                .filter_map(|id| entries.get(id))
                .map(|entry| {
                    let confidence = status_confidence(entry.user_status);
                    let score = entry.score.filter(|s| s.is_finite()).unwrap_or(baseline);
                    let completed = entry.user_status == Some(UserStatus::Completed);
                    baseline
                        + confidence * (score - baseline)
                        + CONTINUATION_BONUS
                        + if completed { COMPLETION_BONUS } else { 0.0 }
                })
                .fold(None, |best: Option<f64>, value| Some(best.map_or(value, |b| b.max(value))));
            Some(best.map_or(0.0, |value| value.clamp(0.0, 10.0) / 10.0))
        })
        .collect()
}

/// Sequels and follow-ups of titles on the watchlist
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuationScorer;

impl Scorer for ContinuationScorer {
    fn name(&self) -> &'static str {
        CONTINUATION
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        Ok(relation_scores(
            &dataset.seasonal,
            |row| row.continuation_to.as_slice(),
            &dataset.watchlist,
        ))
    }
}

/// Adaptations of manga the user has read. Null without a manga list.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptationScorer;

impl Scorer for AdaptationScorer {
    fn name(&self) -> &'static str {
        ADAPTATION
    }

    fn weight(&self) -> f64 {
        0.10
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        match &dataset.mangalist {
            Some(mangalist) => Ok(relation_scores(
                &dataset.seasonal,
                |row| row.adaptation_of.as_slice(),
                mangalist,
            )),
            None => Ok(vec![None; dataset.seasonal.len()]),
        }
    }
}

/// Base penalty of a format; formats without one are not penalised
pub fn format_penalty(format: Option<Format>) -> f64 {
    match format {
        Some(Format::Ova) | Some(Format::Ona) => 0.05,
        Some(Format::Special) | Some(Format::TvShort) => 0.25,
        Some(Format::Music) => 0.80,
        Some(Format::OneShot) => 0.50,
        _ => 0.0,
    }
}

const SHORT_RATIO: f64 = 0.75;
const SHORT_PENALTY: f64 = 0.2;

/// Penalises short and off-format titles. Higher is worse.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatScorer;

impl Scorer for FormatScorer {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn weight(&self) -> f64 {
        -0.30
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        let median_episodes = median(dataset.seasonal.iter().filter_map(|row| row.episodes));
        let median_duration = median(dataset.seasonal.iter().filter_map(|row| row.duration));

        let is_short = |value: Option<f64>, median: Option<f64>| match (value, median) {
            (Some(value), Some(median)) => value < SHORT_RATIO * median,
            _ => false,
        };

        Ok(dataset
            .seasonal
            .iter()
            .map(|row| {
                let mut penalty = format_penalty(row.format);
                if row.format != Some(Format::Movie) && is_short(row.episodes, median_episodes) {
                    penalty += SHORT_PENALTY;
                }
                if is_short(row.duration, median_duration) {
                    penalty += SHORT_PENALTY;
                }
                Some(penalty.clamp(0.0, 1.0))
            })
            .collect())
    }
}

const NO_GENRE_PENALTY: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenreAverageScorer;

impl Scorer for GenreAverageScorer {
    fn name(&self) -> &'static str {
        GENRE
    }

    fn weight(&self) -> f64 {
        0.05
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        let weights = dataset
            .profile
            .genre_correlations
            .as_ref()
            .map(CorrelationTable::to_map)
            .unwrap_or_default();

        let raw: Vec<Option<f64>> = dataset
            .seasonal
            .iter()
            .map(|row| Some(genre_average(&row.genres, &weights)))
            .collect();
        Ok(rank_series(&raw))
    }
}

/// `Σ weight / sqrt(n)` over a title's distinct genres; titles without genres get a small penalty
fn genre_average(genres: &[String], weights: &HashMap<String, f64>) -> f64 {
    let genres: HashSet<&String> = genres.iter().filter(|g| !g.is_empty()).collect();
    if genres.is_empty() {
        return -NO_GENRE_PENALTY;
    }
    let total: f64 = genres
        .iter()
        .map(|genre| weights.get(*genre).copied().unwrap_or(0.0))
        .sum();
    total / (genres.len() as f64).sqrt()
}

/// Mean correlation weight of a row's values, missing entries filled with the table median
fn correlation_mean(
    dataset: &RecommendationDataset,
    table: Option<&CorrelationTable>,
    column: ListColumn,
) -> Vec<Option<f64>> {
    let Some(table) = table else {
        return vec![Some(0.0); dataset.seasonal.len()];
    };

    let exploded = dataset.explode(Side::Seasonal, column);
    rank_series(&correlation_means(&dataset.seasonal, &exploded, table))
}

/// Raw per-row means. Unknown values and rows without any value take the table median.
fn correlation_means(rows: &[Title], exploded: &Exploded, table: &CorrelationTable) -> Vec<Option<f64>> {
    let fill = table.median();
    let means: HashMap<TitleId, f64> =
        weighted_mean_for_categorical_values(exploded, &table.to_map(), fill)
            .into_iter()
            .collect();

    rows.iter()
        .map(|row| Some(means.get(&row.id).copied().unwrap_or(fill)))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StudioCorrelationScorer;

impl Scorer for StudioCorrelationScorer {
    fn name(&self) -> &'static str {
        STUDIO
    }

    fn weight(&self) -> f64 {
        0.02
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        Ok(correlation_mean(
            dataset,
            dataset.profile.studio_correlations.as_ref(),
            ListColumn::Studios,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorCorrelationScorer;

impl Scorer for DirectorCorrelationScorer {
    fn name(&self) -> &'static str {
        DIRECTOR
    }

    fn weight(&self) -> f64 {
        0.02
    }

    fn score(&self, dataset: &RecommendationDataset) -> AppResult<Vec<Option<f64>>> {
        Ok(correlation_mean(
            dataset,
            dataset.profile.director_correlations.as_ref(),
            ListColumn::Directors,
        ))
    }
}

/// A named, weighted score column
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreColumn {
    pub name: &'static str,
    pub weight: f64,
    pub values: Vec<Option<f64>>,
}

/// `Σ weight · value` per row; null or non-finite values contribute nothing
pub fn composite(columns: &[ScoreColumn], len: usize) -> Vec<f64> {
    let mut total = vec![0.0; len];
    for column in columns {
        for (sum, value) in total.iter_mut().zip(column.values.iter()) {
            if let Some(value) = value.filter(|v| v.is_finite()) {
                *sum += column.weight * value;
            }
        }
    }
    total
}

/// Seasonal rows with their score columns and the composite scores.
///
/// `final_score` starts equal to `recommend_score`; `discourage_score` starts at 1.0.
/// Both are updated by the ranking orchestrator.
#[derive(Debug, Clone)]
pub struct RankedFrame {
    pub rows: Vec<Title>,
    pub columns: Vec<ScoreColumn>,
    pub recommend_score: Vec<f64>,
    pub final_score: Vec<f64>,
    pub discourage_score: Vec<f64>,
    pub profile: UserProfile,
    pub similarity: Option<SimilarityMatrix>,
}

impl RankedFrame {
    pub fn new(
        rows: Vec<Title>,
        columns: Vec<ScoreColumn>,
        profile: UserProfile,
        similarity: Option<SimilarityMatrix>,
    ) -> Self {
        let recommend_score = composite(&columns, rows.len());
        Self {
            final_score: recommend_score.clone(),
            discourage_score: vec![1.0; rows.len()],
            recommend_score,
            rows,
            columns,
            profile,
            similarity,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.values.as_slice())
    }

    /// Value of a score column at a row; null and missing columns read as 0
    pub fn value(&self, name: &str, row: usize) -> f64 {
        self.column(name)
            .and_then(|values| values.get(row).copied().flatten())
            .unwrap_or(0.0)
    }

    /// Every score column for a row, keyed by name
    pub fn debug_scores(&self, row: usize) -> BTreeMap<String, Option<f64>> {
        let mut scores: BTreeMap<String, Option<f64>> = self
            .columns
            .iter()
            .map(|column| (column.name.to_string(), column.values.get(row).copied().flatten()))
            .collect();
        scores.insert(RECOMMEND_SCORE.to_string(), self.recommend_score.get(row).copied());
        scores.insert(FINAL_SCORE.to_string(), self.final_score.get(row).copied());
        scores.insert(DISCOURAGE_SCORE.to_string(), self.discourage_score.get(row).copied());
        scores
    }
}

/// Runs every scorer and combines them into a [`RankedFrame`]
pub struct ScoringEnsemble {
    scorers: Vec<Box<dyn Scorer>>,
}

impl Default for ScoringEnsemble {
    fn default() -> Self {
        Self::new(vec![
            Box::new(DirectSimilarityScorer),
            Box::new(FeatureCorrelationScorer::default()),
            Box::new(ClusterSimilarityScorer::default()),
            Box::new(ContinuationScorer),
            Box::new(AdaptationScorer),
            Box::new(PopularityScorer),
            Box::new(GenreAverageScorer),
            Box::new(FormatScorer),
            Box::new(StudioCorrelationScorer),
            Box::new(DirectorCorrelationScorer),
        ])
    }
}

impl ScoringEnsemble {
    pub fn new(scorers: Vec<Box<dyn Scorer>>) -> Self {
        Self { scorers }
    }

    pub fn scorers(&self) -> impl Iterator<Item = &dyn Scorer> {
        self.scorers.iter().map(|scorer| scorer.as_ref())
    }

    /// Scores the dataset. A failing scorer, or one returning the wrong number
    /// of values, contributes a zero column instead.
    pub fn score(&self, dataset: &RecommendationDataset) -> RankedFrame {
        let len = dataset.seasonal.len();

        let columns = self
            .scorers
            .iter()
            .map(|scorer| {
                let start = Instant::now();
                let values = match scorer.score(dataset) {
                    Ok(values) if values.len() == len => values,
                    Ok(values) => {
                        tracing::warn!(
                            scorer = scorer.name(),
                            expected = len,
                            actual = values.len(),
                            "Scorer returned misaligned column, using zeros"
                        );
                        vec![Some(0.0); len]
                    }
                    Err(e) => {
                        tracing::error!(scorer = scorer.name(), error = %e, "Scorer failed, using zeros");
                        vec![Some(0.0); len]
                    }
                };
                tracing::debug!(
                    scorer = scorer.name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Scorer finished"
                );
                ScoreColumn {
                    name: scorer.name(),
                    weight: scorer.weight(),
                    values,
                }
            })
            .collect();

        RankedFrame::new(
            dataset.seasonal.clone(),
            columns,
            dataset.profile.clone(),
            dataset.similarity().ok().cloned(),
        )
    }
}
