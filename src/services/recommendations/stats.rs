//! Column statistics shared by the user profile and the scorers.
//!
//! Functions that group by title id return groups in first-appearance order,
//! so their output can be joined back onto the frame it came from.

use ndarray::ArrayView2;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{Title, TitleId};

/// A named weight, e.g. how strongly a genre correlates with the user's scores
#[derive(Debug, Clone, PartialEq)]
pub struct Weight {
    pub name: String,
    pub weight: f64,
}

impl Weight {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Weights sorted by descending weight, ties by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelationTable {
    rows: Vec<Weight>,
}

impl CorrelationTable {
    pub fn new(mut rows: Vec<Weight>) -> Self {
        rows.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        Self { rows }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.rows.iter().find(|w| w.name == name).map(|w| w.weight)
    }

    /// The n-th strongest entry (0-based)
    pub fn nth(&self, n: usize) -> Option<&Weight> {
        self.rows.get(n)
    }

    /// Median of the weight column, 0.0 when empty
    pub fn median(&self) -> f64 {
        median(self.rows.iter().map(|w| w.weight)).unwrap_or(0.0)
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        self.rows
            .iter()
            .map(|w| (w.name.clone(), w.weight))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Weight> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Categorical list columns that can be exploded into (id, value) pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListColumn {
    Genres,
    Tags,
    Features,
    Studios,
    Directors,
    Source,
}

impl ListColumn {
    pub fn values<'a>(&self, title: &'a Title) -> Vec<&'a str> {
        match self {
            ListColumn::Genres => title.genres.iter().map(String::as_str).collect(),
            ListColumn::Tags => title.tags.iter().map(String::as_str).collect(),
            ListColumn::Features => title.features.iter().map(String::as_str).collect(),
            ListColumn::Studios => title.studios.iter().map(String::as_str).collect(),
            ListColumn::Directors => title.directors.iter().map(String::as_str).collect(),
            ListColumn::Source => title.source.as_deref().into_iter().collect(),
        }
    }
}

/// Long-format pairs of (id, value) with the row's user score carried along
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exploded {
    pub ids: Vec<TitleId>,
    pub values: Vec<String>,
    pub scores: Vec<Option<f64>>,
}

impl Exploded {
    /// Explodes a list column. Empty values and repeated values within a row are skipped.
    pub fn from_rows(rows: &[Title], column: ListColumn) -> Self {
        let mut exploded = Exploded::default();
        for row in rows {
            let mut seen = HashSet::new();
            for value in column.values(row) {
                if value.is_empty() || !seen.insert(value) {
                    continue;
                }
                exploded.ids.push(row.id);
                exploded.values.push(value.to_string());
                exploded.scores.push(row.score);
            }
        }
        exploded
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Keeps only pairs whose score is present
    pub fn with_scores(&self) -> Self {
        let mut filtered = Exploded::default();
        for i in 0..self.len() {
            if let Some(score) = self.scores[i].filter(|s| !s.is_nan()) {
                filtered.ids.push(self.ids[i]);
                filtered.values.push(self.values[i].clone());
                filtered.scores.push(Some(score));
            }
        }
        filtered
    }
}

enum Aggregate {
    Mean,
    Sum,
}

fn aggregate_by_id(
    exploded: &Exploded,
    weights: &HashMap<String, f64>,
    fillna: f64,
    aggregate: Aggregate,
) -> Vec<(TitleId, f64)> {
    let mut order: Vec<TitleId> = Vec::new();
    let mut groups: HashMap<TitleId, (f64, usize)> = HashMap::new();

    for (id, value) in exploded.ids.iter().zip(exploded.values.iter()) {
        let weight = weights.get(value).copied().unwrap_or(fillna);
        let entry = groups.entry(*id).or_insert_with(|| {
            order.push(*id);
            (0.0, 0)
        });
        entry.0 += weight;
        entry.1 += 1;
    }

    order
        .into_iter()
        .map(|id| {
            let (sum, count) = groups[&id];
            let value = match aggregate {
                Aggregate::Mean => sum / count as f64,
                Aggregate::Sum => sum,
            };
            (id, value)
        })
        .collect()
}

/// Replaces each value with its weight (else `fillna`) and averages per id
pub fn weighted_mean_for_categorical_values(
    exploded: &Exploded,
    weights: &HashMap<String, f64>,
    fillna: f64,
) -> Vec<(TitleId, f64)> {
    aggregate_by_id(exploded, weights, fillna, Aggregate::Mean)
}

/// Replaces each value with its weight (else `fillna`) and sums per id
pub fn weighted_sum_for_categorical_values(
    exploded: &Exploded,
    weights: &HashMap<String, f64>,
    fillna: f64,
) -> Vec<(TitleId, f64)> {
    aggregate_by_id(exploded, weights, fillna, Aggregate::Sum)
}

/// `mean(score) * sqrt(count)` per value, sorted by name. Null scores are ignored.
pub fn weight_categoricals(exploded: &Exploded) -> Vec<Weight> {
    let scored = exploded.with_scores();
    let mut groups: HashMap<&str, (f64, usize)> = HashMap::new();
    for (value, score) in scored.values.iter().zip(scored.scores.iter()) {
        let entry = groups.entry(value.as_str()).or_insert((0.0, 0));
        entry.0 += score.unwrap_or(0.0);
        entry.1 += 1;
    }

    let mut weights: Vec<Weight> = groups
        .into_iter()
        .map(|(name, (sum, count))| {
            let mean = sum / count as f64;
            Weight::new(name, mean * (count as f64).sqrt())
        })
        .collect();
    weights.sort_by(|a, b| a.name.cmp(&b.name));
    weights
}

/// Spearman correlation between each value's 0/1 indicator and the user score,
/// scaled by `sqrt(count)`. Undefined correlations become 0.
pub fn weight_categoricals_correlation(exploded: &Exploded) -> CorrelationTable {
    let scored = exploded.with_scores();
    if scored.is_empty() {
        return CorrelationTable::default();
    }

    let mut id_order: Vec<TitleId> = Vec::new();
    let mut id_index: HashMap<TitleId, usize> = HashMap::new();
    let mut scores: Vec<f64> = Vec::new();
    let mut value_order: Vec<&str> = Vec::new();
    let mut members: HashMap<&str, Vec<usize>> = HashMap::new();

    for i in 0..scored.len() {
        let id = scored.ids[i];
        let row = *id_index.entry(id).or_insert_with(|| {
            id_order.push(id);
            scores.push(scored.scores[i].unwrap_or(0.0));
            id_order.len() - 1
        });
        let value = scored.values[i].as_str();
        members
            .entry(value)
            .or_insert_with(|| {
                value_order.push(value);
                Vec::new()
            })
            .push(row);
    }

    let rows = value_order
        .into_iter()
        .map(|value| {
            let rows = &members[value];
            let mut dummy = vec![0.0; id_order.len()];
            for &row in rows {
                dummy[row] = 1.0;
            }
            let correlation = nan_to_zero(spearman(&dummy, &scores));
            Weight::new(value, correlation * (rows.len() as f64).sqrt())
        })
        .collect();

    CorrelationTable::new(rows)
}

/// Pearson correlation of every encoded dimension with `against`.
///
/// `encoded` has one row per title and one column per entry of `features`.
pub fn weight_encoded_categoricals_correlation(
    encoded: ArrayView2<f64>,
    features: &[String],
    against: &[f64],
) -> CorrelationTable {
    if encoded.nrows() != against.len() || encoded.ncols() != features.len() {
        tracing::warn!(
            rows = encoded.nrows(),
            cols = encoded.ncols(),
            against = against.len(),
            features = features.len(),
            "Encoded correlation shape mismatch"
        );
        return CorrelationTable::new(features.iter().map(|f| Weight::new(f, 0.0)).collect());
    }

    let rows = features
        .iter()
        .enumerate()
        .map(|(d, feature)| {
            let column: Vec<f64> = encoded.column(d).to_vec();
            Weight::new(feature, nan_to_zero(pearson(&column, against)))
        })
        .collect();

    CorrelationTable::new(rows)
}

/// Share of titles carrying each feature
pub fn catalogue_frequency(rows: &[Title]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let unique: HashSet<&String> = row.features.iter().collect();
        for feature in unique {
            *counts.entry(feature.clone()).or_insert(0) += 1;
        }
    }

    let total = rows.len().max(1) as f64;
    counts
        .into_iter()
        .map(|(feature, count)| (feature, count as f64 / total))
        .collect()
}

/// Mean of present, finite scores; `default` when there are none
pub fn mean_score_default<I>(scores: I, default: f64) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = scores
        .into_iter()
        .flatten()
        .filter(|s| s.is_finite())
        .fold((0.0, 0usize), |(sum, count), s| (sum + s, count + 1));
    if count == 0 {
        default
    } else {
        sum / count as f64
    }
}

/// For each column, the id of the row holding the maximum and that maximum.
///
/// Ties resolve to the larger id. NaN cells never win.
pub fn idymax(ids: &[TitleId], matrix: ArrayView2<f64>) -> Vec<(TitleId, f64)> {
    if matrix.nrows() == 0 || ids.len() != matrix.nrows() {
        return Vec::new();
    }

    matrix
        .columns()
        .into_iter()
        .map(|column| {
            let mut best: Option<(TitleId, f64)> = None;
            for (row, &value) in column.iter().enumerate() {
                if value.is_nan() {
                    continue;
                }
                let candidate = (ids[row], value);
                best = match best {
                    Some((best_id, best_value))
                        if best_value > value || (best_value == value && best_id > ids[row]) =>
                    {
                        Some((best_id, best_value))
                    }
                    _ => Some(candidate),
                };
            }
            best.unwrap_or((ids[0], f64::NAN))
        })
        .collect()
}

/// Percentile rank in (0, 1]; ties share their average rank, nulls stay null
pub fn rank_series(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| !x.is_nan()).map(|x| (i, x)))
        .collect();

    let mut ranked = vec![None; values.len()];
    if present.is_empty() {
        return ranked;
    }

    let raw: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
    let ranks = average_ranks(&raw);
    let count = raw.len() as f64;
    for ((i, _), rank) in present.iter().zip(ranks) {
        ranked[*i] = Some(rank / count);
    }
    ranked
}

/// 1-based ranks; tied values get the mean of their positions
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        let average = (start + end) as f64 / 2.0 + 1.0;
        for &index in &order[start..=end] {
            ranks[index] = average;
        }
        start = end + 1;
    }
    ranks
}

/// Pearson correlation; NaN when either side is constant or lengths differ
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    covariance / (var_x.sqrt() * var_y.sqrt())
}

/// Spearman rank correlation
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() {
        return f64::NAN;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

pub fn median<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut values: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn nan_to_zero(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}
