use ndarray::{Array2, ArrayView1, ArrayView2};
use std::{collections::HashMap, str::FromStr};

use crate::models::TitleId;

/// Pairwise distance used for similarity and clustering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Over boolean encodings
    Jaccard,
    /// Over weighted encodings
    Cosine,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jaccard" => Ok(Metric::Jaccard),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

impl Metric {
    /// Similarity in [0, 1]. Zero vectors share no evidence and score 0.
    pub fn similarity(self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let value = match self {
            Metric::Jaccard => {
                let mut intersection = 0usize;
                let mut union = 0usize;
                for (x, y) in a.iter().zip(b.iter()) {
                    let x = *x > 0.0;
                    let y = *y > 0.0;
                    if x && y {
                        intersection += 1;
                    }
                    if x || y {
                        union += 1;
                    }
                }
                if union == 0 {
                    0.0
                } else {
                    intersection as f64 / union as f64
                }
            }
            Metric::Cosine => {
                let dot = a.dot(&b);
                let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
                if norm == 0.0 {
                    0.0
                } else {
                    dot / norm
                }
            }
        };
        value.clamp(0.0, 1.0)
    }

    pub fn distance(self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        1.0 - self.similarity(a, b)
    }
}

/// `left x right` similarity between the rows of two encoded matrices
pub fn pairwise_similarity(metric: Metric, left: ArrayView2<f64>, right: ArrayView2<f64>) -> Array2<f64> {
    let mut matrix = Array2::zeros((left.nrows(), right.nrows()));
    for (i, a) in left.rows().into_iter().enumerate() {
        for (j, b) in right.rows().into_iter().enumerate() {
            matrix[[i, j]] = metric.similarity(a, b);
        }
    }
    matrix
}

/// Similarity of every watchlist title (rows) to every seasonal title (columns)
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    watchlist_ids: Vec<TitleId>,
    seasonal_ids: Vec<TitleId>,
    watchlist_index: HashMap<TitleId, usize>,
    values: Array2<f64>,
}

impl SimilarityMatrix {
    pub fn new(watchlist_ids: Vec<TitleId>, seasonal_ids: Vec<TitleId>, values: Array2<f64>) -> Self {
        debug_assert_eq!(values.dim(), (watchlist_ids.len(), seasonal_ids.len()));
        let watchlist_index = watchlist_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        Self {
            watchlist_ids,
            seasonal_ids,
            watchlist_index,
            values,
        }
    }

    pub fn compute(
        metric: Metric,
        watchlist_ids: Vec<TitleId>,
        watchlist_encoded: ArrayView2<f64>,
        seasonal_ids: Vec<TitleId>,
        seasonal_encoded: ArrayView2<f64>,
    ) -> Self {
        let values = pairwise_similarity(metric, watchlist_encoded, seasonal_encoded);
        Self::new(watchlist_ids, seasonal_ids, values)
    }

    pub fn values(&self) -> ArrayView2<f64> {
        self.values.view()
    }

    pub fn watchlist_ids(&self) -> &[TitleId] {
        &self.watchlist_ids
    }

    pub fn seasonal_ids(&self) -> &[TitleId] {
        &self.seasonal_ids
    }

    /// Similarity of one watchlist title to every seasonal title
    pub fn for_watchlist_title(&self, id: TitleId) -> Option<ArrayView1<f64>> {
        self.watchlist_index
            .get(&id)
            .map(|&row| self.values.row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_jaccard() {
        let a = array![1.0, 1.0, 0.0];
        let b = array![1.0, 0.0, 1.0];
        assert!((Metric::Jaccard.similarity(a.view(), b.view()) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(Metric::Jaccard.similarity(a.view(), a.view()), 1.0);
    }

    #[test]
    fn test_cosine_identical_and_zero() {
        let a = array![30.0, 0.0, 75.0];
        let zero = array![0.0, 0.0, 0.0];
        assert!((Metric::Cosine.similarity(a.view(), a.view()) - 1.0).abs() < 1e-12);
        assert_eq!(Metric::Cosine.similarity(a.view(), zero.view()), 0.0);
    }

    #[test]
    fn test_matrix_bounds_and_diagonal() {
        let encoded = array![[1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
        for metric in [Metric::Jaccard, Metric::Cosine] {
            let matrix = SimilarityMatrix::compute(
                metric,
                vec![1, 2, 3],
                encoded.view(),
                vec![1, 2, 3],
                encoded.view(),
            );
            assert!(matrix.values().iter().all(|v| (0.0..=1.0).contains(v)));
            for i in 0..3 {
                assert!((matrix.values()[[i, i]] - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_row_lookup_by_watchlist_id() {
        let matrix = SimilarityMatrix::new(vec![10, 20], vec![5], array![[0.2], [0.7]]);
        assert_eq!(matrix.for_watchlist_title(20).unwrap().to_vec(), vec![0.7]);
        assert!(matrix.for_watchlist_title(99).is_none());
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("Cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
