use ndarray::{Array2, ArrayView2, Axis};

use crate::{
    error::{AppError, AppResult},
    models::TitleId,
};

use super::similarity::{pairwise_similarity, Metric};

/// Label given to rows that cannot take part in clustering (zero vectors under cosine)
pub const UNCLUSTERED: i32 = -1;

/// How the distance between two clusters is derived from their members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Average,
    Complete,
}

impl Linkage {
    /// Average linkage for jaccard, complete linkage for cosine
    pub fn for_metric(metric: Metric) -> Self {
        match metric {
            Metric::Jaccard => Linkage::Average,
            Metric::Cosine => Linkage::Complete,
        }
    }

    /// Lance-Williams update for the distance from the merge of `a` and `b` to `k`
    fn merged_distance(self, d_ak: f64, d_bk: f64, size_a: usize, size_b: usize) -> f64 {
        match self {
            Linkage::Average => {
                (size_a as f64 * d_ak + size_b as f64 * d_bk) / (size_a + size_b) as f64
            }
            Linkage::Complete => d_ak.max(d_bk),
        }
    }
}

#[derive(Debug, Clone)]
struct FittedClusters {
    ids: Vec<TitleId>,
    encoded: Array2<f64>,
    labels: Vec<i32>,
    n_clusters: usize,
}

/// Agglomerative clustering of the watchlist with nearest-neighbour prediction
#[derive(Debug, Clone)]
pub struct ClusterModel {
    metric: Metric,
    linkage: Linkage,
    distance_threshold: f64,
    n_clusters: Option<usize>,
    fitted: Option<FittedClusters>,
}

impl ClusterModel {
    /// With `n_clusters = None` the merge process stops at `distance_threshold`
    pub fn new(metric: Metric, distance_threshold: f64, n_clusters: Option<usize>) -> Self {
        Self {
            metric,
            linkage: Linkage::for_metric(metric),
            distance_threshold,
            n_clusters,
            fitted: None,
        }
    }

    pub fn is_fit(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn n_clusters(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_clusters)
    }

    /// `(id, label)` for every fitted watchlist row
    pub fn clustered_series(&self) -> Option<Vec<(TitleId, i32)>> {
        self.fitted.as_ref().map(|fitted| {
            fitted
                .ids
                .iter()
                .copied()
                .zip(fitted.labels.iter().copied())
                .collect()
        })
    }

    /// Clusters the encoded rows and remembers the result.
    ///
    /// Returns `None` and stays unfit when no labels can be produced.
    pub fn cluster_by_features(&mut self, ids: &[TitleId], encoded: ArrayView2<f64>) -> Option<Vec<i32>> {
        if ids.len() != encoded.nrows() || ids.is_empty() {
            return None;
        }

        // Cosine is undefined for zero vectors; those rows sit out and come back as -1
        let included: Vec<usize> = (0..encoded.nrows())
            .filter(|&row| self.metric != Metric::Cosine || encoded.row(row).iter().any(|v| *v != 0.0))
            .collect();
        if included.is_empty() {
            tracing::warn!("No clusterable watchlist rows");
            return None;
        }

        let subset = encoded.select(Axis(0), &included);
        let fitted_labels = self.agglomerate(subset.view());

        let mut labels = vec![UNCLUSTERED; ids.len()];
        for (position, &row) in included.iter().enumerate() {
            labels[row] = fitted_labels[position];
        }

        let n_clusters = fitted_labels
            .iter()
            .copied()
            .max()
            .map(|max| max as usize + 1)
            .unwrap_or(0);

        tracing::debug!(
            rows = ids.len(),
            excluded = ids.len() - included.len(),
            n_clusters,
            "Watchlist clustered"
        );

        self.fitted = Some(FittedClusters {
            ids: ids.to_vec(),
            encoded: encoded.to_owned(),
            labels: labels.clone(),
            n_clusters,
        });

        Some(labels)
    }

    /// Assigns each new row the label of its most similar fitted row.
    ///
    /// `similarities` is `fitted rows x new rows`; computed from the stored
    /// encodings when not supplied. Rows with no positive similarity get -1.
    pub fn predict(&self, new_encoded: ArrayView2<f64>, similarities: Option<ArrayView2<f64>>) -> AppResult<Vec<i32>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| AppError::Usage("Cluster model must be fit before predict".to_string()))?;

        let computed;
        let similarities: ArrayView2<'_, f64> = match similarities {
            Some(s) => s.reborrow(),
            None => {
                computed = pairwise_similarity(self.metric, fitted.encoded.view(), new_encoded);
                computed.view()
            }
        };

        if similarities.nrows() != fitted.labels.len() || similarities.ncols() != new_encoded.nrows() {
            return Err(AppError::Usage(format!(
                "Similarity shape {:?} does not match {} fitted rows x {} new rows",
                similarities.dim(),
                fitted.labels.len(),
                new_encoded.nrows()
            )));
        }

        let labels = similarities
            .columns()
            .into_iter()
            .map(|column| {
                let mut best: Option<(usize, f64)> = None;
                for (row, &value) in column.iter().enumerate() {
                    if value > 0.0 && best.map_or(true, |(_, b)| value > b) {
                        best = Some((row, value));
                    }
                }
                best.map_or(UNCLUSTERED, |(row, _)| fitted.labels[row])
            })
            .collect();

        Ok(labels)
    }

    /// Nearest-neighbour chain over a full distance matrix.
    ///
    /// Average and complete linkage are reducible, so the chain finds the same
    /// dendrogram as greedy merging; cutting it keeps every merge below the
    /// threshold, or the `n - n_clusters` lowest merges.
    fn agglomerate(&self, encoded: ArrayView2<f64>) -> Vec<i32> {
        let n = encoded.nrows();
        if n == 1 {
            return vec![0];
        }

        let mut distance = pairwise_similarity(self.metric, encoded, encoded).mapv(|s| 1.0 - s);
        let mut size = vec![1usize; n];
        let mut active = vec![true; n];
        let mut merges: Vec<(usize, usize, f64)> = Vec::with_capacity(n - 1);
        let mut chain: Vec<usize> = Vec::with_capacity(n);

        for _ in 0..n - 1 {
            if chain.is_empty() {
                if let Some(start) = (0..n).find(|&i| active[i]) {
                    chain.push(start);
                }
            }

            let (a, b, d) = loop {
                let current = chain[chain.len() - 1];
                let previous = if chain.len() > 1 { Some(chain[chain.len() - 2]) } else { None };

                // Prefer the previous chain element on ties so the chain terminates
                let mut nearest = previous.map(|p| (p, distance[[current, p]]));
                for k in 0..n {
                    if !active[k] || k == current {
                        continue;
                    }
                    let d = distance[[current, k]];
                    if nearest.map_or(true, |(_, best)| d < best) {
                        nearest = Some((k, d));
                    }
                }

                let (next, d) = match nearest {
                    Some(found) => found,
                    None => break (current, current, f64::INFINITY),
                };
                if Some(next) == previous {
                    chain.pop();
                    chain.pop();
                    break (current, next, d);
                }
                chain.push(next);
            };

            if a == b {
                break;
            }

            for k in 0..n {
                if !active[k] || k == a || k == b {
                    continue;
                }
                let updated = self
                    .linkage
                    .merged_distance(distance[[a, k]], distance[[b, k]], size[a], size[b]);
                distance[[a, k]] = updated;
                distance[[k, a]] = updated;
            }
            size[a] += size[b];
            active[b] = false;
            merges.push((a, b, d));
        }

        let mut accepted: Vec<(usize, usize, f64)> = match self.n_clusters {
            Some(k) => {
                let mut sorted = merges;
                sorted.sort_by(|x, y| x.2.partial_cmp(&y.2).unwrap_or(std::cmp::Ordering::Equal));
                sorted.truncate(n.saturating_sub(k.max(1)));
                sorted
            }
            None => merges
                .into_iter()
                .filter(|(_, _, d)| *d < self.distance_threshold)
                .collect(),
        };
        accepted.sort_by(|x, y| x.2.partial_cmp(&y.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut parent: Vec<usize> = (0..n).collect();
        for (a, b, _) in accepted {
            let root_a = find_root(&mut parent, a);
            let root_b = find_root(&mut parent, b);
            if root_a != root_b {
                parent[root_b] = root_a;
            }
        }

        // Labels numbered by first appearance
        let mut label_of_root: std::collections::HashMap<usize, i32> = std::collections::HashMap::new();
        (0..n)
            .map(|i| {
                let root = find_root(&mut parent, i);
                let next = label_of_root.len() as i32;
                *label_of_root.entry(root).or_insert(next)
            })
            .collect()
    }
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}
