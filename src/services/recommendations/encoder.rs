use ndarray::Array2;
use std::collections::HashMap;

use crate::{
    error::{AppError, AppResult},
    models::Title,
};

use super::Metric;

/// Turns title feature sets into fixed-length numeric vectors.
///
/// Every encoded row has one entry per fitted class, so vectors from
/// different frames encoded by the same encoder are comparable.
pub trait Encoder: Send + Sync {
    /// Fits the vocabulary. Classes are sorted and deduplicated.
    fn fit(&mut self, classes: Vec<String>);

    /// Encodes rows into a `rows x classes` matrix
    fn encode(&self, rows: &[Title]) -> AppResult<Array2<f64>>;

    fn classes(&self) -> &[String];

    fn is_fit(&self) -> bool;

    /// Distance metric suited to this encoding
    fn metric(&self) -> Metric;
}

/// Builds the right encoder for a similarity metric
pub fn encoder_for(metric: Metric) -> Box<dyn Encoder> {
    match metric {
        Metric::Jaccard => Box::new(BooleanEncoder::default()),
        Metric::Cosine => Box::new(WeightedEncoder::default()),
    }
}

#[derive(Debug, Clone, Default)]
struct Vocabulary {
    classes: Vec<String>,
    index: HashMap<String, usize>,
    fit: bool,
}

impl Vocabulary {
    fn fit(&mut self, mut classes: Vec<String>) {
        classes.sort();
        classes.dedup();
        self.index = classes
            .iter()
            .enumerate()
            .map(|(i, class)| (class.clone(), i))
            .collect();
        self.classes = classes;
        self.fit = true;
    }

    fn ensure_fit(&self) -> AppResult<()> {
        if self.fit {
            Ok(())
        } else {
            Err(AppError::Usage(
                "Encoder must be fit before encode".to_string(),
            ))
        }
    }
}

/// One-hot encoding: 1.0 where the title has the class
#[derive(Debug, Clone, Default)]
pub struct BooleanEncoder {
    vocabulary: Vocabulary,
}

impl Encoder for BooleanEncoder {
    fn fit(&mut self, classes: Vec<String>) {
        self.vocabulary.fit(classes);
    }

    fn encode(&self, rows: &[Title]) -> AppResult<Array2<f64>> {
        self.vocabulary.ensure_fit()?;
        let mut encoded = Array2::zeros((rows.len(), self.vocabulary.classes.len()));
        for (r, row) in rows.iter().enumerate() {
            for feature in &row.features {
                if let Some(&c) = self.vocabulary.index.get(feature) {
                    encoded[[r, c]] = 1.0;
                }
            }
        }
        Ok(encoded)
    }

    fn classes(&self) -> &[String] {
        &self.vocabulary.classes
    }

    fn is_fit(&self) -> bool {
        self.vocabulary.fit
    }

    fn metric(&self) -> Metric {
        Metric::Jaccard
    }
}

/// Rank-valued encoding: the title's salience for each class, 0.0 when absent
#[derive(Debug, Clone, Default)]
pub struct WeightedEncoder {
    vocabulary: Vocabulary,
}

impl Encoder for WeightedEncoder {
    fn fit(&mut self, classes: Vec<String>) {
        self.vocabulary.fit(classes);
    }

    fn encode(&self, rows: &[Title]) -> AppResult<Array2<f64>> {
        self.vocabulary.ensure_fit()?;
        let mut encoded = Array2::zeros((rows.len(), self.vocabulary.classes.len()));
        for (r, row) in rows.iter().enumerate() {
            for (feature, &rank) in &row.ranks {
                if !rank.is_finite() {
                    continue;
                }
                if let Some(&c) = self.vocabulary.index.get(feature) {
                    encoded[[r, c]] = rank;
                }
            }
        }
        Ok(encoded)
    }

    fn classes(&self) -> &[String] {
        &self.vocabulary.classes
    }

    fn is_fit(&self) -> bool {
        self.vocabulary.fit
    }

    fn metric(&self) -> Metric {
        Metric::Cosine
    }
}
