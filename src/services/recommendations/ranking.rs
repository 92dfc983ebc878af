use std::collections::HashMap;

use crate::models::{CategoryResult, TitleId};

use super::{
    categories::{Category, Selection, SortKey, SortValue},
    clock::CurrentSeason,
    scorers::RankedFrame,
};

/// Added to a title's diversity adjustment each time a category shows it
pub const DIVERSITY_STEP: f64 = 0.25;
pub const DISCOURAGE_MAX: f64 = 0.75;

/// A category and how many of its rows to show. Diversity-adjusted
/// categories ignore `top_n` and show every row they select.
pub struct CategoryRule {
    pub category: Box<dyn Category>,
    pub top_n: usize,
}

impl CategoryRule {
    pub fn new(category: impl Category + 'static, top_n: usize) -> Self {
        Self {
            category: Box::new(category),
            top_n,
        }
    }
}

/// Applies category rules in order, discouraging titles that were already shown
pub struct RankingOrchestrator {
    rules: Vec<CategoryRule>,
}

impl RankingOrchestrator {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Emits one result per rule with at least one row.
    ///
    /// On return, `final_score` holds `recommend_score` minus each title's
    /// adjustment and `discourage_score` holds `1 - adjustment`.
    pub fn rank(&self, frame: &mut RankedFrame, season: CurrentSeason) -> Vec<CategoryResult> {
        let mut adjustment: HashMap<TitleId, f64> = HashMap::new();
        let mut results = Vec::new();

        for rule in &self.rules {
            let Some(selection) = rule.category.categorize(frame, season) else {
                tracing::debug!(category = rule.category.kind(), "Category skipped");
                continue;
            };

            let rows = if rule.category.diversity_adjusted() {
                adjusted_order(frame, &selection, &adjustment)
            } else {
                let mut rows = selection.ordered_rows(frame);
                rows.truncate(rule.top_n);
                rows
            };

            let items: Vec<TitleId> = rows.into_iter().map(|row| frame.rows[row].id).collect();

            for id in &items {
                let value = adjustment.entry(*id).or_insert(0.0);
                *value = (*value + DIVERSITY_STEP).min(DISCOURAGE_MAX);
            }

            tracing::debug!(
                category = rule.category.kind(),
                name = %selection.name,
                items = items.len(),
                "Category ranked"
            );

            if items.is_empty() {
                continue;
            }
            results.push(CategoryResult {
                name: selection.name,
                items,
            });
        }

        for row in 0..frame.len() {
            let value = adjustment.get(&frame.rows[row].id).copied().unwrap_or(0.0);
            frame.final_score[row] = frame.recommend_score[row] - value;
            frame.discourage_score[row] = 1.0 - value;
        }

        results
    }
}

/// Masked rows ordered by `recommend_score - adjustment`, falling back to the
/// selection's own order on ties
fn adjusted_order(
    frame: &RankedFrame,
    selection: &Selection,
    adjustment: &HashMap<TitleId, f64>,
) -> Vec<usize> {
    let keys: Vec<f64> = (0..frame.len())
        .map(|row| {
            frame.recommend_score[row]
                - adjustment.get(&frame.rows[row].id).copied().unwrap_or(0.0)
        })
        .collect();
    let key = SortKey::desc(SortValue::Values(keys));

    let mut rows = selection.ordered_rows(frame);
    rows.sort_by(|&a, &b| key.compare(frame, a, b));
    rows
}
