use chrono::NaiveDate;

use crate::models::{Title, TitleId};

use super::stats::{
    mean_score_default, weight_categoricals, weight_categoricals_correlation, CorrelationTable,
    Exploded, ListColumn,
};

/// Source medium assumed when the user has scored nothing
pub const DEFAULT_FAVOURITE_SOURCE: &str = "manga";

/// How many recently liked titles are kept
pub const LAST_LIKED_LIMIT: usize = 10;

/// A recently completed title the user scored at or above their mean
#[derive(Debug, Clone, PartialEq)]
pub struct LikedTitle {
    pub id: TitleId,
    pub title: String,
    pub completed_on: NaiveDate,
}

/// Taste summary derived from the watchlist alone
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub genre_correlations: Option<CorrelationTable>,
    pub studio_correlations: Option<CorrelationTable>,
    pub director_correlations: Option<CorrelationTable>,
    pub last_liked: Vec<LikedTitle>,
    pub favourite_source: String,
    /// Mean of the user's present scores
    pub mean_score: Option<f64>,
}

impl UserProfile {
    /// Builds the profile. Without a watchlist or without any score, the
    /// correlation tables stay `None`.
    pub fn from_watchlist(watchlist: Option<&[Title]>) -> Self {
        let watchlist = match watchlist {
            Some(rows) if !rows.is_empty() => rows,
            _ => {
                return Self {
                    favourite_source: DEFAULT_FAVOURITE_SOURCE.to_string(),
                    ..Default::default()
                }
            }
        };

        let has_scores = watchlist.iter().any(|row| row.score.is_some());
        let correlate = |column: ListColumn| {
            has_scores.then(|| weight_categoricals_correlation(&Exploded::from_rows(watchlist, column)))
        };

        let mean_score = has_scores.then(|| mean_score_default(watchlist.iter().map(|r| r.score), 0.0));

        let profile = Self {
            genre_correlations: correlate(ListColumn::Genres),
            studio_correlations: correlate(ListColumn::Studios),
            director_correlations: correlate(ListColumn::Directors),
            last_liked: last_liked(watchlist, mean_score),
            favourite_source: favourite_source(watchlist),
            mean_score,
        };

        tracing::debug!(
            genres = profile.genre_correlations.as_ref().map_or(0, |t| t.len()),
            studios = profile.studio_correlations.as_ref().map_or(0, |t| t.len()),
            directors = profile.director_correlations.as_ref().map_or(0, |t| t.len()),
            last_liked = profile.last_liked.len(),
            favourite_source = %profile.favourite_source,
            "User profile built"
        );

        profile
    }

    /// Name of the n-th most positively correlated genre
    pub fn nth_genre(&self, n: usize) -> Option<&str> {
        self.genre_correlations
            .as_ref()
            .and_then(|table| table.nth(n))
            .map(|w| w.name.as_str())
    }
}

fn last_liked(watchlist: &[Title], mean_score: Option<f64>) -> Vec<LikedTitle> {
    let Some(mean) = mean_score else {
        return Vec::new();
    };

    let mut liked: Vec<LikedTitle> = watchlist
        .iter()
        .filter(|row| row.score.is_some_and(|s| s >= mean))
        .filter_map(|row| {
            row.user_complete_date.map(|date| LikedTitle {
                id: row.id,
                title: row.title.clone(),
                completed_on: date,
            })
        })
        .collect();

    // Stable sort keeps watchlist order among same-day completions
    liked.sort_by(|a, b| b.completed_on.cmp(&a.completed_on));
    liked.truncate(LAST_LIKED_LIMIT);
    liked
}

/// Source with the highest `mean(score) * sqrt(count)`
fn favourite_source(watchlist: &[Title]) -> String {
    let weights = weight_categoricals(&Exploded::from_rows(watchlist, ListColumn::Source));
    weights
        .into_iter()
        .fold(None, |best: Option<(String, f64)>, w| match best {
            Some((_, best_weight)) if best_weight >= w.weight => best,
            _ => Some((w.name, w.weight)),
        })
        .map(|(name, _)| name)
        .unwrap_or_else(|| DEFAULT_FAVOURITE_SOURCE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserStatus;

    fn entry(id: TitleId, genres: &[&str], score: Option<f64>, source: &str) -> Title {
        let mut title = Title::new(id, format!("show {}", id));
        title.genres = genres.iter().map(|g| g.to_string()).collect();
        title.score = score;
        title.source = Some(source.to_string());
        title.user_status = Some(UserStatus::Completed);
        title
    }

    #[test]
    fn test_missing_watchlist_gives_null_tables() {
        let profile = UserProfile::from_watchlist(None);
        assert!(profile.genre_correlations.is_none());
        assert!(profile.studio_correlations.is_none());
        assert_eq!(profile.favourite_source, DEFAULT_FAVOURITE_SOURCE);
    }

    #[test]
    fn test_unscored_watchlist_gives_null_tables() {
        let rows = vec![entry(1, &["Action"], None, "original")];
        let profile = UserProfile::from_watchlist(Some(&rows));
        assert!(profile.genre_correlations.is_none());
        assert!(profile.mean_score.is_none());
        assert_eq!(profile.favourite_source, DEFAULT_FAVOURITE_SOURCE);
    }

    #[test]
    fn test_top_genre_is_best_scored() {
        let rows = vec![
            entry(1, &["Action"], Some(9.0), "manga"),
            entry(2, &["Action"], Some(8.0), "manga"),
            entry(3, &["Drama"], Some(3.0), "original"),
            entry(4, &["Drama"], Some(4.0), "original"),
        ];
        let profile = UserProfile::from_watchlist(Some(&rows));
        assert_eq!(profile.nth_genre(0), Some("Action"));
        assert_eq!(profile.nth_genre(1), Some("Drama"));
        assert_eq!(profile.nth_genre(2), None);
        assert_eq!(profile.mean_score, Some(6.0));
    }

    #[test]
    fn test_favourite_source_weights_by_count() {
        let rows = vec![
            entry(1, &[], Some(7.0), "manga"),
            entry(2, &[], Some(7.0), "manga"),
            entry(3, &[], Some(7.0), "manga"),
            entry(4, &[], Some(9.0), "light_novel"),
        ];
        let profile = UserProfile::from_watchlist(Some(&rows));
        // 7 * sqrt(3) > 9 * sqrt(1)
        assert_eq!(profile.favourite_source, "manga");
    }

    #[test]
    fn test_last_liked_recent_and_above_mean() {
        let mut rows = Vec::new();
        for (id, score, day) in [(1, 9.0, 1), (2, 3.0, 2), (3, 8.0, 3), (4, 10.0, 0)] {
            let mut row = entry(id, &["Action"], Some(score), "manga");
            if day > 0 {
                row.user_complete_date = NaiveDate::from_ymd_opt(2024, 1, day);
            }
            rows.push(row);
        }
        // mean = 7.5; id 4 has no completion date, id 2 is below the mean
        let profile = UserProfile::from_watchlist(Some(&rows));
        let ids: Vec<TitleId> = profile.last_liked.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_last_liked_capped() {
        let rows: Vec<Title> = (1..=15)
            .map(|id| {
                let mut row = entry(id, &[], Some(8.0), "manga");
                row.user_complete_date = NaiveDate::from_ymd_opt(2024, 2, id as u32);
                row
            })
            .collect();
        let profile = UserProfile::from_watchlist(Some(&rows));
        assert_eq!(profile.last_liked.len(), LAST_LIKED_LIMIT);
        assert_eq!(profile.last_liked[0].id, 15);
    }
}
