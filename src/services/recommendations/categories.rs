//! Presentation categories over the ranked seasonal frame.
//!
//! A category is a row predicate plus a sort order. Categories overlap freely;
//! the ranking orchestrator decides how many rows each one shows.

use std::cmp::Ordering;

use crate::models::{format_preference, Format, ReleaseStatus, UserStatus};

use super::{
    clock::CurrentSeason,
    scorers::{RankedFrame, ADAPTATION, CONTINUATION, POPULARITY, STUDIO},
};

/// What a sort key reads from a row
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    /// A named score column
    Score(&'static str),
    RecommendScore,
    FormatPreference,
    SeasonYear,
    Season,
    /// Precomputed values aligned with the frame rows
    Values(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub value: SortValue,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(value: SortValue) -> Self {
        Self {
            value,
            descending: false,
        }
    }

    pub fn desc(value: SortValue) -> Self {
        Self {
            value,
            descending: true,
        }
    }

    /// Row value; `None` sorts last in either direction
    pub fn read(&self, frame: &RankedFrame, row: usize) -> Option<f64> {
        let title = &frame.rows[row];
        match &self.value {
            SortValue::Score(name) => frame
                .column(name)
                .and_then(|values| values.get(row).copied().flatten()),
            SortValue::RecommendScore => frame.recommend_score.get(row).copied(),
            SortValue::FormatPreference => Some(format_preference(title.format) as f64),
            SortValue::SeasonYear => title.season_year.map(f64::from),
            SortValue::Season => title.season.map(|s| s.ordinal() as f64),
            SortValue::Values(values) => values.get(row).copied(),
        }
        .filter(|v| !v.is_nan())
    }

    pub fn compare(&self, frame: &RankedFrame, a: usize, b: usize) -> Ordering {
        match (self.read(frame, a), self.read(frame, b)) {
            (Some(x), Some(y)) => {
                let ordering = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                if self.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// A category's rows and order for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Display name
    pub name: String,
    pub mask: Vec<bool>,
    pub sort: Vec<SortKey>,
}

impl Selection {
    pub fn new(name: impl Into<String>, mask: Vec<bool>, sort: Vec<SortKey>) -> Self {
        Self {
            name: name.into(),
            mask,
            sort,
        }
    }

    /// Indices of masked rows in sort order. The sort is stable.
    pub fn ordered_rows(&self, frame: &RankedFrame) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(row, _)| row)
            .collect();
        rows.sort_by(|&a, &b| {
            self.sort
                .iter()
                .map(|key| key.compare(frame, a, b))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        rows
    }
}

pub trait Category: Send + Sync {
    /// Identifier used in logs
    fn kind(&self) -> &'static str;

    /// `None` when the category has nothing to show for this frame
    fn categorize(&self, frame: &RankedFrame, season: CurrentSeason) -> Option<Selection>;

    /// Whether rows are ordered by recommend score minus the accumulated diversity adjustment
    fn diversity_adjusted(&self) -> bool {
        false
    }
}

fn mask_rows<F>(frame: &RankedFrame, predicate: F) -> Vec<bool>
where
    F: Fn(usize) -> bool,
{
    (0..frame.len()).map(predicate).collect()
}

fn by_recommend_score() -> Vec<SortKey> {
    vec![SortKey::desc(SortValue::RecommendScore)]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MostPopular;

impl Category for MostPopular {
    fn kind(&self) -> &'static str {
        "most_popular"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        Some(Selection::new(
            "Most Popular",
            vec![true; frame.len()],
            vec![SortKey::desc(SortValue::Score(POPULARITY))],
        ))
    }
}

/// Titles airing this season
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulcasts;

impl Category for Simulcasts {
    fn kind(&self) -> &'static str {
        "simulcasts"
    }

    fn categorize(&self, frame: &RankedFrame, season: CurrentSeason) -> Option<Selection> {
        let mask = mask_rows(frame, |row| {
            let title = &frame.rows[row];
            title.season_year == Some(season.year) && title.season == Some(season.season)
        });
        Some(Selection::new("Simulcasts", mask, by_recommend_score()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContinueWatching;

impl Category for ContinueWatching {
    fn kind(&self) -> &'static str {
        "continue_watching"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        let mask = mask_rows(frame, |row| {
            let status = frame.rows[row].user_status;
            (frame.value(CONTINUATION, row) > 0.0 && status != Some(UserStatus::Completed))
                || status == Some(UserStatus::Paused)
        });
        Some(Selection::new(
            "Continue Watching",
            mask,
            vec![
                SortKey::asc(SortValue::FormatPreference),
                SortKey::desc(SortValue::RecommendScore),
            ],
        ))
    }
}

/// Anime adaptations of manga the user has read
#[derive(Debug, Clone, Copy, Default)]
pub struct Adaptation;

impl Category for Adaptation {
    fn kind(&self) -> &'static str {
        "adaptation"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        let mask = mask_rows(frame, |row| {
            frame.value(ADAPTATION, row) > 0.0
                && frame.rows[row].user_status != Some(UserStatus::Completed)
        });
        Some(Selection::new(
            "From Your Manga",
            mask,
            vec![
                SortKey::asc(SortValue::FormatPreference),
                SortKey::desc(SortValue::Score(ADAPTATION)),
            ],
        ))
    }
}

/// Unwatched series and films from the user's favourite source medium
#[derive(Debug, Clone, Copy, Default)]
pub struct Source;

impl Category for Source {
    fn kind(&self) -> &'static str {
        "source"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        let source = frame.profile.favourite_source.as_str();
        let mask = mask_rows(frame, |row| {
            let title = &frame.rows[row];
            title.user_status.is_none()
                && title.source.as_deref() == Some(source)
                && matches!(title.format, Some(Format::Tv) | Some(Format::Movie))
        });
        Some(Selection::new(
            format!("Based on a {}", source.replace('_', " ")),
            mask,
            by_recommend_score(),
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Studio;

impl Category for Studio {
    fn kind(&self) -> &'static str {
        "studio"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        frame.profile.studio_correlations.as_ref()?;
        let mask = mask_rows(frame, |row| frame.rows[row].user_status.is_none());
        Some(Selection::new(
            "From Studios You Like",
            mask,
            vec![
                SortKey::desc(SortValue::Score(STUDIO)),
                SortKey::asc(SortValue::FormatPreference),
                SortKey::desc(SortValue::RecommendScore),
            ],
        ))
    }
}

/// Titles in the user's n-th most positively correlated genre
#[derive(Debug, Clone, Copy)]
pub struct Genre {
    pub nth: usize,
}

impl Genre {
    pub fn new(nth: usize) -> Self {
        Self { nth }
    }
}

impl Category for Genre {
    fn kind(&self) -> &'static str {
        "genre"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        let genre = frame.profile.nth_genre(self.nth)?;
        let mask = mask_rows(frame, |row| {
            let title = &frame.rows[row];
            title.genres.iter().any(|g| g == genre)
                && !matches!(
                    title.user_status,
                    Some(UserStatus::Completed) | Some(UserStatus::Dropped)
                )
        });
        Some(Selection::new(genre.to_string(), mask, by_recommend_score()))
    }

    fn diversity_adjusted(&self) -> bool {
        true
    }
}

/// New titles the user has not started, excluding sequels
#[derive(Debug, Clone, Copy, Default)]
pub struct YourTopPicks;

impl Category for YourTopPicks {
    fn kind(&self) -> &'static str {
        "top_picks"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        let mask = mask_rows(frame, |row| {
            let title = &frame.rows[row];
            frame.value(CONTINUATION, row) == 0.0
                && matches!(title.user_status, None | Some(UserStatus::Planning))
                && matches!(
                    title.status,
                    Some(ReleaseStatus::Releasing) | Some(ReleaseStatus::Finished)
                )
        });
        Some(Selection::new("Your Top Picks", mask, by_recommend_score()))
    }
}

/// Announced titles airing after the current season
#[derive(Debug, Clone, Copy, Default)]
pub struct TopUpcoming;

impl Category for TopUpcoming {
    fn kind(&self) -> &'static str {
        "top_upcoming"
    }

    fn categorize(&self, frame: &RankedFrame, season: CurrentSeason) -> Option<Selection> {
        let mask = mask_rows(frame, |row| {
            let title = &frame.rows[row];
            title.status == Some(ReleaseStatus::NotYetReleased)
                && (title.season.is_some_and(|s| s > season.season)
                    || title.season_year.is_some_and(|y| y > season.year))
        });
        Some(Selection::new(
            "Top Upcoming",
            mask,
            vec![
                SortKey::asc(SortValue::SeasonYear),
                SortKey::asc(SortValue::Season),
                SortKey::desc(SortValue::RecommendScore),
            ],
        ))
    }
}

/// Titles most similar to the n-th most recently liked watchlist title
#[derive(Debug, Clone, Copy)]
pub struct BecauseYouLiked {
    pub nth: usize,
}

impl BecauseYouLiked {
    pub fn new(nth: usize) -> Self {
        Self { nth }
    }
}

impl Category for BecauseYouLiked {
    fn kind(&self) -> &'static str {
        "because_you_liked"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        let liked = frame.profile.last_liked.get(self.nth)?;
        let similarity = frame.similarity.as_ref()?.for_watchlist_title(liked.id)?;
        if similarity.len() != frame.len() {
            return None;
        }

        let mask = mask_rows(frame, |row| {
            let title = &frame.rows[row];
            title.id != liked.id
                && matches!(title.user_status, None | Some(UserStatus::Planning))
                && similarity[row] > 0.0
        });
        Some(Selection::new(
            format!("Because You Liked {}", liked.title),
            mask,
            vec![
                SortKey::desc(SortValue::Values(similarity.to_vec())),
                SortKey::desc(SortValue::RecommendScore),
            ],
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Planning;

impl Category for Planning {
    fn kind(&self) -> &'static str {
        "planning"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        let mask = mask_rows(frame, |row| {
            frame.rows[row].user_status == Some(UserStatus::Planning)
        });
        Some(Selection::new("On Your Planning List", mask, by_recommend_score()))
    }
}

/// Every row, for inspecting the raw ranking
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugListing;

impl Category for DebugListing {
    fn kind(&self) -> &'static str {
        "debug"
    }

    fn categorize(&self, frame: &RankedFrame, _: CurrentSeason) -> Option<Selection> {
        Some(Selection::new("Debug", vec![true; frame.len()], by_recommend_score()))
    }
}
