use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Format, ReleaseStatus, Season, Title, TitleId, UserStatus};
use crate::error::{AppError, AppResult};

/// Columnar snapshot of a list of titles.
///
/// This is the persisted layout of cached frames: one array per column, all of
/// equal length. `ranks` keys are kept sorted by the `BTreeMap`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TitleFrame {
    pub id: Vec<TitleId>,
    pub title: Vec<String>,
    pub format: Vec<Option<Format>>,
    pub status: Vec<Option<ReleaseStatus>>,
    pub genres: Vec<Vec<String>>,
    pub tags: Vec<Vec<String>>,
    pub features: Vec<Vec<String>>,
    pub ranks: Vec<BTreeMap<String, f64>>,
    pub mean_score: Vec<Option<f64>>,
    pub popularity: Vec<Option<f64>>,
    pub duration: Vec<Option<f64>>,
    pub episodes: Vec<Option<f64>>,
    pub season_year: Vec<Option<i32>>,
    pub season: Vec<Option<Season>>,
    pub source: Vec<Option<String>>,
    pub rating: Vec<Option<f64>>,
    pub cover_image: Vec<Option<String>>,
    pub studios: Vec<Vec<String>>,
    pub directors: Vec<Vec<String>>,
    pub continuation_to: Vec<Vec<TitleId>>,
    pub adaptation_of: Vec<Vec<TitleId>>,
    pub user_status: Vec<Option<UserStatus>>,
    pub score: Vec<Option<f64>>,
    pub user_complete_date: Vec<Option<NaiveDate>>,
}

impl TitleFrame {
    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    fn column_lengths(&self) -> [usize; 24] {
        [
            self.id.len(),
            self.title.len(),
            self.format.len(),
            self.status.len(),
            self.genres.len(),
            self.tags.len(),
            self.features.len(),
            self.ranks.len(),
            self.mean_score.len(),
            self.popularity.len(),
            self.duration.len(),
            self.episodes.len(),
            self.season_year.len(),
            self.season.len(),
            self.source.len(),
            self.rating.len(),
            self.cover_image.len(),
            self.studios.len(),
            self.directors.len(),
            self.continuation_to.len(),
            self.adaptation_of.len(),
            self.user_status.len(),
            self.score.len(),
            self.user_complete_date.len(),
        ]
    }

    /// Converts back to rows. Fails when column lengths disagree.
    pub fn into_rows(self) -> AppResult<Vec<Title>> {
        let n = self.len();
        if self.column_lengths().iter().any(|&len| len != n) {
            return Err(AppError::Internal(
                "Frame columns have mismatched lengths".to_string(),
            ));
        }

        let mut title = self.title.into_iter();
        let mut format = self.format.into_iter();
        let mut status = self.status.into_iter();
        let mut genres = self.genres.into_iter();
        let mut tags = self.tags.into_iter();
        let mut features = self.features.into_iter();
        let mut ranks = self.ranks.into_iter();
        let mut mean_score = self.mean_score.into_iter();
        let mut popularity = self.popularity.into_iter();
        let mut duration = self.duration.into_iter();
        let mut episodes = self.episodes.into_iter();
        let mut season_year = self.season_year.into_iter();
        let mut season = self.season.into_iter();
        let mut source = self.source.into_iter();
        let mut rating = self.rating.into_iter();
        let mut cover_image = self.cover_image.into_iter();
        let mut studios = self.studios.into_iter();
        let mut directors = self.directors.into_iter();
        let mut continuation_to = self.continuation_to.into_iter();
        let mut adaptation_of = self.adaptation_of.into_iter();
        let mut user_status = self.user_status.into_iter();
        let mut score = self.score.into_iter();
        let mut user_complete_date = self.user_complete_date.into_iter();

        // Lengths were checked above, so every `next()` yields a value.
        let rows = self
            .id
            .into_iter()
            .map(|id| Title {
                id,
                title: title.next().unwrap_or_default(),
                format: format.next().flatten(),
                status: status.next().flatten(),
                genres: genres.next().unwrap_or_default(),
                tags: tags.next().unwrap_or_default(),
                features: features.next().unwrap_or_default(),
                ranks: ranks.next().unwrap_or_default(),
                mean_score: mean_score.next().flatten(),
                popularity: popularity.next().flatten(),
                duration: duration.next().flatten(),
                episodes: episodes.next().flatten(),
                season_year: season_year.next().flatten(),
                season: season.next().flatten(),
                source: source.next().flatten(),
                rating: rating.next().flatten(),
                cover_image: cover_image.next().flatten(),
                studios: studios.next().unwrap_or_default(),
                directors: directors.next().unwrap_or_default(),
                continuation_to: continuation_to.next().unwrap_or_default(),
                adaptation_of: adaptation_of.next().unwrap_or_default(),
                user_status: user_status.next().flatten(),
                score: score.next().flatten(),
                user_complete_date: user_complete_date.next().flatten(),
            })
            .collect();

        Ok(rows)
    }
}

impl From<&[Title]> for TitleFrame {
    fn from(rows: &[Title]) -> Self {
        let mut frame = TitleFrame::default();
        for row in rows {
            frame.id.push(row.id);
            frame.title.push(row.title.clone());
            frame.format.push(row.format);
            frame.status.push(row.status);
            frame.genres.push(row.genres.clone());
            frame.tags.push(row.tags.clone());
            frame.features.push(row.features.clone());
            frame.ranks.push(row.ranks.clone());
            frame.mean_score.push(row.mean_score);
            frame.popularity.push(row.popularity);
            frame.duration.push(row.duration);
            frame.episodes.push(row.episodes);
            frame.season_year.push(row.season_year);
            frame.season.push(row.season);
            frame.source.push(row.source.clone());
            frame.rating.push(row.rating);
            frame.cover_image.push(row.cover_image.clone());
            frame.studios.push(row.studios.clone());
            frame.directors.push(row.directors.clone());
            frame.continuation_to.push(row.continuation_to.clone());
            frame.adaptation_of.push(row.adaptation_of.clone());
            frame.user_status.push(row.user_status);
            frame.score.push(row.score);
            frame.user_complete_date.push(row.user_complete_date);
        }
        frame
    }
}
