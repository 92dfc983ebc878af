use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

pub mod frame;
pub mod view;

pub use frame::TitleFrame;
pub use view::{CategoryResult, RecommendationData, RecommendationEnvelope, ShowView};

/// Stable identifier of a title within one catalogue provider
pub type TitleId = i64;

/// Media format of a title
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Format {
    Tv,
    Movie,
    Ova,
    Ona,
    Special,
    TvShort,
    Manga,
    OneShot,
    Novel,
    Music,
}

impl Format {
    /// Presentation order used by categories: series first, shorts and music last
    pub fn preference(self) -> u8 {
        match self {
            Format::Tv => 0,
            Format::Movie => 1,
            Format::Ona => 2,
            Format::Ova => 3,
            Format::Special => 4,
            Format::TvShort => 5,
            Format::Music => 6,
            Format::Manga => 7,
            Format::OneShot => 8,
            Format::Novel => 9,
        }
    }
}

/// Format preference for an optional format; unknown formats sort last
pub fn format_preference(format: Option<Format>) -> u8 {
    format.map(Format::preference).unwrap_or(10)
}

/// Airing status of a title
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Releasing,
    Finished,
    NotYetReleased,
    Cancelled,
}

/// Airing season. Ordered by calendar position within a year.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    /// Season containing the given calendar month (1-12)
    pub fn from_month(month: u32) -> Self {
        match month {
            1..=3 => Season::Winter,
            4..=6 => Season::Spring,
            7..=9 => Season::Summer,
            _ => Season::Fall,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn all() -> [Season; 4] {
        [Season::Winter, Season::Spring, Season::Summer, Season::Fall]
    }
}

impl Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Season {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "fall" | "autumn" => Ok(Season::Fall),
            other => Err(format!("unknown season '{}'", other)),
        }
    }
}

/// A user's relationship with a title on their list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Completed,
    Watching,
    Paused,
    Dropped,
    Planning,
}

/// Column of a title that contributes to its feature set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FeatureField {
    Genres,
    Tags,
    Studios,
}

/// The default feature columns: genres and tags
pub const DEFAULT_FEATURE_FIELDS: [FeatureField; 2] = [FeatureField::Genres, FeatureField::Tags];

/// One row of any title frame: watchlist, manga list or seasonal catalogue.
///
/// The user columns (`user_status`, `score`, `user_complete_date`) are set on
/// list entries, and on seasonal rows after they are joined against the watchlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Title {
    pub id: TitleId,
    pub title: String,
    pub format: Option<Format>,
    pub status: Option<ReleaseStatus>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sorted, deduplicated union of the feature columns
    #[serde(default)]
    pub features: Vec<String>,
    /// Feature salience in [0, 100]; absent features rank 0
    #[serde(default)]
    pub ranks: BTreeMap<String, f64>,
    pub mean_score: Option<f64>,
    pub popularity: Option<f64>,
    pub duration: Option<f64>,
    pub episodes: Option<f64>,
    pub season_year: Option<i32>,
    pub season: Option<Season>,
    pub source: Option<String>,
    pub rating: Option<f64>,
    pub cover_image: Option<String>,
    #[serde(default)]
    pub studios: Vec<String>,
    #[serde(default)]
    pub directors: Vec<String>,
    /// Ids of the titles this one directly continues
    #[serde(default)]
    pub continuation_to: Vec<TitleId>,
    /// Ids of the manga this title adapts
    #[serde(default)]
    pub adaptation_of: Vec<TitleId>,
    pub user_status: Option<UserStatus>,
    pub score: Option<f64>,
    pub user_complete_date: Option<NaiveDate>,
}

impl Title {
    pub fn new(id: TitleId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            ..Default::default()
        }
    }

    /// Recomputes `features` from the given columns
    pub fn rebuild_features(&mut self, fields: &[FeatureField]) {
        let mut features: Vec<String> = fields
            .iter()
            .flat_map(|field| self.field_values(*field).iter().cloned())
            .filter(|value| !value.is_empty())
            .collect();
        features.sort();
        features.dedup();
        self.features = features;
    }

    /// Values of a categorical list column
    pub fn field_values(&self, field: FeatureField) -> &[String] {
        match field {
            FeatureField::Genres => &self.genres,
            FeatureField::Tags => &self.tags,
            FeatureField::Studios => &self.studios,
        }
    }

    /// Salience of a feature for this title
    pub fn rank_of(&self, feature: &str) -> f64 {
        self.ranks.get(feature).copied().unwrap_or(0.0)
    }

    /// Up to `n` features ordered by salience, then name
    pub fn top_features(&self, n: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, f64)> = self
            .features
            .iter()
            .map(|feature| (feature, self.rank_of(feature)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.into_iter().take(n).map(|(f, _)| f.clone()).collect()
    }

    /// Whether the user dropped or paused this title
    pub fn dropped_or_paused(&self) -> bool {
        matches!(
            self.user_status,
            Some(UserStatus::Dropped) | Some(UserStatus::Paused)
        )
    }
}

/// Keeps the first occurrence of each id, preserving order
pub fn dedup_by_id(rows: Vec<Title>) -> Vec<Title> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter().filter(|row| seen.insert(row.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_from_month() {
        assert_eq!(Season::from_month(1), Season::Winter);
        assert_eq!(Season::from_month(3), Season::Winter);
        assert_eq!(Season::from_month(4), Season::Spring);
        assert_eq!(Season::from_month(9), Season::Summer);
        assert_eq!(Season::from_month(10), Season::Fall);
        assert_eq!(Season::from_month(12), Season::Fall);
    }

    #[test]
    fn test_season_ordering() {
        assert!(Season::Winter < Season::Spring);
        assert!(Season::Summer < Season::Fall);
    }

    #[test]
    fn test_season_parse() {
        assert_eq!("WINTER".parse::<Season>().unwrap(), Season::Winter);
        assert_eq!("autumn".parse::<Season>().unwrap(), Season::Fall);
        assert!("monsoon".parse::<Season>().is_err());
    }

    #[test]
    fn test_format_serde() {
        let json = serde_json::to_string(&Format::TvShort).unwrap();
        assert_eq!(json, "\"TV_SHORT\"");
        let format: Format = serde_json::from_str("\"ONE_SHOT\"").unwrap();
        assert_eq!(format, Format::OneShot);
    }

    #[test]
    fn test_release_status_serde() {
        let json = serde_json::to_string(&ReleaseStatus::NotYetReleased).unwrap();
        assert_eq!(json, "\"not_yet_released\"");
    }

    #[test]
    fn test_format_preference_puts_tv_first() {
        assert!(Format::Tv.preference() < Format::Movie.preference());
        assert!(Format::Movie.preference() < Format::Music.preference());
        assert_eq!(format_preference(None), 10);
    }

    #[test]
    fn test_rebuild_features_sorted_union() {
        let mut title = Title::new(1, "Frieren");
        title.genres = vec!["Fantasy".to_string(), "Adventure".to_string()];
        title.tags = vec!["Elf".to_string(), "Fantasy".to_string(), String::new()];
        title.rebuild_features(&DEFAULT_FEATURE_FIELDS);
        assert_eq!(title.features, vec!["Adventure", "Elf", "Fantasy"]);
    }

    #[test]
    fn test_top_features_by_rank() {
        let mut title = Title::new(1, "Frieren");
        title.features = vec!["Adventure".into(), "Elf".into(), "Fantasy".into()];
        title.ranks.insert("Elf".into(), 90.0);
        title.ranks.insert("Fantasy".into(), 75.0);
        title.ranks.insert("Adventure".into(), 75.0);
        assert_eq!(title.top_features(2), vec!["Elf", "Adventure"]);
    }

    #[test]
    fn test_dedup_by_id_keeps_first() {
        let rows = vec![Title::new(1, "a"), Title::new(2, "b"), Title::new(1, "c")];
        let deduped = dedup_by_id(rows);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].title, "a");
    }
}
