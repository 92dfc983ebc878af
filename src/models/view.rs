use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Format, ReleaseStatus, Season, Title, TitleId};

/// Response body of the recommendations endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationEnvelope {
    pub data: RecommendationData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationData {
    pub shows: Vec<ShowView>,
    pub categories: Vec<CategoryResult>,
    /// Sorted genre and tag names present in the catalogue, NSFW tags excluded
    pub tags: Vec<String>,
}

/// A named presentation group of title ids
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryResult {
    pub name: String,
    pub items: Vec<TitleId>,
}

/// One seasonal title as shown to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowView {
    pub id: TitleId,
    pub title: String,
    pub cover_image: Option<String>,
    pub format: Option<Format>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub status: Option<ReleaseStatus>,
    pub season_year: Option<i32>,
    pub season: Option<Season>,
    /// The title's most salient features, joined for display
    pub highlights: Vec<String>,
    /// Every scorer column, present only in debug mode
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub debug_scores: Option<BTreeMap<String, Option<f64>>>,
}

impl ShowView {
    pub fn from_title(title: &Title, nsfw_tags: &std::collections::HashSet<String>) -> Self {
        Self {
            id: title.id,
            title: title.title.clone(),
            cover_image: title.cover_image.clone(),
            format: title.format,
            genres: title.genres.clone(),
            tags: title
                .tags
                .iter()
                .filter(|tag| !nsfw_tags.contains(*tag))
                .cloned()
                .collect(),
            status: title.status,
            season_year: title.season_year,
            season: title.season,
            highlights: title
                .top_features(3)
                .into_iter()
                .filter(|feature| !nsfw_tags.contains(feature))
                .collect(),
            debug_scores: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_show_view_hides_nsfw_tags() {
        let mut title = Title::new(3, "Show");
        title.tags = vec!["Nudity".into(), "Isekai".into()];
        title.features = vec!["Isekai".into(), "Nudity".into()];
        title.ranks.insert("Nudity".into(), 90.0);
        title.ranks.insert("Isekai".into(), 80.0);
        let nsfw: HashSet<String> = ["Nudity".to_string()].into_iter().collect();

        let view = ShowView::from_title(&title, &nsfw);
        assert_eq!(view.tags, vec!["Isekai"]);
        assert_eq!(view.highlights, vec!["Isekai"]);
    }

    #[test]
    fn test_debug_scores_flattened() {
        let mut view = ShowView::from_title(&Title::new(1, "A"), &HashSet::new());
        let mut scores = BTreeMap::new();
        scores.insert("directscore".to_string(), Some(0.5));
        view.debug_scores = Some(scores);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["directscore"], 0.5);
    }

    #[test]
    fn test_debug_scores_omitted_by_default() {
        let view = ShowView::from_title(&Title::new(1, "A"), &HashSet::new());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("directscore").is_none());
    }
}
