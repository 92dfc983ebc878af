/// In-memory catalogue provider
///
/// Serves users' lists and a catalogue from a JSON document. Used for offline
/// runs (`CATALOGUE_FIXTURE`) and integration tests.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::{
    error::AppResult,
    models::{dedup_by_id, FeatureField, Season, Title, TitleId, DEFAULT_FEATURE_FIELDS},
    services::providers::CatalogueProvider,
};

/// Shape of a fixture document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    /// Anime lists keyed by lowercase user name
    #[serde(default)]
    pub anime_lists: HashMap<String, Vec<Title>>,
    #[serde(default)]
    pub manga_lists: HashMap<String, Vec<Title>>,
    /// Every known anime; seasonal listings filter this
    #[serde(default)]
    pub catalogue: Vec<Title>,
    #[serde(default)]
    pub nsfw_tags: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    fixture: Fixture,
    feature_fields: Vec<FeatureField>,
}

impl FixtureProvider {
    pub fn new(fixture: Fixture) -> Self {
        let mut fixture = fixture;
        let prepare = |rows: &mut Vec<Title>| {
            for row in rows.iter_mut() {
                row.rebuild_features(&DEFAULT_FEATURE_FIELDS);
            }
        };
        prepare(&mut fixture.catalogue);
        fixture.anime_lists.values_mut().for_each(prepare);
        fixture.manga_lists.values_mut().for_each(prepare);
        fixture.anime_lists = fixture
            .anime_lists
            .into_iter()
            .map(|(user, rows)| (user.to_lowercase(), rows))
            .collect();
        fixture.manga_lists = fixture
            .manga_lists
            .into_iter()
            .map(|(user, rows)| (user.to_lowercase(), rows))
            .collect();

        Self {
            fixture,
            feature_fields: DEFAULT_FEATURE_FIELDS.to_vec(),
        }
    }

    /// Loads a fixture document from disk
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let fixture: Fixture = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.as_ref().display(),
            titles = fixture.catalogue.len(),
            users = fixture.anime_lists.len(),
            "Loaded catalogue fixture"
        );
        Ok(Self::new(fixture))
    }

    fn list(lists: &HashMap<String, Vec<Title>>, user: &str) -> Option<Vec<Title>> {
        if user.trim().is_empty() {
            return None;
        }
        lists.get(&user.to_lowercase()).cloned()
    }
}

#[async_trait::async_trait]
impl CatalogueProvider for FixtureProvider {
    async fn get_user_anime_list(&self, user: &str) -> AppResult<Option<Vec<Title>>> {
        Ok(Self::list(&self.fixture.anime_lists, user))
    }

    async fn get_user_manga_list(&self, user: &str) -> AppResult<Option<Vec<Title>>> {
        Ok(Self::list(&self.fixture.manga_lists, user))
    }

    async fn get_seasonal_anime_list(
        &self,
        year: Option<i32>,
        season: Option<Season>,
    ) -> AppResult<Option<Vec<Title>>> {
        let Some(year) = year else {
            return Ok(None);
        };
        let rows: Vec<Title> = self
            .fixture
            .catalogue
            .iter()
            .filter(|row| row.season_year == Some(year))
            .filter(|row| season.is_none() || row.season == season)
            .cloned()
            .collect();
        Ok(Some(dedup_by_id(rows)))
    }

    /// Prequels of `id` plus the titles that continue it
    async fn get_related_anime(&self, id: Option<TitleId>) -> AppResult<Option<Vec<TitleId>>> {
        let Some(id) = id else {
            return Ok(None);
        };
        let Some(title) = self.fixture.catalogue.iter().find(|row| row.id == id) else {
            return Ok(None);
        };

        let mut related: Vec<TitleId> = title.continuation_to.clone();
        related.extend(
            self.fixture
                .catalogue
                .iter()
                .filter(|row| row.continuation_to.contains(&id))
                .map(|row| row.id),
        );
        related.sort_unstable();
        related.dedup();
        Ok(Some(related))
    }

    async fn get_nsfw_tags(&self) -> AppResult<HashSet<String>> {
        Ok(self.fixture.nsfw_tags.clone())
    }

    async fn get_genres(&self) -> AppResult<BTreeSet<String>> {
        Ok(self
            .fixture
            .catalogue
            .iter()
            .flat_map(|row| row.genres.iter().cloned())
            .collect())
    }

    fn get_feature_fields(&self) -> Vec<FeatureField> {
        self.feature_fields.clone()
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> FixtureProvider {
        let mut spring = Title::new(1, "Spring Show");
        spring.season_year = Some(2024);
        spring.season = Some(Season::Spring);
        spring.genres = vec!["Action".into()];
        let mut fall = Title::new(2, "Fall Show");
        fall.season_year = Some(2024);
        fall.season = Some(Season::Fall);
        fall.genres = vec!["Drama".into()];
        fall.continuation_to = vec![1];

        let mut entry = Title::new(1, "Spring Show");
        entry.score = Some(8.0);

        FixtureProvider::new(Fixture {
            anime_lists: HashMap::from([("Kira".to_string(), vec![entry])]),
            manga_lists: HashMap::new(),
            catalogue: vec![spring, fall],
            nsfw_tags: HashSet::from(["Nudity".to_string()]),
        })
    }

    #[test]
    fn test_user_lists_ignore_case() {
        let provider = fixture();
        let list = tokio_test::block_on(provider.get_user_anime_list("KIRA")).unwrap();
        assert_eq!(list.map(|rows| rows.len()), Some(1));
        let missing = tokio_test::block_on(provider.get_user_manga_list("kira")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_seasonal_filters_year_and_season() {
        let provider = fixture();
        let year = tokio_test::block_on(provider.get_seasonal_anime_list(Some(2024), None))
            .unwrap()
            .unwrap();
        assert_eq!(year.len(), 2);

        let fall = tokio_test::block_on(provider.get_seasonal_anime_list(Some(2024), Some(Season::Fall)))
            .unwrap()
            .unwrap();
        assert_eq!(fall.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(fall[0].features, vec!["Drama"]);

        let none = tokio_test::block_on(provider.get_seasonal_anime_list(None, None)).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_related_goes_both_ways() {
        let provider = fixture();
        assert_eq!(
            tokio_test::block_on(provider.get_related_anime(Some(1))).unwrap(),
            Some(vec![2])
        );
        assert_eq!(
            tokio_test::block_on(provider.get_related_anime(Some(2))).unwrap(),
            Some(vec![1])
        );
        assert_eq!(tokio_test::block_on(provider.get_related_anime(Some(99))).unwrap(), None);
    }

    #[test]
    fn test_genres_sorted() {
        let provider = fixture();
        let genres = tokio_test::block_on(provider.get_genres()).unwrap();
        assert_eq!(genres.into_iter().collect::<Vec<_>>(), vec!["Action", "Drama"]);
    }
}
