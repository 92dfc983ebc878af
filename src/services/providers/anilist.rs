/// AniList GraphQL provider
///
/// Fetches lists and catalogues from the public AniList API and normalises
/// media objects into [`Title`] rows:
/// - `ranks`: genres rank 75; tags keep their vote rank scaled by category
/// - `continuation_to`: prequel and parent anime
/// - `adaptation_of`: source or adapted manga and novels
///
/// Every call is read-through cached.
use chrono::NaiveDate;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use crate::{
    cached, cached_frame,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{
        FeatureField, Format, ReleaseStatus, Season, Title, TitleId, UserStatus,
        DEFAULT_FEATURE_FIELDS,
    },
    services::providers::CatalogueProvider,
};

const GENRE_RANK: f64 = 75.0;
const PAGE_SIZE: u32 = 50;
/// Guards against a provider that always reports another page
const MAX_PAGES: u32 = 40;

const MEDIA_FIELDS: &str = r#"
    id
    title { romaji english }
    type
    format
    status
    genres
    tags { name rank category isAdult }
    meanScore
    popularity
    duration
    episodes
    seasonYear
    season
    source
    isAdult
    coverImage { large }
    studios { nodes { name isAnimationStudio } }
    staff(perPage: 25) { edges { role node { id } } }
    relations { edges { relationType node { id type } } }
"#;

/// Cache lifetimes in seconds
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub user: u64,
    pub catalogue: u64,
    pub vocabulary: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            user: 86_400,
            catalogue: 604_800,
            vocabulary: 2_592_000,
        }
    }
}

#[derive(Clone)]
pub struct AniListProvider {
    http_client: HttpClient,
    api_url: String,
    cache: Cache,
    ttls: CacheTtls,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaTag {
    name: String,
    rank: Option<f64>,
    category: Option<String>,
    #[serde(default)]
    is_adult: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StudioNode {
    name: String,
    #[serde(default)]
    is_animation_studio: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct StudioConnection {
    #[serde(default)]
    nodes: Vec<StudioNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NodeId {
    id: TitleId,
    #[serde(rename = "type")]
    media_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StaffEdge {
    role: Option<String>,
    node: NodeId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct StaffConnection {
    #[serde(default)]
    edges: Vec<StaffEdge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RelationEdge {
    relation_type: Option<String>,
    node: NodeId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RelationConnection {
    #[serde(default)]
    edges: Vec<RelationEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CoverImage {
    large: Option<String>,
}

/// An AniList media object, as selected by `MEDIA_FIELDS`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Media {
    id: TitleId,
    #[serde(default)]
    title: MediaTitle,
    format: Option<Format>,
    status: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    tags: Vec<MediaTag>,
    mean_score: Option<f64>,
    popularity: Option<f64>,
    duration: Option<f64>,
    episodes: Option<f64>,
    season_year: Option<i32>,
    season: Option<String>,
    source: Option<String>,
    #[serde(default)]
    is_adult: bool,
    cover_image: Option<CoverImage>,
    #[serde(default)]
    studios: StudioConnection,
    #[serde(default)]
    staff: StaffConnection,
    #[serde(default)]
    relations: RelationConnection,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FuzzyDate {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListEntry {
    status: Option<String>,
    score: Option<f64>,
    completed_at: Option<FuzzyDate>,
    media: Media,
}

#[derive(Debug, Deserialize)]
struct ListGroup {
    #[serde(default)]
    entries: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListCollection {
    #[serde(default)]
    lists: Vec<ListGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListData {
    media_list_collection: Option<ListCollection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    page_info: PageInfo,
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PageData {
    page: Page,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaData {
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagDefinition {
    name: String,
    #[serde(default)]
    is_adult: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagData {
    media_tag_collection: Vec<TagDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GenreData {
    genre_collection: Vec<String>,
}

/// Salience multiplier for a tag category such as `Theme-Comedy` or `Cast-Main Cast`
fn tag_multiplier(category: Option<&str>) -> f64 {
    let group = category.and_then(|c| c.split('-').next()).unwrap_or("");
    match group {
        "Theme" | "Setting" | "Demographic" => 1.5,
        "Cast" | "Technical" | "Sexual Content" => 0.5,
        _ => 1.0,
    }
}

fn release_status(status: Option<&str>) -> Option<ReleaseStatus> {
    match status? {
        "FINISHED" => Some(ReleaseStatus::Finished),
        "RELEASING" | "HIATUS" => Some(ReleaseStatus::Releasing),
        "NOT_YET_RELEASED" => Some(ReleaseStatus::NotYetReleased),
        "CANCELLED" => Some(ReleaseStatus::Cancelled),
        _ => None,
    }
}

fn user_status(status: Option<&str>) -> Option<UserStatus> {
    match status? {
        "CURRENT" | "REPEATING" => Some(UserStatus::Watching),
        "COMPLETED" => Some(UserStatus::Completed),
        "PAUSED" => Some(UserStatus::Paused),
        "DROPPED" => Some(UserStatus::Dropped),
        "PLANNING" => Some(UserStatus::Planning),
        _ => None,
    }
}

/// Normalises a media object into a title row
pub(crate) fn media_to_title(media: Media, feature_fields: &[FeatureField]) -> Title {
    let mut title = Title::new(
        media.id,
        media
            .title
            .english
            .or(media.title.romaji)
            .unwrap_or_default(),
    );

    title.format = media.format;
    title.status = release_status(media.status.as_deref());
    title.mean_score = media.mean_score;
    title.popularity = media.popularity;
    title.duration = media.duration;
    title.episodes = media.episodes;
    title.season_year = media.season_year;
    title.season = media.season.and_then(|s| s.parse::<Season>().ok());
    title.source = media.source.map(|s| s.to_lowercase());
    title.cover_image = media.cover_image.and_then(|c| c.large);

    for genre in &media.genres {
        title.ranks.insert(genre.clone(), GENRE_RANK);
    }
    title.genres = media.genres;

    for tag in media.tags {
        let rank = tag.rank.unwrap_or(0.0) * tag_multiplier(tag.category.as_deref());
        title.ranks.insert(tag.name.clone(), rank.clamp(0.0, 100.0));
        title.tags.push(tag.name);
    }

    title.studios = media
        .studios
        .nodes
        .into_iter()
        .filter(|studio| studio.is_animation_studio)
        .map(|studio| studio.name)
        .collect();

    title.directors = media
        .staff
        .edges
        .into_iter()
        .filter(|edge| edge.role.as_deref().is_some_and(|r| r.starts_with("Director")))
        .map(|edge| edge.node.id.to_string())
        .collect();

    for edge in media.relations.edges {
        let media_type = edge.node.media_type.as_deref();
        match (edge.relation_type.as_deref(), media_type) {
            (Some("PREQUEL") | Some("PARENT"), Some("ANIME")) => {
                title.continuation_to.push(edge.node.id)
            }
            (Some("SOURCE") | Some("ADAPTATION"), Some("MANGA")) => {
                title.adaptation_of.push(edge.node.id)
            }
            _ => {}
        }
    }

    title.rebuild_features(feature_fields);
    title
}

/// Normalises a list entry; a zero score means unscored
pub(crate) fn entry_to_title(entry: ListEntry, feature_fields: &[FeatureField]) -> Title {
    let status = user_status(entry.status.as_deref());
    let score = entry.score.filter(|s| *s > 0.0);
    let completed = entry.completed_at.and_then(|date| {
        NaiveDate::from_ymd_opt(date.year?, date.month?, date.day?)
    });

    let mut title = media_to_title(entry.media, feature_fields);
    title.user_status = status;
    title.score = score;
    title.user_complete_date = completed;
    title
}

impl AniListProvider {
    pub fn new(
        api_url: String,
        timeout: Duration,
        cache: Cache,
        ttls: CacheTtls,
    ) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_url,
            cache,
            ttls,
        })
    }

    /// Posts a GraphQL query. Timeouts and unknown resources yield `Ok(None)`.
    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> AppResult<Option<T>> {
        let response = match self
            .http_client
            .post(&self.api_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(error = %e, "AniList request timed out");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "AniList API returned status {}: {}",
                status, body
            )));
        }

        let body: GraphQlResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                tracing::warn!(error = %e, "AniList response timed out");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        for error in &body.errors {
            tracing::warn!(message = %error.message, "AniList reported an error");
        }

        Ok(body.data)
    }

    async fn fetch_user_list(&self, user: &str, media_type: &str) -> AppResult<Option<Vec<Title>>> {
        let query = format!(
            r#"query ($user: String, $type: MediaType) {{
                MediaListCollection(userName: $user, type: $type) {{
                    lists {{ entries {{
                        status
                        score(format: POINT_10)
                        completedAt {{ year month day }}
                        media {{ {} }}
                    }} }}
                }}
            }}"#,
            MEDIA_FIELDS
        );

        let data: Option<ListData> = self
            .query(&query, json!({ "user": user, "type": media_type }))
            .await?;
        let Some(collection) = data.and_then(|d| d.media_list_collection) else {
            return Ok(None);
        };

        let rows: Vec<Title> = collection
            .lists
            .into_iter()
            .flat_map(|group| group.entries)
            .map(|entry| entry_to_title(entry, &DEFAULT_FEATURE_FIELDS))
            .collect();

        tracing::info!(user = %user, media_type, count = rows.len(), "Fetched user list");
        Ok(Some(rows))
    }

    async fn fetch_seasonal(&self, year: i32, season: Option<Season>) -> AppResult<Option<Vec<Title>>> {
        let query = format!(
            r#"query ($page: Int, $perPage: Int, $year: Int, $season: MediaSeason) {{
                Page(page: $page, perPage: $perPage) {{
                    pageInfo {{ hasNextPage }}
                    media(seasonYear: $year, season: $season, type: ANIME, isAdult: false, sort: POPULARITY_DESC) {{
                        {}
                    }}
                }}
            }}"#,
            MEDIA_FIELDS
        );
        let season = season.map(|s| s.to_string().to_uppercase());

        let mut rows = Vec::new();
        for page in 1..=MAX_PAGES {
            let data: Option<PageData> = self
                .query(
                    &query,
                    json!({ "page": page, "perPage": PAGE_SIZE, "year": year, "season": season }),
                )
                .await?;
            let Some(data) = data else {
                return Ok(None);
            };

            rows.extend(
                data.page
                    .media
                    .into_iter()
                    .filter(|media| !media.is_adult)
                    .map(|media| media_to_title(media, &DEFAULT_FEATURE_FIELDS)),
            );

            if !data.page.page_info.has_next_page {
                break;
            }
        }

        tracing::info!(year, season = ?season, count = rows.len(), "Fetched seasonal catalogue");
        Ok(Some(rows))
    }

    async fn fetch_nsfw_tags(&self) -> AppResult<Option<HashSet<String>>> {
        let data: Option<TagData> = self
            .query("query { MediaTagCollection { name isAdult } }", json!({}))
            .await?;
        Ok(data.map(|d| {
            d.media_tag_collection
                .into_iter()
                .filter(|tag| tag.is_adult)
                .map(|tag| tag.name)
                .collect()
        }))
    }

    async fn fetch_genres(&self) -> AppResult<Option<BTreeSet<String>>> {
        let data: Option<GenreData> = self.query("query { GenreCollection }", json!({})).await?;
        Ok(data.map(|d| d.genre_collection.into_iter().collect()))
    }
}

#[async_trait::async_trait]
impl CatalogueProvider for AniListProvider {
    async fn get_user_anime_list(&self, user: &str) -> AppResult<Option<Vec<Title>>> {
        if user.trim().is_empty() {
            return Ok(None);
        }
        cached_frame!(
            self.cache,
            CacheKey::AnimeList(user.to_string()),
            self.ttls.user,
            self.fetch_user_list(user, "ANIME")
        )
    }

    async fn get_user_manga_list(&self, user: &str) -> AppResult<Option<Vec<Title>>> {
        if user.trim().is_empty() {
            return Ok(None);
        }
        cached_frame!(
            self.cache,
            CacheKey::MangaList(user.to_string()),
            self.ttls.user,
            self.fetch_user_list(user, "MANGA")
        )
    }

    async fn get_seasonal_anime_list(
        &self,
        year: Option<i32>,
        season: Option<Season>,
    ) -> AppResult<Option<Vec<Title>>> {
        let Some(year) = year else {
            return Ok(None);
        };
        cached_frame!(
            self.cache,
            CacheKey::Seasonal { year, season },
            self.ttls.catalogue,
            self.fetch_seasonal(year, season)
        )
    }

    async fn get_related_anime(&self, id: Option<TitleId>) -> AppResult<Option<Vec<TitleId>>> {
        let Some(id) = id else {
            return Ok(None);
        };
        cached!(self.cache, CacheKey::Related(id), self.ttls.catalogue, async {
            let data: Option<MediaData> = self
                .query(
                    "query ($id: Int) { Media(id: $id) { relations { edges { relationType node { id type } } } } }",
                    json!({ "id": id }),
                )
                .await?;
            Ok::<_, AppError>(data.and_then(|d| d.media).map(|media| {
                media
                    .relations
                    .edges
                    .into_iter()
                    .filter(|edge| edge.node.media_type.as_deref() == Some("ANIME"))
                    .map(|edge| edge.node.id)
                    .collect::<Vec<TitleId>>()
            }))
        })
    }

    async fn get_nsfw_tags(&self) -> AppResult<HashSet<String>> {
        let tags: AppResult<Option<HashSet<String>>> = cached!(
            self.cache,
            CacheKey::NsfwTags,
            self.ttls.vocabulary,
            self.fetch_nsfw_tags()
        );
        Ok(tags?.unwrap_or_default())
    }

    async fn get_genres(&self) -> AppResult<BTreeSet<String>> {
        let genres: AppResult<Option<BTreeSet<String>>> = cached!(
            self.cache,
            CacheKey::Genres,
            self.ttls.vocabulary,
            self.fetch_genres()
        );
        Ok(genres?.unwrap_or_default())
    }

    fn get_feature_fields(&self) -> Vec<FeatureField> {
        DEFAULT_FEATURE_FIELDS.to_vec()
    }

    async fn refresh_vocabulary(&self) -> AppResult<()> {
        if let Some(tags) = self.fetch_nsfw_tags().await? {
            self.cache
                .set_json(&CacheKey::NsfwTags, &tags, self.ttls.vocabulary)
                .await;
        }
        if let Some(genres) = self.fetch_genres().await? {
            self.cache
                .set_json(&CacheKey::Genres, &genres, self.ttls.vocabulary)
                .await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "anilist"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_json() -> serde_json::Value {
        json!({
            "id": 20,
            "title": { "romaji": "Shingeki no Kyojin", "english": "Attack on Titan" },
            "type": "ANIME",
            "format": "TV",
            "status": "FINISHED",
            "genres": ["Action", "Drama"],
            "tags": [
                { "name": "Military", "rank": 80, "category": "Setting-Universe", "isAdult": false },
                { "name": "Male Protagonist", "rank": 90, "category": "Cast-Main Cast", "isAdult": false },
                { "name": "Gore", "rank": 70, "category": "Theme-Other", "isAdult": false },
                { "name": "Survival", "rank": 60, "category": "Theme-Other", "isAdult": false }
            ],
            "meanScore": 85,
            "popularity": 900000,
            "duration": 24,
            "episodes": 25,
            "seasonYear": 2013,
            "season": "SPRING",
            "source": "MANGA",
            "isAdult": false,
            "coverImage": { "large": "https://img/20.jpg" },
            "studios": { "nodes": [
                { "name": "Wit Studio", "isAnimationStudio": true },
                { "name": "Pony Canyon", "isAnimationStudio": false }
            ] },
            "staff": { "edges": [
                { "role": "Director", "node": { "id": 101 } },
                { "role": "Episode Director (ep 3)", "node": { "id": 102 } },
                { "role": "Original Creator", "node": { "id": 103 } }
            ] },
            "relations": { "edges": [
                { "relationType": "SOURCE", "node": { "id": 53390, "type": "MANGA" } },
                { "relationType": "PREQUEL", "node": { "id": 19, "type": "ANIME" } },
                { "relationType": "SEQUEL", "node": { "id": 21, "type": "ANIME" } }
            ] }
        })
    }

    fn media() -> Media {
        serde_json::from_value(media_json()).unwrap()
    }

    #[test]
    fn test_media_to_title_basic_fields() {
        let title = media_to_title(media(), &DEFAULT_FEATURE_FIELDS);
        assert_eq!(title.id, 20);
        assert_eq!(title.title, "Attack on Titan");
        assert_eq!(title.format, Some(Format::Tv));
        assert_eq!(title.status, Some(ReleaseStatus::Finished));
        assert_eq!(title.season, Some(Season::Spring));
        assert_eq!(title.source.as_deref(), Some("manga"));
        assert_eq!(title.cover_image.as_deref(), Some("https://img/20.jpg"));
        assert_eq!(title.studios, vec!["Wit Studio"]);
        assert_eq!(title.directors, vec!["101"]);
    }

    #[test]
    fn test_media_ranks_scale_by_tag_category() {
        let title = media_to_title(media(), &DEFAULT_FEATURE_FIELDS);
        assert_eq!(title.rank_of("Action"), 75.0);
        assert_eq!(title.rank_of("Military"), 100.0);
        assert_eq!(title.rank_of("Male Protagonist"), 45.0);
        assert_eq!(title.rank_of("Gore"), 100.0);
        assert_eq!(title.rank_of("Survival"), 90.0);
    }

    #[test]
    fn test_media_relations() {
        let title = media_to_title(media(), &DEFAULT_FEATURE_FIELDS);
        assert_eq!(title.continuation_to, vec![19]);
        assert_eq!(title.adaptation_of, vec![53390]);
    }

    #[test]
    fn test_media_features_are_sorted_union() {
        let title = media_to_title(media(), &DEFAULT_FEATURE_FIELDS);
        assert_eq!(
            title.features,
            vec!["Action", "Drama", "Gore", "Male Protagonist", "Military", "Survival"]
        );
    }

    #[test]
    fn test_entry_zero_score_is_null() {
        let entry: ListEntry = serde_json::from_value(json!({
            "status": "REPEATING",
            "score": 0,
            "completedAt": { "year": 2023, "month": 4, "day": null },
            "media": media_json()
        }))
        .unwrap();
        let title = entry_to_title(entry, &DEFAULT_FEATURE_FIELDS);
        assert_eq!(title.user_status, Some(UserStatus::Watching));
        assert_eq!(title.score, None);
        assert_eq!(title.user_complete_date, None);
    }

    #[test]
    fn test_entry_completed_date() {
        let entry: ListEntry = serde_json::from_value(json!({
            "status": "COMPLETED",
            "score": 9,
            "completedAt": { "year": 2023, "month": 4, "day": 2 },
            "media": media_json()
        }))
        .unwrap();
        let title = entry_to_title(entry, &DEFAULT_FEATURE_FIELDS);
        assert_eq!(title.user_status, Some(UserStatus::Completed));
        assert_eq!(title.score, Some(9.0));
        assert_eq!(title.user_complete_date, NaiveDate::from_ymd_opt(2023, 4, 2));
    }

    #[test]
    fn test_unknown_statuses_are_none() {
        assert_eq!(user_status(Some("UNKNOWN")), None);
        assert_eq!(release_status(None), None);
        assert_eq!(release_status(Some("HIATUS")), Some(ReleaseStatus::Releasing));
    }

    #[tokio::test]
    async fn test_null_parameters_return_none() {
        let provider = AniListProvider::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(1),
            Cache::in_memory(),
            CacheTtls::default(),
        )
        .unwrap();
        assert_eq!(provider.get_user_anime_list("  ").await.unwrap(), None);
        assert_eq!(provider.get_seasonal_anime_list(None, None).await.unwrap(), None);
        assert_eq!(provider.get_related_anime(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cached_frame_skips_network() {
        let cache = Cache::in_memory();
        let rows = vec![Title::new(7, "Cached")];
        cache
            .set_dataframe(&CacheKey::AnimeList("kira".to_string()), &rows, 60)
            .await;

        let provider = AniListProvider::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(1),
            cache,
            CacheTtls::default(),
        )
        .unwrap();
        assert_eq!(provider.get_user_anime_list("Kira").await.unwrap(), Some(rows));
    }
}
