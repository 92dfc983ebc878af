//! Personalised seasonal recommendations.
//!
//! A request fetches the user's lists and the seasonal catalogue concurrently,
//! then runs the CPU-bound pipeline without yielding:
//! fit (encode, cluster, similarity) → score → rank.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::{
    error::{AppError, AppResult},
    models::{
        CategoryResult, FeatureField, RecommendationData, RecommendationEnvelope, Season, ShowView,
        Title, TitleId,
    },
    services::providers::CatalogueProvider,
};

pub mod categories;
pub mod clock;
pub mod clustering;
pub mod dataset;
pub mod encoder;
pub mod profile;
pub mod ranking;
pub mod scorers;
pub mod similarity;
pub mod stats;

pub use clock::{Clock, CurrentSeason, FixedClock, SystemClock};
pub use dataset::{PipelineSettings, RecommendationDataset};
pub use ranking::{CategoryRule, RankingOrchestrator};
pub use scorers::{RankedFrame, ScoringEnsemble};
pub use similarity::Metric;

use categories::{
    Adaptation, BecauseYouLiked, ContinueWatching, DebugListing, Genre, MostPopular, Planning,
    Simulcasts, Source, Studio, TopUpcoming, YourTopPicks,
};

const BECAUSE_YOU_LIKED_CATEGORIES: usize = 3;
const GENRE_CATEGORIES: usize = 5;

/// One recommendation request
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub user: String,
    pub year: i32,
    /// `None` ranks the whole year
    pub season: Option<Season>,
    /// Adds every score column to the shows and a category listing all rows
    pub debug: bool,
}

/// Category rules in presentation order.
///
/// Simulcasts only make sense when ranking the current year.
pub fn default_plan(include_simulcasts: bool, debug: bool) -> RankingOrchestrator {
    let mut rules = vec![CategoryRule::new(ContinueWatching, 20)];
    if include_simulcasts {
        rules.push(CategoryRule::new(Simulcasts, 30));
    }
    rules.push(CategoryRule::new(YourTopPicks, 30));
    rules.extend((0..BECAUSE_YOU_LIKED_CATEGORIES).map(|n| CategoryRule::new(BecauseYouLiked::new(n), 20)));
    rules.extend((0..GENRE_CATEGORIES).map(|n| CategoryRule::new(Genre::new(n), 20)));
    rules.extend([
        CategoryRule::new(Source, 20),
        CategoryRule::new(Studio, 20),
        CategoryRule::new(Adaptation, 20),
        CategoryRule::new(TopUpcoming, 20),
        CategoryRule::new(MostPopular, 30),
        CategoryRule::new(Planning, 20),
    ]);
    if debug {
        rules.push(CategoryRule::new(DebugListing, usize::MAX));
    }
    RankingOrchestrator::new(rules)
}

/// Inputs of the synchronous pipeline, gathered by the I/O stage
pub struct PipelineInput {
    pub watchlist: Option<Vec<Title>>,
    pub seasonal: Option<Vec<Title>>,
    pub mangalist: Option<Vec<Title>>,
    pub nsfw_tags: HashSet<String>,
    pub feature_fields: Vec<FeatureField>,
}

/// Builds, fits, scores and ranks a dataset, then renders the response
pub fn run_pipeline(
    input: PipelineInput,
    settings: PipelineSettings,
    plan: &RankingOrchestrator,
    season: CurrentSeason,
    debug: bool,
) -> AppResult<RecommendationEnvelope> {
    let start = Instant::now();
    let mut dataset = RecommendationDataset::new(
        input.watchlist,
        input.seasonal,
        input.mangalist,
        input.nsfw_tags,
        &input.feature_fields,
        settings,
    )?;
    dataset.fit()?;

    let mut frame = ScoringEnsemble::default().score(&dataset);
    let categories = plan.rank(&mut frame, season);

    tracing::info!(
        seasonal = frame.len(),
        categories = categories.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Pipeline finished"
    );

    Ok(render(&frame, categories, &dataset.nsfw_tags, debug))
}

/// Shows referenced by any category, best first, plus the tag vocabulary
fn render(
    frame: &RankedFrame,
    categories: Vec<CategoryResult>,
    nsfw_tags: &HashSet<String>,
    debug: bool,
) -> RecommendationEnvelope {
    let referenced: HashSet<TitleId> = categories
        .iter()
        .flat_map(|category| category.items.iter().copied())
        .collect();

    let mut rows: Vec<usize> = (0..frame.len())
        .filter(|&row| referenced.contains(&frame.rows[row].id))
        .collect();
    rows.sort_by(|&a, &b| {
        frame.recommend_score[b]
            .partial_cmp(&frame.recommend_score[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let shows = rows
        .into_iter()
        .map(|row| {
            let mut show = ShowView::from_title(&frame.rows[row], nsfw_tags);
            if debug {
                show.debug_scores = Some(frame.debug_scores(row));
            }
            show
        })
        .collect();

    let tags: BTreeSet<String> = frame
        .rows
        .iter()
        .flat_map(|row| row.features.iter())
        .filter(|feature| !nsfw_tags.contains(*feature))
        .cloned()
        .collect();

    RecommendationEnvelope {
        data: RecommendationData {
            shows,
            categories,
            tags: tags.into_iter().collect(),
        },
    }
}

/// Request-level orchestration over a catalogue provider
#[derive(Clone)]
pub struct Recommender {
    provider: Arc<dyn CatalogueProvider>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl Recommender {
    pub fn new(
        provider: Arc<dyn CatalogueProvider>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            provider,
            clock,
            settings,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn provider(&self) -> &dyn CatalogueProvider {
        self.provider.as_ref()
    }

    pub async fn recommend(&self, request: RecommendationRequest) -> AppResult<RecommendationEnvelope> {
        let start = Instant::now();

        let (watchlist, mangalist, seasonal) = tokio::join!(
            self.provider.get_user_anime_list(&request.user),
            self.provider.get_user_manga_list(&request.user),
            self.provider.get_seasonal_anime_list(Some(request.year), request.season),
        );

        let watchlist = watchlist.unwrap_or_else(|e| {
            tracing::error!(user = %request.user, error = %e, "Watchlist fetch failed");
            None
        });
        let seasonal = seasonal.unwrap_or_else(|e| {
            tracing::error!(year = request.year, error = %e, "Seasonal catalogue fetch failed");
            None
        });
        let mangalist = mangalist.unwrap_or_else(|e| {
            tracing::warn!(user = %request.user, error = %e, "Manga list fetch failed, continuing without it");
            None
        });

        dataset::validate(watchlist.as_deref(), seasonal.as_deref())?;

        let nsfw_tags = self.provider.get_nsfw_tags().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "NSFW tag fetch failed");
            HashSet::new()
        });

        tracing::info!(
            user = %request.user,
            watchlist = watchlist.as_ref().map_or(0, Vec::len),
            seasonal = seasonal.as_ref().map_or(0, Vec::len),
            mangalist = mangalist.as_ref().map(Vec::len),
            fetch_ms = start.elapsed().as_millis() as u64,
            "Fetched recommendation inputs"
        );

        let input = PipelineInput {
            watchlist,
            seasonal,
            mangalist,
            nsfw_tags,
            feature_fields: self.provider.get_feature_fields(),
        };
        let current = self.clock.current_season();
        let plan = default_plan(request.year == current.year, request.debug);
        let settings = self.settings;
        let debug = request.debug;

        tokio::task::spawn_blocking(move || run_pipeline(input, settings, &plan, current, debug))
            .await
            .map_err(|e| AppError::Internal(format!("Pipeline task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Format, ReleaseStatus, UserStatus, DEFAULT_FEATURE_FIELDS};
    use crate::services::providers::MockCatalogueProvider;
    use chrono::NaiveDate;

    fn anime(id: TitleId, genres: &[&str], tags: &[&str]) -> Title {
        let mut title = Title::new(id, format!("Anime {}", id));
        title.format = Some(Format::Tv);
        title.genres = genres.iter().map(|g| g.to_string()).collect();
        title.tags = tags.iter().map(|t| t.to_string()).collect();
        for genre in &title.genres {
            title.ranks.insert(genre.clone(), 75.0);
        }
        for tag in &title.tags {
            title.ranks.insert(tag.clone(), 50.0);
        }
        title.episodes = Some(12.0);
        title.duration = Some(24.0);
        title
    }

    fn watchlist() -> Vec<Title> {
        let mut rows = vec![
            anime(1, &["Action", "Adventure"], &["Shounen"]),
            anime(2, &["Action"], &["Super Power"]),
            anime(3, &["Romance", "Drama"], &["School"]),
            anime(4, &["Comedy"], &["School"]),
        ];
        for (row, (score, status, day)) in rows.iter_mut().zip([
            (9.0, UserStatus::Completed, 10),
            (8.0, UserStatus::Completed, 12),
            (3.0, UserStatus::Dropped, 0),
            (6.0, UserStatus::Completed, 5),
        ]) {
            row.score = Some(score);
            row.user_status = Some(status);
            if day > 0 {
                row.user_complete_date = NaiveDate::from_ymd_opt(2024, 3, day);
            }
        }
        rows
    }

    fn seasonal() -> Vec<Title> {
        let mut sequel = anime(10, &["Action", "Adventure"], &["Shounen"]);
        sequel.continuation_to = vec![1];
        sequel.status = Some(ReleaseStatus::Releasing);
        sequel.popularity = Some(50_000.0);

        let mut fresh = anime(11, &["Action"], &["Super Power", "Nudity"]);
        fresh.status = Some(ReleaseStatus::Releasing);
        fresh.popularity = Some(20_000.0);

        let mut romance = anime(12, &["Romance"], &["School"]);
        romance.status = Some(ReleaseStatus::Finished);
        romance.popularity = Some(80_000.0);

        let mut upcoming = anime(13, &["Action"], &[]);
        upcoming.status = Some(ReleaseStatus::NotYetReleased);
        upcoming.season_year = Some(2024);
        upcoming.season = Some(Season::Fall);

        for row in [&mut sequel, &mut fresh, &mut romance] {
            row.season_year = Some(2024);
            row.season = Some(Season::Summer);
        }
        vec![sequel, fresh, romance, upcoming]
    }

    fn provider(watchlist: Option<Vec<Title>>) -> MockCatalogueProvider {
        let mut mock = MockCatalogueProvider::new();
        mock.expect_get_user_anime_list()
            .returning(move |_| Ok(watchlist.clone()));
        mock.expect_get_user_manga_list()
            .returning(|_| Err(AppError::ExternalApi("manga service down".to_string())));
        mock.expect_get_seasonal_anime_list()
            .returning(|_, _| Ok(Some(seasonal())));
        mock.expect_get_nsfw_tags()
            .returning(|| Ok(HashSet::from(["Nudity".to_string()])));
        mock.expect_get_feature_fields()
            .returning(|| DEFAULT_FEATURE_FIELDS.to_vec());
        mock
    }

    fn recommender(mock: MockCatalogueProvider) -> Recommender {
        Recommender::new(
            Arc::new(mock),
            Arc::new(FixedClock(NaiveDate::from_ymd_opt(2024, 7, 15).unwrap())),
            PipelineSettings::default(),
        )
    }

    fn request(debug: bool) -> RecommendationRequest {
        RecommendationRequest {
            user: "kira".to_string(),
            year: 2024,
            season: None,
            debug,
        }
    }

    #[tokio::test]
    async fn test_missing_watchlist_is_data_missing() {
        let result = recommender(provider(None)).recommend(request(false)).await;
        assert!(matches!(result, Err(AppError::DataMissing(ref msg)) if msg.contains("watchlist")));
    }

    #[tokio::test]
    async fn test_empty_watchlist_is_data_missing() {
        let result = recommender(provider(Some(vec![]))).recommend(request(false)).await;
        assert!(matches!(result, Err(AppError::DataMissing(_))));
    }

    #[tokio::test]
    async fn test_recommend_builds_envelope() {
        let envelope = recommender(provider(Some(watchlist())))
            .recommend(request(false))
            .await
            .unwrap();
        let data = envelope.data;

        let continue_watching = data
            .categories
            .iter()
            .find(|c| c.name == "Continue Watching")
            .unwrap();
        assert_eq!(continue_watching.items, vec![10]);

        let simulcasts = data.categories.iter().find(|c| c.name == "Simulcasts").unwrap();
        assert_eq!(simulcasts.items.len(), 3);

        let upcoming = data.categories.iter().find(|c| c.name == "Top Upcoming").unwrap();
        assert_eq!(upcoming.items, vec![13]);

        let shown: HashSet<TitleId> = data.shows.iter().map(|s| s.id).collect();
        for category in &data.categories {
            assert!(!category.items.is_empty());
            assert!(category.items.iter().all(|id| shown.contains(id)));
        }

        assert!(!data.tags.contains(&"Nudity".to_string()));
        assert!(data.tags.windows(2).all(|w| w[0] < w[1]));
        assert!(data.shows.iter().all(|s| s.debug_scores.is_none()));
        assert!(data.shows.iter().all(|s| !s.tags.contains(&"Nudity".to_string())));
    }

    #[tokio::test]
    async fn test_debug_mode_adds_scores() {
        let envelope = recommender(provider(Some(watchlist())))
            .recommend(request(true))
            .await
            .unwrap();
        let data = envelope.data;

        assert_eq!(data.categories.last().map(|c| c.name.as_str()), Some("Debug"));
        assert_eq!(data.shows.len(), 4);

        let scores: Vec<f64> = data
            .shows
            .iter()
            .map(|show| {
                let debug = show.debug_scores.as_ref().unwrap();
                assert!(debug.contains_key(scorers::CONTINUATION));
                assert!(debug.contains_key(scorers::DISCOURAGE_SCORE));
                debug[scorers::RECOMMEND_SCORE].unwrap()
            })
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_default_plan_simulcasts_only_for_current_year() {
        let kinds = |plan: &RankingOrchestrator| -> Vec<&'static str> {
            plan.rules().iter().map(|rule| rule.category.kind()).collect()
        };

        let current = default_plan(true, false);
        assert!(kinds(&current).contains(&"simulcasts"));
        assert_eq!(current.rules().len(), 17);

        let past = default_plan(false, true);
        assert!(!kinds(&past).contains(&"simulcasts"));
        assert_eq!(kinds(&past).last(), Some(&"debug"));
    }
}
