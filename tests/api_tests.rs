use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anirec_api::{
    api::{create_router, AppState},
    db::Cache,
    models::{Format, ReleaseStatus, Season, Title, TitleId, UserStatus},
    services::{
        providers::{CatalogueProvider, Fixture, FixtureProvider},
        recommendations::{FixedClock, PipelineSettings, Recommender},
    },
};

fn anime(id: TitleId, name: &str, genres: &[&str], tags: &[&str]) -> Title {
    let mut title = Title::new(id, name);
    title.format = Some(Format::Tv);
    title.genres = genres.iter().map(|g| g.to_string()).collect();
    title.tags = tags.iter().map(|t| t.to_string()).collect();
    for genre in &title.genres {
        title.ranks.insert(genre.clone(), 75.0);
    }
    for tag in &title.tags {
        title.ranks.insert(tag.clone(), 60.0);
    }
    title.episodes = Some(12.0);
    title.duration = Some(24.0);
    title.popularity = Some(10_000.0);
    title.source = Some("manga".to_string());
    title
}

fn aired(mut title: Title, year: i32, season: Season, status: ReleaseStatus) -> Title {
    title.season_year = Some(year);
    title.season = Some(season);
    title.status = Some(status);
    title
}

fn entry(title: &Title, score: f64, status: UserStatus, completed: Option<(i32, u32, u32)>) -> Title {
    let mut entry = title.clone();
    entry.score = Some(score);
    entry.user_status = Some(status);
    entry.user_complete_date = completed.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d));
    entry
}

fn fixture() -> Fixture {
    let first = aired(
        anime(1, "Blade Road", &["Action", "Adventure"], &["Swordplay"]),
        2023,
        Season::Fall,
        ReleaseStatus::Finished,
    );
    let romance = aired(
        anime(2, "Paper Hearts", &["Romance", "Drama"], &["School"]),
        2023,
        Season::Spring,
        ReleaseStatus::Finished,
    );
    let comedy = aired(
        anime(3, "Lunch Club", &["Comedy"], &["School"]),
        2023,
        Season::Summer,
        ReleaseStatus::Finished,
    );

    let mut sequel = aired(
        anime(10, "Blade Road II", &["Action", "Adventure"], &["Swordplay"]),
        2024,
        Season::Summer,
        ReleaseStatus::Releasing,
    );
    sequel.continuation_to = vec![1];
    let brawler = aired(
        anime(11, "Iron Fist Academy", &["Action"], &["Martial Arts", "Nudity"]),
        2024,
        Season::Summer,
        ReleaseStatus::Releasing,
    );
    let drama = aired(
        anime(12, "Quiet Harbour", &["Drama"], &["Seinen"]),
        2024,
        Season::Spring,
        ReleaseStatus::Finished,
    );
    let upcoming = aired(
        anime(13, "Star Courier", &["Action", "Sci-Fi"], &[]),
        2024,
        Season::Fall,
        ReleaseStatus::NotYetReleased,
    );

    Fixture {
        anime_lists: HashMap::from([(
            "Kira".to_string(),
            vec![
                entry(&first, 9.0, UserStatus::Completed, Some((2024, 3, 1))),
                entry(&romance, 4.0, UserStatus::Dropped, None),
                entry(&comedy, 7.0, UserStatus::Completed, Some((2024, 2, 1))),
            ],
        )]),
        manga_lists: HashMap::new(),
        catalogue: vec![first, romance, comedy, sequel, brawler, drama, upcoming],
        nsfw_tags: HashSet::from(["Nudity".to_string()]),
    }
}

fn create_test_server() -> TestServer {
    let provider: Arc<dyn CatalogueProvider> = Arc::new(FixtureProvider::new(fixture()));
    let clock = Arc::new(FixedClock(NaiveDate::from_ymd_opt(2024, 7, 20).unwrap()));
    let recommender = Recommender::new(provider.clone(), clock, PipelineSettings::default());
    let state = AppState::new(provider, recommender, Cache::in_memory());
    TestServer::new(create_router(state)).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let server = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["provider"], "fixture");
    assert_eq!(body["cache"]["backend"], "memory");
    assert_eq!(body["cache"]["available"], true);
}

#[tokio::test]
async fn test_recommendations_for_known_user() {
    let server = create_test_server();
    let response = server.get("/api/v1/recommendations/kira").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let categories = body["data"]["categories"].as_array().unwrap();
    let continue_watching = categories
        .iter()
        .find(|c| c["name"] == "Continue Watching")
        .unwrap();
    assert_eq!(continue_watching["items"], serde_json::json!([10]));
    assert!(categories.iter().any(|c| c["name"] == "Simulcasts"));

    let shown: Vec<i64> = body["data"]["shows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_i64().unwrap())
        .collect();
    for category in categories {
        for item in category["items"].as_array().unwrap() {
            assert!(shown.contains(&item.as_i64().unwrap()));
        }
    }

    let tags: Vec<&str> = body["data"]["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap())
        .collect();
    assert!(tags.contains(&"Action"));
    assert!(!tags.contains(&"Nudity"));
}

#[tokio::test]
async fn test_past_year_has_no_simulcasts() {
    let server = create_test_server();
    let response = server
        .get("/api/v1/recommendations/kira")
        .add_query_param("year", 2023)
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let categories = body["data"]["categories"].as_array().unwrap();
    assert!(!categories.iter().any(|c| c["name"] == "Simulcasts"));
}

#[tokio::test]
async fn test_debug_mode_exposes_scores() {
    let server = create_test_server();
    let response = server
        .get("/api/v1/recommendations/kira")
        .add_query_param("season", "summer")
        .add_query_param("debug", true)
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let shows = body["data"]["shows"].as_array().unwrap();
    assert_eq!(shows.len(), 2);
    for show in shows {
        assert!(show.get("recommend_score").is_some());
        assert!(show.get("final_score").is_some());
        assert!(show.get("discourage_score").is_some());
    }
    let last = body["data"]["categories"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["name"], "Debug");
}

#[tokio::test]
async fn test_unknown_user_is_bad_request() {
    let server = create_test_server();
    let response = server.get("/api/v1/recommendations/nobody").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("watchlist"));
}

#[tokio::test]
async fn test_empty_season_is_bad_request() {
    let server = create_test_server();
    let response = server
        .get("/api/v1/recommendations/kira")
        .add_query_param("year", 1990)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("seasonal"));
}

#[tokio::test]
async fn test_invalid_season_is_rejected() {
    let server = create_test_server();
    let response = server
        .get("/api/v1/recommendations/kira")
        .add_query_param("season", "monsoon")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = create_test_server();
    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("frontend-1234"),
        )
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "frontend-1234"
    );

    let generated = server.get("/health").await;
    assert!(generated.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn test_genres_are_sorted() {
    let server = create_test_server();
    let response = server.get("/api/v1/genres").await;
    response.assert_status_ok();

    let genres: Vec<String> = response.json();
    assert_eq!(
        genres,
        vec!["Action", "Adventure", "Comedy", "Drama", "Romance", "Sci-Fi"]
    );
}

#[tokio::test]
async fn test_related_anime() {
    let server = create_test_server();
    let response = server.get("/api/v1/anime/1/related").await;
    response.assert_status_ok();
    let related: Vec<i64> = response.json();
    assert_eq!(related, vec![10]);

    let response = server.get("/api/v1/anime/999/related").await;
    response.assert_status(StatusCode::NOT_FOUND);
}
