/// Catalogue provider abstraction
///
/// A provider supplies users' anime and manga lists, seasonal catalogues and
/// the genre/tag vocabularies. Every list comes back as normalised [`Title`]
/// rows, so the recommendation pipeline never sees provider-specific shapes.
use std::collections::{BTreeSet, HashSet};

use crate::{
    error::AppResult,
    models::{FeatureField, Season, Title, TitleId},
};

pub mod anilist;
pub mod fixture;

pub use anilist::{AniListProvider, CacheTtls};
pub use fixture::{Fixture, FixtureProvider};

/// Trait for catalogue providers
///
/// `Ok(None)` means the provider had nothing to return: an unknown user, a
/// missing parameter, or a timed-out request. Errors are reserved for
/// failures the caller should see.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogueProvider: Send + Sync {
    /// The user's anime list with their status, score and completion date per entry
    async fn get_user_anime_list(&self, user: &str) -> AppResult<Option<Vec<Title>>>;

    /// The user's manga list
    async fn get_user_manga_list(&self, user: &str) -> AppResult<Option<Vec<Title>>>;

    /// Anime of one season, or of the whole year when `season` is `None`
    async fn get_seasonal_anime_list(
        &self,
        year: Option<i32>,
        season: Option<Season>,
    ) -> AppResult<Option<Vec<Title>>>;

    /// Ids of anime related to `id`
    async fn get_related_anime(&self, id: Option<TitleId>) -> AppResult<Option<Vec<TitleId>>>;

    async fn get_nsfw_tags(&self) -> AppResult<HashSet<String>>;

    async fn get_genres(&self) -> AppResult<BTreeSet<String>>;

    /// Columns that make up a title's feature set
    fn get_feature_fields(&self) -> Vec<FeatureField>;

    /// Reloads cached vocabularies from the source
    async fn refresh_vocabulary(&self) -> AppResult<()> {
        Ok(())
    }

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
