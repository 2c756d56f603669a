use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use crate::cached;
use crate::db::{Cache, CacheKey};
use crate::error::{AppError, AppResult};
use crate::models::{ContentType, TitleAvailability, TmdbDetails, TmdbSearchHit};
use crate::models::{TmdbSearchResponse, TmdbWatchProvidersResponse};

/// Search results go stale quickly as the catalog reorders by popularity
const SEARCH_TTL_SECS: u64 = 3_600;
/// Title details are effectively immutable
const DETAILS_TTL_SECS: u64 = 604_800;
/// Provider lineups rotate with licensing windows
const PROVIDERS_TTL_SECS: u64 = 86_400;

/// Catalog lookup provider
///
/// Resolves free-text titles to catalog records and enriches them with
/// details and regional watch providers.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Best catalog match for a search query, or `None` if nothing matches
    async fn search(
        &self,
        content_type: ContentType,
        query: &str,
    ) -> AppResult<Option<TmdbSearchHit>>;

    /// Full details for a known catalog id, credits included
    async fn details(&self, content_type: ContentType, tmdb_id: i64) -> AppResult<TmdbDetails>;

    /// Watch providers for a title in one region
    async fn watch_providers(
        &self,
        content_type: ContentType,
        tmdb_id: i64,
        region: &str,
    ) -> AppResult<TitleAvailability>;
}

/// TMDB-backed catalog provider with a Redis read-through cache
#[derive(Clone)]
pub struct TmdbProvider {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    cache: Cache,
}

impl TmdbProvider {
    pub fn new(api_key: String, api_url: String, timeout: Duration, cache: Cache) -> Self {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            api_key,
            api_url,
            cache,
        }
    }

    async fn fetch_search(
        &self,
        content_type: ContentType,
        query: &str,
    ) -> AppResult<TmdbSearchResponse> {
        let url = format!("{}/search/{}", self.api_url, content_type);

        tracing::debug!(content_type = %content_type, query = %query, "Searching catalog");

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("query", query),
                ("include_adult", "false"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ProviderLookup(format!(
                "Catalog search returned status {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn fetch_details(
        &self,
        content_type: ContentType,
        tmdb_id: i64,
    ) -> AppResult<TmdbDetails> {
        let url = format!("{}/{}/{}", self.api_url, content_type, tmdb_id);
        let append = match content_type {
            ContentType::Movie => "credits,release_dates",
            ContentType::Tv => "credits,content_ratings",
        };

        tracing::debug!(content_type = %content_type, tmdb_id, "Fetching catalog details");

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("append_to_response", append),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ProviderLookup(format!(
                "Catalog details for {}:{} returned status {}",
                content_type,
                tmdb_id,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn fetch_watch_providers(
        &self,
        content_type: ContentType,
        tmdb_id: i64,
    ) -> AppResult<TmdbWatchProvidersResponse> {
        let url = format!(
            "{}/{}/{}/watch/providers",
            self.api_url, content_type, tmdb_id
        );

        tracing::debug!(content_type = %content_type, tmdb_id, "Fetching watch providers");

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ProviderLookup(format!(
                "Watch providers for {}:{} returned status {}",
                content_type,
                tmdb_id,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl CatalogProvider for TmdbProvider {
    async fn search(
        &self,
        content_type: ContentType,
        query: &str,
    ) -> AppResult<Option<TmdbSearchHit>> {
        let key = CacheKey::TitleSearch(content_type, query.to_string());
        let response: AppResult<TmdbSearchResponse> = cached!(
            self.cache,
            key,
            SEARCH_TTL_SECS,
            self.fetch_search(content_type, query)
        );
        Ok(response?.results.into_iter().next())
    }

    async fn details(&self, content_type: ContentType, tmdb_id: i64) -> AppResult<TmdbDetails> {
        let key = CacheKey::TitleDetails(content_type, tmdb_id);
        cached!(
            self.cache,
            key,
            DETAILS_TTL_SECS,
            self.fetch_details(content_type, tmdb_id)
        )
    }

    async fn watch_providers(
        &self,
        content_type: ContentType,
        tmdb_id: i64,
        region: &str,
    ) -> AppResult<TitleAvailability> {
        let key = CacheKey::WatchProviders(content_type, tmdb_id, region.to_string());
        cached!(self.cache, key, PROVIDERS_TTL_SECS, async {
            let response = self.fetch_watch_providers(content_type, tmdb_id).await?;
            Ok::<_, AppError>(response.for_region(region))
        })
    }
}
