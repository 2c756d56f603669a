use std::sync::Arc;

use uuid::Uuid;

use crate::db::Store;
use crate::error::AppResult;
use crate::models::{
    identity_key, Candidate, ContentType, Title, TitleAvailability, TmdbDetails, TmdbSearchHit,
};
use crate::services::catalog::CatalogProvider;
use crate::services::exclusions::{normalize_title, SharedExclusions};

/// Top-billed cast names carried onto the card
const CAST_LIMIT: usize = 5;

/// A candidate that survived resolution: catalog-backed, claimed, enriched
#[derive(Debug, Clone)]
pub struct ResolvedTitle {
    pub title: Title,
    pub availability: TitleAvailability,
    /// The originating suggestion, kept for its reason and match score
    pub candidate: Candidate,
}

/// Outcome of screening one candidate against the catalog
struct ScreenedCandidate {
    candidate: Candidate,
    content_type: ContentType,
    hit: TmdbSearchHit,
}

/// Resolves untrusted generator candidates into catalog titles
///
/// Three phases per batch: concurrent screening (catalog search plus cheap
/// rejections), sequential claiming against the shared exclusion set, and
/// concurrent enrichment of the claimed winners. Only the claim phase is
/// serialized, so two look-alike candidates can never both survive.
pub struct CandidateResolver {
    store: Arc<dyn Store>,
    catalog: Arc<dyn CatalogProvider>,
    region: String,
}

impl CandidateResolver {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<dyn CatalogProvider>, region: String) -> Self {
        Self {
            store,
            catalog,
            region,
        }
    }

    /// Resolves a candidate batch, keeping at most `need` titles in batch
    /// order
    pub async fn resolve_batch(
        &self,
        candidates: Vec<Candidate>,
        allowed_types: &[ContentType],
        exclusions: &SharedExclusions,
        need: usize,
    ) -> AppResult<Vec<ResolvedTitle>> {
        self.resolve_batch_with(candidates, allowed_types, exclusions, need, |_| {})
            .await
    }

    /// Like `resolve_batch`, but invokes `on_resolved` for each title as its
    /// enrichment completes, still in batch order
    pub async fn resolve_batch_with<F>(
        &self,
        candidates: Vec<Candidate>,
        allowed_types: &[ContentType],
        exclusions: &SharedExclusions,
        need: usize,
        mut on_resolved: F,
    ) -> AppResult<Vec<ResolvedTitle>>
    where
        F: FnMut(&ResolvedTitle),
    {
        let screened = self
            .screen_batch(candidates, allowed_types, exclusions)
            .await;

        // Claiming is sequential and atomic per candidate; earlier batch
        // positions win ties.
        let mut claimed = Vec::new();
        for entry in screened {
            if claimed.len() >= need {
                break;
            }
            let key = identity_key(entry.content_type, entry.hit.id);
            let mut names = vec![normalize_title(&entry.candidate.title)];
            let resolved_name = normalize_title(entry.hit.display_title());
            if !names.contains(&resolved_name) {
                names.push(resolved_name);
            }
            if exclusions.claim(&names, &key) {
                claimed.push(entry);
            } else {
                tracing::debug!(
                    title = %entry.candidate.title,
                    identity = %key,
                    "Candidate lost the claim, dropping"
                );
            }
        }

        // Enrichment fans out again; claimed entries no longer contend.
        let mut handles = Vec::with_capacity(claimed.len());
        for entry in claimed {
            let store = Arc::clone(&self.store);
            let catalog = Arc::clone(&self.catalog);
            let region = self.region.clone();
            handles.push(tokio::spawn(async move {
                enrich(store, catalog, region, entry).await
            }));
        }

        let mut resolved = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    let entry = result?;
                    on_resolved(&entry);
                    resolved.push(entry);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Enrichment task panicked");
                }
            }
        }

        Ok(resolved)
    }

    /// Concurrent screening pass, preserving batch order
    async fn screen_batch(
        &self,
        candidates: Vec<Candidate>,
        allowed_types: &[ContentType],
        exclusions: &SharedExclusions,
    ) -> Vec<ScreenedCandidate> {
        let allowed: Vec<ContentType> = allowed_types.to_vec();

        let mut handles = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let catalog = Arc::clone(&self.catalog);
            let exclusions = exclusions.clone();
            let allowed = allowed.clone();
            handles.push(tokio::spawn(async move {
                screen(catalog, exclusions, allowed, candidate).await
            }));
        }

        let mut screened = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(entry)) => screened.push(entry),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Screening task panicked");
                }
            }
        }
        screened
    }
}

/// Screens one candidate; `None` means dropped
async fn screen(
    catalog: Arc<dyn CatalogProvider>,
    exclusions: SharedExclusions,
    allowed_types: Vec<ContentType>,
    candidate: Candidate,
) -> Option<ScreenedCandidate> {
    if candidate.title.trim().is_empty() {
        tracing::debug!("Dropping candidate with empty title");
        return None;
    }

    let normalized = normalize_title(&candidate.title);
    if exclusions.contains_name(&normalized) {
        tracing::debug!(title = %candidate.title, "Candidate already excluded by name");
        return None;
    }

    let Some(content_type) = ContentType::parse_hint(&candidate.content_type) else {
        tracing::debug!(
            title = %candidate.title,
            hint = %candidate.content_type,
            "Unrecognized content type hint"
        );
        return None;
    };
    if !allowed_types.contains(&content_type) {
        tracing::debug!(
            title = %candidate.title,
            content_type = %content_type,
            "Content type not allowed for this session"
        );
        return None;
    }

    let hit = match catalog.search(content_type, candidate.effective_query()).await {
        Ok(Some(hit)) => hit,
        Ok(None) => {
            tracing::debug!(title = %candidate.title, "No catalog match");
            return None;
        }
        Err(e) => {
            // Lookup failures cost one candidate, never the session
            tracing::warn!(title = %candidate.title, error = %e, "Catalog lookup failed");
            return None;
        }
    };

    if exclusions.contains_key(&identity_key(content_type, hit.id)) {
        tracing::debug!(
            title = %candidate.title,
            tmdb_id = hit.id,
            "Resolved identity already excluded"
        );
        return None;
    }

    Some(ScreenedCandidate {
        candidate,
        content_type,
        hit,
    })
}

/// Enriches one claimed candidate with details and watch providers
///
/// Already-enriched stored titles skip the details call. A failed details
/// call degrades to search-level metadata instead of dropping the claim.
/// Provider lookup failures leave the card without availability.
async fn enrich(
    store: Arc<dyn Store>,
    catalog: Arc<dyn CatalogProvider>,
    region: String,
    entry: ScreenedCandidate,
) -> AppResult<ResolvedTitle> {
    let ScreenedCandidate {
        candidate,
        content_type,
        hit,
    } = entry;

    let stored = store.find_title(content_type, hit.id).await?;
    let title = match stored {
        Some(existing) if existing.is_enriched() => existing,
        _ => {
            let built = match catalog.details(content_type, hit.id).await {
                Ok(details) => title_from_details(content_type, &details, &region),
                Err(e) => {
                    tracing::warn!(
                        title = %candidate.title,
                        tmdb_id = hit.id,
                        error = %e,
                        "Details lookup failed, keeping search-level metadata"
                    );
                    title_from_hit(content_type, &hit, &candidate)
                }
            };
            store.upsert_title(&built).await?
        }
    };

    let availability = match catalog
        .watch_providers(content_type, hit.id, &region)
        .await
    {
        Ok(availability) => {
            if let Err(e) = store
                .replace_watch_providers(
                    title.id,
                    &region,
                    &availability.providers,
                    availability.link.as_deref(),
                )
                .await
            {
                tracing::warn!(title_id = %title.id, error = %e, "Failed to store watch providers");
            }
            availability
        }
        Err(e) => {
            tracing::warn!(
                title = %title.title,
                error = %e,
                "Watch provider lookup failed"
            );
            TitleAvailability::default()
        }
    };

    Ok(ResolvedTitle {
        title,
        availability,
        candidate,
    })
}

fn title_from_details(content_type: ContentType, details: &TmdbDetails, region: &str) -> Title {
    Title {
        id: Uuid::new_v4(),
        tmdb_id: details.id,
        tmdb_type: content_type,
        title: details.display_title().to_string(),
        overview: details.overview.clone(),
        genres: details.genres.iter().map(|g| g.name.clone()).collect(),
        year: details.year(),
        runtime_minutes: details.runtime_minutes(),
        poster_path: details.poster_path.clone(),
        backdrop_path: details.backdrop_path.clone(),
        imdb_id: details.imdb_id.clone(),
        rating: details.vote_average,
        age_rating: details.certification(region),
        director: details.director(),
        cast: details.top_cast(CAST_LIMIT),
        raw_payload: serde_json::to_value(details).ok(),
    }
}

/// Minimal title when the details endpoint is unavailable
fn title_from_hit(content_type: ContentType, hit: &TmdbSearchHit, candidate: &Candidate) -> Title {
    Title {
        id: Uuid::new_v4(),
        tmdb_id: hit.id,
        tmdb_type: content_type,
        title: hit.display_title().to_string(),
        overview: hit.overview.clone(),
        genres: candidate.genres.clone(),
        year: hit.year(),
        runtime_minutes: None,
        poster_path: hit.poster_path.clone(),
        backdrop_path: None,
        imdb_id: None,
        rating: None,
        age_rating: None,
        director: None,
        cast: Vec::new(),
        raw_payload: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{
        InteractionRecord, PastRecommendation, Profile, RecommendationItem, RecommendationSession,
        WatchProvider,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeCatalog {
        // query -> (tmdb_id, resolved display title)
        hits: HashMap<String, (i64, String)>,
        failing_queries: Vec<String>,
    }

    impl FakeCatalog {
        fn new(hits: &[(&str, i64, &str)]) -> Self {
            Self {
                hits: hits
                    .iter()
                    .map(|(q, id, t)| (q.to_string(), (*id, t.to_string())))
                    .collect(),
                failing_queries: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CatalogProvider for FakeCatalog {
        async fn search(
            &self,
            _content_type: ContentType,
            query: &str,
        ) -> AppResult<Option<TmdbSearchHit>> {
            if self.failing_queries.iter().any(|q| q == query) {
                return Err(AppError::ProviderLookup("search unavailable".to_string()));
            }
            Ok(self.hits.get(query).map(|(id, title)| TmdbSearchHit {
                id: *id,
                title: Some(title.clone()),
                name: None,
                overview: Some("overview".to_string()),
                release_date: Some("2015-01-01".to_string()),
                first_air_date: None,
                poster_path: None,
                popularity: Some(10.0),
            }))
        }

        async fn details(
            &self,
            _content_type: ContentType,
            tmdb_id: i64,
        ) -> AppResult<TmdbDetails> {
            Ok(serde_json::from_value(serde_json::json!({
                "id": tmdb_id,
                "title": format!("Title {}", tmdb_id),
                "overview": "enriched overview",
                "runtime": 120,
                "genres": [{"id": 18, "name": "Drama"}],
                "credits": {
                    "cast": [{"name": "Lead Actor", "order": 0}],
                    "crew": [{"name": "Some Director", "job": "Director"}]
                }
            }))
            .map_err(|e| AppError::Internal(e.to_string()))?)
        }

        async fn watch_providers(
            &self,
            _content_type: ContentType,
            _tmdb_id: i64,
            region: &str,
        ) -> AppResult<TitleAvailability> {
            Ok(TitleAvailability {
                providers: vec![WatchProvider {
                    provider_name: "Netflix".to_string(),
                    logo_path: None,
                    availability_type: crate::models::AvailabilityType::Flatrate,
                    region: region.to_string(),
                }],
                link: Some("https://example.test/watch".to_string()),
            })
        }
    }

    #[derive(Default)]
    struct FakeStore {
        upserted: Mutex<Vec<Title>>,
        provider_writes: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn authenticate(&self, _bearer_token: &str) -> AppResult<Option<Uuid>> {
            unreachable!()
        }
        async fn fetch_profile(
            &self,
            _profile_id: Uuid,
            _user_id: Uuid,
        ) -> AppResult<Option<Profile>> {
            unreachable!()
        }
        async fn fetch_interactions(
            &self,
            _profile_id: Uuid,
            _window_days: i32,
            _limit: i64,
        ) -> AppResult<Vec<InteractionRecord>> {
            unreachable!()
        }
        async fn fetch_recent_recommendations(
            &self,
            _profile_id: Uuid,
            _window_days: i32,
            _max_sessions: i64,
            _max_items: i64,
        ) -> AppResult<Vec<PastRecommendation>> {
            unreachable!()
        }
        async fn find_title(
            &self,
            _tmdb_type: ContentType,
            _tmdb_id: i64,
        ) -> AppResult<Option<Title>> {
            Ok(None)
        }
        async fn upsert_title(&self, title: &Title) -> AppResult<Title> {
            self.upserted.lock().unwrap().push(title.clone());
            Ok(title.clone())
        }
        async fn replace_watch_providers(
            &self,
            title_id: Uuid,
            _region: &str,
            _providers: &[WatchProvider],
            _link: Option<&str>,
        ) -> AppResult<()> {
            self.provider_writes.lock().unwrap().push(title_id);
            Ok(())
        }
        async fn insert_session(
            &self,
            _session: &RecommendationSession,
            _items: &[RecommendationItem],
        ) -> AppResult<()> {
            unreachable!()
        }
        async fn backfill_top_title(&self, _session_id: Uuid, _title_id: Uuid) -> AppResult<()> {
            unreachable!()
        }
        async fn register_usage(
            &self,
            _profile_id: Uuid,
            _session_id: Uuid,
            _daily_limit: i64,
        ) -> AppResult<crate::db::UsageCount> {
            unreachable!()
        }
    }

    fn candidate(title: &str, content_type: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            content_type: content_type.to_string(),
            search_query: String::new(),
            genres: vec!["Drama".to_string()],
            tone_tags: vec!["tense".to_string(), "gritty".to_string()],
            reason: "a fit".to_string(),
            match_score: 85,
        }
    }

    fn resolver(catalog: FakeCatalog) -> (CandidateResolver, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::default());
        let resolver = CandidateResolver::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(catalog),
            "US".to_string(),
        );
        (resolver, store)
    }

    #[tokio::test]
    async fn test_resolves_and_enriches_in_order() {
        let catalog = FakeCatalog::new(&[("Heat", 949, "Heat"), ("Collateral", 1538, "Collateral")]);
        let (resolver, store) = resolver(catalog);
        let exclusions = SharedExclusions::new();

        let resolved = resolver
            .resolve_batch(
                vec![candidate("Heat", "movie"), candidate("Collateral", "movie")],
                &[ContentType::Movie],
                &exclusions,
                5,
            )
            .await
            .unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].title.tmdb_id, 949);
        assert_eq!(resolved[1].title.tmdb_id, 1538);
        assert_eq!(resolved[0].title.director, Some("Some Director".to_string()));
        assert_eq!(resolved[0].availability.providers.len(), 1);
        assert_eq!(store.upserted.lock().unwrap().len(), 2);
        assert_eq!(store.provider_writes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_callback_fires_per_title_in_batch_order() {
        let catalog = FakeCatalog::new(&[("Heat", 949, "Heat"), ("Collateral", 1538, "Collateral")]);
        let (resolver, _store) = resolver(catalog);
        let exclusions = SharedExclusions::new();

        let mut seen = Vec::new();
        let resolved = resolver
            .resolve_batch_with(
                vec![candidate("Heat", "movie"), candidate("Collateral", "movie")],
                &[ContentType::Movie],
                &exclusions,
                5,
                |entry| seen.push(entry.title.tmdb_id),
            )
            .await
            .unwrap();

        // Each title surfaces as soon as it is enriched, in batch order
        assert_eq!(seen, vec![949, 1538]);
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn test_same_catalog_identity_resolves_once() {
        // Two phrasings of the same film share one tmdb id
        let catalog = FakeCatalog::new(&[("Se7en", 807, "Se7en"), ("Seven", 807, "Se7en")]);
        let (resolver, _store) = resolver(catalog);
        let exclusions = SharedExclusions::new();

        let resolved = resolver
            .resolve_batch(
                vec![candidate("Se7en", "movie"), candidate("Seven", "movie")],
                &[ContentType::Movie],
                &exclusions,
                5,
            )
            .await
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].title.tmdb_id, 807);
    }

    #[tokio::test]
    async fn test_excluded_name_is_dropped() {
        let catalog = FakeCatalog::new(&[("Heat", 949, "Heat")]);
        let (resolver, _store) = resolver(catalog);
        let exclusions = SharedExclusions::new();
        exclusions.insert_name("heat".to_string());

        let resolved = resolver
            .resolve_batch(
                vec![candidate("Heat", "movie")],
                &[ContentType::Movie],
                &exclusions,
                5,
            )
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_disallowed_type_is_dropped() {
        let catalog = FakeCatalog::new(&[("Breaking Bad", 1396, "Breaking Bad")]);
        let (resolver, _store) = resolver(catalog);
        let exclusions = SharedExclusions::new();

        let resolved = resolver
            .resolve_batch(
                vec![candidate("Breaking Bad", "tv")],
                &[ContentType::Movie],
                &exclusions,
                5,
            )
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_drops_only_that_candidate() {
        let mut catalog = FakeCatalog::new(&[("Heat", 949, "Heat")]);
        catalog.failing_queries.push("Collateral".to_string());
        let (resolver, _store) = resolver(catalog);
        let exclusions = SharedExclusions::new();

        let resolved = resolver
            .resolve_batch(
                vec![candidate("Collateral", "movie"), candidate("Heat", "movie")],
                &[ContentType::Movie],
                &exclusions,
                5,
            )
            .await
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].title.title, "Title 949");
    }

    #[tokio::test]
    async fn test_need_caps_the_batch() {
        let catalog = FakeCatalog::new(&[
            ("A", 1, "A"),
            ("B", 2, "B"),
            ("C", 3, "C"),
        ]);
        let (resolver, _store) = resolver(catalog);
        let exclusions = SharedExclusions::new();

        let resolved = resolver
            .resolve_batch(
                vec![
                    candidate("A", "movie"),
                    candidate("B", "movie"),
                    candidate("C", "movie"),
                ],
                &[ContentType::Movie],
                &exclusions,
                2,
            )
            .await
            .unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].title.tmdb_id, 1);
        assert_eq!(resolved[1].title.tmdb_id, 2);
        // The unclaimed candidate stays eligible for future rounds
        assert!(!exclusions.contains_key("movie:3"));
    }

    #[tokio::test]
    async fn test_unknown_type_hint_is_dropped() {
        let catalog = FakeCatalog::new(&[("Heat", 949, "Heat")]);
        let (resolver, _store) = resolver(catalog);
        let exclusions = SharedExclusions::new();

        let resolved = resolver
            .resolve_batch(
                vec![candidate("Heat", "podcast")],
                &[ContentType::Movie, ContentType::Tv],
                &exclusions,
                5,
            )
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }
}
