use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::{
    Card, ContentType, RecommendationItem, RecommendationSession, SessionType, Title,
    TitleAvailability,
};
use crate::services::catalog::CatalogProvider;
use crate::services::exclusions::build_exclusions;
use crate::services::generator::{generate_round, GenerationRequest, GeneratorClient};
use crate::services::resolver::{CandidateResolver, ResolvedTitle};
use crate::services::signals::{extract_signals, MAX_INTERACTIONS, RECENCY_WINDOW_DAYS};

/// Cards delivered per session
pub const TARGET_COUNT: usize = 5;
/// Overfetch factor for the first generation round
pub const INITIAL_REQUEST_COUNT: usize = 12;

const RECENT_REC_WINDOW_DAYS: i32 = 90;
const RECENT_REC_MAX_SESSIONS: i64 = 60;
const RECENT_REC_MAX_ITEMS: i64 = 400;

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

/// Inputs for one session run, fixed before the pipeline starts
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub session_id: Uuid,
    pub profile_id: Uuid,
    pub session_type: SessionType,
    pub mood_input: serde_json::Value,
    pub allowed_types: Vec<ContentType>,
}

/// Progress events for the streaming response variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: Uuid,
        session_type: SessionType,
    },
    Card {
        rank: i32,
        card: Card,
    },
    Complete {
        session_id: Uuid,
        card_count: usize,
    },
    Error {
        code: String,
        message: String,
    },
}

/// A finished session: the persisted record plus its display cards
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: RecommendationSession,
    pub cards: Vec<Card>,
}

/// Orchestrates one recommendation session end to end
///
/// Signals, exclusions, generation, resolution, one top-up round, then
/// persistence. The streaming and buffered response variants share this
/// pipeline; streaming just passes an event channel.
pub struct SessionEngine {
    store: Arc<dyn Store>,
    generator: Arc<dyn GeneratorClient>,
    resolver: CandidateResolver,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        generator: Arc<dyn GeneratorClient>,
        catalog: Arc<dyn CatalogProvider>,
        region: String,
    ) -> Self {
        let resolver = CandidateResolver::new(Arc::clone(&store), catalog, region);
        Self {
            store,
            generator,
            resolver,
        }
    }

    /// Runs the pipeline, reporting progress on the channel when given one
    ///
    /// Failures are mirrored onto the channel as an `Error` event before the
    /// error propagates.
    pub async fn run(
        &self,
        request: SessionRequest,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> AppResult<SessionOutcome> {
        match self.run_inner(&request, events.as_ref()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                emit(
                    events.as_ref(),
                    SessionEvent::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        request: &SessionRequest,
        events: Option<&mpsc::UnboundedSender<SessionEvent>>,
    ) -> AppResult<SessionOutcome> {
        emit(
            events,
            SessionEvent::SessionStarted {
                session_id: request.session_id,
                session_type: request.session_type,
            },
        );

        let interactions = self
            .store
            .fetch_interactions(request.profile_id, RECENCY_WINDOW_DAYS, MAX_INTERACTIONS)
            .await?;
        let signals = extract_signals(&interactions, Utc::now());

        let past = self
            .store
            .fetch_recent_recommendations(
                request.profile_id,
                RECENT_REC_WINDOW_DAYS,
                RECENT_REC_MAX_SESSIONS,
                RECENT_REC_MAX_ITEMS,
            )
            .await?;
        let exclusions = build_exclusions(&signals, &past);

        tracing::info!(
            session_id = %request.session_id,
            interactions = interactions.len(),
            hard_excluded = exclusions.hard_titles.len(),
            soft_excluded = exclusions.soft_titles.len(),
            "Session signals assembled"
        );

        let mut raw_responses: Vec<serde_json::Value> = Vec::new();
        let mut resolved: Vec<ResolvedTitle> = Vec::new();
        let mut cards: Vec<Card> = Vec::new();

        // First round: overfetch, then resolve down to the target. A contract
        // failure here is fatal; there is nothing to fall back on.
        let first = generate_round(
            self.generator.as_ref(),
            &GenerationRequest {
                count: INITIAL_REQUEST_COUNT,
                allowed_types: &request.allowed_types,
                session_type: request.session_type,
                mood_input: &request.mood_input,
                signals: &signals,
                exclusions: &exclusions,
                already_chosen: &[],
            },
        )
        .await?;
        raw_responses.push(serde_json::Value::String(first.raw_response.clone()));

        // Cards go out on the channel one by one, as each title finishes
        // enrichment, rather than after the whole batch.
        let first_resolved = self
            .resolver
            .resolve_batch_with(
                first.candidates,
                &request.allowed_types,
                &exclusions.shared,
                TARGET_COUNT,
                |entry| emit_card(&mut cards, entry, events),
            )
            .await?;
        resolved.extend(first_resolved);

        // At most one top-up round, requesting exactly the deficit. This
        // round is best-effort: a misbehaving generator costs cards, not the
        // session.
        let deficit = TARGET_COUNT.saturating_sub(resolved.len());
        if deficit > 0 {
            tracing::info!(
                session_id = %request.session_id,
                deficit,
                "Running top-up round"
            );
            let already_chosen: Vec<String> =
                resolved.iter().map(|r| r.title.title.clone()).collect();

            match generate_round(
                self.generator.as_ref(),
                &GenerationRequest {
                    count: deficit,
                    allowed_types: &request.allowed_types,
                    session_type: request.session_type,
                    mood_input: &request.mood_input,
                    signals: &signals,
                    exclusions: &exclusions,
                    already_chosen: &already_chosen,
                },
            )
            .await
            {
                Ok(round) => {
                    raw_responses.push(serde_json::Value::String(round.raw_response.clone()));
                    let topped_up = self
                        .resolver
                        .resolve_batch_with(
                            round.candidates,
                            &request.allowed_types,
                            &exclusions.shared,
                            deficit,
                            |entry| emit_card(&mut cards, entry, events),
                        )
                        .await?;
                    resolved.extend(topped_up);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %request.session_id,
                        error = %e,
                        "Top-up round failed, delivering a partial session"
                    );
                }
            }
        }

        if resolved.is_empty() {
            return Err(AppError::EmptyResult);
        }

        let now = Utc::now();
        let items: Vec<RecommendationItem> = resolved
            .iter()
            .enumerate()
            .map(|(rank, entry)| RecommendationItem {
                id: Uuid::new_v4(),
                session_id: request.session_id,
                title_id: entry.title.id,
                rank: rank as i32,
                reason: entry.candidate.reason.clone(),
                match_score: entry.candidate.match_score as i32,
                created_at: now,
            })
            .collect();

        let mut session = RecommendationSession {
            id: request.session_id,
            profile_id: request.profile_id,
            session_type: request.session_type,
            mood_input: request.mood_input.clone(),
            mood_label: mood_label(&request.mood_input),
            mood_tags: mood_tags(&request.mood_input),
            raw_generator_response: serde_json::Value::Array(raw_responses),
            top_title_id: None,
            created_at: now,
        };

        self.store.insert_session(&session, &items).await?;

        let top_title_id = items[0].title_id;
        self.store
            .backfill_top_title(session.id, top_title_id)
            .await?;
        session.top_title_id = Some(top_title_id);

        tracing::info!(
            session_id = %session.id,
            cards = cards.len(),
            "Session persisted"
        );

        emit(
            events,
            SessionEvent::Complete {
                session_id: session.id,
                card_count: cards.len(),
            },
        );

        Ok(SessionOutcome { session, cards })
    }
}

fn emit(events: Option<&mpsc::UnboundedSender<SessionEvent>>, event: SessionEvent) {
    if let Some(tx) = events {
        // A disconnected consumer stops deliveries, not the pipeline
        let _ = tx.send(event);
    }
}

fn emit_card(
    cards: &mut Vec<Card>,
    entry: &ResolvedTitle,
    events: Option<&mpsc::UnboundedSender<SessionEvent>>,
) {
    let rank = cards.len() as i32;
    let card = build_card(
        &entry.title,
        &entry.availability,
        &entry.candidate.reason,
        entry.candidate.match_score as i32,
    );
    emit(
        events,
        SessionEvent::Card {
            rank,
            card: card.clone(),
        },
    );
    cards.push(card);
}

/// Formats a runtime in minutes for display
fn format_runtime(minutes: Option<i32>) -> String {
    match minutes {
        Some(m) if m >= 60 => format!("{}h {}m", m / 60, m % 60),
        Some(m) if m > 0 => format!("{}m", m),
        _ => String::new(),
    }
}

/// Builds the display card for one resolved title
///
/// Absent fields render as empty strings so clients never see nulls.
pub fn build_card(
    title: &Title,
    availability: &TitleAvailability,
    reason: &str,
    match_score: i32,
) -> Card {
    Card {
        title_id: title.id,
        title: title.title.clone(),
        year: title.year.map(|y| y.to_string()).unwrap_or_default(),
        duration: format_runtime(title.runtime_minutes),
        genres: title.genres.clone(),
        rating: title.rating.map(|r| format!("{:.1}", r)).unwrap_or_default(),
        age_rating: title.age_rating.clone().unwrap_or_default(),
        quote: reason.to_string(),
        description: title.overview.clone().unwrap_or_default(),
        poster_url: title
            .poster_path
            .as_deref()
            .map(|p| format!("{}{}", POSTER_BASE_URL, p))
            .unwrap_or_default(),
        match_score,
        tmdb_type: title.tmdb_type,
        director: title.director.clone().unwrap_or_default(),
        starring: title.cast.clone(),
        watch_provider_link: availability.link.clone().unwrap_or_default(),
        watch_providers: availability.providers.clone(),
    }
}

fn mood_label(mood_input: &serde_json::Value) -> Option<String> {
    mood_input
        .get("mood")
        .or_else(|| mood_input.get("label"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn mood_tags(mood_input: &serde_json::Value) -> Vec<String> {
    mood_input
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
