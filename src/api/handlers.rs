use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Card, ContentType, SessionType};
use crate::services::session::{SessionEvent, SessionOutcome, SessionRequest};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    pub profile_id: Uuid,
    pub session_type: SessionType,
    /// Opaque mood payload, archived on the session verbatim
    #[serde(default = "default_mood_input")]
    pub mood_input: serde_json::Value,
    /// Content-type allow-list; defaults to both
    #[serde(default = "default_content_types")]
    pub content_types: Vec<ContentType>,
    /// When true, respond with newline-delimited progress events
    #[serde(default)]
    pub stream: bool,
}

fn default_mood_input() -> serde_json::Value {
    json!({})
}

fn default_content_types() -> Vec<ContentType> {
    vec![ContentType::Movie, ContentType::Tv]
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub session_type: SessionType,
    pub mood_input: serde_json::Value,
    pub mood_label: Option<String>,
    pub mood_tags: Vec<String>,
    pub top_title_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub cards: Vec<Card>,
}

impl From<SessionOutcome> for SessionResponse {
    fn from(outcome: SessionOutcome) -> Self {
        let session = outcome.session;
        Self {
            id: session.id,
            profile_id: session.profile_id,
            session_type: session.session_type,
            mood_input: session.mood_input,
            mood_label: session.mood_label,
            mood_tags: session.mood_tags,
            top_title_id: session.top_title_id,
            created_at: session.created_at,
            cards: outcome.cards,
        }
    }
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Creates a recommendation session for a profile
///
/// Authenticates the bearer token, checks profile ownership, and registers
/// the session against the daily quota before any generation work starts.
/// The streaming variant runs the same pipeline with an event channel
/// attached.
pub async fn create_recommendations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Response> {
    let token = bearer_token(&headers)?;
    let user_id = state
        .store
        .authenticate(token)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid bearer token".to_string()))?;

    // Ownership check fails closed: a foreign profile id looks identical to
    // a missing one.
    let profile = state
        .store
        .fetch_profile(request.profile_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Profile {}", request.profile_id)))?;

    if request.content_types.is_empty() {
        return Err(AppError::InvalidInput(
            "content_types must not be empty".to_string(),
        ));
    }

    let session_id = Uuid::new_v4();

    // Quota is settled before any generator or catalog spend
    let usage = state
        .store
        .register_usage(profile.id, session_id, profile.daily_limit)
        .await?;
    if !usage.allowed {
        return Err(AppError::QuotaExceeded {
            tier: profile.tier,
            daily_limit: profile.daily_limit,
            used_today: usage.used_today,
        });
    }

    tracing::info!(
        session_id = %session_id,
        profile_id = %profile.id,
        used_today = usage.used_today,
        stream = request.stream,
        "Starting recommendation session"
    );

    let session_request = SessionRequest {
        session_id,
        profile_id: profile.id,
        session_type: request.session_type,
        mood_input: request.mood_input,
        allowed_types: request.content_types,
    };

    if request.stream {
        Ok(stream_session(&state, session_request))
    } else {
        let outcome = state.engine().run(session_request, None).await?;
        Ok(Json(SessionResponse::from(outcome)).into_response())
    }
}

/// Runs the pipeline in the background and streams its events as NDJSON
fn stream_session(state: &AppState, request: SessionRequest) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<SessionEvent>();
    let engine = state.engine();
    let session_id = request.session_id;

    tokio::spawn(async move {
        if let Err(e) = engine.run(request, Some(tx)).await {
            // Already mirrored to the stream as an error event
            tracing::error!(session_id = %session_id, error = %e, "Streamed session failed");
        }
    });

    let lines = futures::stream::unfold(rx, |mut rx| async {
        let event = rx.recv().await?;
        let line = match serde_json::to_string(&event) {
            Ok(json) => json + "\n",
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode session event");
                return Some((Ok::<_, Infallible>(String::new()), rx));
            }
        };
        Some((Ok::<_, Infallible>(line), rx))
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Auth("Missing or malformed bearer token".to_string()))
}
