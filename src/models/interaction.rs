use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ContentType;

/// Action the user took on a card
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    Impression,
    Open,
    Play,
    Complete,
    Like,
    Dislike,
    Skip,
    Feedback,
}

/// Typed sidecar for the optional interaction payload
///
/// Named optional fields instead of an open map so sentiment derivation stays
/// statically checkable.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InteractionExtra {
    #[serde(default)]
    pub quick_tags: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub would_watch_again: Option<bool>,
}

/// One historical interaction, joined with its title for signal extraction
///
/// Immutable once created; the source of truth for taste signals. Read-only
/// to this service within the recency window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub tmdb_id: i64,
    pub tmdb_type: ContentType,
    /// Display title at the time of interaction
    pub title: String,
    /// Genre list of the interacted title
    pub genres: Vec<String>,
    pub action: InteractionAction,
    /// Explicit rating 1..5, if the user gave one
    pub rating: Option<i16>,
    pub extra: Option<InteractionExtra>,
    pub created_at: DateTime<Utc>,
}
