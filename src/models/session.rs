use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentType, WatchProvider};

/// Kind of recommendation session being requested
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Onboarding,
    Mood,
    QuickMatch,
}

/// Persisted recommendation session, created once per invocation
///
/// Immutable after creation except the top-title backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSession {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub session_type: SessionType,
    pub mood_input: serde_json::Value,
    pub mood_label: Option<String>,
    pub mood_tags: Vec<String>,
    /// Full raw generator payloads (initial round + top-up), kept for audit
    pub raw_generator_response: serde_json::Value,
    pub top_title_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One selected recommendation, persisted in a single batch after the final
/// candidate set is fixed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title_id: Uuid,
    /// 0-based, stable generation order
    pub rank: i32,
    pub reason: String,
    pub match_score: i32,
    pub created_at: DateTime<Utc>,
}

/// A previously recommended title, used to build the exclusion set
#[derive(Debug, Clone)]
pub struct PastRecommendation {
    pub title: String,
    pub tmdb_id: i64,
    pub tmdb_type: ContentType,
}

/// User-facing display card
///
/// Missing fields render as empty strings rather than null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub title_id: Uuid,
    pub title: String,
    pub year: String,
    pub duration: String,
    pub genres: Vec<String>,
    pub rating: String,
    pub age_rating: String,
    pub quote: String,
    pub description: String,
    pub poster_url: String,
    pub match_score: i32,
    pub tmdb_type: ContentType,
    pub director: String,
    pub starring: Vec<String>,
    pub watch_provider_link: String,
    pub watch_providers: Vec<WatchProvider>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_type_serde() {
        assert_eq!(
            serde_json::to_string(&SessionType::QuickMatch).unwrap(),
            "\"quick_match\""
        );
        let t: SessionType = serde_json::from_str("\"mood\"").unwrap();
        assert_eq!(t, SessionType::Mood);
    }
}
