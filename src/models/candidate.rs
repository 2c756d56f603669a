use serde::{Deserialize, Serialize};

/// Untrusted, generator-produced title suggestion
///
/// Transient: either resolves into a catalog [`Title`](super::Title) or is
/// discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub title: String,
    /// Content-type hint ("movie" / "tv"), validated against the allow-list
    #[serde(rename = "type")]
    pub content_type: String,
    /// Query for the catalog search endpoint; falls back to `title` if empty
    #[serde(default)]
    pub search_query: String,
    pub genres: Vec<String>,
    pub tone_tags: Vec<String>,
    /// Free-text justification shown on the card
    pub reason: String,
    /// Integer 70..=99 per the output contract
    pub match_score: i64,
}

impl Candidate {
    /// The query to send to the catalog search endpoint
    pub fn effective_query(&self) -> &str {
        let trimmed = self.search_query.trim();
        if trimmed.is_empty() {
            self.title.trim()
        } else {
            trimmed
        }
    }
}

/// Validated generator round output
#[derive(Debug, Clone)]
pub struct GeneratorRound {
    pub candidates: Vec<Candidate>,
    /// Raw response text archived on the session record
    pub raw_response: String,
}
