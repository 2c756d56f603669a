use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{InteractionAction, InteractionRecord};
use crate::services::exclusions::normalize_title;

/// Interaction history window
pub const RECENCY_WINDOW_DAYS: i32 = 120;
/// Cap on records considered within the window
pub const MAX_INTERACTIONS: i64 = 300;

const TOP_GENRES: usize = 10;
const TOP_TAGS: usize = 20;
const TOP_NOTES: usize = 5;

const NEGATIVE_TAG_MARKERS: [&str; 3] = ["too slow", "boring", "bad"];
const POSITIVE_TAG_MARKERS: [&str; 3] = ["great", "amazing", "excellent"];

/// Sentiment of one interaction toward its title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Weight accumulator with deterministic ranking
///
/// Remembers first-seen order per key so that equal weights rank in insertion
/// order instead of map iteration order.
#[derive(Debug, Clone, Default)]
pub struct ScoreMap {
    entries: HashMap<String, (f64, usize)>,
}

impl ScoreMap {
    pub fn add(&mut self, key: &str, weight: f64) {
        let next_index = self.entries.len();
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert((0.0, next_index));
        entry.0 += weight;
    }

    pub fn weight(&self, key: &str) -> f64 {
        self.entries.get(key).map(|(w, _)| *w).unwrap_or(0.0)
    }

    /// Top-k keys by weight descending, ties broken by first-seen order
    pub fn top(&self, k: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, &(f64, usize))> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            b.1 .0
                .partial_cmp(&a.1 .0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1 .1.cmp(&b.1 .1))
        });
        ranked.into_iter().take(k).map(|(k, _)| k.clone()).collect()
    }
}

/// A free-text note with the weight of the interaction that carried it
#[derive(Debug, Clone)]
pub struct WeightedNote {
    pub text: String,
    pub weight: f64,
}

/// A title marked for exclusion, carrying both the human-readable form (for
/// prompting) and the matching keys
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedTitle {
    pub display: String,
    pub normalized: String,
    pub identity_key: String,
}

/// Aggregated taste signals for one profile, built once per session
#[derive(Debug, Clone, Default)]
pub struct TasteSignals {
    pub positive_genres: Vec<String>,
    pub negative_genres: Vec<String>,
    pub positive_tags: Vec<String>,
    pub negative_tags: Vec<String>,
    pub positive_notes: Vec<String>,
    pub negative_notes: Vec<String>,
    /// Never recommend again
    pub hard_excluded: Vec<ExcludedTitle>,
    /// Watched or rated dead-middle; sequels/variants stay eligible
    pub soft_excluded: Vec<ExcludedTitle>,
}

/// Recency weight for an interaction of the given age
pub fn recency_weight(age_days: i64) -> f64 {
    if age_days <= 7 {
        1.0
    } else if age_days <= 30 {
        0.5
    } else {
        0.25
    }
}

fn tags_contain_marker(tags: &[String], markers: &[&str]) -> bool {
    tags.iter().any(|tag| {
        let tag = tag.to_lowercase();
        markers.iter().any(|marker| tag.contains(marker))
    })
}

/// Resolves the sentiment of one interaction
///
/// An explicit rating always wins; action-derived sentiment only applies when
/// no rating was given.
pub fn derive_sentiment(record: &InteractionRecord) -> Sentiment {
    if let Some(rating) = record.rating {
        return if rating >= 4 {
            Sentiment::Positive
        } else if rating <= 2 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        };
    }

    match record.action {
        InteractionAction::Feedback => {
            let extra = record.extra.clone().unwrap_or_default();
            if extra.would_watch_again == Some(true) {
                Sentiment::Positive
            } else if tags_contain_marker(&extra.quick_tags, &NEGATIVE_TAG_MARKERS) {
                Sentiment::Negative
            } else if tags_contain_marker(&extra.quick_tags, &POSITIVE_TAG_MARKERS) {
                Sentiment::Positive
            } else {
                Sentiment::Neutral
            }
        }
        InteractionAction::Like => Sentiment::Positive,
        InteractionAction::Dislike | InteractionAction::Skip => Sentiment::Negative,
        _ => Sentiment::Neutral,
    }
}

/// Converts a bounded window of interactions into weighted taste signals and
/// exclusion sets
pub fn extract_signals(interactions: &[InteractionRecord], now: DateTime<Utc>) -> TasteSignals {
    let mut positive_genres = ScoreMap::default();
    let mut negative_genres = ScoreMap::default();
    let mut positive_tags = ScoreMap::default();
    let mut negative_tags = ScoreMap::default();
    let mut positive_notes: Vec<WeightedNote> = Vec::new();
    let mut negative_notes: Vec<WeightedNote> = Vec::new();
    let mut hard_excluded: Vec<ExcludedTitle> = Vec::new();
    let mut soft_excluded: Vec<ExcludedTitle> = Vec::new();
    let mut hard_seen = std::collections::HashSet::new();
    let mut soft_seen = std::collections::HashSet::new();

    for record in interactions {
        let age_days = (now - record.created_at).num_days();
        let weight = recency_weight(age_days);
        let sentiment = derive_sentiment(record);
        let extra = record.extra.clone().unwrap_or_default();

        match sentiment {
            Sentiment::Positive => {
                for genre in &record.genres {
                    positive_genres.add(genre, weight);
                }
                for tag in &extra.quick_tags {
                    positive_tags.add(tag, weight);
                }
                if let Some(note) = &extra.note {
                    positive_notes.push(WeightedNote {
                        text: note.clone(),
                        weight,
                    });
                }
            }
            Sentiment::Negative => {
                for genre in &record.genres {
                    negative_genres.add(genre, weight);
                }
                for tag in &extra.quick_tags {
                    negative_tags.add(tag, weight);
                }
                if let Some(note) = &extra.note {
                    negative_notes.push(WeightedNote {
                        text: note.clone(),
                        weight,
                    });
                }
            }
            Sentiment::Neutral => {}
        }

        // Exclusion classification. Negative sentiment wins over the
        // watched/middle-rating soft rule.
        let normalized = normalize_title(&record.title);
        let excluded = ExcludedTitle {
            display: record.title.clone(),
            normalized: normalized.clone(),
            identity_key: crate::models::identity_key(record.tmdb_type, record.tmdb_id),
        };
        // An unnamed interaction still carries a catalog identity; dedup on
        // the identity key when the name normalizes to nothing.
        let dedup_key = if normalized.is_empty() {
            excluded.identity_key.clone()
        } else {
            normalized
        };
        if sentiment == Sentiment::Negative {
            if hard_seen.insert(dedup_key) {
                hard_excluded.push(excluded);
            }
        } else if record.action == InteractionAction::Complete || record.rating == Some(3) {
            if soft_seen.insert(dedup_key) {
                soft_excluded.push(excluded);
            }
        }
    }

    let rank_notes = |mut notes: Vec<WeightedNote>| -> Vec<String> {
        notes.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        notes.into_iter().take(TOP_NOTES).map(|n| n.text).collect()
    };

    TasteSignals {
        positive_genres: positive_genres.top(TOP_GENRES),
        negative_genres: negative_genres.top(TOP_GENRES),
        positive_tags: positive_tags.top(TOP_TAGS),
        negative_tags: negative_tags.top(TOP_TAGS),
        positive_notes: rank_notes(positive_notes),
        negative_notes: rank_notes(negative_notes),
        hard_excluded,
        soft_excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, InteractionExtra};
    use chrono::Duration;
    use uuid::Uuid;

    fn record(
        title: &str,
        action: InteractionAction,
        rating: Option<i16>,
        extra: Option<InteractionExtra>,
        age_days: i64,
        now: DateTime<Utc>,
    ) -> InteractionRecord {
        InteractionRecord {
            id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            tmdb_id: title.len() as i64,
            tmdb_type: ContentType::Movie,
            title: title.to_string(),
            genres: vec!["Drama".to_string()],
            action,
            rating,
            extra,
            created_at: now - Duration::days(age_days),
        }
    }

    #[test]
    fn test_recency_weight_buckets() {
        assert_eq!(recency_weight(0), 1.0);
        assert_eq!(recency_weight(7), 1.0);
        assert_eq!(recency_weight(8), 0.5);
        assert_eq!(recency_weight(30), 0.5);
        assert_eq!(recency_weight(31), 0.25);
        assert_eq!(recency_weight(119), 0.25);
    }

    #[test]
    fn test_weight_monotonicity_for_identical_sentiment() {
        // Two likes on the same genre, 3 days apart vs 40 days apart: the
        // fresher interaction must contribute strictly more weight.
        let now = Utc::now();
        let fresh = extract_signals(
            &[record("A", InteractionAction::Like, None, None, 3, now)],
            now,
        );
        let stale = extract_signals(
            &[record("B", InteractionAction::Like, None, None, 40, now)],
            now,
        );
        // Both rank Drama first; compare raw accumulated weight instead.
        let mut fresh_map = ScoreMap::default();
        fresh_map.add("Drama", recency_weight(3));
        let mut stale_map = ScoreMap::default();
        stale_map.add("Drama", recency_weight(40));
        assert!(fresh_map.weight("Drama") > stale_map.weight("Drama"));
        assert_eq!(fresh.positive_genres, vec!["Drama".to_string()]);
        assert_eq!(stale.positive_genres, vec!["Drama".to_string()]);
    }

    #[test]
    fn test_rating_overrides_action_sentiment() {
        let now = Utc::now();
        // A "like" with a 1-star rating is negative
        let r = record("X", InteractionAction::Like, Some(1), None, 1, now);
        assert_eq!(derive_sentiment(&r), Sentiment::Negative);
        // A "dislike" with a 5-star rating is positive
        let r = record("X", InteractionAction::Dislike, Some(5), None, 1, now);
        assert_eq!(derive_sentiment(&r), Sentiment::Positive);
        // Rating of exactly 3 is neutral
        let r = record("X", InteractionAction::Like, Some(3), None, 1, now);
        assert_eq!(derive_sentiment(&r), Sentiment::Neutral);
    }

    #[test]
    fn test_feedback_sentiment_resolution() {
        let now = Utc::now();
        let wwa = InteractionExtra {
            would_watch_again: Some(true),
            ..Default::default()
        };
        let r = record("X", InteractionAction::Feedback, None, Some(wwa), 1, now);
        assert_eq!(derive_sentiment(&r), Sentiment::Positive);

        let negative = InteractionExtra {
            quick_tags: vec!["way too slow for me".to_string()],
            ..Default::default()
        };
        let r = record(
            "X",
            InteractionAction::Feedback,
            None,
            Some(negative),
            1,
            now,
        );
        assert_eq!(derive_sentiment(&r), Sentiment::Negative);

        let positive = InteractionExtra {
            quick_tags: vec!["amazing cast".to_string()],
            ..Default::default()
        };
        let r = record(
            "X",
            InteractionAction::Feedback,
            None,
            Some(positive),
            1,
            now,
        );
        assert_eq!(derive_sentiment(&r), Sentiment::Positive);

        let r = record("X", InteractionAction::Feedback, None, None, 1, now);
        assert_eq!(derive_sentiment(&r), Sentiment::Neutral);
    }

    #[test]
    fn test_dislike_becomes_hard_exclusion() {
        let now = Utc::now();
        let signals = extract_signals(
            &[record("Bad One", InteractionAction::Dislike, None, None, 1, now)],
            now,
        );
        assert_eq!(signals.hard_excluded.len(), 1);
        assert_eq!(signals.hard_excluded[0].normalized, "bad one");
        assert!(signals.soft_excluded.is_empty());
    }

    #[test]
    fn test_unnamed_dislike_is_excluded_by_identity_key() {
        let now = Utc::now();
        let mut r = record("", InteractionAction::Dislike, None, None, 1, now);
        r.tmdb_id = 42;
        let signals = extract_signals(&[r], now);
        assert_eq!(signals.hard_excluded.len(), 1);
        assert_eq!(signals.hard_excluded[0].identity_key, "movie:42");
        assert!(signals.hard_excluded[0].normalized.is_empty());
    }

    #[test]
    fn test_complete_becomes_soft_exclusion() {
        let now = Utc::now();
        let signals = extract_signals(
            &[record("Seen It", InteractionAction::Complete, None, None, 1, now)],
            now,
        );
        assert!(signals.hard_excluded.is_empty());
        assert_eq!(signals.soft_excluded.len(), 1);
        assert_eq!(signals.soft_excluded[0].normalized, "seen it");
    }

    #[test]
    fn test_soft_exclusion_rating_boundary() {
        // Intentional boundary: exactly 3 soft-excludes, 4 does not.
        let now = Utc::now();
        let signals = extract_signals(
            &[record("Middle", InteractionAction::Open, Some(3), None, 1, now)],
            now,
        );
        assert_eq!(signals.soft_excluded.len(), 1);

        let signals = extract_signals(
            &[record("Liked", InteractionAction::Open, Some(4), None, 1, now)],
            now,
        );
        assert!(signals.soft_excluded.is_empty());
        assert!(signals.hard_excluded.is_empty());
    }

    #[test]
    fn test_negative_complete_is_hard_not_soft() {
        let now = Utc::now();
        let signals = extract_signals(
            &[record(
                "Hated It",
                InteractionAction::Complete,
                Some(1),
                None,
                1,
                now,
            )],
            now,
        );
        assert_eq!(signals.hard_excluded.len(), 1);
        assert!(signals.soft_excluded.is_empty());
    }

    #[test]
    fn test_score_map_tie_break_is_first_seen() {
        let mut map = ScoreMap::default();
        map.add("Crime", 0.5);
        map.add("Drama", 0.5);
        map.add("Comedy", 1.0);
        assert_eq!(
            map.top(3),
            vec![
                "Comedy".to_string(),
                "Crime".to_string(),
                "Drama".to_string()
            ]
        );
    }

    #[test]
    fn test_top_k_truncates() {
        let mut map = ScoreMap::default();
        for i in 0..15 {
            map.add(&format!("g{}", i), 1.0 + i as f64);
        }
        let top = map.top(10);
        assert_eq!(top.len(), 10);
        assert_eq!(top[0], "g14");
    }

    #[test]
    fn test_notes_ranked_by_weight() {
        let now = Utc::now();
        let old_note = InteractionExtra {
            note: Some("old favorite".to_string()),
            ..Default::default()
        };
        let new_note = InteractionExtra {
            note: Some("new favorite".to_string()),
            ..Default::default()
        };
        let signals = extract_signals(
            &[
                record("A", InteractionAction::Like, None, Some(old_note), 60, now),
                record("B", InteractionAction::Like, None, Some(new_note), 2, now),
            ],
            now,
        );
        assert_eq!(
            signals.positive_notes,
            vec!["new favorite".to_string(), "old favorite".to_string()]
        );
    }
}
