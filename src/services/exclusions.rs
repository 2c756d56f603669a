use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::models::{identity_key, PastRecommendation};
use crate::services::signals::TasteSignals;

/// Normalizes a title name for duplicate matching
///
/// Lowercase, strip everything outside `[a-z0-9 ]`, collapse whitespace, trim.
/// Catches generator-invented near-duplicates ("Se7en" vs "Seven", trailing
/// punctuation, etc.); exact catalog matches are caught by identity keys.
pub fn normalize_title(raw: &str) -> String {
    let stripped: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || c.is_whitespace())
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The session's working exclusion state: normalized names and catalog
/// identity keys
#[derive(Debug, Default)]
struct ExclusionInner {
    names: HashSet<String>,
    identity_keys: HashSet<String>,
}

/// Shared exclusion/chosen set for one session
///
/// Both the generator's exclusion prompt and the resolver's deduplication
/// read and write this set; concurrent resolution branches share one instance
/// (never a copy) so two branches cannot both accept the same title.
#[derive(Debug, Clone, Default)]
pub struct SharedExclusions {
    inner: Arc<Mutex<ExclusionInner>>,
}

impl SharedExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_name(&self, normalized: &str) -> bool {
        self.inner.lock().unwrap().names.contains(normalized)
    }

    pub fn contains_key(&self, identity_key: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .identity_keys
            .contains(identity_key)
    }

    /// Registers a normalized name without claiming
    pub fn insert_name(&self, normalized: String) {
        if !normalized.is_empty() {
            self.inner.lock().unwrap().names.insert(normalized);
        }
    }

    /// Registers an identity key without claiming
    pub fn insert_key(&self, identity_key: String) {
        self.inner
            .lock()
            .unwrap()
            .identity_keys
            .insert(identity_key);
    }

    /// Atomic check-and-claim for one resolved candidate
    ///
    /// Fails if any of the names or the key is already present; otherwise
    /// inserts all of them in the same critical section. This is the only
    /// write path the resolver's enrichment phase uses, so two concurrent
    /// candidates can never both claim one title.
    pub fn claim(&self, names: &[String], identity_key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.identity_keys.contains(identity_key) {
            return false;
        }
        if names
            .iter()
            .any(|n| !n.is_empty() && inner.names.contains(n))
        {
            return false;
        }
        for name in names {
            if !name.is_empty() {
                inner.names.insert(name.clone());
            }
        }
        inner.identity_keys.insert(identity_key.to_string());
        true
    }
}

/// Exclusion context for one session: display titles for prompting plus the
/// shared working set for matching
#[derive(Debug, Clone)]
pub struct ExclusionContext {
    /// Never recommend again (negative sentiment)
    pub hard_titles: Vec<String>,
    /// Do not repeat verbatim; sequels/variants stay eligible
    pub soft_titles: Vec<String>,
    pub shared: SharedExclusions,
}

/// Merges signal-derived exclusions with recently recommended titles into the
/// session's working set
pub fn build_exclusions(
    signals: &TasteSignals,
    past_recommendations: &[PastRecommendation],
) -> ExclusionContext {
    let shared = SharedExclusions::new();
    let mut hard_titles = Vec::new();
    let mut soft_titles = Vec::new();
    let mut seen = HashSet::new();

    // Unnamed titles dedup on their identity key and never reach the prompt
    // lists; the matching sets still get the key.
    let dedup_key = |normalized: &str, key: &str| -> String {
        if normalized.is_empty() {
            key.to_string()
        } else {
            normalized.to_string()
        }
    };

    for excluded in &signals.hard_excluded {
        shared.insert_name(excluded.normalized.clone());
        shared.insert_key(excluded.identity_key.clone());
        if seen.insert(dedup_key(&excluded.normalized, &excluded.identity_key))
            && !excluded.display.trim().is_empty()
        {
            hard_titles.push(excluded.display.clone());
        }
    }

    for excluded in &signals.soft_excluded {
        shared.insert_name(excluded.normalized.clone());
        shared.insert_key(excluded.identity_key.clone());
        if seen.insert(dedup_key(&excluded.normalized, &excluded.identity_key))
            && !excluded.display.trim().is_empty()
        {
            soft_titles.push(excluded.display.clone());
        }
    }

    for past in past_recommendations {
        let normalized = normalize_title(&past.title);
        let key = identity_key(past.tmdb_type, past.tmdb_id);
        shared.insert_name(normalized.clone());
        shared.insert_key(key.clone());
        if seen.insert(dedup_key(&normalized, &key)) && !past.title.trim().is_empty() {
            soft_titles.push(past.title.clone());
        }
    }

    ExclusionContext {
        hard_titles,
        soft_titles,
        shared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::services::signals::ExcludedTitle;

    #[test]
    fn test_normalize_title_basic() {
        assert_eq!(normalize_title("The Matrix"), "the matrix");
        assert_eq!(normalize_title("  Blade Runner 2049  "), "blade runner 2049");
    }

    #[test]
    fn test_normalize_title_strips_punctuation() {
        assert_eq!(normalize_title("WALL-E"), "walle");
        assert_eq!(normalize_title("Se7en."), "se7en");
        assert_eq!(
            normalize_title("Spider-Man: No Way Home"),
            "spiderman no way home"
        );
    }

    #[test]
    fn test_normalize_title_collapses_whitespace() {
        assert_eq!(normalize_title("The   Godfather,  Part II"), "the godfather part ii");
    }

    #[test]
    fn test_claim_rejects_duplicate_name() {
        let shared = SharedExclusions::new();
        assert!(shared.claim(&["the matrix".to_string()], "movie:603"));
        assert!(!shared.claim(&["the matrix".to_string()], "movie:604"));
    }

    #[test]
    fn test_claim_rejects_duplicate_key() {
        let shared = SharedExclusions::new();
        assert!(shared.claim(&["the matrix".to_string()], "movie:603"));
        // Same catalog identity phrased differently by the generator
        assert!(!shared.claim(&["matrix the".to_string()], "movie:603"));
    }

    #[test]
    fn test_claim_is_atomic_across_threads() {
        let shared = SharedExclusions::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let shared = shared.clone();
            handles.push(std::thread::spawn(move || {
                shared.claim(&["dune".to_string()], "movie:438631")
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_unnamed_exclusion_registers_identity_key() {
        let signals = TasteSignals {
            hard_excluded: vec![ExcludedTitle {
                display: String::new(),
                normalized: String::new(),
                identity_key: "movie:42".to_string(),
            }],
            ..Default::default()
        };

        let ctx = build_exclusions(&signals, &[]);
        // Still matchable by catalog identity, but no blank prompt entry
        assert!(ctx.shared.contains_key("movie:42"));
        assert!(ctx.hard_titles.is_empty());
    }

    #[test]
    fn test_build_exclusions_merges_all_sources() {
        let signals = TasteSignals {
            hard_excluded: vec![ExcludedTitle {
                display: "Bad Movie".to_string(),
                normalized: "bad movie".to_string(),
                identity_key: "movie:1".to_string(),
            }],
            soft_excluded: vec![ExcludedTitle {
                display: "Watched Show".to_string(),
                normalized: "watched show".to_string(),
                identity_key: "tv:2".to_string(),
            }],
            ..Default::default()
        };
        let past = vec![PastRecommendation {
            title: "Old Pick".to_string(),
            tmdb_id: 3,
            tmdb_type: ContentType::Movie,
        }];

        let ctx = build_exclusions(&signals, &past);
        assert_eq!(ctx.hard_titles, vec!["Bad Movie".to_string()]);
        assert_eq!(
            ctx.soft_titles,
            vec!["Watched Show".to_string(), "Old Pick".to_string()]
        );
        assert!(ctx.shared.contains_name("bad movie"));
        assert!(ctx.shared.contains_name("old pick"));
        assert!(ctx.shared.contains_key("movie:1"));
        assert!(ctx.shared.contains_key("tv:2"));
        assert!(ctx.shared.contains_key("movie:3"));
    }
}
