use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Content type in the external catalog
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Tv,
}

impl Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Movie => write!(f, "movie"),
            ContentType::Tv => write!(f, "tv"),
        }
    }
}

impl ContentType {
    /// Parses a generator-provided content-type hint
    ///
    /// Generators phrase the type loosely ("film", "series", "show"), so this
    /// accepts common variants rather than the strict wire form.
    pub fn parse_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_lowercase().as_str() {
            "movie" | "film" => Some(ContentType::Movie),
            "tv" | "series" | "show" | "tv_show" | "tvshow" => Some(ContentType::Tv),
            _ => None,
        }
    }
}

/// Catalog identity key: `"{content_type}:{tmdb_id}"`
///
/// Uniquely identifies a title in the external catalog regardless of how the
/// generator phrased its name.
pub fn identity_key(content_type: ContentType, tmdb_id: i64) -> String {
    format!("{}:{}", content_type, tmdb_id)
}

/// Canonical catalog entry, unique per (tmdb_id, content_type)
///
/// Created on first resolution, refreshed in place when enrichment fields are
/// missing. Never duplicated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Title {
    pub id: Uuid,
    pub tmdb_id: i64,
    pub tmdb_type: ContentType,
    pub title: String,
    pub overview: Option<String>,
    pub genres: Vec<String>,
    pub year: Option<i32>,
    pub runtime_minutes: Option<i32>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub imdb_id: Option<String>,
    pub rating: Option<f64>,
    pub age_rating: Option<String>,
    pub director: Option<String>,
    pub cast: Vec<String>,
    /// Raw provider payload archived for debugging
    pub raw_payload: Option<serde_json::Value>,
}

impl Title {
    /// Identity key for exclusion matching
    pub fn identity_key(&self) -> String {
        identity_key(self.tmdb_type, self.tmdb_id)
    }

    /// Whether the core enrichment fields are already populated
    ///
    /// Cache-first resolution skips the detail fetch when this holds.
    pub fn is_enriched(&self) -> bool {
        self.overview.is_some() && self.runtime_minutes.is_some() && self.director.is_some()
    }
}

/// How a title is available on one provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityType {
    Flatrate,
    Rent,
    Buy,
    Free,
    Ads,
}

impl Display for AvailabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityType::Flatrate => write!(f, "flatrate"),
            AvailabilityType::Rent => write!(f, "rent"),
            AvailabilityType::Buy => write!(f, "buy"),
            AvailabilityType::Free => write!(f, "free"),
            AvailabilityType::Ads => write!(f, "ads"),
        }
    }
}

/// One watch-provider row, keyed by (title, provider, region, type)
///
/// Refreshed delete-then-insert per title per region whenever new provider
/// data is fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchProvider {
    pub provider_name: String,
    pub logo_path: Option<String>,
    pub availability_type: AvailabilityType,
    pub region: String,
}

/// Region-scoped provider availability for one title
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TitleAvailability {
    pub providers: Vec<WatchProvider>,
    /// Deep link into the catalog's watch page, if the catalog supplies one
    pub link: Option<String>,
}

/// Profile of the requesting user, as stored by the storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: String,
    pub daily_limit: i64,
    pub created_at: DateTime<Utc>,
}
