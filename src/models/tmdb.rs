use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{AvailabilityType, TitleAvailability, WatchProvider};

// ============================================================================
// TMDB API Types
// ============================================================================

/// TMDB search response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSearchResponse {
    #[serde(default)]
    pub results: Vec<TmdbSearchHit>,
}

/// One TMDB search result
///
/// Movies carry `title`/`release_date`, TV carries `name`/`first_air_date`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSearchHit {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
}

impl TmdbSearchHit {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }

    pub fn year(&self) -> Option<i32> {
        parse_year(
            self.release_date
                .as_deref()
                .or(self.first_air_date.as_deref()),
        )
    }
}

/// TMDB title details with credits appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbDetails {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
    /// Movie runtime
    #[serde(default)]
    pub runtime: Option<i32>,
    /// TV episode runtimes
    #[serde(default)]
    pub episode_run_time: Vec<i32>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub credits: Option<TmdbCredits>,
    /// Movie certifications per region
    #[serde(default)]
    pub release_dates: Option<TmdbReleaseDates>,
    /// TV certifications per region
    #[serde(default)]
    pub content_ratings: Option<TmdbContentRatings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbGenre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TmdbCredits {
    #[serde(default)]
    pub cast: Vec<TmdbCastMember>,
    #[serde(default)]
    pub crew: Vec<TmdbCrewMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbCastMember {
    pub name: String,
    #[serde(default)]
    pub order: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbCrewMember {
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TmdbReleaseDates {
    #[serde(default)]
    pub results: Vec<TmdbReleaseDatesEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbReleaseDatesEntry {
    pub iso_3166_1: String,
    #[serde(default)]
    pub release_dates: Vec<TmdbCertification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbCertification {
    #[serde(default)]
    pub certification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TmdbContentRatings {
    #[serde(default)]
    pub results: Vec<TmdbContentRating>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbContentRating {
    pub iso_3166_1: String,
    #[serde(default)]
    pub rating: String,
}

impl TmdbDetails {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }

    pub fn year(&self) -> Option<i32> {
        parse_year(
            self.release_date
                .as_deref()
                .or(self.first_air_date.as_deref()),
        )
    }

    /// Movie runtime, or the first episode runtime for TV
    pub fn runtime_minutes(&self) -> Option<i32> {
        self.runtime
            .or_else(|| self.episode_run_time.first().copied())
    }

    pub fn director(&self) -> Option<String> {
        self.credits.as_ref().and_then(|c| {
            c.crew
                .iter()
                .find(|m| m.job.as_deref() == Some("Director"))
                .map(|m| m.name.clone())
        })
    }

    /// Top-billed cast, in billing order
    pub fn top_cast(&self, limit: usize) -> Vec<String> {
        let Some(credits) = &self.credits else {
            return Vec::new();
        };
        let mut cast: Vec<&TmdbCastMember> = credits.cast.iter().collect();
        cast.sort_by_key(|m| m.order.unwrap_or(i32::MAX));
        cast.into_iter().take(limit).map(|m| m.name.clone()).collect()
    }

    /// Age certification for the given region, if published
    pub fn certification(&self, region: &str) -> Option<String> {
        if let Some(dates) = &self.release_dates {
            let cert = dates
                .results
                .iter()
                .find(|e| e.iso_3166_1 == region)
                .and_then(|e| {
                    e.release_dates
                        .iter()
                        .map(|c| c.certification.trim())
                        .find(|c| !c.is_empty())
                })
                .map(str::to_string);
            if cert.is_some() {
                return cert;
            }
        }
        self.content_ratings.as_ref().and_then(|ratings| {
            ratings
                .results
                .iter()
                .find(|r| r.iso_3166_1 == region && !r.rating.trim().is_empty())
                .map(|r| r.rating.trim().to_string())
        })
    }
}

/// TMDB watch-provider listing, keyed by region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbWatchProvidersResponse {
    #[serde(default)]
    pub results: HashMap<String, TmdbRegionProviders>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TmdbRegionProviders {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub flatrate: Vec<TmdbProviderEntry>,
    #[serde(default)]
    pub rent: Vec<TmdbProviderEntry>,
    #[serde(default)]
    pub buy: Vec<TmdbProviderEntry>,
    #[serde(default)]
    pub free: Vec<TmdbProviderEntry>,
    #[serde(default)]
    pub ads: Vec<TmdbProviderEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbProviderEntry {
    pub provider_name: String,
    #[serde(default)]
    pub logo_path: Option<String>,
}

impl TmdbWatchProvidersResponse {
    /// Flattens the listing for one region into provider rows
    pub fn for_region(&self, region: &str) -> TitleAvailability {
        let Some(entry) = self.results.get(region) else {
            return TitleAvailability::default();
        };

        let mut providers = Vec::new();
        let buckets = [
            (&entry.flatrate, AvailabilityType::Flatrate),
            (&entry.rent, AvailabilityType::Rent),
            (&entry.buy, AvailabilityType::Buy),
            (&entry.free, AvailabilityType::Free),
            (&entry.ads, AvailabilityType::Ads),
        ];
        for (bucket, availability_type) in buckets {
            for provider in bucket.iter() {
                providers.push(WatchProvider {
                    provider_name: provider.provider_name.clone(),
                    logo_path: provider.logo_path.clone(),
                    availability_type,
                    region: region.to_string(),
                });
            }
        }

        TitleAvailability {
            providers,
            link: entry.link.clone(),
        }
    }
}

fn parse_year(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(0..4)).and_then(|y| y.parse().ok())
}
