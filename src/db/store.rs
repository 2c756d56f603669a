use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ContentType, InteractionAction, InteractionExtra, InteractionRecord, PastRecommendation,
    Profile, RecommendationItem, RecommendationSession, Title, WatchProvider,
};

/// Result of registering a session against the daily usage counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageCount {
    /// Sessions counted for this profile today, including this one if allowed
    pub used_today: i64,
    /// False when the daily cap was already reached
    pub allowed: bool,
}

/// Storage collaborator boundary
///
/// Everything the session pipeline needs from persistent storage, behind a
/// trait so the pipeline is testable with in-memory fakes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolves a bearer token to the authenticated user id
    async fn authenticate(&self, bearer_token: &str) -> AppResult<Option<Uuid>>;

    /// Fetches a profile only if it is owned by the given user (fails closed)
    async fn fetch_profile(&self, profile_id: Uuid, user_id: Uuid) -> AppResult<Option<Profile>>;

    /// Interaction history within the recency window, newest first, capped
    async fn fetch_interactions(
        &self,
        profile_id: Uuid,
        window_days: i32,
        limit: i64,
    ) -> AppResult<Vec<InteractionRecord>>;

    /// Titles recommended to this profile recently, bounded by session and
    /// item counts
    async fn fetch_recent_recommendations(
        &self,
        profile_id: Uuid,
        window_days: i32,
        max_sessions: i64,
        max_items: i64,
    ) -> AppResult<Vec<PastRecommendation>>;

    /// Looks up a cached catalog title by identity
    async fn find_title(&self, tmdb_type: ContentType, tmdb_id: i64) -> AppResult<Option<Title>>;

    /// Idempotent upsert by (tmdb_id, type); fills only missing enrichment
    /// fields on conflict and returns the canonical stored row
    async fn upsert_title(&self, title: &Title) -> AppResult<Title>;

    /// Delete-then-insert refresh of provider rows for one title + region
    async fn replace_watch_providers(
        &self,
        title_id: Uuid,
        region: &str,
        providers: &[WatchProvider],
        link: Option<&str>,
    ) -> AppResult<()>;

    /// Persists the session and its items in one transaction
    async fn insert_session(
        &self,
        session: &RecommendationSession,
        items: &[RecommendationItem],
    ) -> AppResult<()>;

    /// Backfills the session's top title after finalize
    async fn backfill_top_title(&self, session_id: Uuid, title_id: Uuid) -> AppResult<()>;

    /// Registers a session against today's usage counter
    ///
    /// Idempotent by session id: replaying the same session id never double
    /// counts. Returns `allowed = false` without counting when the cap is
    /// already reached.
    async fn register_usage(
        &self,
        profile_id: Uuid,
        session_id: Uuid,
        daily_limit: i64,
    ) -> AppResult<UsageCount>;
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn content_type_from_str(s: &str) -> AppResult<ContentType> {
    match s {
        "movie" => Ok(ContentType::Movie),
        "tv" => Ok(ContentType::Tv),
        other => Err(AppError::Internal(format!(
            "Unknown content type in storage: {}",
            other
        ))),
    }
}

/// Decides one usage registration given the current counter state
///
/// Replays of an already-registered session are allowed without counting
/// again; new sessions at the cap are refused without counting.
fn usage_decision(already_registered: bool, used_today: i64, daily_limit: i64) -> UsageCount {
    if already_registered {
        return UsageCount {
            used_today,
            allowed: true,
        };
    }
    if used_today >= daily_limit {
        return UsageCount {
            used_today,
            allowed: false,
        };
    }
    UsageCount {
        used_today: used_today + 1,
        allowed: true,
    }
}

fn json_to_string_vec(value: Option<serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn row_to_title(row: &PgRow) -> AppResult<Title> {
    Ok(Title {
        id: row.try_get("id")?,
        tmdb_id: row.try_get("tmdb_id")?,
        tmdb_type: content_type_from_str(row.try_get::<String, _>("tmdb_type")?.as_str())?,
        title: row.try_get("title")?,
        overview: row.try_get("overview")?,
        genres: json_to_string_vec(row.try_get("genres")?),
        year: row.try_get("year")?,
        runtime_minutes: row.try_get("runtime_minutes")?,
        poster_path: row.try_get("poster_path")?,
        backdrop_path: row.try_get("backdrop_path")?,
        imdb_id: row.try_get("imdb_id")?,
        rating: row.try_get("rating")?,
        age_rating: row.try_get("age_rating")?,
        director: row.try_get("director")?,
        cast: json_to_string_vec(row.try_get("cast_members")?),
        raw_payload: row.try_get("raw_payload")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn authenticate(&self, bearer_token: &str) -> AppResult<Option<Uuid>> {
        let row = sqlx::query("SELECT user_id FROM auth_tokens WHERE token = $1")
            .bind(bearer_token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("user_id")))
    }

    async fn fetch_profile(&self, profile_id: Uuid, user_id: Uuid) -> AppResult<Option<Profile>> {
        let row = sqlx::query(
            "SELECT id, user_id, tier, daily_limit, created_at
             FROM profiles WHERE id = $1 AND user_id = $2",
        )
        .bind(profile_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Profile {
            id: r.get("id"),
            user_id: r.get("user_id"),
            tier: r.get("tier"),
            daily_limit: r.get("daily_limit"),
            created_at: r.get("created_at"),
        }))
    }

    async fn fetch_interactions(
        &self,
        profile_id: Uuid,
        window_days: i32,
        limit: i64,
    ) -> AppResult<Vec<InteractionRecord>> {
        let rows = sqlx::query(
            "SELECT i.id, i.profile_id, i.tmdb_id, i.tmdb_type, i.action, i.rating,
                    i.extra, i.created_at,
                    COALESCE(t.title, '') AS title, t.genres AS genres
             FROM interactions i
             LEFT JOIN titles t ON t.tmdb_id = i.tmdb_id AND t.tmdb_type = i.tmdb_type
             WHERE i.profile_id = $1
               AND i.created_at > now() - make_interval(days => $2)
             ORDER BY i.created_at DESC
             LIMIT $3",
        )
        .bind(profile_id)
        .bind(window_days)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let action: String = row.try_get("action")?;
            let action: InteractionAction = serde_json::from_value(serde_json::Value::String(
                action,
            ))
            .map_err(|e| AppError::Internal(format!("Unknown interaction action: {}", e)))?;
            let extra: Option<serde_json::Value> = row.try_get("extra")?;
            let extra: Option<InteractionExtra> =
                extra.and_then(|v| serde_json::from_value(v).ok());

            records.push(InteractionRecord {
                id: row.try_get("id")?,
                profile_id: row.try_get("profile_id")?,
                tmdb_id: row.try_get("tmdb_id")?,
                tmdb_type: content_type_from_str(
                    row.try_get::<String, _>("tmdb_type")?.as_str(),
                )?,
                title: row.try_get("title")?,
                genres: json_to_string_vec(row.try_get("genres")?),
                action,
                rating: row.try_get("rating")?,
                extra,
                created_at: row.try_get("created_at")?,
            });
        }

        Ok(records)
    }

    async fn fetch_recent_recommendations(
        &self,
        profile_id: Uuid,
        window_days: i32,
        max_sessions: i64,
        max_items: i64,
    ) -> AppResult<Vec<PastRecommendation>> {
        let rows = sqlx::query(
            "SELECT t.title, t.tmdb_id, t.tmdb_type
             FROM recommendation_items ri
             JOIN recommendation_sessions rs ON rs.id = ri.session_id
             JOIN titles t ON t.id = ri.title_id
             WHERE rs.profile_id = $1
               AND rs.created_at > now() - make_interval(days => $2)
               AND rs.id IN (
                   SELECT id FROM recommendation_sessions
                   WHERE profile_id = $1
                   ORDER BY created_at DESC
                   LIMIT $3
               )
             ORDER BY rs.created_at DESC, ri.rank ASC
             LIMIT $4",
        )
        .bind(profile_id)
        .bind(window_days)
        .bind(max_sessions)
        .bind(max_items)
        .fetch_all(&self.pool)
        .await?;

        let mut past = Vec::with_capacity(rows.len());
        for row in rows {
            past.push(PastRecommendation {
                title: row.try_get("title")?,
                tmdb_id: row.try_get("tmdb_id")?,
                tmdb_type: content_type_from_str(
                    row.try_get::<String, _>("tmdb_type")?.as_str(),
                )?,
            });
        }
        Ok(past)
    }

    async fn find_title(&self, tmdb_type: ContentType, tmdb_id: i64) -> AppResult<Option<Title>> {
        let row = sqlx::query(
            "SELECT id, tmdb_id, tmdb_type, title, overview, genres, year, runtime_minutes,
                    poster_path, backdrop_path, imdb_id, rating, age_rating, director,
                    cast_members, raw_payload
             FROM titles WHERE tmdb_id = $1 AND tmdb_type = $2",
        )
        .bind(tmdb_id)
        .bind(tmdb_type.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_title).transpose()
    }

    async fn upsert_title(&self, title: &Title) -> AppResult<Title> {
        // On conflict, only missing enrichment fields are filled in; populated
        // fields are never overwritten (the title is refreshed, not duplicated).
        let row = sqlx::query(
            "INSERT INTO titles (id, tmdb_id, tmdb_type, title, overview, genres, year,
                                 runtime_minutes, poster_path, backdrop_path, imdb_id,
                                 rating, age_rating, director, cast_members, raw_payload)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             ON CONFLICT (tmdb_id, tmdb_type) DO UPDATE SET
                 overview = COALESCE(titles.overview, EXCLUDED.overview),
                 genres = CASE WHEN titles.genres = '[]'::jsonb THEN EXCLUDED.genres ELSE titles.genres END,
                 year = COALESCE(titles.year, EXCLUDED.year),
                 runtime_minutes = COALESCE(titles.runtime_minutes, EXCLUDED.runtime_minutes),
                 poster_path = COALESCE(titles.poster_path, EXCLUDED.poster_path),
                 backdrop_path = COALESCE(titles.backdrop_path, EXCLUDED.backdrop_path),
                 imdb_id = COALESCE(titles.imdb_id, EXCLUDED.imdb_id),
                 rating = COALESCE(titles.rating, EXCLUDED.rating),
                 age_rating = COALESCE(titles.age_rating, EXCLUDED.age_rating),
                 director = COALESCE(titles.director, EXCLUDED.director),
                 cast_members = CASE WHEN titles.cast_members = '[]'::jsonb THEN EXCLUDED.cast_members ELSE titles.cast_members END,
                 raw_payload = COALESCE(titles.raw_payload, EXCLUDED.raw_payload)
             RETURNING id, tmdb_id, tmdb_type, title, overview, genres, year, runtime_minutes,
                       poster_path, backdrop_path, imdb_id, rating, age_rating, director,
                       cast_members, raw_payload",
        )
        .bind(title.id)
        .bind(title.tmdb_id)
        .bind(title.tmdb_type.to_string())
        .bind(&title.title)
        .bind(&title.overview)
        .bind(serde_json::to_value(&title.genres).unwrap_or_default())
        .bind(title.year)
        .bind(title.runtime_minutes)
        .bind(&title.poster_path)
        .bind(&title.backdrop_path)
        .bind(&title.imdb_id)
        .bind(title.rating)
        .bind(&title.age_rating)
        .bind(&title.director)
        .bind(serde_json::to_value(&title.cast).unwrap_or_default())
        .bind(&title.raw_payload)
        .fetch_one(&self.pool)
        .await?;

        row_to_title(&row)
    }

    async fn replace_watch_providers(
        &self,
        title_id: Uuid,
        region: &str,
        providers: &[WatchProvider],
        link: Option<&str>,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM watch_providers WHERE title_id = $1 AND region = $2")
            .bind(title_id)
            .bind(region)
            .execute(&mut *tx)
            .await?;

        for provider in providers {
            sqlx::query(
                "INSERT INTO watch_providers
                     (title_id, provider_name, region, availability_type, logo_path, link)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (title_id, provider_name, region, availability_type) DO NOTHING",
            )
            .bind(title_id)
            .bind(&provider.provider_name)
            .bind(region)
            .bind(provider.availability_type.to_string())
            .bind(&provider.logo_path)
            .bind(link)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_session(
        &self,
        session: &RecommendationSession,
        items: &[RecommendationItem],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let session_type = serde_json::to_value(session.session_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        sqlx::query(
            "INSERT INTO recommendation_sessions
                 (id, profile_id, session_type, mood_input, mood_label, mood_tags,
                  raw_generator_response, top_title_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(session.id)
        .bind(session.profile_id)
        .bind(session_type)
        .bind(&session.mood_input)
        .bind(&session.mood_label)
        .bind(serde_json::to_value(&session.mood_tags).unwrap_or_default())
        .bind(&session.raw_generator_response)
        .bind(session.top_title_id)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO recommendation_items
                     (id, session_id, title_id, rank, reason, match_score, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(item.id)
            .bind(item.session_id)
            .bind(item.title_id)
            .bind(item.rank)
            .bind(&item.reason)
            .bind(item.match_score)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn backfill_top_title(&self, session_id: Uuid, title_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE recommendation_sessions SET top_title_id = $1 WHERE id = $2")
            .bind(title_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn register_usage(
        &self,
        profile_id: Uuid,
        session_id: Uuid,
        daily_limit: i64,
    ) -> AppResult<UsageCount> {
        let today = Utc::now().date_naive();
        let mut tx = self.pool.begin().await?;

        // Replays of an already-registered session id are always allowed and
        // never counted twice.
        let existing = sqlx::query("SELECT 1 AS found FROM usage_events WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;

        let used: i64 = sqlx::query(
            "SELECT count(*) AS used FROM usage_events WHERE profile_id = $1 AND day = $2",
        )
        .bind(profile_id)
        .bind(today)
        .fetch_one(&mut *tx)
        .await?
        .try_get("used")?;

        let decision = usage_decision(existing.is_some(), used, daily_limit);

        if existing.is_some() {
            tx.commit().await?;
            return Ok(decision);
        }
        if !decision.allowed {
            tx.rollback().await?;
            return Ok(decision);
        }

        sqlx::query(
            "INSERT INTO usage_events (profile_id, session_id, day)
             VALUES ($1, $2, $3)
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(profile_id)
        .bind(session_id)
        .bind(today)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(decision)
    }
}
