//! Movie recommendation provider — candidate lists for new voting sessions.
//!
//! ARCHITECTURE
//! ============
//! The provider sits behind the `Recommend` trait so the voting service
//! depends only on "give me up to N candidates for these member
//! preferences". The production implementation talks to the TMDB REST API;
//! tests inject a stub.
//!
//! The genre id→name catalog is built once at startup and passed into the
//! client as an immutable value. If the remote genre list is unreachable,
//! startup falls back to the built-in standard mapping with a warning
//! rather than refusing to boot.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

// =============================================================================
// TYPES
// =============================================================================

/// A candidate movie as stored in a session and shipped to clients.
/// Field names are camelCase on the wire; they are part of the client
/// contract inherited from the catalog API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub overview: String,
    pub poster_path: String,
    pub release_date: String,
    pub vote_average: f64,
    pub genres: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("catalog request failed: {0}")]
    Http(String),
    #[error("catalog api error: {0}")]
    Api(String),
}

impl crate::event::ErrorCode for RecommendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Http(_) => "E_CATALOG_HTTP",
            Self::Api(_) => "E_CATALOG_API",
        }
    }
}

/// Candidate source for new voting sessions.
///
/// `member_genres` holds one genre-preference list per group member; an
/// empty or all-empty slice is valid and falls back to popularity. The
/// result is ordered best-first and may hold fewer than `limit` entries,
/// including zero.
#[async_trait::async_trait]
pub trait Recommend: Send + Sync {
    async fn candidates(&self, member_genres: &[Vec<String>], limit: usize) -> Result<Vec<Movie>, RecommendError>;
}

// =============================================================================
// CONFIG
// =============================================================================

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

/// TMDB configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct TmdbConfig {
    pub api_key: String,
    pub base_url: String,
}

impl TmdbConfig {
    /// Load from `TMDB_API_KEY` (required) and `TMDB_BASE_URL` (optional).
    /// Returns `None` if the key is missing.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("TMDB_API_KEY").ok()?;
        let base_url = std::env::var("TMDB_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_TMDB_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Some(Self { api_key, base_url })
    }
}

// =============================================================================
// GENRE CATALOG
// =============================================================================

/// Immutable genre id→name lookup, fixed at startup.
#[derive(Debug, Clone)]
pub struct GenreCatalog {
    by_id: HashMap<i64, String>,
}

impl GenreCatalog {
    /// The standard TMDB movie genre mapping, used when the remote list
    /// cannot be fetched at startup.
    #[must_use]
    pub fn builtin() -> Self {
        let pairs: [(i64, &str); 19] = [
            (28, "Action"),
            (12, "Adventure"),
            (16, "Animation"),
            (35, "Comedy"),
            (80, "Crime"),
            (99, "Documentary"),
            (18, "Drama"),
            (10751, "Family"),
            (14, "Fantasy"),
            (36, "History"),
            (27, "Horror"),
            (10402, "Music"),
            (9648, "Mystery"),
            (10749, "Romance"),
            (878, "Science Fiction"),
            (10770, "TV Movie"),
            (53, "Thriller"),
            (10752, "War"),
            (37, "Western"),
        ];
        Self { by_id: pairs.iter().map(|&(id, name)| (id, name.to_string())).collect() }
    }

    /// Fetch the live genre list from TMDB.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body doesn't parse.
    pub async fn fetch(http: &reqwest::Client, config: &TmdbConfig) -> Result<Self, RecommendError> {
        let body = get_text(
            http,
            &format!("{}/genre/movie/list", config.base_url),
            &[("api_key", config.api_key.as_str()), ("language", "en-US")],
        )
        .await?;
        let by_id = parse_genre_list(&body)?;
        Ok(Self { by_id })
    }

    #[must_use]
    pub fn name(&self, id: i64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Resolve genre names to TMDB ids, skipping unknown names.
    #[must_use]
    pub fn ids_matching(&self, names: &HashSet<&str>) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .by_id
            .iter()
            .filter(|(_, name)| names.contains(name.as_str()))
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Map a movie's genre ids to names, skipping unknown ids.
    #[must_use]
    pub fn names_for(&self, ids: &[i64]) -> Vec<String> {
        ids.iter()
            .filter_map(|&id| self.name(id).map(ToString::to_string))
            .collect()
    }
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

/// One movie as returned by TMDB discover/popular pages.
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovie {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
    #[serde(default)]
    pub popularity: f64,
}

#[derive(Debug, Deserialize)]
struct TmdbMoviePage {
    results: Vec<TmdbMovie>,
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TmdbGenreList {
    genres: Vec<TmdbGenre>,
}

/// Parse a `/genre/movie/list` body into the id→name map.
///
/// # Errors
///
/// Returns `Api` if the body doesn't match the documented shape.
pub fn parse_genre_list(body: &str) -> Result<HashMap<i64, String>, RecommendError> {
    let list: TmdbGenreList =
        serde_json::from_str(body).map_err(|e| RecommendError::Api(format!("genre list: {e}")))?;
    Ok(list.genres.into_iter().map(|g| (g.id, g.name)).collect())
}

/// Parse a discover/popular page body into raw movies.
///
/// # Errors
///
/// Returns `Api` if the body doesn't match the documented shape.
pub fn parse_movie_page(body: &str) -> Result<Vec<TmdbMovie>, RecommendError> {
    let page: TmdbMoviePage =
        serde_json::from_str(body).map_err(|e| RecommendError::Api(format!("movie page: {e}")))?;
    Ok(page.results)
}

// =============================================================================
// SCORING
// =============================================================================

/// Jaccard similarity between two genre lists.
#[must_use]
pub fn genre_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let left: HashSet<&str> = a.iter().map(String::as_str).collect();
    let right: HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    #[allow(clippy::cast_precision_loss)]
    {
        intersection as f64 / union as f64
    }
}

/// Mean genre similarity across members that have stated preferences.
#[must_use]
pub fn group_preference_score(member_genres: &[Vec<String>], movie_genres: &[String]) -> f64 {
    let mut total = 0.0;
    let mut counted = 0u32;
    for prefs in member_genres {
        if prefs.is_empty() {
            continue;
        }
        total += genre_similarity(prefs, movie_genres);
        counted += 1;
    }
    if counted == 0 {
        return 0.0;
    }
    total / f64::from(counted)
}

/// Blend of catalog quality, popularity, and group genre fit.
#[must_use]
pub fn movie_score(movie: &TmdbMovie, member_genres: &[Vec<String>], catalog: &GenreCatalog) -> f64 {
    let movie_genres = catalog.names_for(&movie.genre_ids);
    let base = (movie.vote_average / 10.0) * 0.4 + (movie.popularity / 1000.0) * 0.2;
    base + group_preference_score(member_genres, &movie_genres) * 0.3
}

/// Convert a raw catalog movie into a session candidate.
#[must_use]
pub fn to_candidate(movie: &TmdbMovie, catalog: &GenreCatalog) -> Movie {
    let poster_path = movie
        .poster_path
        .as_deref()
        .map(|p| format!("{POSTER_BASE_URL}{p}"))
        .unwrap_or_default();
    Movie {
        id: movie.id.to_string(),
        title: movie.title.clone(),
        overview: movie.overview.clone(),
        poster_path,
        release_date: movie.release_date.clone(),
        vote_average: movie.vote_average,
        genres: catalog.names_for(&movie.genre_ids),
    }
}

/// Dedupe, score, sort, and truncate a pooled fetch into the final
/// candidate list. Pure so ranking is testable without HTTP.
#[must_use]
pub fn rank_candidates(
    pool: Vec<TmdbMovie>,
    member_genres: &[Vec<String>],
    catalog: &GenreCatalog,
    limit: usize,
) -> Vec<Movie> {
    let mut seen = HashSet::new();
    let mut scored: Vec<(TmdbMovie, f64)> = pool
        .into_iter()
        .filter(|movie| seen.insert(movie.id))
        .map(|movie| {
            let score = movie_score(&movie, member_genres, catalog);
            (movie, score)
        })
        .collect();

    // Stable sort keeps fetch order among equal scores.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .iter()
        .take(limit)
        .map(|(movie, _)| to_candidate(movie, catalog))
        .collect()
}

// =============================================================================
// TMDB CLIENT
// =============================================================================

/// Production `Recommend` implementation backed by the TMDB API.
pub struct TmdbClient {
    config: TmdbConfig,
    http: reqwest::Client,
    genres: GenreCatalog,
}

impl TmdbClient {
    #[must_use]
    pub fn new(config: TmdbConfig, http: reqwest::Client, genres: GenreCatalog) -> Self {
        Self { config, http, genres }
    }

    async fn discover_by_genres(&self, genre_ids: &[i64]) -> Result<Vec<TmdbMovie>, RecommendError> {
        let with_genres = genre_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let body = get_text(
            &self.http,
            &format!("{}/discover/movie", self.config.base_url),
            &[
                ("api_key", self.config.api_key.as_str()),
                ("language", "en-US"),
                ("sort_by", "popularity.desc"),
                ("include_adult", "false"),
                ("include_video", "false"),
                ("page", "1"),
                ("with_genres", &with_genres),
                ("vote_average.gte", "6.0"),
                ("vote_count.gte", "100"),
            ],
        )
        .await?;
        parse_movie_page(&body)
    }

    async fn fetch_popular(&self) -> Result<Vec<TmdbMovie>, RecommendError> {
        let body = get_text(
            &self.http,
            &format!("{}/movie/popular", self.config.base_url),
            &[
                ("api_key", self.config.api_key.as_str()),
                ("language", "en-US"),
                ("page", "1"),
            ],
        )
        .await?;
        parse_movie_page(&body)
    }
}

#[async_trait::async_trait]
impl Recommend for TmdbClient {
    async fn candidates(&self, member_genres: &[Vec<String>], limit: usize) -> Result<Vec<Movie>, RecommendError> {
        let preferred: HashSet<&str> = member_genres
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();
        let genre_ids = self.genres.ids_matching(&preferred);

        let mut pool = Vec::new();
        if !genre_ids.is_empty() {
            pool.extend(self.discover_by_genres(&genre_ids).await?);
        }
        // Top up from the popular list when preferences are missing or thin.
        if pool.len() < limit {
            pool.extend(self.fetch_popular().await?);
        }

        Ok(rank_candidates(pool, member_genres, &self.genres, limit))
    }
}

async fn get_text(http: &reqwest::Client, url: &str, query: &[(&str, &str)]) -> Result<String, RecommendError> {
    let resp = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| RecommendError::Http(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(RecommendError::Api(format!("{status}: {body}")));
    }

    resp.text().await.map_err(|e| RecommendError::Http(e.to_string()))
}

#[cfg(test)]
#[path = "recommend_test.rs"]
mod tests;
