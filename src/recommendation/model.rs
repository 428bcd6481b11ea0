//! Records read from and written to the recommendation store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::algorithm::Algorithm;
use crate::error::Error;

pub type UserId = i64;
pub type MovieId = i64;
pub type GenreId = i64;
pub type BatchId = i64;

/// Reason labels attached to recommendation items
pub const REASON_SIMILAR_GENRES: &str = "Similar genres";
pub const REASON_SIMILAR_USERS: &str = "Similar users liked this";
pub const REASON_HYBRID: &str = "Hybrid recommendation";

/// An explicit rating; one per (user, movie), latest value wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RatingEvent {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub score: f64,
}

/// A movie with an aggregated event count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MovieCount {
    pub movie_id: MovieId,
    pub count: i64,
}

/// A movie proposed for a user, before rank assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub movie_id: MovieId,
    pub score: f64,
    pub reason: String,
}

impl Candidate {
    pub fn new(movie_id: MovieId, score: f64, reason: impl Into<String>) -> Self {
        Self {
            movie_id,
            score,
            reason: reason.into(),
        }
    }
}

/// Ranked candidate lists keyed by user
pub type CandidateMap = HashMap<UserId, Vec<Candidate>>;

/// Terminal state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Success => "success",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(BatchStatus::Success),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(Error::invalid_format(format!("unknown batch status '{}'", other))),
        }
    }
}

/// Weights applied by the hybrid strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub popularity: f64,
    pub content: f64,
    pub collaborative: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            popularity: 0.2,
            content: 0.4,
            collaborative: 0.4,
        }
    }
}

/// Parameters a batch was generated with, stored as `params_json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchParams {
    pub top_n: usize,
    pub window_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<HybridWeights>,
}

/// One immutable run of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationBatch {
    pub batch_id: BatchId,
    pub algorithm: Algorithm,
    pub params: Option<serde_json::Value>,
    pub status: BatchStatus,
    pub generated_at: DateTime<Utc>,
}

/// An item about to be written with its batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecommendation {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub rank: i32,
    pub score: f64,
    pub reason: String,
}

/// A persisted recommendation item; reads attach the movie's display fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecommendationItem {
    pub batch_id: BatchId,
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub rank: i32,
    pub score: f64,
    pub reason: Option<String>,
    pub title: Option<String>,
    pub poster_url: Option<String>,
}

/// Reader response: the batch served and the user's items in rank order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub batch: Option<RecommendationBatch>,
    pub items: Vec<RecommendationItem>,
}

impl Recommendations {
    /// "No recommendations yet"
    pub fn empty() -> Self {
        Self {
            batch: None,
            items: Vec::new(),
        }
    }
}
