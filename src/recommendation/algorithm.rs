//! Recommendation algorithm names

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The four interchangeable batch strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Global ranking by recent watch count
    Popularity,
    /// Favourite-genre matching
    Content,
    /// User-based collaborative filtering
    Collaborative,
    /// Weighted blend of the other three
    Hybrid,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Popularity,
        Algorithm::Content,
        Algorithm::Collaborative,
        Algorithm::Hybrid,
    ];

    /// Canonical name, as stored in `recommendation_batches.algorithm`
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Popularity => "popularity",
            Algorithm::Content => "content",
            Algorithm::Collaborative => "collaborative",
            Algorithm::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    /// Accepts the canonical names plus the legacy `hot` and `cf` aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "popularity" | "hot" => Ok(Algorithm::Popularity),
            "content" => Ok(Algorithm::Content),
            "collaborative" | "cf" => Ok(Algorithm::Collaborative),
            "hybrid" => Ok(Algorithm::Hybrid),
            _ => Err(Error::InvalidAlgorithm {
                name: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_and_alias_names() {
        assert_eq!("popularity".parse::<Algorithm>().ok(), Some(Algorithm::Popularity));
        assert_eq!("hot".parse::<Algorithm>().ok(), Some(Algorithm::Popularity));
        assert_eq!("CF".parse::<Algorithm>().ok(), Some(Algorithm::Collaborative));
        assert_eq!(" hybrid ".parse::<Algorithm>().ok(), Some(Algorithm::Hybrid));
    }

    #[test]
    fn test_parse_rejects_unknown_name() {
        match "bogus".parse::<Algorithm>() {
            Err(Error::InvalidAlgorithm { name }) => assert_eq!(name, "bogus"),
            other => panic!("expected InvalidAlgorithm, got {:?}", other),
        }
    }

    #[test]
    fn test_display_round_trips_for_every_algorithm() {
        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.to_string().parse::<Algorithm>().ok(), Some(algorithm));
        }
    }
}
