//! Replay: serving recorded responses from a loaded session

mod matcher;

use serde::{Deserialize, Serialize};

use crate::PollyError;

pub use matcher::{ExchangeMatcher, MatchStats};

/// How an incoming request is paired with a recorded exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// First pending exchange with the same method and path, consumed on use
    #[default]
    Content,
    /// Exchange at the replay cursor, regardless of method and path
    Ordinal,
}

impl std::str::FromStr for MatchPolicy {
    type Err = PollyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "content" => Ok(Self::Content),
            "ordinal" => Ok(Self::Ordinal),
            other => Err(PollyError::Config(format!(
                "Unknown match policy '{other}', expected 'content' or 'ordinal'"
            ))),
        }
    }
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content => f.write_str("content"),
            Self::Ordinal => f.write_str("ordinal"),
        }
    }
}
