use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How a [`Retriever`](super::Retriever) balances the network against local files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Serve from the cache when present, otherwise download and cache.
    #[default]
    Normal,
    /// Always download and persist into the cache directory.
    Save,
    /// Never touch the network; serve only from the fallback directory.
    #[serde(alias = "use-saved")]
    UseSaved,
}

impl RetrievalMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Save => "save",
            Self::UseSaved => "use_saved",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized retrieval mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown retrieval mode '{0}' (expected normal, save or use_saved)")]
pub struct ParseModeError(pub String);

impl FromStr for RetrievalMode {
    type Err = ParseModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "normal" => Ok(Self::Normal),
            "save" => Ok(Self::Save),
            "use_saved" => Ok(Self::UseSaved),
            _ => Err(ParseModeError(value.to_string())),
        }
    }
}
