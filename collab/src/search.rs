//! Search engine collaborator contract, used by the search sub-flow's
//! gap→search→score→reflect loop.

use async_trait::async_trait;
use std::fmt;

/// Optional bound on how recent results must be.
#[derive(Debug, Clone, Default)]
pub struct DateRange {
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The full result set for one [`SearchEngine::search`] call.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Clone)]
pub enum SearchError {
    Transport(String),
    NoResults,
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Transport(msg) => write!(f, "search transport error: {msg}"),
            SearchError::NoResults => write!(f, "search returned no results"),
        }
    }
}

impl std::error::Error for SearchError {}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn search(
        &self,
        query: &str,
        date_range: Option<DateRange>,
    ) -> Result<SearchResult, SearchError>;
}
