use thiserror::Error;

/// Fatal pipeline failures. None of these are retried within a run; the
/// next scheduled invocation is the retry.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The expected link or label is gone from the publication page. The
    /// publisher changed its markup; an operator has to look at it.
    #[error("source page structure changed: {0}")]
    SourceStructureChanged(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("storage failure: {0}")]
    StoreWrite(String),
}

impl From<rusqlite::Error> for UpdateError {
    fn from(e: rusqlite::Error) -> Self {
        UpdateError::StoreWrite(e.to_string())
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(e: std::io::Error) -> Self {
        UpdateError::StoreWrite(e.to_string())
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        UpdateError::StoreWrite(e.to_string())
    }
}
