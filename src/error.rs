use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Fetch failed {status} ({url})")]
    UpstreamStatus { status: u16, url: String },

    #[error("{url} did not return markup: {reason}")]
    Parse { url: String, reason: String },

    #[error("navigation to {url} timed out while {stage}")]
    NavigationTimeout { url: String, stage: &'static str },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("no browser page became available within {waited_ms}ms")]
    PageUnavailable { waited_ms: u128 },
}

impl SwapError {
    pub(crate) fn browser(err: impl std::fmt::Display) -> Self {
        SwapError::Browser(err.to_string())
    }
}
