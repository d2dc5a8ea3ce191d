use url::Url;

use crate::config::FetchSettings;
use crate::error::SwapError;

// ── Fetched document ─────────────────────────────────────────────────────────

pub struct FetchedDocument {
    /// Final URL after redirects; relative references resolve against it.
    pub url: Url,
    pub body: String,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// One `reqwest::Client` shared by every request the service makes.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, SwapError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
        );

        let client = reqwest::ClientBuilder::new()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| SwapError::Fetch {
                url: String::new(),
                reason: format!("client setup failed: {e}"),
            })?;

        Ok(Self { client })
    }

    /// GETs `url` and returns the body as text.
    ///
    /// A missing `Content-Type` is accepted; one that names neither HTML nor
    /// XML is a [`SwapError::Parse`].
    pub async fn fetch_html(&self, url: &Url) -> Result<FetchedDocument, SwapError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SwapError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if !content_type.is_empty() && !content_type.contains("html") && !content_type.contains("xml")
        {
            return Err(SwapError::Parse {
                url: url.to_string(),
                reason: format!("content type {content_type}"),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| request_error(url, &e))?;

        tracing::debug!(url = %final_url, bytes = body.len(), "fetched document");
        Ok(FetchedDocument {
            url: final_url,
            body,
        })
    }
}

fn request_error(url: &Url, e: &reqwest::Error) -> SwapError {
    let kind = if e.is_timeout() {
        "TimeoutError"
    } else if e.is_connect() {
        "ConnectError"
    } else {
        "RequestError"
    };
    SwapError::Fetch {
        url: url.to_string(),
        reason: format!("{kind}: {e}"),
    }
}

// ── URL validation ───────────────────────────────────────────────────────────

/// Accepts absolute `http`/`https` URLs only.
pub fn parse_page_url(raw: &str) -> Result<Url, SwapError> {
    let raw = raw.trim();
    let invalid = |reason: &str| SwapError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.is_empty() {
        return Err(invalid("URL is required"));
    }
    let parsed = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are allowed"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("URL has no host"));
    }
    Ok(parsed)
}
