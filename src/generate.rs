use std::time::Duration;

use url::Url;

use crate::browser::BrowserPool;
use crate::config::Config;
use crate::error::SwapError;
use crate::extract::extract_product;
use crate::fallback::static_swap;
use crate::fetch::{parse_page_url, HttpFetcher};
use crate::locator::RegionLocator;
use crate::models::{ProductRecord, SwapRequest};
use crate::serialize::serialize;
use crate::swap::{swap, SwapPolicy, SwapReport};

/// How target pages get rendered. Decided once at startup.
#[derive(Clone)]
pub enum RenderCapability {
    Live(BrowserPool),
    Static,
}

impl RenderCapability {
    /// Launches the browser when enabled; any launch failure degrades to
    /// [`RenderCapability::Static`].
    pub async fn from_config(config: &Config) -> Self {
        if !config.browser.enabled {
            tracing::info!("browser rendering disabled, using static swap");
            return Self::Static;
        }
        match BrowserPool::launch(&config.browser).await {
            Ok(pool) => Self::Live(pool),
            Err(e) => {
                tracing::warn!(error = %e, "browser unavailable, falling back to static swap");
                Self::Static
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Live(_) => "live",
            Self::Static => "static",
        }
    }
}

/// Shared handler state.
pub struct AppState {
    pub fetcher: HttpFetcher,
    pub capability: RenderCapability,
    pub locator: RegionLocator,
    pub policy: SwapPolicy,
    pub navigation_timeout: Duration,
}

impl AppState {
    pub fn new(config: &Config, capability: RenderCapability) -> Result<Self, SwapError> {
        Ok(Self {
            fetcher: HttpFetcher::new(&config.fetch)?,
            capability,
            locator: RegionLocator::default(),
            policy: SwapPolicy {
                delay: config.browser.retry_delay,
                ..SwapPolicy::default()
            },
            navigation_timeout: config.browser.navigation_timeout,
        })
    }
}

#[derive(Debug)]
pub struct Generated {
    pub html: String,
    /// `None` on the static path.
    pub report: Option<SwapReport>,
}

/// Extracts the source product and swaps it into the target page.
pub async fn generate(state: &AppState, request: &SwapRequest) -> Result<Generated, SwapError> {
    let target = parse_page_url(&request.target_url)?;
    let source = parse_page_url(&request.source_url)?;

    let record = extract_product(&state.fetcher, &source).await?;

    match &state.capability {
        RenderCapability::Live(pool) => live_swap(state, pool, &target, &record).await,
        RenderCapability::Static => {
            let document = state.fetcher.fetch_html(&target).await?;
            let html = static_swap(&document.body, state.locator.profile(), &record);
            tracing::info!(target = %target, bytes = html.len(), "static swap done");
            Ok(Generated { html, report: None })
        }
    }
}

async fn live_swap(
    state: &AppState,
    pool: &BrowserPool,
    target: &Url,
    record: &ProductRecord,
) -> Result<Generated, SwapError> {
    let lease = pool.checkout().await?;
    lease
        .navigate(target.as_str(), state.navigation_timeout)
        .await?;
    lease
        .wait_for_any(
            target.as_str(),
            &state.locator.profile().title_anchor.joined(),
            state.navigation_timeout,
        )
        .await?;

    let report = swap(&lease, &state.locator, record, &state.policy).await;
    tracing::info!(
        target = %target,
        converged = report.converged,
        iterations = report.iterations,
        images_changed = report.images_changed,
        "live swap done"
    );

    // Let layout settle after the last edits before snapshotting.
    tokio::time::sleep(state.policy.delay).await;
    let html = lease.content().await?;
    lease.release().await;

    Ok(Generated {
        html: serialize(&html),
        report: Some(report),
    })
}
