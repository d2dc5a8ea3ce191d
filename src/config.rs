//! Runtime configuration read from the process environment.
//!
//! Every knob has a default so the service starts with an empty environment;
//! `.env` files are loaded by the binary before [`Config::from_env`] runs.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for the shared HTTP client.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Settings for the headless browser and its page pool.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub enabled: bool,
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub max_pages: usize,
    pub page_wait: Duration,
    pub navigation_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: true,
            executable: None,
            max_pages: 2,
            page_wait: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(25),
            retry_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub fetch: FetchSettings,
    pub browser: BrowserSettings,
}

impl Config {
    /// Builds the configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is set but cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable lookup, used by tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host: IpAddr = parse_or(&get, "HOST", IpAddr::from([0, 0, 0, 0]))?;
        let port: u16 = parse_or(&get, "PORT", 3000)?;

        let defaults = BrowserSettings::default();
        // `RENDER` is set by hosts that cannot run a browser at all.
        let disabled = get("PRODUCT_SWAP_RENDER_DISABLED").is_some_and(|v| truthy(&v))
            || get("RENDER").is_some();

        let browser = BrowserSettings {
            enabled: !disabled,
            headless: parse_bool_or(&get, "PRODUCT_SWAP_HEADLESS", defaults.headless)?,
            executable: get("PRODUCT_SWAP_CHROME").map(PathBuf::from),
            max_pages: parse_or(&get, "PRODUCT_SWAP_MAX_PAGES", defaults.max_pages)?.max(1),
            page_wait: millis_or(&get, "PRODUCT_SWAP_PAGE_WAIT_MS", defaults.page_wait)?,
            navigation_timeout: millis_or(
                &get,
                "PRODUCT_SWAP_NAV_TIMEOUT_MS",
                defaults.navigation_timeout,
            )?,
            retry_delay: millis_or(&get, "PRODUCT_SWAP_RETRY_DELAY_MS", defaults.retry_delay)?,
        };

        let fetch_defaults = FetchSettings::default();
        let fetch = FetchSettings {
            connect_timeout: fetch_defaults.connect_timeout,
            timeout: millis_or(&get, "PRODUCT_SWAP_FETCH_TIMEOUT_MS", fetch_defaults.timeout)?,
            user_agent: get("PRODUCT_SWAP_USER_AGENT").unwrap_or(fetch_defaults.user_agent),
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            log_level: get("PRODUCT_SWAP_LOG").unwrap_or_else(|| "info".to_string()),
            fetch,
            browser,
        })
    }
}

fn truthy(value: &str) -> bool {
    !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

fn millis_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(get, key, default_ms).map(Duration::from_millis)
}
