use std::time::Duration;

use pricewatch_core::error::WatchError;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// GET endpoint returning the work list as `[{id, url}, ...]`.
    pub source_url: String,
    /// POST endpoint receiving one report per checked item.
    pub report_url: String,
    /// Pause between periodic check cycles.
    pub interval: Duration,
    pub per_item_timeout: Duration,
    pub per_item_retries: u32,
    pub concurrency: usize,
    /// Market keys the metadata extractor is registered under.
    pub markets: Vec<String>,
    /// Browser profile name under the session dir.
    pub profile: String,
    pub headless: bool,
    /// Suspend dispatch after a job error so the failed page can be
    /// inspected live.
    pub hold_on_error: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            source_url: "http://localhost:8787/helper/get-markets-url".to_string(),
            report_url: "http://localhost:8787/helper/report-market-price".to_string(),
            interval: Duration::from_secs(12 * 60 * 60),
            per_item_timeout: Duration::from_millis(90_000),
            per_item_retries: 2,
            concurrency: 3,
            markets: [
                "mediaexpert",
                "euro.com",
                "komputronik",
                "mediamarkt",
                "maxelektro",
                "neonet",
                "ceneo",
            ]
            .map(String::from)
            .to_vec(),
            profile: "current".to_string(),
            headless: true,
            hold_on_error: true,
        }
    }
}

impl ServiceConfig {
    /// Read configuration from `PRICEWATCH_*` environment variables,
    /// falling back to defaults. Invalid values are startup errors, not
    /// silent fallbacks.
    pub fn from_env() -> Result<Self, WatchError> {
        let defaults = Self::default();

        Ok(Self {
            host: env_string("PRICEWATCH_HOST", defaults.host),
            port: env_parse("PRICEWATCH_PORT", defaults.port)?,
            source_url: env_string("PRICEWATCH_SOURCE_URL", defaults.source_url),
            report_url: env_string("PRICEWATCH_REPORT_URL", defaults.report_url),
            interval: Duration::from_millis(env_positive(
                "PRICEWATCH_INTERVAL_MS",
                defaults.interval.as_millis() as u64,
            )?),
            per_item_timeout: Duration::from_millis(env_positive(
                "PRICEWATCH_PER_ITEM_TIMEOUT_MS",
                defaults.per_item_timeout.as_millis() as u64,
            )?),
            per_item_retries: env_parse("PRICEWATCH_PER_ITEM_RETRIES", defaults.per_item_retries)?,
            concurrency: env_positive("PRICEWATCH_CONCURRENCY", defaults.concurrency as u64)?
                as usize,
            markets: match std::env::var("PRICEWATCH_MARKETS") {
                Ok(raw) => parse_markets(&raw)?,
                Err(_) => defaults.markets,
            },
            profile: env_string("PRICEWATCH_PROFILE", defaults.profile),
            headless: env_parse("PRICEWATCH_HEADLESS", defaults.headless)?,
            hold_on_error: env_parse("PRICEWATCH_HOLD_ON_ERROR", defaults.hold_on_error)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, WatchError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| {
            WatchError::ConfigError(format!("Invalid {name} '{raw}'"))
        }),
    }
}

fn env_positive(name: &str, default: u64) -> Result<u64, WatchError> {
    let value: u64 = env_parse(name, default)?;
    if value == 0 {
        return Err(WatchError::ConfigError(format!(
            "{name} must be at least 1"
        )));
    }
    Ok(value)
}

fn parse_markets(raw: &str) -> Result<Vec<String>, WatchError> {
    let markets: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    if markets.is_empty() {
        return Err(WatchError::ConfigError(
            "PRICEWATCH_MARKETS must name at least one market".to_string(),
        ));
    }
    Ok(markets)
}
