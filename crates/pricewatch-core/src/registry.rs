use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::error::WatchError;
use crate::models::ExtractionOutcome;
use crate::traits::MarketExtractor;

/// Derive the market key for a target URL: hostname without `www.` and
/// without the final TLD segment, lowercased. IP literals and `localhost`
/// are returned as-is. `euro.com.pl` → `euro.com`, `www.mediaexpert.pl`
/// → `mediaexpert`.
pub fn market_key(target: &str) -> String {
    let Ok(url) = Url::parse(target) else {
        return "unknown".to_string();
    };
    let Some(host) = url.host_str() else {
        return "unknown".to_string();
    };

    let host = host
        .strip_prefix("www.")
        .unwrap_or(host)
        .to_ascii_lowercase();

    if host == "localhost" || host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }

    match host.rsplit_once('.') {
        Some((stem, _tld)) if !stem.is_empty() => stem.to_string(),
        _ => host,
    }
}

/// Check that a target is a well-formed http(s) URL before spending a
/// browser context on it.
pub fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// String-keyed registry of extraction capabilities, resolved once per job.
///
/// A missing entry is a classified `NoExtractor` error, not a panic: targets
/// without a registered market still yield a structured outcome.
pub struct ExtractorRegistry<C> {
    extractors: HashMap<String, Arc<dyn MarketExtractor<C>>>,
}

impl<C> Default for ExtractorRegistry<C> {
    fn default() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }
}

impl<C> ExtractorRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        market: impl Into<String>,
        extractor: Arc<dyn MarketExtractor<C>>,
    ) -> Self {
        self.extractors.insert(market.into(), extractor);
        self
    }

    pub fn resolve(&self, market: &str) -> Option<&Arc<dyn MarketExtractor<C>>> {
        self.extractors.get(market)
    }

    pub fn markets(&self) -> impl Iterator<Item = &str> {
        self.extractors.keys().map(String::as_str)
    }

    /// Resolve the extractor for `target`, run it against an open context,
    /// and normalize the result to an [`ExtractionOutcome`].
    ///
    /// A non-finite price is a hard failure for the whole outcome even if
    /// the other fields were extracted.
    pub async fn run(
        &self,
        ctx: &C,
        target: &str,
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> ExtractionOutcome {
        let market = market_key(target);

        let Some(extractor) = self.resolve(&market) else {
            tracing::info!(%market, %target, "No extractor registered for market");
            return ExtractionOutcome::failure(target, &market, &WatchError::NoExtractor(market.clone()));
        };

        match extractor.extract(ctx, target, payload).await {
            Ok(data) if data.price.is_finite() => {
                tracing::info!(%market, price = data.price, "Extraction succeeded");
                ExtractionOutcome::success(data)
            }
            Ok(_) => ExtractionOutcome::failure(
                target,
                &market,
                &WatchError::ExtractionFailed("no parseable price on page".into()),
            ),
            Err(err) => {
                tracing::warn!(%market, %target, error = %err, "Extraction failed");
                ExtractionOutcome::failure(target, &market, &err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketData;
    use crate::testutil::MockMarketExtractor;

    #[test]
    fn market_key_strips_www_and_tld() {
        assert_eq!(market_key("https://www.mediaexpert.pl/product/1"), "mediaexpert");
        assert_eq!(market_key("https://euro.com.pl/tv.bhtml"), "euro.com");
        assert_eq!(market_key("https://www.ceneo.pl/181610898"), "ceneo");
    }

    #[test]
    fn market_key_keeps_ips_and_localhost() {
        assert_eq!(market_key("http://localhost:5000/x"), "localhost");
        assert_eq!(market_key("http://192.168.1.10/x"), "192.168.1.10");
    }

    #[test]
    fn market_key_tolerates_garbage() {
        assert_eq!(market_key("not a url"), "unknown");
        assert_eq!(market_key("mailto:someone@example.com"), "unknown");
    }

    #[tokio::test]
    async fn run_without_registered_market_classifies_no_extractor() {
        let registry: ExtractorRegistry<()> = ExtractorRegistry::new();
        let outcome = registry
            .run(&(), "https://unknownshop.pl/p/1", &serde_json::Map::new())
            .await;
        assert_eq!(outcome.error.unwrap().kind, "no_extractor");
    }

    #[tokio::test]
    async fn run_rejects_non_finite_price() {
        let registry = ExtractorRegistry::new().register(
            "shop",
            Arc::new(MockMarketExtractor::returning(MarketData::price_only(f64::NAN))),
        );
        let outcome = registry
            .run(&(), "https://shop.pl/p/1", &serde_json::Map::new())
            .await;
        assert_eq!(outcome.error.unwrap().kind, "extraction_failed");
    }

    #[tokio::test]
    async fn run_passes_through_success() {
        let registry = ExtractorRegistry::new().register(
            "shop",
            Arc::new(MockMarketExtractor::returning(MarketData::price_only(4099.0))),
        );
        let outcome = registry
            .run(&(), "https://shop.pl/p/1", &serde_json::Map::new())
            .await;
        assert_eq!(outcome.data.unwrap().price, 4099.0);
    }
}
