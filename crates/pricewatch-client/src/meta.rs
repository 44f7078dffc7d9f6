use std::sync::Arc;

use futures::future::BoxFuture;
use pricewatch_core::error::WatchError;
use pricewatch_core::models::MarketData;
use pricewatch_core::registry::ExtractorRegistry;
use pricewatch_core::traits::MarketExtractor;
use serde::Deserialize;

use crate::browser::TabContext;

/// In-page probe for product metadata: schema.org and OpenGraph price,
/// title, and image.
const META_PROBE: &str = r#"
(() => {
  const attr = (sel, name) => {
    const el = document.querySelector(sel);
    return el ? el.getAttribute(name) : null;
  };
  const text = (sel) => {
    const el = document.querySelector(sel);
    return el ? el.textContent.trim() : null;
  };
  const price =
    attr('meta[property="product:price:amount"]', 'content') ||
    attr('meta[property="og:price:amount"]', 'content') ||
    attr('meta[itemprop="price"]', 'content') ||
    attr('[itemprop="price"]', 'content') ||
    text('[itemprop="price"]');
  const title =
    attr('meta[property="og:title"]', 'content') || document.title || null;
  const image = attr('meta[property="og:image"]', 'content');
  return { price, title, image };
})()
"#;

#[derive(Debug, Deserialize)]
struct RawMeta {
    price: Option<String>,
    title: Option<String>,
    image: Option<String>,
}

/// Generic fallback extractor reading product metadata tags instead of
/// site-specific DOM selectors.
///
/// Registered under every configured market key; prices are normalized
/// from Polish formatting (space thousand separators, comma decimals,
/// currency suffixes).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaTagExtractor;

impl MetaTagExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl MarketExtractor<TabContext> for MetaTagExtractor {
    fn extract<'a>(
        &'a self,
        ctx: &'a TabContext,
        _url: &'a str,
        _payload: &'a serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<MarketData, WatchError>> {
        Box::pin(async move {
            let raw: RawMeta = ctx.eval(META_PROBE).await?;

            let price_text = raw.price.ok_or_else(|| {
                WatchError::ExtractionFailed("no price metadata on page".to_string())
            })?;
            let price = parse_price(&price_text).ok_or_else(|| {
                WatchError::ExtractionFailed(format!("unparseable price {price_text:?}"))
            })?;

            Ok(MarketData {
                price,
                title: raw.title,
                image: raw.image,
                delivery: None,
            })
        })
    }
}

/// Registry with the metadata extractor registered under each market key.
pub fn meta_registry(
    markets: impl IntoIterator<Item = String>,
) -> ExtractorRegistry<TabContext> {
    let extractor: Arc<dyn MarketExtractor<TabContext>> = Arc::new(MetaTagExtractor::new());
    markets
        .into_iter()
        .fold(ExtractorRegistry::new(), |registry, market| {
            registry.register(market, Arc::clone(&extractor))
        })
}

/// Parse a price out of display text: "4 099,00 zł" → 4099.0.
///
/// Handles space and NBSP thousand separators, comma decimals, and the
/// dot-thousands comma-decimal variant ("1.234,56").
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', ".")
    };

    let value: f64 = normalized.parse().ok()?;
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_polish_display_prices() {
        assert_eq!(parse_price("4 099,00 zł"), Some(4099.0));
        assert_eq!(parse_price("1\u{a0}299,99"), Some(1299.99));
        assert_eq!(parse_price("549"), Some(549.0));
        assert_eq!(parse_price("1.234,56"), Some(1234.56));
    }

    #[test]
    fn parses_plain_machine_prices() {
        assert_eq!(parse_price("4099.00"), Some(4099.0));
        assert_eq!(parse_price("0.99"), Some(0.99));
    }

    #[test]
    fn rejects_text_without_digits() {
        assert_eq!(parse_price("brak ceny"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("zł"), None);
    }

    #[test]
    fn meta_registry_registers_all_markets() {
        let registry = meta_registry(vec!["mediaexpert".to_string(), "euro.com".to_string()]);
        assert!(registry.resolve("mediaexpert").is_some());
        assert!(registry.resolve("euro.com").is_some());
        assert!(registry.resolve("unknown").is_none());
    }
}
