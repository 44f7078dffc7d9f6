use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatchError;

/// Fields extracted from a loaded product page.
///
/// `price` is the only mandatory field: an extraction that cannot produce
/// a parseable price is a hard failure even if the rest succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<String>,
}

impl MarketData {
    pub fn price_only(price: f64) -> Self {
        Self {
            price,
            title: None,
            image: None,
            delivery: None,
        }
    }
}

/// Structured error attached to a failed extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub target: String,
    pub market: String,
    pub message: String,
    pub kind: String,
}

/// Result of one extraction attempt. Exactly one of `data`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub data: Option<MarketData>,
    pub error: Option<OutcomeError>,
}

impl ExtractionOutcome {
    pub fn success(data: MarketData) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(target: &str, market: &str, err: &WatchError) -> Self {
        Self {
            data: None,
            error: Some(OutcomeError {
                target: target.to_string(),
                market: market.to_string(),
                message: err.to_string(),
                kind: err.kind().to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some()
    }
}

/// One entry in the work list fetched from the external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub url: String,
}

/// Payload POSTed to the report sink for each checked item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub id: String,
    pub url: String,
    pub result: ExtractionOutcome,
    pub checked_at: DateTime<Utc>,
}

/// Aggregate result of one check cycle. Individual item failures never
/// fail the cycle; only a work-list fetch failure yields `ok: false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub ok: bool,
    pub total: usize,
    pub succeeded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleSummary {
    pub fn aborted(error: String) -> Self {
        Self {
            ok: false,
            total: 0,
            succeeded: 0,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_holds_exactly_one_side() {
        let ok = ExtractionOutcome::success(MarketData::price_only(4099.0));
        assert!(ok.data.is_some() && ok.error.is_none());

        let err = ExtractionOutcome::failure(
            "https://shop.example/p/1",
            "shop",
            &WatchError::NoExtractor("shop".into()),
        );
        assert!(err.data.is_none() && err.error.is_some());
        assert_eq!(err.error.as_ref().unwrap().kind, "no_extractor");
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = CheckReport {
            id: "42".into(),
            url: "https://shop.example/p/1".into(),
            result: ExtractionOutcome::success(MarketData::price_only(9.99)),
            checked_at: Utc::now(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("checkedAt").is_some());
        assert_eq!(json["result"]["data"]["price"], 9.99);
    }
}
