// =============================================================================
// Market Price Provider — narrow quote contract over HTTP
// =============================================================================
//
// The grader and the prediction pipeline only ever ask one question: the
// current price of a ticker. Any transport error, timeout, non-2xx status,
// or malformed body maps to `DataUnavailable`; callers skip and retry on
// the next cycle. No synthetic prices, ever.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::FusionError;

/// A single observed price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub timestamp: String,
}

/// The quote contract consumed by the grader and the prediction pipeline.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Current price for `ticker`. Every failure mode is
    /// `FusionError::DataUnavailable`.
    async fn get_price(&self, ticker: &str) -> Result<PricePoint, FusionError>;
}

// =============================================================================
// HTTP provider
// =============================================================================

/// Wire shape of the upstream quote endpoint.
#[derive(Debug, Deserialize)]
struct QuoteBody {
    price: f64,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Quote client for a `GET {base_url}/quote?symbol=TICKER` endpoint.
pub struct HttpPriceProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceProvider {
    /// Hard timeout for a single quote request, seconds.
    const REQUEST_TIMEOUT_SECS: u64 = 8;

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let mut default_headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            if let Ok(val) = reqwest::header::HeaderValue::from_str(&key) {
                default_headers.insert("X-API-KEY", val);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceProvider for HttpPriceProvider {
    async fn get_price(&self, ticker: &str) -> Result<PricePoint, FusionError> {
        let url = format!("{}/quote", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", ticker)])
            .send()
            .await
            .map_err(|e| FusionError::data_unavailable(ticker, e))?;

        if !response.status().is_success() {
            warn!(ticker, status = %response.status(), "quote endpoint returned error status");
            return Err(FusionError::data_unavailable(
                ticker,
                format!("status {}", response.status()),
            ));
        }

        let body: QuoteBody = response
            .json()
            .await
            .map_err(|e| FusionError::data_unavailable(ticker, e))?;

        if !body.price.is_finite() || body.price <= 0.0 {
            return Err(FusionError::data_unavailable(
                ticker,
                format!("non-positive price {}", body.price),
            ));
        }

        debug!(ticker, price = body.price, "quote fetched");

        Ok(PricePoint {
            price: body.price,
            timestamp: body.timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
        })
    }
}

// =============================================================================
// Static provider (tests + demo mode)
// =============================================================================

/// In-memory provider. Tickers without a set price report `DataUnavailable`,
/// mirroring how a real feed goes dark per symbol.
#[derive(Default)]
pub struct StaticPriceProvider {
    prices: RwLock<HashMap<String, f64>>,
}

impl StaticPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, ticker: &str, price: f64) {
        self.prices.write().insert(ticker.to_string(), price);
    }

    pub fn clear_price(&self, ticker: &str) {
        self.prices.write().remove(ticker);
    }
}

#[async_trait]
impl PriceProvider for StaticPriceProvider {
    async fn get_price(&self, ticker: &str) -> Result<PricePoint, FusionError> {
        match self.prices.read().get(ticker) {
            Some(&price) => Ok(PricePoint {
                price,
                timestamp: Utc::now().to_rfc3339(),
            }),
            None => Err(FusionError::data_unavailable(ticker, "no quote loaded")),
        }
    }
}
