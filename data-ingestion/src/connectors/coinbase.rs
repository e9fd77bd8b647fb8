use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

use super::ContextProvider;
use crate::context::SpotQuote;

/// Readings spanned by the spot momentum calculation
const MOMENTUM_READINGS: usize = 3;

/// Coinbase spot ticker for BTC-USD.
///
/// Keeps a short rolling window of its own readings so that momentum is
/// available to processors without them holding state.
pub struct CoinbaseSpotConnector {
    client: reqwest::Client,
    url: String,
    readings: Mutex<VecDeque<f64>>,
    max_readings: usize,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
}

impl CoinbaseSpotConnector {
    pub fn new(client: reqwest::Client, url: impl Into<String>, max_readings: usize) -> Self {
        Self {
            client,
            url: url.into(),
            readings: Mutex::new(VecDeque::new()),
            max_readings: max_readings.max(MOMENTUM_READINGS),
        }
    }

    /// Record a reading and return momentum against the reading
    /// `MOMENTUM_READINGS - 1` positions back, once that many exist.
    fn record(&self, price: f64) -> Option<f64> {
        let mut readings = self
            .readings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        readings.push_back(price);
        while readings.len() > self.max_readings {
            readings.pop_front();
        }

        if readings.len() < MOMENTUM_READINGS {
            return None;
        }
        let oldest = readings[readings.len() - MOMENTUM_READINGS];
        if oldest > 0.0 {
            Some((price - oldest) / oldest)
        } else {
            None
        }
    }
}

fn parse_ticker(body: &str) -> Result<f64> {
    let ticker: TickerResponse =
        serde_json::from_str(body).context("Malformed Coinbase ticker response")?;
    let price: f64 = ticker
        .price
        .parse()
        .with_context(|| format!("Invalid Coinbase price: {}", ticker.price))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(anyhow!("Non-positive Coinbase price: {}", price));
    }
    Ok(price)
}

#[async_trait]
impl ContextProvider<SpotQuote> for CoinbaseSpotConnector {
    fn name(&self) -> &'static str {
        "coinbase-spot"
    }

    async fn fetch(&self) -> Result<SpotQuote> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let price = parse_ticker(&body)?;
        let momentum = self.record(price);
        debug!(price, momentum, "Coinbase spot price");

        Ok(SpotQuote {
            price,
            momentum,
            timestamp: Utc::now(),
        })
    }
}
