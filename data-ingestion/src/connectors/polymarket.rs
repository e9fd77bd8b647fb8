use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::PriceSample;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::ContextProvider;
use crate::context::{BookLevel, OrderBookDepth};

/// Polymarket CLOB order book for the YES token of the active market.
pub struct PolymarketBookConnector {
    client: reqwest::Client,
    clob_url: String,
    token_id: String,
}

/// `GET /book` response
#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<OrderLevel>,
    #[serde(default)]
    asks: Vec<OrderLevel>,
}

#[derive(Debug, Deserialize)]
struct OrderLevel {
    #[serde(deserialize_with = "number_or_string")]
    price: f64,
    #[serde(deserialize_with = "number_or_string")]
    size: f64,
}

/// The CLOB sends prices and sizes as strings; older payloads used numbers.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

impl PolymarketBookConnector {
    pub fn new(client: reqwest::Client, clob_url: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            client,
            clob_url: clob_url.into(),
            token_id: token_id.into(),
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    async fn fetch_book(&self) -> Result<OrderBookDepth> {
        let url = format!("{}/book", self.clob_url.trim_end_matches('/'));
        let body = self
            .client
            .get(&url)
            .query(&[("token_id", self.token_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_book(&body)
    }

    /// Current YES price as the book midpoint, for feeding the price history.
    pub async fn fetch_price(&self) -> Result<PriceSample> {
        let book = self.fetch_book().await?;
        let price = midpoint(&book).ok_or_else(|| anyhow!("Order book has no two-sided quote"))?;
        Ok(PriceSample::new(Utc::now(), price))
    }
}

/// Parse a book and order it best level first on each side.
fn parse_book(body: &str) -> Result<OrderBookDepth> {
    let response: BookResponse =
        serde_json::from_str(body).context("Malformed CLOB order book")?;

    let to_levels = |levels: Vec<OrderLevel>| -> Vec<BookLevel> {
        levels
            .into_iter()
            .filter(|level| level.price.is_finite() && level.size.is_finite() && level.size > 0.0)
            .map(|level| BookLevel {
                price: level.price,
                size: level.size,
            })
            .collect()
    };

    let mut bids = to_levels(response.bids);
    let mut asks = to_levels(response.asks);
    bids.sort_by(|a, b| b.price.total_cmp(&a.price));
    asks.sort_by(|a, b| a.price.total_cmp(&b.price));

    Ok(OrderBookDepth { bids, asks })
}

fn midpoint(book: &OrderBookDepth) -> Option<f64> {
    let bid = book.bids.first()?.price;
    let ask = book.asks.first()?.price;
    Some((bid + ask) / 2.0)
}

#[async_trait]
impl ContextProvider<OrderBookDepth> for PolymarketBookConnector {
    fn name(&self) -> &'static str {
        "polymarket-book"
    }

    async fn fetch(&self) -> Result<OrderBookDepth> {
        let book = self.fetch_book().await?;
        debug!(
            token_id = %self.token_id,
            bids = book.bids.len(),
            asks = book.asks.len(),
            "Polymarket order book"
        );
        Ok(book)
    }
}
