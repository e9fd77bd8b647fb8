//! Market context: the external readings a decision cycle is made from,
//! fetched concurrently with a per-provider timeout.

use crate::connectors::{
    http_client, CoinbaseSpotConnector, ContextProvider, DeribitPcrConnector,
    PolymarketBookConnector, SentimentConnector,
};
use chrono::{DateTime, Utc};
use common::ProviderSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Spot price of the underlying asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotQuote {
    pub price: f64,
    /// Relative change over the provider's recent readings, once enough exist
    pub momentum: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Fear & Greed index (0 = extreme fear, 100 = extreme greed) plus optional
/// news sentiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub fear_greed: f64,
    pub classification: String,
    /// Share of recent news items voted positive, 0.0 to 1.0
    pub news_positive_ratio: Option<f64>,
}

impl SentimentReading {
    /// 0-100 score: fear/greed blended 70/30 with news when news is available.
    pub fn composite_score(&self) -> f64 {
        match self.news_positive_ratio {
            Some(ratio) => self.fear_greed * 0.7 + ratio.clamp(0.0, 1.0) * 100.0 * 0.3,
            None => self.fear_greed,
        }
    }
}

/// Options put/call open-interest ratios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PcrReading {
    pub overall_pcr: f64,
    /// Ratio over short-dated options only, when any were found
    pub short_pcr: Option<f64>,
    pub put_open_interest: f64,
    pub call_open_interest: f64,
    pub fetched_at: DateTime<Utc>,
}

impl PcrReading {
    /// Short-dated ratio when available, overall ratio otherwise.
    pub fn effective_pcr(&self) -> f64 {
        self.short_pcr.unwrap_or(self.overall_pcr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// Order book of the YES token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBookDepth {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Everything a signal processor may look at besides price history.
///
/// Every feed is optional; a missing feed is indistinguishable from a failed
/// or timed-out one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub spot: Option<SpotQuote>,
    pub sentiment: Option<SentimentReading>,
    pub pcr: Option<PcrReading>,
    pub order_book: Option<OrderBookDepth>,
}

impl MarketContext {
    pub fn available_feeds(&self) -> usize {
        [
            self.spot.is_some(),
            self.sentiment.is_some(),
            self.pcr.is_some(),
            self.order_book.is_some(),
        ]
        .iter()
        .filter(|available| **available)
        .count()
    }
}

/// Fans out to every configured provider at once and waits for all of them
/// to either answer or time out.
#[derive(Clone)]
pub struct ContextFetcher {
    spot: Option<Arc<dyn ContextProvider<SpotQuote>>>,
    sentiment: Option<Arc<dyn ContextProvider<SentimentReading>>>,
    pcr: Option<Arc<dyn ContextProvider<PcrReading>>>,
    order_book: Option<Arc<dyn ContextProvider<OrderBookDepth>>>,
    timeout: Duration,
}

impl ContextFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            spot: None,
            sentiment: None,
            pcr: None,
            order_book: None,
            timeout,
        }
    }

    pub fn with_spot(mut self, provider: Arc<dyn ContextProvider<SpotQuote>>) -> Self {
        self.spot = Some(provider);
        self
    }

    pub fn with_sentiment(mut self, provider: Arc<dyn ContextProvider<SentimentReading>>) -> Self {
        self.sentiment = Some(provider);
        self
    }

    pub fn with_pcr(mut self, provider: Arc<dyn ContextProvider<PcrReading>>) -> Self {
        self.pcr = Some(provider);
        self
    }

    pub fn with_order_book(mut self, provider: Arc<dyn ContextProvider<OrderBookDepth>>) -> Self {
        self.order_book = Some(provider);
        self
    }

    /// Wire the production connectors. The order book is only fetched when a
    /// YES token is configured.
    pub fn from_settings(settings: &ProviderSettings) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(settings.timeout_ms);
        let client = http_client(timeout)?;

        let mut fetcher = Self::new(timeout)
            .with_spot(Arc::new(CoinbaseSpotConnector::new(
                client.clone(),
                &settings.spot_url,
                settings.spot_history,
            )))
            .with_sentiment(Arc::new(SentimentConnector::new(
                client.clone(),
                &settings.fear_greed_url,
                &settings.news_url,
                settings.news_api_key.clone(),
            )))
            .with_pcr(Arc::new(DeribitPcrConnector::new(
                client.clone(),
                &settings.deribit_url,
                settings.deribit_max_dte,
                settings.deribit_min_open_interest,
                Duration::from_secs(settings.deribit_cache_seconds),
            )));

        if let Some(token_id) = &settings.yes_token_id {
            fetcher = fetcher.with_order_book(Arc::new(PolymarketBookConnector::new(
                client,
                &settings.clob_url,
                token_id,
            )));
        }
        Ok(fetcher)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch all feeds concurrently. Never fails: each provider that errors or
    /// exceeds the timeout contributes `None`.
    pub async fn fetch(&self) -> MarketContext {
        let (spot, sentiment, pcr, order_book) = tokio::join!(
            fetch_guarded(self.spot.as_deref(), self.timeout),
            fetch_guarded(self.sentiment.as_deref(), self.timeout),
            fetch_guarded(self.pcr.as_deref(), self.timeout),
            fetch_guarded(self.order_book.as_deref(), self.timeout),
        );

        let context = MarketContext {
            spot,
            sentiment,
            pcr,
            order_book,
        };

        info!(
            spot = context.spot.map(|s| s.price),
            sentiment = context.sentiment.as_ref().map(|s| s.composite_score()),
            pcr = context.pcr.map(|p| p.effective_pcr()),
            order_book = context.order_book.is_some(),
            "Market context fetched"
        );

        context
    }
}

async fn fetch_guarded<T>(
    provider: Option<&dyn ContextProvider<T>>,
    timeout: Duration,
) -> Option<T>
where
    T: Send,
{
    let provider = provider?;
    match tokio::time::timeout(timeout, provider.fetch()).await {
        Ok(Ok(value)) => {
            debug!(provider = provider.name(), "Context provider answered");
            Some(value)
        }
        Ok(Err(e)) => {
            warn!(provider = provider.name(), error = %e, "Context provider failed");
            None
        }
        Err(_) => {
            warn!(
                provider = provider.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Context provider timed out"
            );
            None
        }
    }
}
