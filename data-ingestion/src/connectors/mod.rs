pub mod coinbase;
pub mod deribit;
pub mod polymarket;
pub mod sentiment;

pub use coinbase::CoinbaseSpotConnector;
pub use deribit::DeribitPcrConnector;
pub use polymarket::PolymarketBookConnector;
pub use sentiment::SentimentConnector;

use async_trait::async_trait;
use std::time::Duration;

/// A single external feed of market context.
///
/// Implementations may fail freely; the caller applies the timeout and turns
/// failures into a missing reading.
#[async_trait]
pub trait ContextProvider<T>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> anyhow::Result<T>;
}

/// HTTP client shared by the connectors. Requests carry their own deadline so
/// a stuck connection never outlives the fetcher's timeout by much.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("updown-core/0.1")
        .build()?;
    Ok(client)
}
