//! Market data for the decision core: the bounded price history and the
//! external context providers.

pub mod connectors;
pub mod context;
pub mod history;

pub use connectors::ContextProvider;
pub use context::{
    BookLevel, ContextFetcher, MarketContext, OrderBookDepth, PcrReading, SentimentReading,
    SpotQuote,
};
pub use history::{PriceHistory, PriceStats, SharedPriceHistory};
