use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::ContextProvider;
use crate::context::SentimentReading;

/// News items considered for the positive ratio
const NEWS_LIMIT: usize = 10;

/// Fear & Greed index from alternative.me, optionally blended with
/// CryptoPanic news votes.
pub struct SentimentConnector {
    client: reqwest::Client,
    fear_greed_url: String,
    news_url: String,
    news_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FearGreedResponse {
    data: Vec<FearGreedEntry>,
}

#[derive(Debug, Deserialize)]
struct FearGreedEntry {
    value: String,
    value_classification: String,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    results: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    #[serde(default)]
    votes: NewsVotes,
}

#[derive(Debug, Default, Deserialize)]
struct NewsVotes {
    #[serde(default)]
    positive: u64,
    #[serde(default)]
    negative: u64,
}

impl SentimentConnector {
    pub fn new(
        client: reqwest::Client,
        fear_greed_url: impl Into<String>,
        news_url: impl Into<String>,
        news_api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            fear_greed_url: fear_greed_url.into(),
            news_url: news_url.into(),
            news_api_key,
        }
    }

    async fn fetch_news_ratio(&self, api_key: &str) -> Result<Option<f64>> {
        let body = self
            .client
            .get(&self.news_url)
            .query(&[
                ("auth_token", api_key),
                ("currencies", "BTC"),
                ("filter", "hot"),
                ("public", "true"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_news_ratio(&body)
    }
}

fn parse_fear_greed(body: &str) -> Result<(f64, String)> {
    let response: FearGreedResponse =
        serde_json::from_str(body).context("Malformed Fear & Greed response")?;
    let entry = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Fear & Greed response has no data"))?;
    let value: f64 = entry
        .value
        .parse()
        .with_context(|| format!("Invalid Fear & Greed value: {}", entry.value))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(anyhow!("Fear & Greed value out of range: {}", value));
    }
    Ok((value, entry.value_classification))
}

/// Share of the latest items with more positive than negative votes.
fn parse_news_ratio(body: &str) -> Result<Option<f64>> {
    let response: NewsResponse =
        serde_json::from_str(body).context("Malformed CryptoPanic response")?;
    let items: Vec<_> = response.results.into_iter().take(NEWS_LIMIT).collect();
    if items.is_empty() {
        return Ok(None);
    }
    let positive = items
        .iter()
        .filter(|item| item.votes.positive > item.votes.negative)
        .count();
    Ok(Some(positive as f64 / items.len() as f64))
}

#[async_trait]
impl ContextProvider<SentimentReading> for SentimentConnector {
    fn name(&self) -> &'static str {
        "sentiment"
    }

    async fn fetch(&self) -> Result<SentimentReading> {
        let body = self
            .client
            .get(&self.fear_greed_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let (fear_greed, classification) = parse_fear_greed(&body)?;

        // News is an enrichment; losing it keeps the fear/greed reading.
        let news_positive_ratio = match &self.news_api_key {
            Some(key) => match self.fetch_news_ratio(key).await {
                Ok(ratio) => ratio,
                Err(e) => {
                    warn!(error = %e, "News sentiment unavailable");
                    None
                }
            },
            None => None,
        };

        debug!(fear_greed, %classification, news_positive_ratio, "Sentiment reading");
        Ok(SentimentReading {
            fear_greed,
            classification,
            news_positive_ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FNG_BODY: &str = r#"{
        "name": "Fear and Greed Index",
        "data": [{"value": "18", "value_classification": "Extreme Fear", "timestamp": "1708627200"}]
    }"#;

    #[test]
    fn test_parse_fear_greed() {
        let (value, classification) = parse_fear_greed(FNG_BODY).unwrap();
        assert_eq!(value, 18.0);
        assert_eq!(classification, "Extreme Fear");
        assert!(parse_fear_greed(r#"{"data": []}"#).is_err());
    }

    #[test]
    fn test_parse_news_ratio() {
        let body = r#"{"results": [
            {"title": "a", "votes": {"positive": 5, "negative": 1}},
            {"title": "b", "votes": {"positive": 0, "negative": 3}},
            {"title": "c", "votes": {"positive": 2, "negative": 2}},
            {"title": "d"}
        ]}"#;
        assert_eq!(parse_news_ratio(body).unwrap(), Some(0.25));
        assert_eq!(parse_news_ratio(r#"{"results": []}"#).unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_without_news_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fng/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FNG_BODY))
            .mount(&server)
            .await;

        let connector = SentimentConnector::new(
            reqwest::Client::new(),
            format!("{}/fng/", server.uri()),
            format!("{}/news/", server.uri()),
            None,
        );
        let reading = connector.fetch().await.unwrap();
        assert_eq!(reading.fear_greed, 18.0);
        assert_eq!(reading.news_positive_ratio, None);
        assert_eq!(reading.composite_score(), 18.0);
    }

    #[tokio::test]
    async fn test_news_failure_keeps_fear_greed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fng/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FNG_BODY))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/news/"))
            .and(query_param("auth_token", "bad-key"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let connector = SentimentConnector::new(
            reqwest::Client::new(),
            format!("{}/fng/", server.uri()),
            format!("{}/news/", server.uri()),
            Some("bad-key".to_string()),
        );
        let reading = connector.fetch().await.unwrap();
        assert_eq!(reading.fear_greed, 18.0);
        assert_eq!(reading.news_positive_ratio, None);
    }
}
