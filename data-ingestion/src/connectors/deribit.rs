use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::ContextProvider;
use crate::context::PcrReading;

/// BTC option put/call open-interest ratios from Deribit's public book summary.
///
/// Results are cached; options positioning moves slowly and the endpoint is
/// rate limited.
pub struct DeribitPcrConnector {
    client: reqwest::Client,
    url: String,
    max_dte: i64,
    min_open_interest: f64,
    cache_ttl: Duration,
    cache: Mutex<Option<(Instant, PcrReading)>>,
}

#[derive(Debug, Deserialize)]
struct BookSummaryResponse {
    #[serde(default)]
    result: Vec<BookSummary>,
}

#[derive(Debug, Deserialize)]
struct BookSummary {
    instrument_name: String,
    #[serde(default)]
    open_interest: Option<f64>,
}

impl DeribitPcrConnector {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        max_dte: i64,
        min_open_interest: f64,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            max_dte,
            min_open_interest,
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    async fn fetch_fresh(&self) -> Result<PcrReading> {
        let body = self
            .client
            .get(&self.url)
            .query(&[("currency", "BTC"), ("kind", "option")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        summarize(&body, Utc::now(), self.max_dte, self.min_open_interest)
    }
}

/// Days to expiry from an instrument name such as `BTC-20FEB26-95000-P`.
fn days_to_expiry(instrument: &str, now: DateTime<Utc>) -> Option<i64> {
    let expiry = instrument.split('-').nth(1)?;
    let date = NaiveDate::parse_from_str(expiry, "%d%b%y").ok()?;
    let expiry = date.and_hms_opt(0, 0, 0)?.and_utc();
    Some((expiry - now).num_days().max(0))
}

fn summarize(
    body: &str,
    now: DateTime<Utc>,
    max_dte: i64,
    min_open_interest: f64,
) -> Result<PcrReading> {
    let response: BookSummaryResponse =
        serde_json::from_str(body).context("Malformed Deribit book summary")?;
    if response.result.is_empty() {
        return Err(anyhow!("Deribit returned no option summaries"));
    }

    let (mut put_oi, mut call_oi) = (0.0, 0.0);
    let (mut short_put_oi, mut short_call_oi) = (0.0, 0.0);

    for summary in &response.result {
        let oi = summary.open_interest.unwrap_or(0.0);
        if oi < min_open_interest {
            continue;
        }
        let is_put = summary.instrument_name.ends_with("-P");
        let is_call = summary.instrument_name.ends_with("-C");
        if is_put {
            put_oi += oi;
        } else if is_call {
            call_oi += oi;
        }

        let short_dated = days_to_expiry(&summary.instrument_name, now)
            .map(|dte| dte <= max_dte)
            .unwrap_or(false);
        if short_dated {
            if is_put {
                short_put_oi += oi;
            } else if is_call {
                short_call_oi += oi;
            }
        }
    }

    let overall_pcr = if call_oi > 0.0 { put_oi / call_oi } else { 1.0 };
    let short_pcr = (short_call_oi > 0.0).then(|| short_put_oi / short_call_oi);

    Ok(PcrReading {
        overall_pcr,
        short_pcr,
        put_open_interest: put_oi,
        call_open_interest: call_oi,
        fetched_at: now,
    })
}

#[async_trait]
impl ContextProvider<PcrReading> for DeribitPcrConnector {
    fn name(&self) -> &'static str {
        "deribit-pcr"
    }

    async fn fetch(&self) -> Result<PcrReading> {
        let mut cache = self.cache.lock().await;
        if let Some((at, reading)) = cache.as_ref() {
            if at.elapsed() < self.cache_ttl {
                debug!(pcr = reading.effective_pcr(), "Using cached Deribit PCR");
                return Ok(*reading);
            }
        }

        let reading = self.fetch_fresh().await?;
        info!(
            overall_pcr = reading.overall_pcr,
            short_pcr = reading.short_pcr,
            "Deribit put/call ratio"
        );
        *cache = Some((Instant::now(), reading));
        Ok(reading)
    }
}
