// Paper runner
// Feeds JSON-lines ticks from stdin through the decision core. Each interval
// is settled from its last observed YES price once the next one begins.
// Live feeds are bounded by the wall clock; `--replay` trusts tick
// timestamps alone so recorded sessions can be replayed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{init_logging, LogFormat, MarketResolution, PriceSample, StrategyConfig};
use execution::{DecisionEvent, DecisionOrchestrator, MarketInterval, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// YES price at or above which a finished interval is settled UP
const SETTLE_UP_PRICE: f64 = 0.5;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogFormat::from_env())?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let replay = args.iter().any(|arg| arg == "--replay");
    let config_path = args
        .iter()
        .find(|arg| !arg.starts_with("--"))
        .map(PathBuf::from);
    let config = StrategyConfig::load(config_path.as_deref())?;
    let interval_seconds = config.market_interval_seconds;
    let orchestrator = DecisionOrchestrator::from_config(config).await?;
    let orchestrator = if replay {
        info!("Replay mode; cycle deadlines follow tick timestamps");
        orchestrator
    } else {
        orchestrator.with_clock(Arc::new(SystemClock))
    };

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let DecisionEvent::Settled { outcome } = &event {
                info!(trade_id = %outcome.trade_id, pnl = %outcome.pnl, "Outcome settled");
            }
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to encode decision event"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last: Option<PriceSample> = None;
    while let Some(line) = lines.next_line().await.context("Failed to read tick stream")? {
        if line.trim().is_empty() {
            continue;
        }
        let sample: PriceSample = match serde_json::from_str(&line) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Skipping malformed tick");
                continue;
            }
        };

        if let Some(previous) = last {
            let finished = MarketInterval::containing(previous.timestamp, interval_seconds);
            if finished != MarketInterval::containing(sample.timestamp, interval_seconds) {
                settle(&orchestrator, finished.start, previous.price, sample.timestamp).await;
            }
        }
        orchestrator.on_tick(sample).await;
        last = Some(sample);
    }

    if let Some(previous) = last {
        let finished = MarketInterval::containing(previous.timestamp, interval_seconds);
        settle(&orchestrator, finished.start, previous.price, previous.timestamp).await;
    }

    let account = orchestrator.account(Utc::now());
    let insights = orchestrator.learning().lock().await.insights();
    info!(
        balance = %account.balance,
        daily_pnl = %account.daily_realized_pnl,
        weights_version = insights.weights.version,
        "Tick stream finished"
    );
    Ok(())
}

async fn settle(
    orchestrator: &DecisionOrchestrator,
    interval_start: DateTime<Utc>,
    final_price: f64,
    at: DateTime<Utc>,
) {
    let resolution = if final_price >= SETTLE_UP_PRICE {
        MarketResolution::Up
    } else {
        MarketResolution::Down
    };
    orchestrator.settle_interval(interval_start, resolution, at).await;
}
