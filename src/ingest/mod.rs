use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::db::{self, Db};
use crate::error::FlowResult;
use crate::feeds::MarketFeed;

/// Periodic producer: polls each configured feed at its own cadence and
/// appends `price_samples` rows. Write-only — it never reads strategies.
pub struct Ingestor {
    db: Db,
    feeds: Vec<(Arc<dyn MarketFeed>, Duration)>,
}

impl Ingestor {
    pub fn new(db: Db) -> Self {
        Ingestor {
            db,
            feeds: Vec::new(),
        }
    }

    pub fn with_feed(mut self, feed: Arc<dyn MarketFeed>, interval: Duration) -> Self {
        self.feeds.push((feed, interval));
        self
    }

    /// Run until shutdown flips. Each feed gets its own task; a failed tick
    /// is logged and the next tick proceeds normally.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();

        for (feed, interval) in self.feeds {
            let db = self.db.clone();
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match tick_feed(&db, feed.as_ref()).await {
                                Ok(inserted) => {
                                    tracing::debug!(feed = feed.name(), inserted, "ingest tick");
                                }
                                Err(err) => {
                                    tracing::warn!(feed = feed.name(), %err, "ingest tick failed");
                                }
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                tracing::info!(feed = feed.name(), "ingestor stopping");
                                break;
                            }
                        }
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// One poll of one feed. Quotes failing validation are dropped; DB errors
/// on one row do not abort the rest of the batch.
pub async fn tick_feed(db: &Db, feed: &dyn MarketFeed) -> FlowResult<usize> {
    let quotes = feed.poll().await?;
    let source = feed.source();

    let mut inserted = 0;
    for quote in quotes {
        if quote.address.is_empty() || quote.symbol.is_empty() || !quote.price_usd.is_finite() {
            continue;
        }
        match db::prices::insert(
            db,
            &quote.chain,
            &quote.address,
            &quote.symbol,
            quote.price_usd,
            source,
        )
        .await
        {
            Ok(_) => inserted += 1,
            Err(err) => {
                tracing::warn!(feed = feed.name(), chain = %quote.chain, address = %quote.address, %err, "sample insert failed");
            }
        }
    }
    Ok(inserted)
}
