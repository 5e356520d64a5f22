//! Log gathering.
//!
//! The [`EventGatherer`] turns the subscriptions of every enabled exchange
//! into one `eth_getLogs` call per distinct topic, runs those calls
//! concurrently and decodes the results into [`UpdateRecord`]s.
//!
//! ```text
//!   adapters ──► subscriptions ──► dedup by topic ──► fan-out get_logs
//!                                                        │
//!            sorted records ◄── merge + decode ◄─────────┘
//! ```
//!
//! A failed topic fetch fails the whole gather and no partial result is
//! returned; the caller retries the range on its next cycle. Logs that fail
//! to decode are dropped and counted.

use crate::error::TrackerResult;
use crate::events::{order_records, UpdateRecord};
use crate::exchanges::{AdapterSet, DeployedContracts};
use crate::rpc::ChainClient;
use crate::subscription::Subscription;
use alloy::primitives::B256;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of one gather.
#[derive(Debug, Clone, Default)]
pub struct GatherOutput {
    /// Decoded records in chain order
    pub records: Vec<UpdateRecord>,
    /// Logs fetched across all topics
    pub fetched_logs: usize,
    /// Logs dropped because they failed to decode
    pub dropped_logs: usize,
}

/// Deduplicated subscriptions and the fan-out bound.
#[derive(Debug, Clone)]
pub struct EventGatherer {
    subscriptions: Vec<Subscription>,
    max_concurrency: usize,
}

impl EventGatherer {
    /// Deduplicate `subscriptions` by topic. The first subscription seen for
    /// a topic owns its decoder.
    #[must_use]
    pub fn new<I>(subscriptions: I, max_concurrency: usize) -> Self
    where
        I: IntoIterator<Item = Subscription>,
    {
        let mut seen: HashSet<B256> = HashSet::new();
        let mut unique = Vec::new();

        for subscription in subscriptions {
            if seen.insert(subscription.topic()) {
                unique.push(subscription);
            } else {
                debug!(
                    topic = %subscription.topic(),
                    exchange = subscription.exchange_name(),
                    "Topic already subscribed, sharing owner's decoder"
                );
            }
        }

        Self {
            subscriptions: unique,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Collect the subscriptions of every initialized adapter, in adapter order.
    #[must_use]
    pub fn for_adapters(adapters: &AdapterSet, deployed: &Arc<DeployedContracts>, max_concurrency: usize) -> Self {
        Self::new(
            adapters
                .iter()
                .flat_map(|adapter| adapter.enumerate_subscriptions(deployed)),
            max_concurrency,
        )
    }

    /// Collect only creation subscriptions, for terraforming.
    #[must_use]
    pub fn for_creations(adapters: &AdapterSet, deployed: &Arc<DeployedContracts>, max_concurrency: usize) -> Self {
        Self::new(
            adapters
                .iter()
                .flat_map(|adapter| adapter.creation_subscriptions(deployed)),
            max_concurrency,
        )
    }

    /// Unique subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Unique topics, in subscription order.
    #[must_use]
    pub fn topics(&self) -> Vec<B256> {
        self.subscriptions.iter().map(Subscription::topic).collect()
    }

    /// Whether there is nothing to fetch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Fetch and decode `[from_block, to_block]` for every topic.
    ///
    /// All fetches run to completion before any error is reported.
    ///
    /// # Errors
    ///
    /// Returns the first fetch error; no records are returned in that case.
    #[instrument(skip(self, chain), fields(topics = self.subscriptions.len()))]
    pub async fn gather(&self, chain: &dyn ChainClient, from_block: u64, to_block: u64) -> TrackerResult<GatherOutput> {
        let results: Vec<_> = stream::iter(self.subscriptions.iter())
            .map(|subscription| async move {
                chain
                    .get_logs(from_block, to_block, vec![subscription.topic()])
                    .await
                    .map(|logs| (subscription, logs))
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut output = GatherOutput::default();
        let mut fetched = Vec::with_capacity(results.len());
        for result in results {
            fetched.push(result?);
        }

        for (subscription, logs) in fetched {
            output.fetched_logs += logs.len();
            for log in &logs {
                match subscription.decode(log) {
                    Ok(record) => output.records.push(record),
                    Err(e) => {
                        output.dropped_logs += 1;
                        warn!(
                            exchange = subscription.exchange_name(),
                            tx = ?log.transaction_hash,
                            error = %e,
                            "Dropping undecodable log"
                        );
                    }
                }
            }
        }

        order_records(&mut output.records);
        debug!(
            from_block,
            to_block,
            fetched = output.fetched_logs,
            records = output.records.len(),
            dropped = output.dropped_logs,
            "Gathered logs"
        );
        Ok(output)
    }
}
