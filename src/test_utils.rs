//! In-memory chain for tests.
//!
//! [`MockChain`] serves canned logs and call responses through the same
//! [`ChainClient`] seam the HTTP client implements, and records every log
//! fetch so tests can assert on request counts.

use crate::error::{TrackerError, TrackerResult};
use crate::rpc::{ChainClient, ForkControl};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use alloy::sol_types::{SolCall, SolEvent};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A single `get_logs` request seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFetch {
    /// First block requested
    pub from_block: u64,
    /// Last block requested
    pub to_block: u64,
    /// Topics requested
    pub topics: Vec<B256>,
}

/// Deterministic chain double.
#[derive(Debug, Default)]
pub struct MockChain {
    head: AtomicU64,
    seconds_advanced: AtomicU64,
    logs: Mutex<Vec<Log>>,
    responses: Mutex<HashMap<(Address, Bytes), Bytes>>,
    failing_topics: Mutex<HashSet<B256>>,
    fetches: Mutex<Vec<LogFetch>>,
}

/// Build a mined log emitting `event` from `address`.
#[must_use]
pub fn event_log<E: SolEvent>(address: Address, event: &E, block_number: u64, log_index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_number: Some(block_number),
        log_index: Some(log_index),
        ..Log::default()
    }
}

impl MockChain {
    /// Chain whose head is at `head`.
    #[must_use]
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.set_head(head);
        chain
    }

    /// Move the head.
    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Current head.
    #[must_use]
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    /// Total seconds the fork clock was advanced.
    #[must_use]
    pub fn seconds_advanced(&self) -> u64 {
        self.seconds_advanced.load(Ordering::SeqCst)
    }

    /// Add a log to the chain.
    pub fn push_log(&self, log: Log) {
        lock(&self.logs).push(log);
    }

    /// Add `event` emitted by `address` at `(block_number, log_index)`.
    pub fn emit<E: SolEvent>(&self, address: Address, event: &E, block_number: u64, log_index: u64) {
        self.push_log(event_log(address, event, block_number, log_index));
    }

    /// Answer `call` sent to `to` with the ABI-encoded `output`.
    pub fn respond<C: SolCall>(&self, to: Address, call: &C, output: impl Into<Bytes>) {
        lock(&self.responses).insert((to, call.abi_encode().into()), output.into());
    }

    /// Make every fetch including `topic` fail.
    pub fn fail_topic(&self, topic: B256) {
        lock(&self.failing_topics).insert(topic);
    }

    /// Stop failing fetches for `topic`.
    pub fn heal_topic(&self, topic: B256) {
        lock(&self.failing_topics).remove(&topic);
    }

    /// Every `get_logs` request so far.
    #[must_use]
    pub fn fetches(&self) -> Vec<LogFetch> {
        lock(&self.fetches).clone()
    }

    /// Number of requests that asked for `topic`.
    #[must_use]
    pub fn fetch_count(&self, topic: B256) -> usize {
        lock(&self.fetches)
            .iter()
            .filter(|fetch| fetch.topics.contains(&topic))
            .count()
    }

    /// Highest block any request asked for.
    #[must_use]
    pub fn max_requested_block(&self) -> Option<u64> {
        lock(&self.fetches).iter().map(|fetch| fetch.to_block).max()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl ChainClient for MockChain {
    fn block_number(&self) -> BoxFuture<'_, TrackerResult<u64>> {
        let head = self.head();
        Box::pin(async move { Ok(head) })
    }

    fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        topics: Vec<B256>,
    ) -> BoxFuture<'_, TrackerResult<Vec<Log>>> {
        lock(&self.fetches).push(LogFetch {
            from_block,
            to_block,
            topics: topics.clone(),
        });

        let failing = {
            let failing_topics = lock(&self.failing_topics);
            topics.iter().any(|topic| failing_topics.contains(topic))
        };
        let result = if failing {
            Err(TrackerError::rpc(
                format!("mock get_logs failure for blocks {from_block}-{to_block}"),
                None,
            ))
        } else {
            let logs = lock(&self.logs)
                .iter()
                .filter(|log| {
                    let block = log.block_number.unwrap_or_default();
                    (from_block..=to_block).contains(&block)
                        && log.topics().first().is_some_and(|t| topics.contains(t))
                })
                .cloned()
                .collect();
            Ok(logs)
        };

        Box::pin(async move { result })
    }

    fn call(&self, to: Address, input: Bytes) -> BoxFuture<'_, TrackerResult<Bytes>> {
        let result = lock(&self.responses)
            .get(&(to, input))
            .cloned()
            .ok_or_else(|| TrackerError::rpc(format!("execution reverted at {to}"), None));
        Box::pin(async move { result })
    }
}

impl ForkControl for MockChain {
    fn advance_time(&self, seconds: u64) -> BoxFuture<'_, TrackerResult<()>> {
        self.seconds_advanced.fetch_add(seconds, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn advance_blocks(&self, blocks: u64) -> BoxFuture<'_, TrackerResult<()>> {
        self.head.fetch_add(blocks, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
