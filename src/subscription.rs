//! A single event subscription.
//!
//! A subscription pairs an event topic with the decoder of the exchange that
//! registered it. Its identity is the topic alone: two subscriptions with the
//! same topic fetch the same logs and are interchangeable.

use crate::error::TrackerResult;
use crate::events::{EventKind, UpdateRecord};
use crate::exchanges::{DecodeContext, DecodeFn, EventBinding, ExchangeFamily};
use alloy::primitives::B256;
use alloy::rpc::types::Log;
use std::fmt;
use std::sync::Arc;

/// One event an exchange listens for.
#[derive(Clone)]
pub struct Subscription {
    topic: B256,
    family: ExchangeFamily,
    kind: EventKind,
    decode: DecodeFn,
    context: Arc<DecodeContext>,
}

impl Subscription {
    /// Create a subscription for `binding`, owned by the exchange in `context`.
    #[must_use]
    pub fn new(family: ExchangeFamily, binding: &EventBinding, context: Arc<DecodeContext>) -> Self {
        Self {
            topic: binding.topic,
            family,
            kind: binding.kind,
            decode: binding.decode,
            context,
        }
    }

    /// Event topic.
    #[must_use]
    pub const fn topic(&self) -> B256 {
        self.topic
    }

    /// Family of the owning exchange.
    #[must_use]
    pub const fn family(&self) -> ExchangeFamily {
        self.family
    }

    /// What the event changes.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Name of the owning exchange.
    #[must_use]
    pub fn exchange_name(&self) -> &str {
        &self.context.exchange_name
    }

    /// Decode one log.
    ///
    /// # Errors
    ///
    /// Returns a decoding error when the log does not match the event.
    pub fn decode(&self, log: &Log) -> TrackerResult<UpdateRecord> {
        (self.decode)(log, &self.context)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("exchange", &self.context.exchange_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
