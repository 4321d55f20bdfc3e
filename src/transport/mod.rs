//! Message delivery between named locations.
//!
//! A [`Transport`] moves [`Payload`]s from one location to another. The
//! projection engine only ever sees this trait, so any backend satisfying it
//! can be swapped in without touching a choreography:
//!
//! - [`MemoryTransport`]: bounded in-process queues, one per ordered pair
//! - [`HttpTransport`]: a shared HTTP rendezvous multiplexing envelopes
//! - [`PubSubTransport`]: a topic and subscription per location on a [`Broker`]
//!
//! Every backend filters `receive` by sender: a message from `A` to `C` is
//! never handed to a `receive(B, C)` call.

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::location::Location;
use crate::payload::Payload;

pub mod http;
pub mod memory;
pub mod middleware;
pub mod pubsub;

pub use http::{Envelope, HttpTransport};
pub use memory::MemoryTransport;
pub use middleware::{Metered, Retry, Traced};
pub use pubsub::{Broker, BrokerMessage, Delivery, MemoryBroker, PubSubTransport};

/// Point-to-point delivery between the locations of one protocol run.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand `payload` to the inbound queue of `to`.
    ///
    /// Errors are reported to the caller; the projection engine logs them and
    /// carries on rather than failing the choreography.
    async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()>;

    /// Wait for the next message from `from` addressed to `at`.
    async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload>;

    /// Every location this transport delivers to, in a fixed order.
    fn locations(&self) -> &[Location];

    /// Release queues and stop background tasks.
    async fn close(&self) -> TransportResult<()> {
        Ok(())
    }
}
