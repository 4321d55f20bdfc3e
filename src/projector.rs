//! Endpoint projection: running a global choreography as one participant.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

use crate::config::TransportConfig;
use crate::error::{ChoreographyError, Result};
use crate::located::{Located, MultiplyLocated};
use crate::location::Location;
use crate::op::{ChoreoOp, Choreography};
use crate::payload::{Payload, Portable};
use crate::transport::Transport;

/// Where the projected location stands in a point-to-point exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    /// Sender and receiver are both the projected location.
    Loopback,
    Sender,
    Receiver,
    /// Neither end of the exchange; the transport is not touched.
    Bystander,
}

impl Participation {
    pub fn resolve(target: &Location, sender: &Location, receiver: &Location) -> Self {
        match (target == sender, target == receiver) {
            (true, true) => Participation::Loopback,
            (true, false) => Participation::Sender,
            (false, true) => Participation::Receiver,
            (false, false) => Participation::Bystander,
        }
    }
}

/// Where the projected location stands in a one-to-many exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fanout {
    Origin,
    Audience,
}

impl Fanout {
    pub fn resolve(target: &Location, sender: &Location) -> Self {
        if target == sender {
            Fanout::Origin
        } else {
            Fanout::Audience
        }
    }
}

/// Binds one location to a transport and runs choreographies as that location.
pub struct Projector {
    target: Location,
    transport: Arc<dyn Transport>,
    receive_timeout: Option<Duration>,
    failed_sends: Arc<AtomicU64>,
}

impl Projector {
    pub fn new(target: Location, transport: Arc<dyn Transport>) -> Self {
        Self {
            target,
            transport,
            receive_timeout: None,
            failed_sends: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a projector that takes its receive timeout from `config`.
    pub fn from_config(target: Location, transport: Arc<dyn Transport>, config: &TransportConfig) -> Self {
        let mut projector = Self::new(target, transport);
        projector.receive_timeout = config.receive_timeout();
        projector
    }

    /// Bound every receive by `timeout` instead of waiting forever.
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn target(&self) -> &Location {
        &self.target
    }

    /// A value known at this projector's location.
    pub fn local<T>(&self, value: T) -> Located<T> {
        Located::local(value, self.target.clone())
    }

    /// The placeholder for a value owned by `location`.
    pub fn remote<T>(&self, location: Location) -> Located<T> {
        Located::remote(location)
    }

    /// Sends that the transport reported as failed during runs of this projector.
    pub fn failed_sends(&self) -> u64 {
        self.failed_sends.load(Ordering::Relaxed)
    }

    /// Project `choreography` onto this location and run it.
    #[instrument(skip_all, fields(target = %self.target))]
    pub async fn epp_and_run<C: Choreography>(&self, choreography: &C) -> Result<C::Output> {
        let op = ProjectedOp {
            target: self.target.clone(),
            transport: Arc::clone(&self.transport),
            receive_timeout: self.receive_timeout,
            failed_sends: Arc::clone(&self.failed_sends),
        };
        debug!("projection: start");
        let result = choreography.run(&op).await;
        match &result {
            Ok(_) => debug!("projection: complete"),
            Err(e) => warn!(error = %e, "projection: failed"),
        }
        result
    }
}

/// The [`ChoreoOp`] seen by a choreography running at `target`.
pub struct ProjectedOp {
    target: Location,
    transport: Arc<dyn Transport>,
    receive_timeout: Option<Duration>,
    failed_sends: Arc<AtomicU64>,
}

impl ProjectedOp {
    pub fn target(&self) -> &Location {
        &self.target
    }

    /// Send failures are logged and counted, never surfaced to the choreography.
    async fn send(&self, to: &Location, payload: Payload) {
        trace!(from = %self.target, %to, "send: start");
        if let Err(e) = self.transport.send(&self.target, to, payload).await {
            self.failed_sends.fetch_add(1, Ordering::Relaxed);
            warn!(from = %self.target, %to, error = %e, "send: failed, continuing");
        }
    }

    async fn receive<T: Portable>(&self, from: &Location) -> Result<T> {
        trace!(%from, at = %self.target, "recv: start");
        let receive = self.transport.receive(from, &self.target);
        let payload = match self.receive_timeout {
            Some(dur) => tokio::time::timeout(dur, receive)
                .await
                .map_err(|_| ChoreographyError::Timeout(dur))??,
            None => receive.await?,
        };
        let value = payload.decode::<T>()?;
        debug!(%from, at = %self.target, "recv: success");
        Ok(value)
    }
}

#[async_trait]
impl ChoreoOp for ProjectedOp {
    fn locally<T, F>(&self, owner: &Location, compute: F) -> Result<Located<T>>
    where
        T: Send,
        F: FnOnce() -> Result<T>,
    {
        if *owner == self.target {
            Ok(Located::local(compute()?, owner.clone()))
        } else {
            Ok(Located::remote(owner.clone()))
        }
    }

    async fn comm<T: Portable>(
        &self,
        sender: &Location,
        receiver: &Location,
        data: &Located<T>,
    ) -> Result<Located<T>> {
        match Participation::resolve(&self.target, sender, receiver) {
            Participation::Loopback => Ok(Located::local(data.get()?.clone(), receiver.clone())),
            Participation::Sender => {
                let value = data.get()?;
                self.send(receiver, Payload::encode(value)?).await;
                Ok(Located::local(value.clone(), receiver.clone()))
            }
            Participation::Receiver => {
                let value = self.receive(sender).await?;
                Ok(Located::local(value, receiver.clone()))
            }
            Participation::Bystander => Ok(Located::remote(receiver.clone())),
        }
    }

    async fn broadcast<T: Portable>(&self, sender: &Location, data: &Located<T>) -> Result<T> {
        match Fanout::resolve(&self.target, sender) {
            Fanout::Origin => {
                let value = data.get()?;
                let payload = Payload::encode(value)?;
                for destination in self.transport.locations() {
                    if destination != sender {
                        self.send(destination, payload.clone()).await;
                    }
                }
                Ok(value.clone())
            }
            Fanout::Audience => self.receive(sender).await,
        }
    }

    async fn multicast<T: Portable>(
        &self,
        sender: &Location,
        destinations: &[Location],
        data: &Located<T>,
    ) -> Result<MultiplyLocated<T>> {
        let mut located = MultiplyLocated::new();
        match Fanout::resolve(&self.target, sender) {
            Fanout::Origin => {
                let value = data.get()?;
                let payload = Payload::encode(value)?;
                for destination in destinations {
                    if destination != sender {
                        self.send(destination, payload.clone()).await;
                    }
                    located.insert(destination.clone(), Some(value.clone()));
                }
            }
            Fanout::Audience => {
                for destination in destinations {
                    if *destination == self.target {
                        let value = self.receive(sender).await?;
                        located.insert(destination.clone(), Some(value));
                    } else {
                        located.insert(destination.clone(), None);
                    }
                }
            }
        }
        Ok(located)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    const A: Location = Location::from_static("A");
    const B: Location = Location::from_static("B");
    const C: Location = Location::from_static("C");

    fn op_at(target: Location, transport: Arc<dyn Transport>) -> ProjectedOp {
        ProjectedOp {
            target,
            transport,
            receive_timeout: Some(Duration::from_millis(100)),
            failed_sends: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn participation_covers_every_branch() {
        assert_eq!(Participation::resolve(&A, &A, &A), Participation::Loopback);
        assert_eq!(Participation::resolve(&A, &A, &B), Participation::Sender);
        assert_eq!(Participation::resolve(&B, &A, &B), Participation::Receiver);
        assert_eq!(Participation::resolve(&C, &A, &B), Participation::Bystander);
        assert_eq!(Fanout::resolve(&A, &A), Fanout::Origin);
        assert_eq!(Fanout::resolve(&B, &A), Fanout::Audience);
    }

    #[test]
    fn locally_runs_only_on_owner() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([A, B]));
        let mut runs = 0;

        let at_a = op_at(A, Arc::clone(&transport))
            .locally(&A, || {
                runs += 1;
                Ok(5)
            })
            .unwrap();
        let at_b = op_at(B, transport)
            .locally(&A, || {
                runs += 1;
                Ok(5)
            })
            .unwrap();

        assert_eq!(runs, 1);
        assert_eq!(at_a.value(), Some(&5));
        assert!(!at_b.is_present());
        assert_eq!(at_b.location(), &A);
    }

    #[test]
    fn locally_propagates_computation_errors() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([A]));
        let result: Result<Located<u32>> =
            op_at(A, transport).locally(&A, || Err(ChoreographyError::local("no stock")));
        assert!(matches!(result, Err(ChoreographyError::Local(_))));
    }

    #[tokio::test]
    async fn loopback_comm_skips_transport() {
        let transport = Arc::new(MemoryTransport::new([A, B]));
        let op = op_at(A, transport.clone());
        let out = op.comm(&A, &A, &Located::local(9u8, A)).await.unwrap();
        assert_eq!(out.value(), Some(&9));
        assert_eq!(out.location(), &A);

        let nothing = tokio::time::timeout(Duration::from_millis(20), transport.receive(&A, &A)).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn bystander_comm_returns_placeholder() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([A, B, C]));
        let op = op_at(C, transport);
        let out = op
            .comm(&A, &B, &Located::<u8>::remote(A))
            .await
            .unwrap();
        assert!(!out.is_present());
        assert_eq!(out.location(), &B);
    }

    #[tokio::test]
    async fn sender_without_value_is_absent_error() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([A, B]));
        let op = op_at(A, transport);
        let err = op.comm(&A, &B, &Located::<u8>::remote(A)).await.unwrap_err();
        assert!(matches!(err, ChoreographyError::Absent { .. }));
    }

    #[tokio::test]
    async fn failed_send_is_counted_not_raised() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([A, B]));
        let projector = Projector::new(A, Arc::clone(&transport));
        transport.close().await.unwrap();

        struct SendOnce;

        #[async_trait]
        impl Choreography for SendOnce {
            type Output = Option<u8>;

            async fn run<Op: ChoreoOp>(&self, op: &Op) -> Result<Self::Output> {
                let value = op.locally(&A, || Ok(1u8))?;
                let moved = op.comm(&A, &B, &value).await?;
                Ok(moved.value().copied())
            }
        }

        let out = projector.epp_and_run(&SendOnce).await.unwrap();
        assert_eq!(out, Some(1));
        assert_eq!(projector.failed_sends(), 1);
    }

    #[tokio::test]
    async fn receive_timeout_maps_to_timeout_error() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([A, B]));
        let op = op_at(B, transport);
        let err = op.comm(&A, &B, &Located::<u8>::remote(A)).await.unwrap_err();
        assert!(matches!(err, ChoreographyError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn received_value_of_wrong_type_is_a_decoding_error() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new([A, B]));
        transport
            .send(&A, &B, Payload::encode(&"eighty").unwrap())
            .await
            .unwrap();
        let op = op_at(B, transport);
        let err = op.comm(&A, &B, &Located::<u32>::remote(A)).await.unwrap_err();
        assert!(matches!(err, ChoreographyError::TypeMismatch { .. }));
    }
}
