//! In-process transport for running every participant in one process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex};
use tracing::{instrument, trace};

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::location::Location;
use crate::payload::Payload;
use crate::transport::Transport;

/// Bounded FIFO for one ordered `(from, to)` pair.
struct Route {
    tx: mpsc::Sender<Payload>,
    rx: Arc<Mutex<mpsc::Receiver<Payload>>>,
}

/// In-memory transport using bounded tokio channels.
///
/// Queues for every ordered pair of participants are created up front, so
/// `send` only blocks once a pair's queue is full and `receive` only ever
/// sees messages from the requested sender.
pub struct MemoryTransport {
    locations: Vec<Location>,
    routes: RwLock<HashMap<(Location, Location), Route>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport for `locations` with the default queue capacity.
    pub fn new(locations: impl IntoIterator<Item = Location>) -> Self {
        Self::from_config(locations, &TransportConfig::default())
    }

    /// Create a transport whose queues hold up to `config.queue_capacity()` messages.
    pub fn from_config(locations: impl IntoIterator<Item = Location>, config: &TransportConfig) -> Self {
        let mut unique: Vec<Location> = Vec::new();
        for location in locations {
            if !unique.contains(&location) {
                unique.push(location);
            }
        }

        let capacity = config.queue_capacity().max(1);
        let mut routes = HashMap::new();
        for from in &unique {
            for to in &unique {
                let (tx, rx) = mpsc::channel(capacity);
                routes.insert(
                    (from.clone(), to.clone()),
                    Route {
                        tx,
                        rx: Arc::new(Mutex::new(rx)),
                    },
                );
            }
        }

        Self {
            locations: unique,
            routes: RwLock::new(routes),
            closed: AtomicBool::new(false),
        }
    }

    fn sender(&self, from: &Location, to: &Location) -> TransportResult<mpsc::Sender<Payload>> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes
            .get(&(from.clone(), to.clone()))
            .map(|route| route.tx.clone())
            .ok_or_else(|| self.missing_route(from, to))
    }

    fn receiver(
        &self,
        from: &Location,
        at: &Location,
    ) -> TransportResult<Arc<Mutex<mpsc::Receiver<Payload>>>> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes
            .get(&(from.clone(), at.clone()))
            .map(|route| Arc::clone(&route.rx))
            .ok_or_else(|| self.missing_route(from, at))
    }

    fn missing_route(&self, from: &Location, to: &Location) -> TransportError {
        if self.closed.load(Ordering::Acquire) {
            return TransportError::Closed;
        }
        let unknown = if self.locations.contains(from) { to } else { from };
        TransportError::UnknownLocation(unknown.to_string())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    #[instrument(skip_all, fields(%from, %to))]
    async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()> {
        let tx = self.sender(from, to)?;
        tx.send(payload).await.map_err(|_| TransportError::Closed)?;
        trace!("MemoryTransport: queued");
        Ok(())
    }

    #[instrument(skip_all, fields(%from, %at))]
    async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload> {
        let rx = self.receiver(from, at)?;
        let mut rx = rx.lock().await;
        let payload = rx.recv().await.ok_or(TransportError::Closed)?;
        trace!("MemoryTransport: dequeued");
        Ok(payload)
    }

    fn locations(&self) -> &[Location] {
        &self.locations
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const A: Location = Location::from_static("A");
    const B: Location = Location::from_static("B");
    const C: Location = Location::from_static("C");

    fn payload(n: u32) -> Payload {
        Payload::encode(&n).unwrap()
    }

    #[tokio::test]
    async fn fifo_per_pair() {
        let transport = MemoryTransport::new([A, B]);
        transport.send(&A, &B, payload(1)).await.unwrap();
        transport.send(&A, &B, payload(2)).await.unwrap();

        let first = transport.receive(&A, &B).await.unwrap();
        let second = transport.receive(&A, &B).await.unwrap();
        assert_eq!(first.decode::<u32>().unwrap(), 1);
        assert_eq!(second.decode::<u32>().unwrap(), 2);
    }

    #[tokio::test]
    async fn receive_filters_by_sender() {
        let transport = MemoryTransport::new([A, B, C]);
        transport.send(&C, &B, payload(3)).await.unwrap();
        transport.send(&A, &B, payload(1)).await.unwrap();

        let from_a = transport.receive(&A, &B).await.unwrap();
        assert_eq!(from_a.decode::<u32>().unwrap(), 1);
        let from_c = transport.receive(&C, &B).await.unwrap();
        assert_eq!(from_c.decode::<u32>().unwrap(), 3);
    }

    #[tokio::test]
    async fn unknown_destination_is_reported() {
        let transport = MemoryTransport::new([A, B]);
        let err = transport
            .send(&A, &Location::from_static("Z"), payload(0))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownLocation(name) if name == "Z"));
    }

    #[tokio::test]
    async fn duplicate_locations_are_collapsed() {
        let transport = MemoryTransport::new([A, B, A]);
        assert_eq!(transport.locations(), &[A, B]);
    }

    #[tokio::test]
    async fn close_wakes_pending_receive() {
        let transport = Arc::new(MemoryTransport::new([A, B]));
        let waiter = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.receive(&A, &B).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(matches!(
            transport.send(&A, &B, payload(1)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let config = TransportConfig::default().with_queue_capacity(1).unwrap();
        let transport = MemoryTransport::from_config([A, B], &config);
        transport.send(&A, &B, payload(1)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), transport.send(&A, &B, payload(2))).await;
        assert!(blocked.is_err());
    }
}
