// Middleware layers for transports
//
// These wrap any Transport to add cross-cutting concerns like tracing,
// metrics and retries without touching the backend or the choreography.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::TransportResult;
use crate::location::Location;
use crate::payload::Payload;
use crate::transport::Transport;

/// Tracing middleware that logs every send and receive
pub struct Traced<T> {
    inner: T,
    prefix: String,
}

impl<T> Traced<T> {
    pub fn new(inner: T) -> Self {
        Self::with_prefix(inner, "choreo")
    }

    pub fn with_prefix(inner: T, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for Traced<T> {
    async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()> {
        let start = Instant::now();
        let prefix = self.prefix.as_str();
        trace!(prefix, %from, %to, type_tag = payload.type_tag(), "send: start");
        let result = self.inner.send(from, to, payload).await;
        let duration = start.elapsed();
        match &result {
            Ok(()) => debug!(prefix, %from, %to, ?duration, "send: success"),
            Err(e) => warn!(prefix, %from, %to, ?duration, error = %e, "send: failed"),
        }
        result
    }

    async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload> {
        let start = Instant::now();
        let prefix = self.prefix.as_str();
        trace!(prefix, %from, %at, "recv: start");
        let result = self.inner.receive(from, at).await;
        let duration = start.elapsed();
        match &result {
            Ok(payload) => debug!(prefix, %from, %at, ?duration, type_tag = payload.type_tag(), "recv: success"),
            Err(e) => warn!(prefix, %from, %at, ?duration, error = %e, "recv: failed"),
        }
        result
    }

    fn locations(&self) -> &[Location] {
        self.inner.locations()
    }

    async fn close(&self) -> TransportResult<()> {
        debug!(prefix = self.prefix.as_str(), "close");
        self.inner.close().await
    }
}

/// Metrics collection middleware
pub struct Metered<T> {
    inner: T,
    send_count: AtomicU64,
    recv_count: AtomicU64,
    error_count: AtomicU64,
}

impl<T> Metered<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            send_count: AtomicU64::new(0),
            recv_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::Relaxed)
    }

    pub fn recv_count(&self) -> u64 {
        self.recv_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    fn record<R>(&self, result: &TransportResult<R>, counter: &AtomicU64) {
        if result.is_ok() {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for Metered<T> {
    async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()> {
        let result = self.inner.send(from, to, payload).await;
        self.record(&result, &self.send_count);
        result
    }

    async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload> {
        let result = self.inner.receive(from, at).await;
        self.record(&result, &self.recv_count);
        result
    }

    fn locations(&self) -> &[Location] {
        self.inner.locations()
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.close().await
    }
}

/// Retry middleware with exponential backoff
pub struct Retry<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
}

impl<T> Retry<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }

    pub fn with_config(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
        }
    }
}

/// `base * 2^(retry - 1)`, saturating instead of overflowing for long retry runs.
fn backoff(base: Duration, retry: usize) -> Duration {
    let factor = u32::try_from(retry.saturating_sub(1))
        .ok()
        .and_then(|exp| 2u32.checked_pow(exp))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

#[async_trait]
impl<T: Transport> Transport for Retry<T> {
    async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()> {
        let mut retries = 0;
        loop {
            match self.inner.send(from, to, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if retries < self.max_retries => {
                    retries += 1;
                    let delay = backoff(self.base_delay, retries);
                    debug!(%from, %to, retries, ?delay, error = %e, "send failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload> {
        // A receive consumes protocol state, so it is never replayed.
        self.inner.receive(from, at).await
    }

    fn locations(&self) -> &[Location] {
        self.inner.locations()
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::AtomicUsize;

    const A: Location = Location::from_static("A");
    const B: Location = Location::from_static("B");

    /// Fails the first `failures` sends, then delegates.
    struct Flaky {
        inner: MemoryTransport,
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(TransportError::Broker("injected fault".into()));
            }
            self.inner.send(from, to, payload).await
        }

        async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload> {
            self.inner.receive(from, at).await
        }

        fn locations(&self) -> &[Location] {
            self.inner.locations()
        }
    }

    fn flaky(failures: usize) -> Flaky {
        Flaky {
            inner: MemoryTransport::new([A, B]),
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn metered_counts_traffic_and_errors() {
        let transport = Metered::new(Traced::new(flaky(1)));
        let payload = Payload::encode(&1u8).unwrap();

        assert!(transport.send(&A, &B, payload.clone()).await.is_err());
        transport.send(&A, &B, payload).await.unwrap();
        transport.receive(&A, &B).await.unwrap();

        assert_eq!(transport.send_count(), 1);
        assert_eq!(transport.recv_count(), 1);
        assert_eq!(transport.error_count(), 1);
        assert_eq!(transport.locations(), &[A, B]);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let transport = Retry::with_config(flaky(2), 3, Duration::from_millis(1));
        transport
            .send(&A, &B, Payload::encode(&"hi").unwrap())
            .await
            .unwrap();
        assert_eq!(transport.inner.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries() {
        let transport = Retry::with_config(flaky(10), 2, Duration::from_millis(1));
        let result = transport.send(&A, &B, Payload::encode(&"hi").unwrap()).await;
        assert!(matches!(result, Err(TransportError::Broker(_))));
        assert_eq!(transport.inner.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn long_retry_runs_do_not_overflow_backoff() {
        let transport = Retry::with_config(flaky(usize::MAX), 40, Duration::ZERO);
        let result = transport.send(&A, &B, Payload::encode(&1u8).unwrap()).await;
        assert!(matches!(result, Err(TransportError::Broker(_))));
        assert_eq!(transport.inner.attempts.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 1), base);
        assert_eq!(backoff(base, 3), Duration::from_millis(400));
        assert_eq!(backoff(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff(Duration::from_secs(u64::MAX), 2), Duration::MAX);
        assert_eq!(backoff(Duration::ZERO, 100), Duration::ZERO);
    }
}
