//! HTTP rendezvous transport.
//!
//! One process hosts a `POST /message` endpoint. Every participant posts
//! envelopes there, and the server pushes each payload onto the in-process
//! queue for its `(from, to)` pair, where the destination's `receive` picks it
//! up. All participants therefore have to reach the same rendezvous process.
//!
//! ```text
//! POST /message
//! {"from": "Buyer", "to": "Seller", "data": {"type": "alloc::string::String", "value": "TAPL"}}
//!
//! 200 OK          body "OK"
//! 400 Bad Request malformed envelope
//! 404 Not Found   unknown destination
//! 405             any method other than POST
//! ```

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

use crate::config::HttpTransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::location::Location;
use crate::payload::Payload;
use crate::transport::{MemoryTransport, Transport};

/// Wire form of one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: Location,
    pub to: Location,
    pub data: Payload,
}

/// Transport that routes every message through a shared HTTP rendezvous.
pub struct HttpTransport {
    mailbox: Arc<MemoryTransport>,
    client: reqwest::Client,
    endpoint: String,
    local_addr: SocketAddr,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Start the rendezvous server for `locations` and connect a client to it.
    ///
    /// Every participant sharing this transport posts to the configured
    /// rendezvous URL but receives from this server's queues, so the URL must
    /// route back to this listener.
    #[instrument(skip_all, fields(addr = %config.listen_addr()))]
    pub async fn bind(
        config: &HttpTransportConfig,
        locations: impl IntoIterator<Item = Location>,
    ) -> TransportResult<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        let mailbox = Arc::new(MemoryTransport::from_config(locations, config.transport()));

        let app = router(Arc::clone(&mailbox));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "rendezvous server error");
            }
        });
        info!(%local_addr, "rendezvous server listening");

        let base = config
            .rendezvous_url()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("http://{local_addr}"));
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            mailbox,
            client,
            endpoint: format!("{base}/message"),
            local_addr,
            shutdown: Mutex::new(Some(shutdown_tx)),
            server: Mutex::new(Some(server)),
        })
    }

    /// Address the rendezvous server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL envelopes are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn signal_shutdown(&self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(%from, %to))]
    async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()> {
        let envelope = Envelope {
            from: from.clone(),
            to: to.clone(),
            data: payload,
        };
        let response = self.client.post(&self.endpoint).json(&envelope).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("HttpTransport: delivered to rendezvous");
            return Ok(());
        }
        let reason = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            reason,
        })
    }

    async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload> {
        self.mailbox.receive(from, at).await
    }

    fn locations(&self) -> &[Location] {
        self.mailbox.locations()
    }

    async fn close(&self) -> TransportResult<()> {
        self.signal_shutdown();
        self.mailbox.close().await?;
        let server = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(server) = server {
            if let Err(e) = server.await {
                warn!(error = %e, "rendezvous server task ended abnormally");
            }
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

fn router(mailbox: Arc<MemoryTransport>) -> Router {
    Router::new()
        .route("/message", post(accept_message).fallback(reject_method))
        .layer(TraceLayer::new_for_http())
        .with_state(mailbox)
}

async fn accept_message(
    State(mailbox): State<Arc<MemoryTransport>>,
    body: Bytes,
) -> (StatusCode, String) {
    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "rejecting malformed envelope");
            return (StatusCode::BAD_REQUEST, format!("Error parsing JSON: {e}"));
        }
    };

    match mailbox.send(&envelope.from, &envelope.to, envelope.data).await {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(TransportError::UnknownLocation(name)) => {
            (StatusCode::NOT_FOUND, format!("Unknown location: {name}"))
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn reject_method() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Invalid method")
}
