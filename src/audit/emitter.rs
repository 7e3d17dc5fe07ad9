//! C7: asynchronous, fire-and-forget audit publication.
//!
//! Grounded on the teacher's `images/services.rs` async-collaborator
//! pattern (`Arc<dyn Trait>` injected into `AppState`, a `Fake…` test
//! double) and `storage.rs`'s `StorageClient` trait shape.

use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;

use super::events::ManagementEvent;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait AuditEmitter: Send + Sync {
    /// Publishes `event`. Implementations must never let a failure
    /// propagate to the caller — the write that triggered the event has
    /// already succeeded or failed on its own terms.
    async fn emit(&self, event: ManagementEvent);
}

/// Posts events to the external audit sink over HTTP, detached from the
/// request that triggered them so client cancellation cannot abort
/// publication.
pub struct HttpAuditEmitter {
    http: reqwest::Client,
    sink_url: String,
}

impl HttpAuditEmitter {
    pub fn new(sink_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { http, sink_url }
    }
}

#[async_trait]
impl AuditEmitter for HttpAuditEmitter {
    async fn emit(&self, event: ManagementEvent) {
        let http = self.http.clone();
        let url = self.sink_url.clone();
        // Detached: the spawned task outlives the handler, so a client
        // disconnect cannot cancel an audit publish already in flight.
        tokio::spawn(async move {
            match http.post(&url).json(&event).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), "audit sink rejected event");
                }
                Err(err) => {
                    tracing::warn!(%err, "audit emission failed");
                }
            }
        });
    }
}

/// Used when `AUDIT_SERVICE_URL` is unset — audit publication is
/// disabled entirely rather than pointed at a dead endpoint.
pub struct NoopAuditEmitter;

#[async_trait]
impl AuditEmitter for NoopAuditEmitter {
    async fn emit(&self, _event: ManagementEvent) {}
}

pub fn from_config(url: Option<String>) -> Arc<dyn AuditEmitter> {
    match url {
        Some(url) => Arc::new(HttpAuditEmitter::new(url)),
        None => Arc::new(NoopAuditEmitter),
    }
}
