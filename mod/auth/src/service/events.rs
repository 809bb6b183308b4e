use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Event published when an identity is created or its link updated.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityEvent {
    pub kind: IdentityEventKind,
    pub account_id: String,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityEventKind {
    Created,
    Updated,
}

#[derive(Debug, Error)]
#[error("event publish failed: {0}")]
pub struct EventError(pub String);

/// Fire-and-forget event publishing seam. Publish failures are logged
/// by the caller and never fail the operation that produced the event.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &IdentityEvent) -> Result<(), EventError>;
}

/// Default sink: traces the event and drops it. Deployments wire a
/// real broker-backed sink here.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &IdentityEvent) -> Result<(), EventError> {
        info!(
            kind = ?event.kind,
            account_id = %event.account_id,
            provider = %event.provider,
            "identity event"
        );
        Ok(())
    }
}
