//! Change notifications for live viewers.

use std::sync::Arc;

use crate::models::{ExchangeRecord, LifecycleEvent};

/// Receives store changes. Implementations must not block: notifications are
/// sent from the proxy's request path.
pub trait Broadcaster: Send + Sync {
    /// A record was stored or updated.
    fn notify_new_or_updated(&self, record: Arc<ExchangeRecord>);

    /// A lifecycle event was ingested.
    fn notify_lifecycle_event(&self, event: Arc<LifecycleEvent>);

    /// Both stores were cleared.
    fn notify_cleared(&self);
}

/// Broadcaster that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn notify_new_or_updated(&self, _record: Arc<ExchangeRecord>) {}

    fn notify_lifecycle_event(&self, _event: Arc<LifecycleEvent>) {}

    fn notify_cleared(&self) {}
}
