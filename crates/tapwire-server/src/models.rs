//! Live hub message models.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tapwire_core::{ExchangeRecord, LifecycleEvent};

/// Message pushed to hub observers as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum HubMessage {
    /// Every stored exchange, sent once on connect.
    History(Vec<Arc<ExchangeRecord>>),
    /// Every stored lifecycle event, sent once on connect.
    HookHistory(Vec<Arc<LifecycleEvent>>),
    NewRequest(Arc<ExchangeRecord>),
    NewHookEvent(Arc<LifecycleEvent>),
    /// Both stores were emptied.
    Cleared,
}

/// Message an observer may send to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubCommand {
    /// Clear both stores.
    ClearAll,
}
