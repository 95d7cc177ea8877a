//! Live push hub for dashboard observers.
//!
//! Observers connect over WebSocket at `/hub`. On connect they receive the
//! full exchange and lifecycle history, then every change as it happens.
//! Sends never block producers: an observer that falls behind skips the
//! messages it missed.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use tapwire_core::{Broadcaster, ExchangeRecord, LifecycleEvent};

use crate::models::{HubCommand, HubMessage};
use crate::state::AppState;

/// Default number of messages buffered per observer.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Fan-out of store changes to connected observers.
#[derive(Debug, Clone)]
pub struct DashboardHub {
    tx: broadcast::Sender<HubMessage>,
}

impl DashboardHub {
    /// Creates a hub buffering up to `capacity` messages per observer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to live messages.
    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.tx.subscribe()
    }

    /// Number of connected observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, message: HubMessage) {
        // No observers is not an error.
        let _ = self.tx.send(message);
    }
}

impl Default for DashboardHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl Broadcaster for DashboardHub {
    fn notify_new_or_updated(&self, record: Arc<ExchangeRecord>) {
        self.publish(HubMessage::NewRequest(record));
    }

    fn notify_lifecycle_event(&self, event: Arc<LifecycleEvent>) {
        self.publish(HubMessage::NewHookEvent(event));
    }

    fn notify_cleared(&self) {
        self.publish(HubMessage::Cleared);
    }
}

/// GET /hub - upgrade to a WebSocket observer connection.
pub async fn hub_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_observer(socket, state))
}

async fn serve_observer(socket: WebSocket, state: AppState) {
    // Subscribe before taking the snapshot so nothing falls in between.
    let mut live = state.hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    let history = [
        HubMessage::History(state.exchanges.get_all()),
        HubMessage::HookHistory(state.lifecycle.get_all()),
    ];
    for message in &history {
        if !send(&mut sink, message).await {
            return;
        }
    }

    tracing::debug!(observers = state.hub.observer_count(), "Hub observer connected");

    loop {
        tokio::select! {
            message = live.recv() => match message {
                Ok(message) => {
                    if !send(&mut sink, &message).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Hub observer lagging");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => apply_command(&state, text.as_str()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("Hub observer disconnected");
}

/// Sends one message. Returns false once the observer is gone.
async fn send<S>(sink: &mut S, message: &HubMessage) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to serialize hub message: {}", e);
            return true;
        }
    };
    sink.send(Message::Text(text.into())).await.is_ok()
}

/// Handles one observer message. Unknown messages are ignored.
pub(crate) fn apply_command(state: &AppState, text: &str) {
    match serde_json::from_str::<HubCommand>(text) {
        Ok(HubCommand::ClearAll) => state.clear_all(),
        Err(e) => tracing::debug!("Ignoring hub message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapwire_core::LifecycleSubmission;

    #[tokio::test]
    async fn notifications_reach_subscribers() {
        let hub = DashboardHub::default();
        let mut rx = hub.subscribe();

        let record = Arc::new(ExchangeRecord::new("POST", "/v1/messages"));
        hub.notify_new_or_updated(record.clone());
        hub.notify_cleared();

        match rx.recv().await.unwrap() {
            HubMessage::NewRequest(received) => assert!(Arc::ptr_eq(&received, &record)),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), HubMessage::Cleared));
    }

    #[test]
    fn publishing_without_observers_is_fine() {
        let hub = DashboardHub::new(1);
        assert_eq!(hub.observer_count(), 0);
        hub.notify_lifecycle_event(Arc::new(LifecycleEvent::accept(
            LifecycleSubmission::default(),
        )));
    }

    #[tokio::test]
    async fn slow_observer_skips_instead_of_blocking() {
        let hub = DashboardHub::new(2);
        let mut rx = hub.subscribe();
        for _ in 0..5 {
            hub.notify_cleared();
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert!(matches!(rx.recv().await, Ok(HubMessage::Cleared)));
    }

    #[tokio::test]
    async fn clear_all_command_clears_and_notifies() {
        let state = AppState::with_capacity(10);
        let mut rx = state.hub.subscribe();
        state
            .exchanges
            .append(ExchangeRecord::new("POST", "/v1/messages"));

        apply_command(&state, r#"{"type":"clearAll"}"#);
        assert!(state.exchanges.is_empty());
        assert!(matches!(rx.recv().await.unwrap(), HubMessage::Cleared));

        apply_command(&state, "garbage");
        assert!(rx.try_recv().is_err());
    }
}
