//! Session event bus
//!
//! Terminal session events are fanned out over a broadcast channel. Each
//! subscriber gets its own receiver; a slow subscriber only loses its own
//! backlog.

use async_trait::async_trait;
use gotime_api::SessionEvent;
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Consumer of session events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, event: &SessionEvent) -> Result<(), HandlerError>;
}

/// Broadcast bus for terminal session events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber; returns how many received it
    pub fn publish(&self, event: SessionEvent) -> usize {
        let session_id = event.session_id.clone();
        let kind = event.kind;
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(session_id = %session_id, kind = %kind, receivers, "Event published");
                receivers
            }
            Err(_) => {
                debug!(session_id = %session_id, kind = %kind, "Event published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `handler` on its own task for every event published from now on
    ///
    /// Handler errors are logged and the handler keeps receiving. The task
    /// ends once every bus handle is dropped.
    pub fn subscribe_handler(&self, handler: Arc<dyn EventHandler>) -> JoinHandle<()> {
        let mut rx = self.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = handler.handle(&event).await {
                            warn!(
                                handler = handler.name(),
                                session_id = %event.session_id,
                                error = %e,
                                "Event handler failed"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(handler = handler.name(), skipped, "Event handler lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(handler = handler.name(), "Event handler stopped");
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
