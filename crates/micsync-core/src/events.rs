// ── Domain event bus ──
//
// In-process fan-out over a `tokio::sync::broadcast` channel. Publishing
// never waits on consumers. Each attached subscriber drains its own
// receiver in its own task, so it sees events in publish order and a slow,
// failing or panicking subscriber cannot affect the others.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::CoreError;
use crate::model::DomainEvent;

/// A named consumer of domain events.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn on_event(&self, event: Arc<DomainEvent>) -> Result<(), CoreError>;
}

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current receiver. Returns how many there were;
    /// zero receivers is not an error.
    pub fn publish(&self, event: DomainEvent) -> usize {
        debug!(
            event_type = %event.event_type,
            vendor = %event.vendor_code,
            "publishing event"
        );
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Raw receiver. Falls behind with `RecvError::Lagged` if it does not
    /// keep up with the channel capacity.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `subscriber` in a dedicated task until `cancel` fires or the
    /// bus is dropped.
    pub fn attach(
        &self,
        name: impl Into<String>,
        subscriber: Arc<dyn EventSubscriber>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let name = name.into();
        let rx = self.tx.subscribe();
        tokio::spawn(subscriber_task(name, subscriber, rx, cancel))
    }
}

async fn subscriber_task(
    name: String,
    subscriber: Arc<dyn EventSubscriber>,
    mut rx: broadcast::Receiver<Arc<DomainEvent>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(event) => {
                let outcome = AssertUnwindSafe(subscriber.on_event(event))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(subscriber = %name, error = %e, "event subscriber failed"),
                    Err(_) => error!(subscriber = %name, "event subscriber panicked"),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(subscriber = %name, skipped, "event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(subscriber = %name, "event subscriber stopped");
}
