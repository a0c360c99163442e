//! Push subscription stream with auto-reconnect.
//!
//! Connects to a vendor's WebSocket endpoint, asks for updates about one
//! device (`{"type":"subscribe","deviceId":...}`), and streams parsed
//! `{type, deviceId, data}` messages through a [`tokio::sync::broadcast`]
//! channel. Reconnects with exponential backoff + jitter until cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::Connector;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::rate_limit::RateLimiter;
use crate::retry::calculate_backoff;
use crate::transport::SharedSecret;
use crate::types::PushMessage;

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for push reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── PushSubscription ─────────────────────────────────────────────────

/// Handle to a running push subscription for one device.
///
/// Call [`shutdown`](Self::shutdown) (or cancel the parent token) to tear
/// down the background task.
pub struct PushSubscription {
    device_id: String,
    event_rx: broadcast::Receiver<Arc<PushMessage>>,
    cancel: CancellationToken,
}

impl PushSubscription {
    pub(crate) fn spawn(
        target: Target,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let task_cancel = cancel.clone();
        let device_id = target.device_id.clone();

        tokio::spawn(async move {
            ws_loop(target, event_tx, reconnect, task_cancel).await;
        });

        Self {
            device_id,
            event_rx,
            cancel,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Get a new receiver for the message stream.
    ///
    /// A receiver that falls behind gets [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushMessage>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Where and how one subscription connects.
pub(crate) struct Target {
    pub url: Url,
    pub device_id: String,
    pub credentials: SharedSecret,
    pub tls: Option<Arc<rustls::ClientConfig>>,
    /// Every connect attempt spends a token from the vendor's bucket.
    pub limiter: Arc<RateLimiter>,
    pub vendor: String,
}

// ── Background reconnection loop ─────────────────────────────────────

/// connect → subscribe → read; on error, backoff → reconnect.
async fn ws_loop(
    target: Target,
    event_tx: broadcast::Sender<Arc<PushMessage>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&target, &event_tx, &cancel) => result,
        };

        match result {
            // Clean disconnect: reset the counter and reconnect immediately.
            Ok(()) => {
                if cancel.is_cancelled() {
                    break;
                }
                tracing::info!(device = %target.device_id, "push stream closed, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(device = %target.device_id, error = %e, attempt, "push stream error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "push reconnection limit reached, giving up"
                        );
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, reconnect.initial_delay, reconnect.max_delay);
                tracing::info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "waiting before reconnect"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
            }
        }
    }

    tracing::debug!(device = %target.device_id, "push loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    target: &Target,
    event_tx: &broadcast::Sender<Arc<PushMessage>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let permit = target.limiter.acquire(&target.vendor).await?;
    tracing::info!(
        url = %target.url,
        device = %target.device_id,
        waited_ms = u64::try_from(permit.waited.as_millis()).unwrap_or(u64::MAX),
        "connecting push stream"
    );

    let uri: tungstenite::http::Uri = target
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let creds = &target.credentials;
    let request = ClientRequestBuilder::new(uri)
        .with_header(creds.key_header.clone(), creds.key.clone())
        .with_header(
            creds.secret_header.clone(),
            creds.secret.expose_secret().to_owned(),
        );

    let connector = target.tls.clone().map(Connector::Rustls);
    let (ws_stream, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({ "type": "subscribe", "deviceId": target.device_id });
    write
        .send(tungstenite::Message::text(subscribe.to_string()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!(device = %target.device_id, "push stream subscribed");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, &target.device_id, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(cf) = frame {
                            let code = u16::from(cf.code);
                            // 1000 = normal closure; anything else is worth a backoff.
                            if code != 1000 {
                                return Err(Error::WebSocketClosed {
                                    code,
                                    reason: cf.reason.as_str().to_owned(),
                                });
                            }
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => return Ok(()),
                    // Ping is answered by tungstenite; binary/pong/raw frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse a text frame and broadcast it if it concerns `device_id`.
///
/// Messages without a `deviceId` are treated as addressed to the
/// subscriber (some servers omit it on a per-device socket).
fn parse_and_broadcast(
    text: &str,
    device_id: &str,
    event_tx: &broadcast::Sender<Arc<PushMessage>>,
) {
    let msg: PushMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse push message");
            return;
        }
    };

    if msg.device_id.as_deref().is_some_and(|id| id != device_id) {
        tracing::trace!(kind = %msg.kind, "ignoring push message for other device");
        return;
    }

    // No receivers is fine: nobody is listening right now.
    let _ = event_tx.send(Arc::new(msg));
}

// ── Tests ────────────────────────────────────────────────────────────
