// Async HTTP client for a vendor device API.
//
// Endpoints:
//   GET   /devices                         (list, envelope, or edge/node connection)
//   GET   /devices/{id}
//   GET   /devices/{id}/channels
//   GET   /config/discovery/ips            { ips: [...] }
//   PUT   /config/discovery/ips            { ips: [...] }
//   PATCH /config/discovery/ips/remove     { ips: [...] }
// Auth: shared-secret header pair on every request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transport::{SharedSecret, TransportConfig};
use crate::types::{self, DeviceDetail, DiscoveryIps};
use crate::websocket::{PushSubscription, ReconnectConfig, Target};

/// Upper bound on pages followed for one listing, against cursor loops.
const MAX_PAGES: usize = 1000;

/// Outcome of a vendor health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub latency: Duration,
    pub device_count: usize,
}

/// Authenticated, rate-limited client for one vendor's API.
///
/// Every request first takes a permit from the shared [`RateLimiter`]
/// under this client's vendor code, then goes through the retry loop:
/// transient failures and 5xx replies back off exponentially, 429 puts
/// the vendor bucket into cooldown, everything else is returned as-is.
pub struct VendorClient {
    vendor: String,
    http: reqwest::Client,
    base_url: Url,
    ws_url: Option<Url>,
    transport: TransportConfig,
    credentials: SharedSecret,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl VendorClient {
    // ── Constructors ─────────────────────────────────────────────────

    pub fn new(
        vendor: impl Into<String>,
        base_url: &str,
        credentials: SharedSecret,
        transport: TransportConfig,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        let http = transport.build_client(credentials.headers()?)?;
        Ok(Self {
            vendor: vendor.into(),
            http,
            base_url: Self::normalize_base_url(base_url)?,
            ws_url: None,
            transport,
            credentials,
            limiter,
            retry,
        })
    }

    /// Set the push endpoint (e.g. `wss://host/ws`).
    pub fn with_ws_url(mut self, ws_url: Url) -> Self {
        self.ws_url = Some(ws_url);
        self
    }

    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    /// The vendor code this client throttles under.
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── Request pipeline ─────────────────────────────────────────────

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&(impl Serialize + Sync)>,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire(&self.vendor).await?;

            let result = self.send_once(method.clone(), url.clone(), query, body).await;
            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let rate_limited = matches!(err, Error::RateLimited { .. });
            if rate_limited {
                // The next acquire for this vendor waits out the cooldown.
                let cooldown = err.retry_after().unwrap_or(self.retry.default_cooldown);
                warn!(
                    vendor = %self.vendor,
                    cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                    "vendor rate limited, cooling down"
                );
                self.limiter.cooldown(&self.vendor, cooldown).await;
            }

            if !self.retry.should_retry(attempt) {
                return Err(err);
            }

            if err.is_retryable() {
                let delay = self.retry.backoff(attempt);
                warn!(
                    vendor = %self.vendor,
                    error = %err,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            } else if !rate_limited {
                return Err(err);
            }

            attempt += 1;
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&(impl Serialize + Sync)>,
    ) -> Result<T, Error> {
        debug!(vendor = %self.vendor, "{method} {url}");

        let mut builder = self.http.request(method, url);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| self.map_transport(e))?;
        self.handle_response(resp).await
    }

    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.transport.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();

        if status.is_success() {
            let body = resp.text().await.map_err(|e| self.map_transport(e))?;
            // Empty 2xx bodies (PUT/PATCH acknowledgements) decode as `null`.
            let body = if body.trim().is_empty() { "null".to_owned() } else { body };
            return serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            });
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let raw = resp.text().await.unwrap_or_default();
        let message = error_message(&raw).unwrap_or_else(|| status.to_string());
        let code = status.as_u16();

        Err(match code {
            401 | 403 => Error::Authentication { message },
            429 => Error::RateLimited { retry_after },
            // Informational and unfollowed redirect replies are not retried either.
            100..=199 | 300..=499 => Error::Client {
                status: code,
                message,
            },
            _ => Error::Server {
                status: code,
                message,
            },
        })
    }

    // ── Listing helper ───────────────────────────────────────────────

    /// Fetch a listing endpoint, following edge/node cursors to the end.
    async fn get_all(&self, path: &str) -> Result<Vec<Value>, Error> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let sent = cursor.take();
            let query: Vec<(&str, String)> = sent
                .clone()
                .map(|c| vec![("after", c)])
                .unwrap_or_default();
            let body: Value = self
                .request(Method::GET, path, &query, None::<&()>)
                .await?;
            let (items, next) = types::normalize_listing(body).map_err(|message| {
                Error::Deserialization {
                    message: format!("{path}: {message}"),
                    body: String::new(),
                }
            })?;
            all.extend(items);

            match next {
                Some(page) if sent.as_deref() == Some(page.cursor.as_str()) => {
                    return Err(Error::Deserialization {
                        message: format!("{path}: cursor {:?} repeated", page.cursor),
                        body: String::new(),
                    });
                }
                Some(page) => cursor = Some(page.cursor),
                None => return Ok(all),
            }
        }

        warn!(vendor = %self.vendor, path, "pagination limit reached");
        Ok(all)
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Probe reachability and authentication by listing devices.
    pub async fn health_check(&self) -> Result<HealthProbe, Error> {
        let started = tokio::time::Instant::now();
        let devices = self.list_devices().await?;
        Ok(HealthProbe {
            latency: started.elapsed(),
            device_count: devices.len(),
        })
    }

    // ── Devices ──────────────────────────────────────────────────────

    pub async fn list_devices(&self) -> Result<Vec<Value>, Error> {
        self.get_all("devices").await
    }

    pub async fn get_device(&self, id: &str) -> Result<Value, Error> {
        self.request(Method::GET, &format!("devices/{id}"), &[], None::<&()>)
            .await
    }

    pub async fn list_channels(&self, id: &str) -> Result<Vec<Value>, Error> {
        self.get_all(&format!("devices/{id}/channels")).await
    }

    /// Device body plus channels, fetched concurrently.
    pub async fn get_device_detail(&self, id: &str) -> Result<DeviceDetail, Error> {
        let (device, channels) = tokio::try_join!(self.get_device(id), self.list_channels(id))?;
        Ok(DeviceDetail { device, channels })
    }

    // ── Discovery ────────────────────────────────────────────────────

    pub async fn list_discovery_candidates(&self) -> Result<Vec<String>, Error> {
        let body: Option<DiscoveryIps> = self
            .request(Method::GET, "config/discovery/ips", &[], None::<&()>)
            .await?;
        Ok(body.map(|b| b.ips).unwrap_or_default())
    }

    /// Replace the vendor's full candidate list.
    pub async fn set_discovery_candidates(&self, ips: &[String]) -> Result<(), Error> {
        let body = DiscoveryIps { ips: ips.to_vec() };
        let _: Value = self
            .request(Method::PUT, "config/discovery/ips", &[], Some(&body))
            .await?;
        Ok(())
    }

    pub async fn remove_discovery_candidates(&self, ips: &[String]) -> Result<(), Error> {
        let body = DiscoveryIps { ips: ips.to_vec() };
        let _: Value = self
            .request(Method::PATCH, "config/discovery/ips/remove", &[], Some(&body))
            .await?;
        Ok(())
    }

    // ── Push ─────────────────────────────────────────────────────────

    /// Open a reconnecting push subscription for one device.
    ///
    /// The connection attempt itself runs in the background; this only
    /// fails if no push endpoint is configured or the TLS setup is invalid.
    pub fn subscribe(
        &self,
        device_id: &str,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Result<PushSubscription, Error> {
        let ws_url = self
            .ws_url
            .clone()
            .ok_or_else(|| Error::WebSocketConnect("no push endpoint configured".into()))?;
        let tls = self.transport.websocket_tls()?;
        let target = Target {
            url: ws_url,
            device_id: device_id.to_owned(),
            credentials: self.credentials.clone(),
            tls,
            limiter: Arc::clone(&self.limiter),
            vendor: self.vendor.clone(),
        };
        Ok(PushSubscription::spawn(target, reconnect, cancel))
    }
}

/// Pull a human-readable message out of a vendor error body.
fn error_message(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }
    let parsed: Option<Value> = serde_json::from_str(raw).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str))
            .map(String::from)
    });
    Some(from_json.unwrap_or_else(|| raw.chars().take(200).collect()))
}
