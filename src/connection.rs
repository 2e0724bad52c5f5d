//! Connection manager: the single live connection to the Encore server.
//!
//! [`Connection`] is a thin handle over a background supervisor task that
//! owns the transport. The supervisor dials through a [`Connector`],
//! authenticates with an `identify` request, multiplexes outgoing frames and
//! incoming messages with `tokio::select!`, and redials with exponential
//! backoff when the transport drops. No other component ever opens a second
//! connection; everything goes through [`Connection::request`].
//!
//! Correlation: each request carries a uuid id and parks a oneshot sender in
//! a pending map; the matching [`Ack`](ServerMessage::Ack) resolves it. When
//! the transport drops, outstanding requests fail with
//! [`EncoreError::ConnectionLost`] — their server-side outcome is unknown and
//! is superseded by the next successful resume or rejoin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{EncoreError, Result};
use crate::protocol::{
    AckPayload, ClientRequest, EpochMs, IdentifyAck, RequestEnvelope, ServerMessage,
};
use crate::store::ClientIdentity;
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded connection event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for a request acknowledgment.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between latency probe pings.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Default first reconnect delay; doubles per attempt up to the cap.
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(250);

/// Default reconnect delay cap.
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(8);

/// Default playlist upload batch size.
const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 200;

/// Default playlist display page size.
const DEFAULT_PLAYLIST_PAGE_SIZE: u32 = 50;

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for an [`EncoreClient`](crate::EncoreClient) session.
///
/// All fields have sensible defaults; use the builder methods to tune.
///
/// # Example
///
/// ```
/// use encore_client::EncoreConfig;
/// use std::time::Duration;
///
/// let config = EncoreConfig::new()
///     .with_request_timeout(Duration::from_secs(5))
///     .with_upload_chunk_size(100);
/// assert_eq!(config.upload_chunk_size, 100);
/// ```
#[derive(Debug, Clone)]
pub struct EncoreConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the connection loop. The `Disconnected`
    /// event is always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long a request waits for its acknowledgment before failing with
    /// [`EncoreError::Timeout`]. Defaults to **10 seconds**.
    pub request_timeout: Duration,
    /// Timeout for the graceful shutdown; the supervisor task is aborted
    /// when it expires. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Interval between latency probe pings. Defaults to **15 seconds**.
    pub ping_interval: Duration,
    /// First reconnect delay; doubles per failed attempt. Defaults to
    /// **250 ms**.
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay. Defaults to **8 seconds**.
    pub reconnect_max_delay: Duration,
    /// Give up after this many consecutive failed reconnect attempts.
    /// `None` retries forever. Defaults to **None**.
    pub max_reconnect_attempts: Option<u32>,
    /// Playlist upload batch size. Defaults to **200**; clamped to ≥ 1.
    pub upload_chunk_size: usize,
    /// Playlist display page size. Defaults to **50**; clamped to ≥ 1.
    pub playlist_page_size: u32,
}

impl Default for EncoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoreConfig {
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_reconnect_attempts: None,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            playlist_page_size: DEFAULT_PLAYLIST_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        // tokio::time::interval panics on zero.
        self.ping_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_playlist_page_size(mut self, size: u32) -> Self {
        self.playlist_page_size = size.max(1);
        self
    }
}

// ── Connection events ───────────────────────────────────────────────

/// Lifecycle and push notifications emitted by the connection supervisor.
#[derive(Debug)]
pub enum ConnEvent {
    /// Transport connected and `identify` acknowledged.
    Up { server_now: EpochMs },
    /// Transport dropped; redialing after backoff. Room-scoped state must be
    /// cleared by the consumer.
    Reconnecting { attempt: u32 },
    /// Connection is down for good (shutdown, retries exhausted, or the
    /// server rejected `identify`).
    Down { reason: Option<String> },
    /// An unsolicited server push.
    Push(ServerMessage),
}

// ── Shared state ────────────────────────────────────────────────────

struct ConnShared {
    connected: AtomicBool,
    pending: StdMutex<HashMap<Uuid, oneshot::Sender<AckPayload>>>,
}

impl ConnShared {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            pending: StdMutex::new(HashMap::new()),
        }
    }

    fn park(&self, id: Uuid, tx: oneshot::Sender<AckPayload>) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
    }

    fn resolve(&self, ack: AckPayload) {
        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&ack.id),
            Err(_) => None,
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(ack);
            }
            None => debug!(id = %ack.id, "ack with no pending request (late or duplicate)"),
        }
    }

    fn forget(&self, id: Uuid) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    /// Drop all pending senders; their receivers observe `ConnectionLost`.
    fn fail_pending(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to the background connection supervisor.
///
/// Created via [`Connection::start`]. Cheap to share behind an `Arc`; all
/// request methods take `&self`.
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<String>,
    shared: Arc<ConnShared>,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: StdMutex<Option<oneshot::Sender<()>>>,
    shutdown_timeout: Duration,
    request_timeout: Duration,
}

impl Connection {
    /// Spawn the connection supervisor and return a handle plus the
    /// connection event receiver.
    ///
    /// The supervisor dials immediately; the first event is either
    /// [`ConnEvent::Up`] or [`ConnEvent::Reconnecting`].
    #[must_use = "the event receiver must be consumed to observe connection state"]
    pub fn start(
        connector: Box<dyn Connector>,
        identity: Arc<StdMutex<ClientIdentity>>,
        config: &EncoreConfig,
    ) -> (Self, mpsc::Receiver<ConnEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ConnEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(ConnShared::new());
        let loop_shared = Arc::clone(&shared);
        let loop_config = SupervisorConfig {
            ping_interval: config.ping_interval,
            reconnect_base_delay: config.reconnect_base_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
        };

        let task = tokio::spawn(supervisor_loop(
            connector,
            identity,
            loop_config,
            cmd_rx,
            event_tx,
            loop_shared,
            shutdown_rx,
        ));

        let connection = Self {
            cmd_tx,
            shared,
            task: StdMutex::new(Some(task)),
            shutdown_tx: StdMutex::new(Some(shutdown_tx)),
            shutdown_timeout: config.shutdown_timeout,
            request_timeout: config.request_timeout,
        };

        (connection, event_rx)
    }

    /// Returns `true` while the connection is up and authenticated.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Send a request and await its acknowledgment.
    ///
    /// Resolves with the ack payload on `ok: true` and
    /// [`EncoreError::Rejected`] on `ok: false`. Single in-flight semantics
    /// per call; no automatic retry.
    ///
    /// # Errors
    ///
    /// - [`EncoreError::NotConnected`] — no authenticated connection
    /// - [`EncoreError::ConnectionLost`] — transport dropped mid-call; the
    ///   server-side outcome is unknown
    /// - [`EncoreError::Timeout`] — no ack within the configured timeout
    pub async fn request(&self, body: ClientRequest) -> Result<serde_json::Value> {
        if !self.is_connected() {
            return Err(EncoreError::NotConnected);
        }

        let id = Uuid::new_v4();
        let envelope = RequestEnvelope { id, body };
        let json = serde_json::to_string(&envelope)?;

        let (tx, rx) = oneshot::channel();
        self.shared.park(id, tx);

        if self.cmd_tx.send(json).is_err() {
            self.shared.forget(id);
            return Err(EncoreError::NotConnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(ack)) => {
                if ack.ok {
                    Ok(ack.payload.unwrap_or(serde_json::Value::Null))
                } else {
                    Err(EncoreError::Rejected {
                        reason: ack
                            .error
                            .unwrap_or_else(|| "request rejected".to_string()),
                    })
                }
            }
            // Sender dropped: the transport died with this request outstanding.
            Ok(Err(_)) => Err(EncoreError::ConnectionLost),
            Err(_) => {
                self.shared.forget(id);
                Err(EncoreError::Timeout)
            }
        }
    }

    /// [`request`](Self::request), deserializing the ack payload into `T`.
    pub async fn request_as<T: serde::de::DeserializeOwned>(
        &self,
        body: ClientRequest,
    ) -> Result<T> {
        let value = self.request(body).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Shut down the connection, closing the transport and stopping the
    /// supervisor task. The event receiver yields [`ConnEvent::Down`] and
    /// then `None`.
    pub async fn shutdown(&self) {
        debug!("connection shutdown requested");

        let shutdown_tx = self.shutdown_tx.lock().ok().and_then(|mut tx| tx.take());
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(mut task) = task {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection supervisor terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection supervisor did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection supervisor aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
        self.shared.fail_pending();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let has_task = self
            .task
            .lock()
            .map(|task| task.is_some())
            .unwrap_or(false);
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("has_task", &has_task)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // `Drop` is synchronous, so the graceful path (which awaits
        // `transport.close()`) is unavailable; aborting the task drops the
        // supervisor future immediately.
        if let Some(task) = self.task.lock().ok().and_then(|mut task| task.take()) {
            task.abort();
        }
    }
}

// ── Supervisor loop ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct SupervisorConfig {
    ping_interval: Duration,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
    max_reconnect_attempts: Option<u32>,
}

impl SupervisorConfig {
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.reconnect_base_delay.saturating_mul(1u32 << exp);
        delay.min(self.reconnect_max_delay)
    }
}

/// Why one connection epoch ended.
enum EpochExit {
    /// Shutdown was requested or the handle was dropped.
    Shutdown,
    /// The server rejected `identify`; retrying cannot help.
    AuthRejected(String),
    /// The transport dropped; eligible for reconnection.
    Lost(Option<String>),
}

async fn supervisor_loop(
    mut connector: Box<dyn Connector>,
    identity: Arc<StdMutex<ClientIdentity>>,
    config: SupervisorConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::Sender<ConnEvent>,
    shared: Arc<ConnShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("connection supervisor started");
    let mut attempt: u32 = 0;

    loop {
        let transport = tokio::select! {
            _ = &mut shutdown_rx => {
                emit_down(&event_tx, &shared, Some("client shut down".into())).await;
                return;
            }
            result = connector.connect() => match result {
                Ok(transport) => transport,
                Err(e) => {
                    debug!("connect attempt failed: {e}");
                    attempt += 1;
                    if retries_exhausted(&config, attempt) {
                        emit_down(&event_tx, &shared, Some(format!("connect failed: {e}"))).await;
                        return;
                    }
                    emit_event(&event_tx, ConnEvent::Reconnecting { attempt }).await;
                    if !backoff_sleep(&config, attempt, &mut shutdown_rx).await {
                        emit_down(&event_tx, &shared, Some("client shut down".into())).await;
                        return;
                    }
                    continue;
                }
            }
        };

        // Frames queued for a previous epoch belong to requests that have
        // already failed with ConnectionLost; never replay them.
        while cmd_rx.try_recv().is_ok() {}

        let exit = run_epoch(
            transport,
            &identity,
            &config,
            &mut cmd_rx,
            &event_tx,
            &shared,
            &mut shutdown_rx,
            &mut attempt,
        )
        .await;

        shared.connected.store(false, Ordering::Release);
        shared.fail_pending();

        match exit {
            EpochExit::Shutdown => {
                emit_down(&event_tx, &shared, Some("client shut down".into())).await;
                return;
            }
            EpochExit::AuthRejected(reason) => {
                error!("server rejected identify: {reason}");
                emit_down(&event_tx, &shared, Some(reason)).await;
                return;
            }
            EpochExit::Lost(reason) => {
                debug!("connection lost: {reason:?}");
                attempt += 1;
                if retries_exhausted(&config, attempt) {
                    emit_down(&event_tx, &shared, reason).await;
                    return;
                }
                emit_event(&event_tx, ConnEvent::Reconnecting { attempt }).await;
                if !backoff_sleep(&config, attempt, &mut shutdown_rx).await {
                    emit_down(&event_tx, &shared, Some("client shut down".into())).await;
                    return;
                }
            }
        }
    }
}

fn retries_exhausted(config: &SupervisorConfig, attempt: u32) -> bool {
    config
        .max_reconnect_attempts
        .is_some_and(|max| attempt > max)
}

/// Sleep the backoff delay. Returns `false` when shutdown arrived instead.
async fn backoff_sleep(
    config: &SupervisorConfig,
    attempt: u32,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    let delay = config.backoff_delay(attempt);
    debug!(attempt, ?delay, "reconnect backoff");
    tokio::select! {
        _ = &mut *shutdown_rx => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Drive one connected transport until it drops or shutdown arrives.
#[allow(clippy::too_many_arguments)]
async fn run_epoch(
    mut transport: Box<dyn Transport>,
    identity: &Arc<StdMutex<ClientIdentity>>,
    config: &SupervisorConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<String>,
    event_tx: &mpsc::Sender<ConnEvent>,
    shared: &Arc<ConnShared>,
    shutdown_rx: &mut oneshot::Receiver<()>,
    attempt: &mut u32,
) -> EpochExit {
    // Authenticate before anything else may be sent on this transport.
    let identify_id = Uuid::new_v4();
    let identify = {
        let snapshot = match identity.lock() {
            Ok(identity) => identity.clone(),
            Err(_) => return EpochExit::Lost(Some("identity lock poisoned".into())),
        };
        RequestEnvelope {
            id: identify_id,
            body: ClientRequest::Identify {
                client_id: snapshot.client_id,
                username: snapshot.username().map(str::to_owned),
                auth_token: snapshot.auth_token,
            },
        }
    };
    let identify_json = match serde_json::to_string(&identify) {
        Ok(json) => json,
        Err(e) => return EpochExit::Lost(Some(format!("identify serialization: {e}"))),
    };
    if let Err(e) = transport.send(identify_json).await {
        return EpochExit::Lost(Some(format!("transport send error: {e}")));
    }

    let mut ping_timer = tokio::time::interval(config.ping_interval);
    // The first tick fires immediately; skip it so pings trail the identify.
    ping_timer.tick().await;

    loop {
        tokio::select! {
            // Branch 1: outgoing frame queued by a request
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(frame) => {
                        if let Err(e) = transport.send(frame).await {
                            error!("transport send error: {e}");
                            return EpochExit::Lost(Some(format!("transport send error: {e}")));
                        }
                    }
                    // Command channel closed — handle dropped.
                    None => {
                        debug!("command channel closed, shutting down connection");
                        let _ = transport.close().await;
                        return EpochExit::Shutdown;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                return EpochExit::Shutdown;
            }

            // Branch 3: periodic latency probe
            _ = ping_timer.tick() => {
                match serde_json::to_string(&ClientRequest::Ping) {
                    Ok(json) => {
                        if let Err(e) = transport.send(json).await {
                            return EpochExit::Lost(Some(format!("transport send error: {e}")));
                        }
                    }
                    Err(e) => warn!("failed to serialize ping: {e}"),
                }
            }

            // Branch 4: incoming message from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(ServerMessage::Ack(ack)) if ack.id == identify_id => {
                                if !ack.ok {
                                    let reason = ack
                                        .error
                                        .unwrap_or_else(|| "identify rejected".to_string());
                                    let _ = transport.close().await;
                                    return EpochExit::AuthRejected(reason);
                                }
                                let server_now = ack
                                    .payload
                                    .and_then(|p| {
                                        serde_json::from_value::<IdentifyAck>(p).ok()
                                    })
                                    .map(|a| a.server_now)
                                    .unwrap_or_default();
                                *attempt = 0;
                                shared.connected.store(true, Ordering::Release);
                                debug!("identify acknowledged, connection up");
                                emit_event(event_tx, ConnEvent::Up { server_now }).await;
                            }
                            Ok(ServerMessage::Ack(ack)) => {
                                shared.resolve(ack);
                            }
                            Ok(push) => {
                                emit_event(event_tx, ConnEvent::Push(push)).await;
                            }
                            Err(e) => {
                                warn!("failed to deserialize server message: {e} — raw: {text}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return EpochExit::Lost(Some(format!("transport receive error: {e}")));
                    }
                    None => {
                        debug!("transport closed by server");
                        return EpochExit::Lost(None);
                    }
                }
            }
        }
    }
}

/// Emit a connection event; drop it with a warning when the channel is full.
async fn emit_event(event_tx: &mpsc::Sender<ConnEvent>, event: ConnEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "connection event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("connection event channel closed, receiver dropped");
        }
    }
}

/// Emit [`ConnEvent::Down`] with a blocking send — it is always the final
/// event and must never be dropped.
async fn emit_down(
    event_tx: &mpsc::Sender<ConnEvent>,
    shared: &Arc<ConnShared>,
    reason: Option<String>,
) {
    shared.connected.store(false, Ordering::Release);
    shared.fail_pending();
    if event_tx.send(ConnEvent::Down { reason }).await.is_err() {
        debug!("connection event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = EncoreConfig::new();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.upload_chunk_size, 200);
        assert_eq!(config.playlist_page_size, 50);
        assert!(config.max_reconnect_attempts.is_none());
    }

    #[test]
    fn config_builder_clamps() {
        let config = EncoreConfig::new()
            .with_event_channel_capacity(0)
            .with_upload_chunk_size(0)
            .with_playlist_page_size(0);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.upload_chunk_size, 1);
        assert_eq!(config.playlist_page_size, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SupervisorConfig {
            ping_interval: Duration::from_secs(15),
            reconnect_base_delay: Duration::from_millis(250),
            reconnect_max_delay: Duration::from_secs(2),
            max_reconnect_attempts: None,
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(250));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(1000));
        // Capped.
        assert_eq!(config.backoff_delay(5), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(30), Duration::from_secs(2));
    }

    #[test]
    fn retries_exhausted_respects_limit() {
        let mut config = SupervisorConfig {
            ping_interval: Duration::from_secs(15),
            reconnect_base_delay: Duration::from_millis(1),
            reconnect_max_delay: Duration::from_millis(1),
            max_reconnect_attempts: Some(2),
        };
        assert!(!retries_exhausted(&config, 1));
        assert!(!retries_exhausted(&config, 2));
        assert!(retries_exhausted(&config, 3));
        config.max_reconnect_attempts = None;
        assert!(!retries_exhausted(&config, 1000));
    }
}
