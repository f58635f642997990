//! Long-lived control link to the television.
//!
//! The link owns at most one live ssap session. Sessions are established
//! lazily on first use and re-established transparently after the transport
//! closes - callers only ever see added latency, never reconnection as a
//! distinct step. Connection attempts are coalesced: the first caller dials,
//! concurrent callers await the same attempt behind the connect gate.
//!
//! Every successful connect re-issues the volume subscription, since
//! subscriptions do not survive reconnection. The television's pushes are
//! forwarded to the registered volume callback.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tokio_util::sync::CancellationToken;

use super::protocol::{self, uri, SsapReply, SsapRequest, VolumeUpdate, REGISTER_ID};
use crate::config::{Timings, TvConfig};
use crate::devices::{DeviceKind, SoundOutput, TvControl};
use crate::error::ParlorResult;
use crate::registry::DeviceRegistry;

/// Wire id of the standing volume subscription.
const VOLUME_SUBSCRIPTION_ID: &str = "sub_volume";

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from the television control link.
#[derive(Debug, Error)]
pub enum WebosError {
    /// No handshake completed within the bound.
    #[error("no handshake within {0}s")]
    Timeout(u64),

    /// The transport reported an error before the handshake finished.
    #[error("{0}")]
    Connect(String),

    /// Building the TLS connector failed.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The session went away before a reply arrived.
    #[error("connection closed before the reply arrived")]
    Closed,

    /// The television accepted the request but never replied.
    #[error("no reply within {0}s")]
    RequestTimeout(u64),

    /// The television rejected the request.
    #[error("{0}")]
    Device(String),

    /// No address is known for the television.
    #[error("no television address configured or discovered")]
    NoAddress,
}

/// Callback invoked for every volume/mute push from the television.
pub type VolumeCallback = Arc<dyn Fn(VolumeUpdate) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// One live ssap session: the writer channel, the reply-correlation map, and
/// the liveness token shared with the background reader/writer tasks.
pub(crate) struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    pending: DashMap<String, oneshot::Sender<Result<Value, String>>>,
    subscription_id: &'static str,
    next_id: AtomicU64,
    alive: CancellationToken,
}

impl Session {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Message>) -> Arc<Self> {
        Arc::new(Self {
            outbound,
            pending: DashMap::new(),
            subscription_id: VOLUME_SUBSCRIPTION_ID,
            next_id: AtomicU64::new(1),
            alive: CancellationToken::new(),
        })
    }

    fn is_alive(&self) -> bool {
        !self.alive.is_cancelled()
    }

    fn next_request_id(&self) -> String {
        format!("req_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn send(&self, envelope: &SsapRequest<'_>) -> Result<(), WebosError> {
        self.outbound
            .send(Message::text(envelope.to_text()))
            .map_err(|_| WebosError::Closed)
    }

    /// Routes one inbound frame: subscription pushes go to the volume
    /// callback, correlated replies resolve their pending request.
    pub(crate) fn route(&self, text: &str, on_volume: &VolumeCallback) {
        let reply: SsapReply = match serde_json::from_str(text) {
            Ok(reply) => reply,
            Err(e) => {
                log::debug!("[Webos] Unparseable frame: {e}");
                return;
            }
        };

        match reply.kind.as_str() {
            "response" | "registered" => {
                let Some(id) = reply.id else { return };
                if id == self.subscription_id {
                    match protocol::parse_volume_payload(&reply.payload) {
                        Some(update) => on_volume(update),
                        None => log::debug!("[Webos] Volume push without volume fields"),
                    }
                } else if let Some((_, tx)) = self.pending.remove(&id) {
                    let _ = tx.send(Ok(reply.payload));
                }
            }
            "error" => {
                let message = reply
                    .error
                    .unwrap_or_else(|| "unknown device error".to_string());
                match reply.id.and_then(|id| self.pending.remove(&id)) {
                    Some((_, tx)) => {
                        let _ = tx.send(Err(message));
                    }
                    None => log::warn!("[Webos] Unsolicited error from television: {message}"),
                }
            }
            other => log::trace!("[Webos] Ignoring frame type {other:?}"),
        }
    }

    /// Tears the session down and wakes every waiter with a closed error.
    pub(crate) fn close(&self) {
        self.alive.cancel();
        // Dropping the senders resolves the waiting receivers with an error.
        self.pending.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebosLink
// ─────────────────────────────────────────────────────────────────────────────

/// The shared television control link.
pub struct WebosLink {
    registry: Arc<DeviceRegistry>,
    timings: Timings,
    port: u16,
    secure: bool,
    client_key: RwLock<Option<String>>,
    key_file: Option<PathBuf>,
    on_volume: VolumeCallback,
    session: RwLock<Option<Arc<Session>>>,
    /// Serializes connection attempts; concurrent callers await the holder.
    connect_gate: tokio::sync::Mutex<()>,
}

impl WebosLink {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        tv: &TvConfig,
        timings: Timings,
        on_volume: VolumeCallback,
    ) -> Self {
        let client_key = tv.client_key.clone().or_else(|| {
            let path = tv.key_file.as_ref()?;
            match std::fs::read_to_string(path) {
                Ok(key) if !key.trim().is_empty() => Some(key.trim().to_string()),
                Ok(_) => None,
                Err(e) => {
                    log::debug!("[Webos] No stored pairing key at {}: {e}", path.display());
                    None
                }
            }
        });

        Self {
            registry,
            timings,
            port: tv.port,
            secure: tv.secure,
            client_key: RwLock::new(client_key),
            key_file: tv.key_file.clone(),
            on_volume,
            session: RwLock::new(None),
            connect_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether a live session currently exists. Purely observational; a
    /// request on a disconnected link reconnects on its own.
    pub fn is_connected(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map_or(false, |s| s.is_alive())
    }

    /// The pairing key currently in use, if any.
    pub fn client_key(&self) -> Option<String> {
        self.client_key.read().clone()
    }

    /// Drops the live session, if any. The next call reconnects from
    /// scratch. Used on power-off and when the address changes.
    pub fn invalidate(&self) {
        if let Some(session) = self.session.write().take() {
            session.close();
            log::info!("[Webos] Television session invalidated");
        }
    }

    /// Establishes the session if absent and returns once it is live.
    pub async fn connect(&self) -> Result<(), WebosError> {
        self.ensure_session().await.map(drop)
    }

    /// Sends one request over the live session (connecting first if needed)
    /// and resolves with the television's reply payload.
    pub async fn request(&self, target: &str, payload: Value) -> Result<Value, WebosError> {
        let session = self.ensure_session().await?;

        let id = session.next_request_id();
        let (tx, rx) = oneshot::channel();
        session.pending.insert(id.clone(), tx);

        let envelope = SsapRequest::request(&id, target, payload);
        if let Err(e) = session.send(&envelope) {
            session.pending.remove(&id);
            return Err(e);
        }

        let bound_secs = self.timings.request_timeout_secs;
        match timeout(self.timings.request_timeout(), rx).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(message))) => Err(WebosError::Device(message)),
            Ok(Err(_gone)) => Err(WebosError::Closed),
            Err(_elapsed) => {
                session.pending.remove(&id);
                Err(WebosError::RequestTimeout(bound_secs))
            }
        }
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        self.session.read().as_ref().filter(|s| s.is_alive()).cloned()
    }

    async fn ensure_session(&self) -> Result<Arc<Session>, WebosError> {
        if let Some(session) = self.live_session() {
            return Ok(session);
        }

        let _gate = self.connect_gate.lock().await;
        // The attempt we queued behind may have connected already.
        if let Some(session) = self.live_session() {
            return Ok(session);
        }

        let device = self
            .registry
            .resolve(DeviceKind::Tv)
            .await
            .ok_or(WebosError::NoAddress)?;

        let bound_secs = self.timings.connect_timeout_secs;
        let session = match timeout(
            self.timings.connect_timeout(),
            self.establish(&device.address),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                self.registry.invalidate(DeviceKind::Tv);
                return Err(e);
            }
            Err(_elapsed) => {
                self.registry.invalidate(DeviceKind::Tv);
                return Err(WebosError::Timeout(bound_secs));
            }
        };

        self.registry.mark_reachable(DeviceKind::Tv);
        *self.session.write() = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Dials, registers, spawns the IO tasks, and issues the volume
    /// subscription. The caller applies the handshake timeout.
    async fn establish(&self, address: &str) -> Result<Arc<Session>, WebosError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let url = format!("{scheme}://{address}:{}", self.port);
        log::info!("[Webos] Connecting to television at {url}");

        // LG televisions present a self-signed certificate.
        let connector = if self.secure {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| WebosError::Tls(e.to_string()))?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (ws, _response) =
            connect_async_tls_with_config(url.as_str(), None, false, connector)
                .await
                .map_err(|e| WebosError::Connect(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();

        // Register. On first pairing the television shows an on-screen
        // prompt; the handshake timeout covers the wait for the user.
        let stored_key = self.client_key.read().clone();
        let register = SsapRequest::register(
            REGISTER_ID,
            protocol::register_payload(stored_key.as_deref()),
        );
        sink.send(Message::text(register.to_text()))
            .await
            .map_err(|e| WebosError::Connect(e.to_string()))?;

        loop {
            let frame = stream
                .next()
                .await
                .ok_or(WebosError::Closed)?
                .map_err(|e| WebosError::Connect(e.to_string()))?;
            let Message::Text(text) = frame else { continue };
            let Ok(reply) = serde_json::from_str::<SsapReply>(text.as_str()) else {
                continue;
            };
            match reply.kind.as_str() {
                "registered" => {
                    if let Some(key) = reply.payload.get("client-key").and_then(Value::as_str) {
                        self.store_client_key(key);
                    }
                    break;
                }
                "error" => {
                    return Err(WebosError::Device(
                        reply
                            .error
                            .unwrap_or_else(|| "registration rejected".to_string()),
                    ))
                }
                // Pairing-prompt acknowledgement; keep waiting.
                _ => {}
            }
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let session = Session::new(outbound_tx);

        // Writer task: drains the outbound queue into the sink.
        let writer_alive = session.alive.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_alive.cancelled() => break,
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => {
                            if sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        // Reader task: routes frames until the transport drops, then tears
        // the session down so the next caller reconnects.
        let reader_session = Arc::clone(&session);
        let reader_alive = session.alive.clone();
        let on_volume = Arc::clone(&self.on_volume);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = reader_alive.cancelled() => break,
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            reader_session.route(text.as_str(), &on_volume);
                        }
                        Some(Ok(Message::Close(_))) => {
                            log::info!("[Webos] Television sent a close frame");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong/binary - nothing to route.
                        }
                        Some(Err(e)) => {
                            log::warn!("[Webos] Transport error: {e}");
                            break;
                        }
                        None => break,
                    }
                }
            }
            reader_session.close();
            log::info!("[Webos] Television connection closed");
        });

        // Subscriptions do not survive reconnection, so every successful
        // connect re-issues the volume subscription.
        session.send(&SsapRequest::subscribe(
            VOLUME_SUBSCRIPTION_ID,
            uri::GET_VOLUME,
        ))?;

        log::info!("[Webos] Connected to television at {address}");
        Ok(session)
    }

    fn store_client_key(&self, key: &str) {
        let changed = {
            let mut stored = self.client_key.write();
            if stored.as_deref() == Some(key) {
                false
            } else {
                *stored = Some(key.to_string());
                true
            }
        };
        if !changed {
            return;
        }

        log::info!("[Webos] Television issued a new pairing key");
        if let Some(path) = &self.key_file {
            match std::fs::write(path, key) {
                Ok(()) => log::info!("[Webos] Pairing key stored at {}", path.display()),
                Err(e) => log::warn!(
                    "[Webos] Could not persist pairing key to {}: {e}",
                    path.display()
                ),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TvControl
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TvControl for WebosLink {
    async fn set_sound_output(&self, output: SoundOutput) -> ParlorResult<()> {
        self.request(
            uri::CHANGE_SOUND_OUTPUT,
            json!({ "output": output.as_str() }),
        )
        .await?;
        log::info!("[Webos] Sound output switched to {output}");
        Ok(())
    }

    async fn sound_output(&self) -> ParlorResult<String> {
        let payload = self.request(uri::GET_SOUND_OUTPUT, json!({})).await?;
        // Firmware versions differ on the field name.
        let output = payload
            .get("soundOutput")
            .or_else(|| payload.get("output"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(output)
    }

    async fn volume_up(&self) -> ParlorResult<()> {
        self.request(uri::VOLUME_UP, json!({})).await?;
        Ok(())
    }

    async fn volume_down(&self) -> ParlorResult<()> {
        self.request(uri::VOLUME_DOWN, json!({})).await?;
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> ParlorResult<()> {
        self.request(uri::SET_VOLUME, json!({ "volume": volume.min(100) }))
            .await?;
        Ok(())
    }

    async fn set_mute(&self, mute: bool) -> ParlorResult<()> {
        self.request(uri::SET_MUTE, json!({ "mute": mute })).await?;
        Ok(())
    }
}
