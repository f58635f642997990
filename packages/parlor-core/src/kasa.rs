//! TP-Link Kasa smart plug control.
//!
//! The plug speaks a JSON command protocol on TCP port 9999, obfuscated
//! with the rolling-XOR "autokey" cipher and framed by a 4-byte big-endian
//! length prefix. The plug is the physical power gate for the soundbar;
//! [`KasaPlug::status`] never errors so that "no plug configured or
//! reachable" stays a normal, pollable state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::devices::{DeviceKind, PlugControl, PlugStatus};
use crate::error::ParlorResult;
use crate::registry::DeviceRegistry;

/// Port of the Kasa device protocol.
const KASA_PORT: u16 = 9999;

/// Bound on one command exchange; the plug answers on LAN timescales.
const COMMAND_TIMEOUT_SECS: u64 = 3;

/// Initial key of the autokey cipher.
const CIPHER_KEY: u8 = 171;

/// Replies larger than this are not plug replies.
const MAX_REPLY_BYTES: u32 = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from the plug protocol.
#[derive(Debug, Error)]
pub enum KasaError {
    /// TCP connect/read/write failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The exchange did not complete within the bound.
    #[error("command timed out after {COMMAND_TIMEOUT_SECS}s")]
    Timeout,

    /// The plug answered with something unexpected.
    #[error("malformed reply: {0}")]
    Protocol(String),

    /// No address is known for the plug.
    #[error("no plug address configured or discovered")]
    NoAddress,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cipher & Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Obfuscates a command and prepends the length prefix.
///
/// Each byte is XORed with the previous ciphertext byte, seeded with the
/// fixed initial key.
pub fn encrypt(plaintext: &str) -> Vec<u8> {
    let bytes = plaintext.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());

    let mut key = CIPHER_KEY;
    for &b in bytes {
        let c = key ^ b;
        key = c;
        out.push(c);
    }
    out
}

/// Deobfuscates a reply body (the length prefix already stripped).
pub fn decrypt(payload: &[u8]) -> String {
    let mut key = CIPHER_KEY;
    let mut out = Vec::with_capacity(payload.len());
    for &c in payload {
        out.push(key ^ c);
        key = c;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Reads the relay state out of a `get_sysinfo` reply.
fn parse_relay_state(reply: &Value) -> Result<bool, KasaError> {
    reply
        .pointer("/system/get_sysinfo/relay_state")
        .and_then(Value::as_i64)
        .map(|state| state == 1)
        .ok_or_else(|| KasaError::Protocol("get_sysinfo reply without relay_state".to_string()))
}

/// Checks the `err_code` of a `set_relay_state` reply.
fn check_set_relay_reply(reply: &Value) -> Result<(), KasaError> {
    match reply.pointer("/system/set_relay_state/err_code") {
        Some(code) if code.as_i64() == Some(0) => Ok(()),
        Some(code) => Err(KasaError::Protocol(format!(
            "set_relay_state failed with err_code {code}"
        ))),
        None => Err(KasaError::Protocol(
            "set_relay_state reply without err_code".to_string(),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plug Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Smart plug power controller.
pub struct KasaPlug {
    registry: Arc<DeviceRegistry>,
}

impl KasaPlug {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// One full command exchange against the plug.
    async fn send_command(&self, command: &Value) -> Result<Value, KasaError> {
        let address = self
            .registry
            .resolve(DeviceKind::Plug)
            .await
            .ok_or(KasaError::NoAddress)?
            .address;
        // A bare IP gets the default protocol port; an explicit port wins.
        let target = if address.contains(':') {
            address
        } else {
            format!("{address}:{KASA_PORT}")
        };

        let exchange = async {
            let mut stream = TcpStream::connect(&target).await?;
            stream.write_all(&encrypt(&command.to_string())).await?;

            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await?;
            let len = u32::from_be_bytes(len_buf);
            if len == 0 || len > MAX_REPLY_BYTES {
                return Err(KasaError::Protocol(format!("implausible reply length {len}")));
            }

            let mut body = vec![0u8; len as usize];
            stream.read_exact(&mut body).await?;

            let text = decrypt(&body);
            serde_json::from_str(&text)
                .map_err(|e| KasaError::Protocol(format!("unparseable reply: {e}")))
        };

        let result = timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), exchange)
            .await
            .unwrap_or(Err(KasaError::Timeout));

        match &result {
            Ok(_) => self.registry.mark_reachable(DeviceKind::Plug),
            Err(KasaError::Io(_) | KasaError::Timeout) => {
                self.registry.invalidate(DeviceKind::Plug);
            }
            Err(_) => {}
        }
        result
    }

    async fn set_relay(&self, on: bool) -> Result<(), KasaError> {
        let state = i32::from(on);
        let reply = self
            .send_command(&json!({"system": {"set_relay_state": {"state": state}}}))
            .await?;
        check_set_relay_reply(&reply)?;
        log::info!(
            "[Kasa] Plug relay switched {}",
            if on { "on" } else { "off" }
        );
        Ok(())
    }
}

#[async_trait]
impl PlugControl for KasaPlug {
    async fn turn_on(&self) -> ParlorResult<()> {
        self.set_relay(true).await.map_err(Into::into)
    }

    async fn turn_off(&self) -> ParlorResult<()> {
        self.set_relay(false).await.map_err(Into::into)
    }

    async fn status(&self) -> PlugStatus {
        let reply = self
            .send_command(&json!({"system": {"get_sysinfo": {}}}))
            .await;
        match reply.and_then(|reply| parse_relay_state(&reply)) {
            Ok(on) => PlugStatus {
                reachable: true,
                on: Some(on),
            },
            Err(e) => {
                log::debug!("[Kasa] Plug status unavailable: {e}");
                PlugStatus::unreachable()
            }
        }
    }
}
