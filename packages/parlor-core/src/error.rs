//! Centralized error types for the Parlor core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Device modules define their own transport-level errors ([`WebosError`],
//! [`SoapError`], [`KasaError`]); those are mapped into [`ParlorError`] at
//! the module boundary so everything above the device layer deals with one
//! taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::devices::DeviceKind;
use crate::kasa::KasaError;
use crate::sonos::soap::SoapError;
use crate::webos::link::WebosError;

/// Application-wide error type for the Parlor server.
///
/// Every device failure is tagged with the [`DeviceKind`] it came from and a
/// message that names the phase of the operation and any partial action that
/// had already been taken (see [`ParlorError::with_note`]).
#[derive(Debug, Error)]
pub enum ParlorError {
    /// No handshake with the device completed within the bound.
    #[error("{device} did not complete its handshake within {timeout_secs}s - is it powered on?")]
    ConnectionTimeout {
        device: DeviceKind,
        timeout_secs: u64,
    },

    /// The transport reported an error before a session was established.
    #[error("{device} connection failed: {message}")]
    Connection { device: DeviceKind, message: String },

    /// The device was reachable but rejected the command.
    #[error("{device} rejected the command: {message}")]
    Device { device: DeviceKind, message: String },

    /// Resolution or the transport itself failed; the device cannot be reached.
    #[error("{device} is unreachable: {message}")]
    Unreachable { device: DeviceKind, message: String },

    /// The device never became reachable within the boot-wait bound.
    #[error("{device} did not come up within {waited_secs}s of power-on")]
    BootTimeout { device: DeviceKind, waited_secs: u64 },

    /// An audio mode switch is already in flight; re-issue the request later.
    #[error("an audio mode switch is already in progress")]
    Busy,

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParlorError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionTimeout { .. } => "connection_timeout",
            Self::Connection { .. } => "connection_error",
            Self::Device { .. } => "device_error",
            Self::Unreachable { .. } => "device_unreachable",
            Self::BootTimeout { .. } => "device_boot_timeout",
            Self::Busy => "busy",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionTimeout { .. } | Self::BootTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Connection { .. } | Self::Device { .. } | Self::Unreachable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Busy => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Appends context to the error message: the phase that failed and any
    /// partial action that had already been taken.
    ///
    /// Variants without a free-form message (e.g. [`ParlorError::Busy`]) are
    /// returned unchanged.
    #[must_use]
    pub fn with_note(self, note: &str) -> Self {
        fn annotate(message: String, note: &str) -> String {
            format!("{message} ({note})")
        }
        match self {
            Self::Connection { device, message } => Self::Connection {
                device,
                message: annotate(message, note),
            },
            Self::Device { device, message } => Self::Device {
                device,
                message: annotate(message, note),
            },
            Self::Unreachable { device, message } => Self::Unreachable {
                device,
                message: annotate(message, note),
            },
            other => other,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type ParlorResult<T> = Result<T, ParlorError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for ParlorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<WebosError> for ParlorError {
    fn from(err: WebosError) -> Self {
        let device = DeviceKind::Tv;
        match err {
            WebosError::Timeout(timeout_secs) => Self::ConnectionTimeout {
                device,
                timeout_secs,
            },
            WebosError::Device(message) => Self::Device { device, message },
            WebosError::NoAddress => Self::Unreachable {
                device,
                message: "no television address configured or discovered".into(),
            },
            other => Self::Connection {
                device,
                message: other.to_string(),
            },
        }
    }
}

impl From<SoapError> for ParlorError {
    fn from(err: SoapError) -> Self {
        let device = DeviceKind::Soundbar;
        match err {
            SoapError::Http(e) => Self::Unreachable {
                device,
                message: e.to_string(),
            },
            SoapError::Parse => Self::Device {
                device,
                message: "unparseable SOAP response".into(),
            },
            other => Self::Device {
                device,
                message: other.to_string(),
            },
        }
    }
}

impl From<KasaError> for ParlorError {
    fn from(err: KasaError) -> Self {
        let device = DeviceKind::Plug;
        match err {
            KasaError::Protocol(message) => Self::Device { device, message },
            other => Self::Unreachable {
                device,
                message: other.to_string(),
            },
        }
    }
}
