//! Transport seam: the request/response channel the overlay rides on.
//!
//! The crate never opens sockets. Integrators implement [`Transport`] over
//! whatever actually carries bytes (plain TCP, Tor, an in-process loopback
//! in tests). The core only requires that exchanges are addressed by a
//! session id and answered with an HTTP-like status plus an optional body.

use std::fmt;

use thiserror::Error;

/// HTTP-like status of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    InternalError,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::InternalError => 500,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(StatusCode::Ok),
            400 => Some(StatusCode::BadRequest),
            404 => Some(StatusCode::NotFound),
            500 => Some(StatusCode::InternalError),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One reply from the remote side of an exchange. The body is the base64
/// frame produced by the protocol codec; status-only replies leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireReply {
    pub status: StatusCode,
    pub body: String,
}

impl WireReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::Ok,
            body: body.into(),
        }
    }

    /// A bodyless reply carrying only a status.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// Errors surfaced by a transport implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("exchange timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("transport failure: {0}")]
    Other(String),
}

/// A byte-oriented request/response channel keyed by session id.
///
/// Implementations must be safe to share across the transfer engine's
/// worker threads.
pub trait Transport: Send + Sync {
    /// Sends one request body addressed by session id.
    fn send(&self, session_id: &str, body: &str) -> Result<(), TransportError>;

    /// Receives the reply to the most recent send on this session.
    fn receive(&self, session_id: &str) -> Result<WireReply, TransportError>;

    /// One full request/response round trip.
    fn exchange(&self, session_id: &str, body: &str) -> Result<WireReply, TransportError> {
        self.send(session_id, body)?;
        self.receive(session_id)
    }
}
