//! Wire framing: compact JSON, chain encryption, session encryption, base64.
//!
//! The group chain is the inner layer and the session cipher the outer one,
//! so a relay holding only the session key still cannot read group traffic.
//! Handshake exchanges run before any session exists and use the chain
//! alone.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::protocol::{Envelope, ProtocolError};
use crate::security::{CipherChain, SecurityError};
use crate::session::Session;

/// Frames an envelope into a transport body.
pub fn encode(
    envelope: &Envelope,
    chain: &CipherChain,
    session: Option<&Session>,
) -> Result<String, ProtocolError> {
    let text = serde_json::to_vec(envelope)?;
    let mut sealed = chain.encrypt(&text)?;
    if let Some(session) = session {
        sealed = session.encrypt(&sealed).map_err(SecurityError::from)?;
    }
    Ok(STANDARD.encode(&sealed))
}

/// Recovers an envelope from a transport body.
pub fn decode(
    body: &str,
    chain: &CipherChain,
    session: Option<&Session>,
) -> Result<Envelope, ProtocolError> {
    let mut data = STANDARD.decode(body.trim())?;
    if let Some(session) = session {
        data = session.decrypt(&data).map_err(SecurityError::from)?;
    }
    data = chain.decrypt(&data)?;
    Ok(serde_json::from_slice(&data)?)
}
