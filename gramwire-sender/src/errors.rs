//! Error types for gramwire-sender.

use std::{fmt, io};

use gramwire_mtproto::authentication;
use gramwire_mtproto::{InvalidBufferError, SecurityError};

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by the server in response to one specific request.
///
/// Numeric values are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw error message like `"FLOOD_WAIT_30"` into an `RpcError`.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    let name = message[..idx].to_string();
                    return Self { code, name, value: Some(v) };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }
}

// ─── BadMessageError ──────────────────────────────────────────────────────────

/// The server refused a message for a protocol-level reason it could not
/// correct on its own.
#[derive(Clone, Debug, PartialEq)]
pub struct BadMessageError {
    pub code: i32,
}

impl BadMessageError {
    pub fn new(code: i32) -> Self { Self { code } }

    pub fn description(&self) -> &'static str {
        match self.code {
            16 => "msg_id too low (most likely, client time is wrong; synchronize it and resend the message)",
            17 => "msg_id too high (similar to the previous case, the client time has to be synchronized)",
            18 => "incorrect two lower order msg_id bits (the server expects client message msg_id to be divisible by 4)",
            19 => "container msg_id is the same as msg_id of a previously received message",
            20 => "message too old, and it cannot be verified whether the server has received it",
            32 => "msg_seqno too low",
            33 => "msg_seqno too high",
            34 => "an even msg_seqno expected (irrelevant message), but odd received",
            35 => "odd msg_seqno expected (relevant message), but even received",
            48 => "incorrect server salt",
            64 => "invalid container",
            _ => "unknown error code",
        }
    }
}

impl fmt::Display for BadMessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad message (code {}): {}", self.code, self.description())
    }
}

impl std::error::Error for BadMessageError {}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any sender call that talks to the server.
#[derive(Debug)]
pub enum InvocationError {
    /// The server rejected the request.
    Rpc(RpcError),
    /// The server refused the message itself.
    BadMessage(BadMessageError),
    /// A received message failed verification.
    Security(SecurityError),
    /// The server sent a frame that is not a message, e.g. a transport error code.
    InvalidBuffer(InvalidBufferError),
    /// The auth key exchange failed.
    Handshake(authentication::Error),
    /// Network / I/O failure.
    Io(io::Error),
    /// Response deserialization failed.
    Deserialize(String),
    /// The serialized request does not fit in a single message.
    PayloadTooLarge { len: usize, max: usize },
    /// `send` was called while the sender is not connected.
    NotConnected,
    /// The request was dropped (e.g. the sender shut down).
    Dropped,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e)           => write!(f, "{e}"),
            Self::BadMessage(e)    => write!(f, "{e}"),
            Self::Security(e)      => write!(f, "security error: {e}"),
            Self::InvalidBuffer(e) => write!(f, "{e}"),
            Self::Handshake(e)     => write!(f, "auth key generation failed: {e}"),
            Self::Io(e)            => write!(f, "I/O error: {e}"),
            Self::Deserialize(s)   => write!(f, "deserialize error: {s}"),
            Self::PayloadTooLarge { len, max }
                                   => write!(f, "request payload of {len} bytes exceeds {max}"),
            Self::NotConnected     => write!(f, "sender is not connected"),
            Self::Dropped          => write!(f, "request dropped"),
        }
    }
}

impl std::error::Error for InvocationError {}

impl From<io::Error> for InvocationError {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}

impl From<gramwire_tl::deserialize::Error> for InvocationError {
    fn from(e: gramwire_tl::deserialize::Error) -> Self { Self::Deserialize(e.to_string()) }
}

impl From<authentication::Error> for InvocationError {
    fn from(e: authentication::Error) -> Self { Self::Handshake(e) }
}

impl From<InvalidBufferError> for InvocationError {
    fn from(e: InvalidBufferError) -> Self { Self::InvalidBuffer(e) }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _            => false,
        }
    }
}
