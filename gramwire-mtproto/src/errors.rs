//! Errors raised while decoding server frames.

use std::fmt;

/// A verification check on a received message failed.
///
/// Only the single offending message is discarded; the session continues.
#[derive(Clone, Debug, PartialEq)]
pub enum SecurityError {
    /// The frame names an auth key other than ours.
    AuthKeyMismatch,
    /// The `msg_key` does not match the decrypted plaintext.
    MessageKeyMismatch,
    /// The plaintext belongs to another session.
    SessionMismatch { got: i64, expected: i64 },
    /// This server `msg_id` was already received.
    Duplicate { msg_id: i64 },
    /// The server `msg_id` is outside the accepted time window.
    OutOfWindow { msg_id: i64, skew: i64 },
    /// Padding is outside the 12..=1024 byte range.
    BadPadding { padding: usize },
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthKeyMismatch => write!(f, "server replied with an invalid auth key"),
            Self::MessageKeyMismatch => write!(f, "received msg_key doesn't match the expected one"),
            Self::SessionMismatch { got, expected } => {
                write!(f, "server replied with a wrong session id {got} (expected {expected})")
            }
            Self::Duplicate { msg_id } => write!(f, "server resent message {msg_id}"),
            Self::OutOfWindow { msg_id, skew } => {
                write!(f, "message {msg_id} is {skew}s away from local time")
            }
            Self::BadPadding { padding } => write!(f, "server replied with {padding} bytes of padding"),
        }
    }
}

impl std::error::Error for SecurityError {}

/// A frame that cannot be an MTProto message.
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidBufferError {
    /// Transport error code, when the frame was a bare 4-byte status.
    pub code: Option<i32>,
    pub payload: Vec<u8>,
}

impl InvalidBufferError {
    pub fn new(payload: &[u8]) -> Self {
        let code = if payload.len() == 4 {
            let mut b = [0u8; 4];
            b.copy_from_slice(payload);
            Some(i32::from_le_bytes(b).wrapping_neg())
        } else {
            None
        };
        Self { code, payload: payload.to_vec() }
    }

    /// The server no longer recognizes our auth key.
    pub fn is_auth_key_revoked(&self) -> bool {
        self.code == Some(404)
    }
}

impl fmt::Display for InvalidBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "invalid response buffer (HTTP code {code})"),
            None => write!(f, "invalid response buffer of {} bytes", self.payload.len()),
        }
    }
}

impl std::error::Error for InvalidBufferError {}

/// An object with a constructor id we don't know how to handle.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeNotFoundError {
    pub id: u32,
    /// The undecoded bytes, constructor id included.
    pub remaining: Vec<u8>,
}

impl fmt::Display for TypeNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not find a matching constructor id for {:#010x} ({} bytes)",
            self.id,
            self.remaining.len()
        )
    }
}

impl std::error::Error for TypeNotFoundError {}

/// Returned when encrypting or decrypting before an auth key is installed.
#[derive(Clone, Debug, PartialEq)]
pub struct NoAuthKey;

impl fmt::Display for NoAuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no auth key installed")
    }
}

impl std::error::Error for NoAuthKey {}

/// Failure of [`MtProtoState::decrypt_message_data`](crate::MtProtoState::decrypt_message_data).
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    Security(SecurityError),
    InvalidBuffer(InvalidBufferError),
    NoAuthKey,
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security(e) => write!(f, "security error: {e}"),
            Self::InvalidBuffer(e) => write!(f, "{e}"),
            Self::NoAuthKey => write!(f, "{}", NoAuthKey),
        }
    }
}

impl std::error::Error for DecryptError {}

impl From<SecurityError> for DecryptError {
    fn from(e: SecurityError) -> Self { Self::Security(e) }
}

impl From<InvalidBufferError> for DecryptError {
    fn from(e: InvalidBufferError) -> Self { Self::InvalidBuffer(e) }
}

/// Failure of [`Envelope::decode`](crate::Envelope::decode).
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeError {
    TypeNotFound(TypeNotFoundError),
    Deserialize(gramwire_tl::deserialize::Error),
    /// A `gzip_packed` payload could not be inflated.
    Inflate,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeNotFound(e) => write!(f, "{e}"),
            Self::Deserialize(e) => write!(f, "deserialize error: {e}"),
            Self::Inflate => write!(f, "gzip_packed payload could not be inflated"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<gramwire_tl::deserialize::Error> for DecodeError {
    fn from(e: gramwire_tl::deserialize::Error) -> Self { Self::Deserialize(e) }
}
