//! Sans-IO MTProto 2.0 session layer.
//!
//! This crate handles:
//! * The three-step auth key exchange ([`authentication`])
//! * Plaintext framing used before a key exists ([`PlainMessage`])
//! * Encrypted framing, msg ids, sequence numbers and salts ([`MtProtoState`])
//! * Classification of decrypted bodies ([`Envelope`])
//!
//! Nothing here touches a socket; the sender crate drives it over a
//! connection of its choice.

#![deny(unsafe_code)]

pub mod authentication;
pub mod envelope;
pub mod errors;
pub mod message;
mod state;

pub use envelope::Envelope;
pub use errors::{DecodeError, DecryptError, InvalidBufferError, NoAuthKey, SecurityError, TypeNotFoundError};
pub use message::{PlainMessage, TlMessage};
pub use state::{MtProtoState, RECENT_REMOTE_IDS};
