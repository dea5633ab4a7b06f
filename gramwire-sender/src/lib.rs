//! # gramwire-sender
//!
//! Async MTProto sender on tokio.
//!
//! [`MtProtoSender`] owns one encrypted session over a [`Connection`] and
//! multiplexes requests over it:
//!
//! - auth key generation when no key is configured
//! - batching of queued requests into containers, ordered with `invokeAfterMsg`
//! - acknowledgements and handling of the service messages the server sends
//!   (salts, clock and sequence corrections, resend and state requests)
//! - reconnection onto a fresh connection, re-sending everything unanswered
//!
//! The byte transport itself is supplied by the caller through [`Connection`].
//!
//! ```rust,no_run
//! # async fn run<C: gramwire_sender::Connection>(conn: C) -> Result<(), gramwire_sender::InvocationError> {
//! use gramwire_sender::{MtProtoSender, SenderConfig};
//! use gramwire_tl::functions::Ping;
//!
//! let sender = MtProtoSender::new(SenderConfig::default());
//! sender.connect(conn, false).await?;
//! let pong = sender.send(&Ping { ping_id: 42 }).await?;
//! # let _ = pong;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod authenticator;
mod connection;
mod errors;
mod message_packer;
mod pending;
mod request_state;
mod sender;

pub use authenticator::do_authentication;
pub use connection::Connection;
pub use errors::{BadMessageError, InvocationError, RpcError};
pub use message_packer::{Batch, MAX_CONTAINER_BYTES, MAX_CONTAINER_ITEMS, MessagePacker};
pub use pending::PendingState;
pub use request_state::{RequestState, Response};
pub use sender::MtProtoSender;

pub use gramwire_crypto::AuthKey;
pub use gramwire_mtproto::authentication::ServerKeys;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ─── ConnectionState ──────────────────────────────────────────────────────────

/// Lifecycle of the sender's connection, as reported to
/// [`SenderConfig::on_state`] and [`MtProtoSender::subscribe`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// The connection dropped and a new one is being opened.
    Reconnecting,
    /// The server no longer recognizes the auth key; a new handshake is
    /// needed before the sender can be used again.
    Broken,
    Disconnected,
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// An update pushed by the server outside of any request.
///
/// The body is the full serialized object, constructor id included.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub constructor_id: u32,
    pub body:           Vec<u8>,
}

// ─── SenderConfig ─────────────────────────────────────────────────────────────

pub type UpdateCallback  = Arc<dyn Fn(Update) + Send + Sync>;
pub type StateCallback   = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type AuthKeyCallback = Arc<dyn Fn(&AuthKey) + Send + Sync>;

/// Configuration for an [`MtProtoSender`].
#[derive(Clone)]
pub struct SenderConfig {
    /// Connection attempts made by each connect or reconnect.
    pub retries:         usize,
    /// Pause between failed connection attempts.
    pub delay:           Duration,
    /// Pause before reconnecting after the connection drops.
    pub reconnect_delay: Duration,
    pub auto_reconnect:  bool,
    /// Check auth key id, session id and msg id of every received message.
    pub security_checks: bool,
    /// RSA keys the handshake accepts.
    pub server_keys:     ServerKeys,
    /// A previously generated auth key. Without one, a handshake runs on connect.
    pub auth_key:        Option<AuthKey>,
    /// Persisted clock offset in seconds.
    pub time_offset:     i32,
    /// Data center number, only used in log lines.
    pub dc_id:           i32,
    pub on_update:       Option<UpdateCallback>,
    pub on_state:        Option<StateCallback>,
    /// Called with every newly generated auth key, e.g. to persist it.
    pub on_auth_key:     Option<AuthKeyCallback>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retries:         5,
            delay:           Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(1),
            auto_reconnect:  true,
            security_checks: true,
            server_keys:     ServerKeys::telegram(),
            auth_key:        None,
            time_offset:     0,
            dc_id:           0,
            on_update:       None,
            on_state:        None,
            on_auth_key:     None,
        }
    }
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("retries", &self.retries)
            .field("delay", &self.delay)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("security_checks", &self.security_checks)
            .field("server_keys", &self.server_keys.len())
            .field("auth_key", &self.auth_key.as_ref().map(AuthKey::id))
            .field("time_offset", &self.time_offset)
            .field("dc_id", &self.dc_id)
            .finish_non_exhaustive()
    }
}
