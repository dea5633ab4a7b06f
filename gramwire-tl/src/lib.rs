//! TL binary serialization and the MTProto objects gramwire speaks.
//!
//! Only the handshake objects and the service messages a sender must
//! understand are defined here; application requests are opaque to the
//! transport and reach it already serialized.
//!
//! # Overview
//!
//! | Module        | Contents                                                   |
//! |---------------|------------------------------------------------------------|
//! | [`types`]     | Concrete constructors (bare types) as `struct`s            |
//! | [`functions`] | RPC functions as `struct`s implementing [`RemoteCall`]     |
//! | [`enums`]     | Boxed types as `enum`s implementing [`Deserializable`]     |
//!
//! Bare types serialize without their constructor id; functions and enums
//! always write it.
//!
//! ```rust
//! use gramwire_tl::{functions, Serializable};
//!
//! let ping = functions::Ping { ping_id: 7 };
//! let bytes = ping.to_bytes();
//! assert_eq!(&bytes[..4], &0x7abe77ecu32.to_le_bytes());
//! ```

#![deny(unsafe_code)]

#[macro_use]
mod macros;

pub mod deserialize;
pub mod enums;
pub mod functions;
pub mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// Bare vector: `vector` (lowercase) as opposed to the boxed `Vector`.
///
/// Used where the schema sends a length-prefixed list without the usual
/// `0x1cb5c415` constructor ID header (e.g. `future_salts.salts`).
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Opaque blob of bytes passed through without interpretation.
///
/// Serializes as the raw bytes and deserializes by consuming everything left
/// in the buffer, which is how `rpc_result.result` and `invokeAfterMsg.query`
/// are carried.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Every TL object has a unique 32-bit constructor ID.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function type that can be sent as an RPC call.
///
/// `Return` is the type the server will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;

    /// Requests of this kind must be executed in the order they were queued,
    /// which the sender enforces by wrapping them in `invokeAfterMsg`.
    const INVOKE_AFTER: bool = false;
}

/// Human-readable name of a constructor id, for log lines.
pub fn name_for_id(id: u32) -> Option<&'static str> {
    Some(match id {
        types::ResPq::CONSTRUCTOR_ID => "resPQ",
        types::PQInnerData::CONSTRUCTOR_ID => "p_q_inner_data",
        types::ServerDhParamsFail::CONSTRUCTOR_ID => "server_DH_params_fail",
        types::ServerDhParamsOk::CONSTRUCTOR_ID => "server_DH_params_ok",
        types::ServerDhInnerData::CONSTRUCTOR_ID => "server_DH_inner_data",
        types::ClientDhInnerData::CONSTRUCTOR_ID => "client_DH_inner_data",
        types::DhGenOk::CONSTRUCTOR_ID => "dh_gen_ok",
        types::DhGenRetry::CONSTRUCTOR_ID => "dh_gen_retry",
        types::DhGenFail::CONSTRUCTOR_ID => "dh_gen_fail",
        types::RpcResult::CONSTRUCTOR_ID => "rpc_result",
        types::RpcError::CONSTRUCTOR_ID => "rpc_error",
        types::MsgContainer::CONSTRUCTOR_ID => "msg_container",
        types::GzipPacked::CONSTRUCTOR_ID => "gzip_packed",
        types::Pong::CONSTRUCTOR_ID => "pong",
        types::BadMsgNotification::CONSTRUCTOR_ID => "bad_msg_notification",
        types::BadServerSalt::CONSTRUCTOR_ID => "bad_server_salt",
        types::MsgDetailedInfo::CONSTRUCTOR_ID => "msg_detailed_info",
        types::MsgNewDetailedInfo::CONSTRUCTOR_ID => "msg_new_detailed_info",
        types::NewSessionCreated::CONSTRUCTOR_ID => "new_session_created",
        types::MsgsAck::CONSTRUCTOR_ID => "msgs_ack",
        types::FutureSalt::CONSTRUCTOR_ID => "future_salt",
        types::FutureSalts::CONSTRUCTOR_ID => "future_salts",
        types::MsgsStateReq::CONSTRUCTOR_ID => "msgs_state_req",
        types::MsgsStateInfo::CONSTRUCTOR_ID => "msgs_state_info",
        types::MsgsAllInfo::CONSTRUCTOR_ID => "msgs_all_info",
        types::MsgResendReq::CONSTRUCTOR_ID => "msg_resend_req",
        functions::ReqPqMulti::CONSTRUCTOR_ID => "req_pq_multi",
        functions::ReqDhParams::CONSTRUCTOR_ID => "req_DH_params",
        functions::SetClientDhParams::CONSTRUCTOR_ID => "set_client_DH_params",
        functions::Ping::CONSTRUCTOR_ID => "ping",
        functions::PingDelayDisconnect::CONSTRUCTOR_ID => "ping_delay_disconnect",
        functions::GetFutureSalts::CONSTRUCTOR_ID => "get_future_salts",
        functions::INVOKE_AFTER_MSG_ID => "invokeAfterMsg",
        _ => return None,
    })
}
