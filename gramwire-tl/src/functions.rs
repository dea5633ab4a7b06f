//! RPC functions of the MTProto schema.

use crate::deserialize::{Buffer, Result};
use crate::{Blob, Deserializable, Identifiable, RemoteCall, Serializable, enums};

tl_function! {
    ReqPqMulti = 0xbe7e8ef1 {
        nonce: [u8; 16],
    } -> enums::ResPq
}

tl_function! {
    ReqDhParams = 0xd712e4be {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        p: Vec<u8>,
        q: Vec<u8>,
        public_key_fingerprint: i64,
        encrypted_data: Vec<u8>,
    } -> enums::ServerDhParams
}

tl_function! {
    SetClientDhParams = 0xf5045f1f {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_data: Vec<u8>,
    } -> enums::SetClientDhParamsAnswer
}

tl_function! {
    Ping = 0x7abe77ec {
        ping_id: i64,
    } -> enums::Pong
}

tl_function! {
    /// Ping that also asks the server to close the connection after
    /// `disconnect_delay` seconds without further pings.
    PingDelayDisconnect = 0xf3427b8c {
        ping_id: i64,
        disconnect_delay: i32,
    } -> enums::Pong
}

tl_function! {
    GetFutureSalts = 0xb921bd04 {
        num: i32,
    } -> enums::FutureSalts
}

pub const INVOKE_AFTER_MSG_ID: u32 = 0xcb9f372d;

/// `invokeAfterMsg`: run `query` only after `msg_id` has been processed.
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeAfterMsg<X> {
    pub msg_id: i64,
    pub query: X,
}

impl<X> Identifiable for InvokeAfterMsg<X> {
    const CONSTRUCTOR_ID: u32 = INVOKE_AFTER_MSG_ID;
}

impl<X: Serializable> Serializable for InvokeAfterMsg<X> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.query.serialize(buf);
    }
}

/// Only the opaque form can be read back, since the query's type is unknown.
impl Deserializable for InvokeAfterMsg<Blob> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let query = Blob::deserialize(buf)?;
        Ok(Self { msg_id, query })
    }
}

impl<X: RemoteCall> RemoteCall for InvokeAfterMsg<X> {
    type Return = X::Return;
}
