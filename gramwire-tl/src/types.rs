//! Bare constructors of the MTProto handshake and service schema.

use crate::deserialize::{Buffer, Error, Result};
use crate::{Blob, Deserializable, Identifiable, RawVec, Serializable};

// ─── Handshake ───────────────────────────────────────────────────────────────

tl_type! {
    /// `resPQ`: answer to `req_pq_multi`.
    ResPq = 0x05162463 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        /// Big-endian 64-bit composite.
        pq: Vec<u8>,
        server_public_key_fingerprints: Vec<i64>,
    }
}

tl_type! {
    /// `p_q_inner_data`: the RSA-encrypted payload of `req_DH_params`.
    PQInnerData = 0x83c95aec {
        pq: Vec<u8>,
        p: Vec<u8>,
        q: Vec<u8>,
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce: [u8; 32],
    }
}

tl_type! {
    ServerDhParamsFail = 0x79cb045d {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
    }
}

tl_type! {
    ServerDhParamsOk = 0xd0e8075c {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_answer: Vec<u8>,
    }
}

tl_type! {
    ServerDhInnerData = 0xb5890dba {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        g: i32,
        dh_prime: Vec<u8>,
        g_a: Vec<u8>,
        server_time: i32,
    }
}

tl_type! {
    ClientDhInnerData = 0x6643b654 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        retry_id: i64,
        g_b: Vec<u8>,
    }
}

tl_type! {
    DhGenOk = 0x3bcbf734 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash1: [u8; 16],
    }
}

tl_type! {
    DhGenRetry = 0x46dc1fb9 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash2: [u8; 16],
    }
}

tl_type! {
    DhGenFail = 0xa69dae02 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash3: [u8; 16],
    }
}

// ─── RPC envelopes ───────────────────────────────────────────────────────────

tl_type! {
    /// `rpc_result`: `result` is everything after `req_msg_id`.
    RpcResult = 0xf35c6d01 {
        req_msg_id: i64,
        result: Blob,
    }
}

tl_type! {
    RpcError = 0x2144ca19 {
        error_code: i32,
        error_message: String,
    }
}

tl_type! {
    GzipPacked = 0x3072cfa1 {
        packed_data: Vec<u8>,
    }
}

/// One entry of a `msg_container`.
///
/// The body is length-prefixed by a raw `int` rather than TL `bytes`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id: i64,
    pub seqno: i32,
    pub body: Vec<u8>,
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seqno.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for Message {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seqno = i32::deserialize(buf)?;
        let len = i32::deserialize(buf)?;
        if len < 0 || len as usize > buf.remaining() {
            return Err(Error::UnexpectedEof);
        }
        let mut body = vec![0u8; len as usize];
        buf.read_exact(&mut body)?;
        Ok(Self { msg_id, seqno, body })
    }
}

/// `msg_container`: a bare vector of [`Message`].
#[derive(Clone, Debug, PartialEq)]
pub struct MsgContainer {
    pub messages: Vec<Message>,
}

impl MsgContainer {
    /// Size of a container header: constructor id plus item count.
    pub const HEADER_LEN: usize = 8;
    /// Size of each item header: `msg_id`, `seqno` and `bytes`.
    pub const ITEM_HEADER_LEN: usize = 16;
}

impl Identifiable for MsgContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MsgContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (self.messages.len() as i32).serialize(buf);
        for message in &self.messages {
            message.serialize(buf);
        }
    }
}

impl Deserializable for MsgContainer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let RawVec(messages) = RawVec::<Message>::deserialize(buf)?;
        Ok(Self { messages })
    }
}

// ─── Service messages ────────────────────────────────────────────────────────

tl_type! {
    Pong = 0x347773c5 {
        msg_id: i64,
        ping_id: i64,
    }
}

tl_type! {
    BadMsgNotification = 0xa7eff811 {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
    }
}

tl_type! {
    BadServerSalt = 0xedab447b {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
        new_server_salt: i64,
    }
}

tl_type! {
    MsgDetailedInfo = 0x276d3ec6 {
        msg_id: i64,
        answer_msg_id: i64,
        bytes: i32,
        status: i32,
    }
}

tl_type! {
    MsgNewDetailedInfo = 0x809db6df {
        answer_msg_id: i64,
        bytes: i32,
        status: i32,
    }
}

tl_type! {
    NewSessionCreated = 0x9ec20908 {
        first_msg_id: i64,
        unique_id: i64,
        server_salt: i64,
    }
}

tl_type! {
    MsgsAck = 0x62d6b459 {
        msg_ids: Vec<i64>,
    }
}

tl_type! {
    FutureSalt = 0x0949d9dc {
        valid_since: i32,
        valid_until: i32,
        salt: i64,
    }
}

tl_type! {
    FutureSalts = 0xae500895 {
        req_msg_id: i64,
        now: i32,
        salts: RawVec<FutureSalt>,
    }
}

tl_type! {
    MsgsStateReq = 0xda69fb52 {
        msg_ids: Vec<i64>,
    }
}

tl_type! {
    MsgsStateInfo = 0x04deb57d {
        req_msg_id: i64,
        info: Vec<u8>,
    }
}

tl_type! {
    MsgsAllInfo = 0x8cc0d131 {
        msg_ids: Vec<i64>,
        info: Vec<u8>,
    }
}

tl_type! {
    MsgResendReq = 0x7d861a08 {
        msg_ids: Vec<i64>,
    }
}
