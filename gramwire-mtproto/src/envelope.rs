//! Classification of decrypted message bodies.
//!
//! [`Envelope::decode`] looks at the constructor id of a body and turns the
//! service objects a sender has to react to into typed values. Anything that
//! is neither a service object nor a known update is a
//! [`TypeNotFoundError`].

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;
use gramwire_tl::deserialize::peek_constructor;
use gramwire_tl::{Cursor, Deserializable, Identifiable, Serializable, types};

use crate::errors::{DecodeError, TypeNotFoundError};
use crate::message::TlMessage;

/// Bodies at or below this size are never compressed.
pub const GZIP_THRESHOLD: usize = 512;

/// Constructor ids of the `Updates` family.
pub const UPDATE_IDS: [u32; 7] = [
    0x74ae4240, // updates
    0x78d4dec1, // updateShort
    0x725b04c3, // updatesCombined
    0x313bc7f8, // updateShortMessage
    0x4d6deea5, // updateShortChatMessage
    0xe317af7e, // updatesTooLong
    0x9015e101, // updateShortSentMessage
];

pub fn is_update(constructor_id: u32) -> bool {
    UPDATE_IDS.contains(&constructor_id)
}

/// A decoded message body.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// Result of one of our requests. `Ok` carries the raw response body,
    /// already inflated if it came `gzip_packed`.
    RpcResult { req_msg_id: i64, result: Result<Vec<u8>, types::RpcError> },
    Container(Vec<TlMessage>),
    /// Inflated contents of a `gzip_packed` object.
    Gzip(Vec<u8>),
    Pong(types::Pong),
    BadServerSalt(types::BadServerSalt),
    BadMsgNotification(types::BadMsgNotification),
    MsgDetailedInfo(types::MsgDetailedInfo),
    MsgNewDetailedInfo(types::MsgNewDetailedInfo),
    NewSessionCreated(types::NewSessionCreated),
    MsgsAck(types::MsgsAck),
    FutureSalts(types::FutureSalts),
    MsgsStateReq(types::MsgsStateReq),
    MsgResendReq(types::MsgResendReq),
    MsgsAllInfo(types::MsgsAllInfo),
    /// One of the [`UPDATE_IDS`], passed on undecoded.
    Update { constructor_id: u32, body: Vec<u8> },
}

fn bare<T: Deserializable>(body: &[u8]) -> Result<T, DecodeError> {
    let mut cur = Cursor::from_slice(&body[4..]);
    Ok(T::deserialize(&mut cur)?)
}

impl Envelope {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let id = peek_constructor(body)?;

        Ok(match id {
            types::RpcResult::CONSTRUCTOR_ID => {
                let res: types::RpcResult = bare(body)?;
                Self::RpcResult { req_msg_id: res.req_msg_id, result: decode_result(res.result.0)? }
            }
            types::MsgContainer::CONSTRUCTOR_ID => {
                let container: types::MsgContainer = bare(body)?;
                Self::Container(
                    container
                        .messages
                        .into_iter()
                        .map(|m| TlMessage { msg_id: m.msg_id, seq_no: m.seqno, body: m.body })
                        .collect(),
                )
            }
            types::GzipPacked::CONSTRUCTOR_ID => {
                let packed: types::GzipPacked = bare(body)?;
                Self::Gzip(inflate(&packed.packed_data)?)
            }
            types::Pong::CONSTRUCTOR_ID => Self::Pong(bare(body)?),
            types::BadServerSalt::CONSTRUCTOR_ID => Self::BadServerSalt(bare(body)?),
            types::BadMsgNotification::CONSTRUCTOR_ID => Self::BadMsgNotification(bare(body)?),
            types::MsgDetailedInfo::CONSTRUCTOR_ID => Self::MsgDetailedInfo(bare(body)?),
            types::MsgNewDetailedInfo::CONSTRUCTOR_ID => Self::MsgNewDetailedInfo(bare(body)?),
            types::NewSessionCreated::CONSTRUCTOR_ID => Self::NewSessionCreated(bare(body)?),
            types::MsgsAck::CONSTRUCTOR_ID => Self::MsgsAck(bare(body)?),
            types::FutureSalts::CONSTRUCTOR_ID => Self::FutureSalts(bare(body)?),
            types::MsgsStateReq::CONSTRUCTOR_ID => Self::MsgsStateReq(bare(body)?),
            types::MsgResendReq::CONSTRUCTOR_ID => Self::MsgResendReq(bare(body)?),
            types::MsgsAllInfo::CONSTRUCTOR_ID => Self::MsgsAllInfo(bare(body)?),
            id if is_update(id) => Self::Update { constructor_id: id, body: body.to_vec() },
            id => return Err(DecodeError::TypeNotFound(TypeNotFoundError { id, remaining: body.to_vec() })),
        })
    }
}

// `rpc_result.result` is either an `rpc_error`, a `gzip_packed` answer or the
// answer itself.
fn decode_result(result: Vec<u8>) -> Result<Result<Vec<u8>, types::RpcError>, DecodeError> {
    match peek_constructor(&result) {
        Ok(types::RpcError::CONSTRUCTOR_ID) => Ok(Err(bare(&result)?)),
        Ok(types::GzipPacked::CONSTRUCTOR_ID) => {
            let packed: types::GzipPacked = bare(&result)?;
            decode_result(inflate(&packed.packed_data)?)
        }
        _ => Ok(Ok(result)),
    }
}

// ─── gzip ─────────────────────────────────────────────────────────────────────

/// Wrap `data` in `gzip_packed`, or `None` if compression fails.
pub fn gzip_packed(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    let packed_data = encoder.finish().ok()?;

    let mut out = Vec::with_capacity(packed_data.len() + 8);
    out.extend(types::GzipPacked::CONSTRUCTOR_ID.to_le_bytes());
    types::GzipPacked { packed_data }.serialize(&mut out);
    Some(out)
}

/// Compress content-related bodies above [`GZIP_THRESHOLD`] when that
/// actually saves space.
pub fn gzip_if_smaller(content_related: bool, data: &[u8]) -> Cow<'_, [u8]> {
    if content_related && data.len() > GZIP_THRESHOLD {
        if let Some(packed) = gzip_packed(data) {
            if packed.len() < data.len() {
                return Cow::Owned(packed);
            }
        }
    }
    Cow::Borrowed(data)
}

/// Inflate a `gzip_packed` payload. Some servers send raw zlib streams.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    if GzDecoder::new(data).read_to_end(&mut out).is_ok() && !out.is_empty() {
        return Ok(out);
    }
    out.clear();
    ZlibDecoder::new(data).read_to_end(&mut out).map_err(|_| DecodeError::Inflate)?;
    Ok(out)
}
