//! MTProto message framing types.

use crate::errors::InvalidBufferError;

/// A decrypted message as received from the server.
#[derive(Clone, Debug, PartialEq)]
pub struct TlMessage {
    /// Server-assigned message identifier.
    pub msg_id: i64,
    /// Odd for content-related messages, which must be acknowledged.
    pub seq_no: i32,
    /// The TL-serialized object (constructor ID + fields).
    pub body: Vec<u8>,
}

impl TlMessage {
    /// Whether the server expects an acknowledgement for this message.
    pub fn is_content_related(&self) -> bool {
        self.seq_no & 1 == 1
    }

    /// Constructor id at the head of the body, if there is one.
    pub fn constructor_id(&self) -> Option<u32> {
        let head: [u8; 4] = self.body.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(head))
    }
}

/// A plaintext message, used before an auth key exists.
#[derive(Clone, Debug, PartialEq)]
pub struct PlainMessage {
    pub msg_id: i64,
    pub body: Vec<u8>,
}

impl PlainMessage {
    /// Serialize into the plaintext wire format:
    ///
    /// ```text
    /// auth_key_id:long  (0 for plaintext)
    /// message_id:long
    /// message_data_length:int
    /// message_data:bytes
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 + 4 + self.body.len());
        buf.extend(0i64.to_le_bytes());
        buf.extend(self.msg_id.to_le_bytes());
        buf.extend((self.body.len() as i32).to_le_bytes());
        buf.extend(&self.body);
        buf
    }

    /// Parse a plaintext frame received from the server.
    ///
    /// A bare 4-byte frame is a transport error code.
    pub fn from_bytes(frame: &[u8]) -> Result<Self, InvalidBufferError> {
        if frame.len() < 20 || frame[..8] != [0u8; 8] {
            return Err(InvalidBufferError::new(frame));
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&frame[8..16]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&frame[16..20]);
        let len = i32::from_le_bytes(len);

        if len < 0 || 20 + len as usize > frame.len() {
            return Err(InvalidBufferError::new(frame));
        }
        Ok(Self {
            msg_id: i64::from_le_bytes(id),
            body: frame[20..20 + len as usize].to_vec(),
        })
    }
}
