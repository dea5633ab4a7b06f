//! Encrypted MTProto 2.0 session state.
//!
//! [`MtProtoState`] owns the auth key and the per-session counters
//! (session id, sequence, last msg id, server salt, clock offset). It frames
//! outgoing bodies into messages, encrypts whole payloads and decrypts and
//! verifies whatever the server sends back.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gramwire_crypto::{AuthKey, Side, decrypt_data_as, encrypt_data_v2};
use gramwire_tl::{Blob, Identifiable, Serializable, functions::InvokeAfterMsg, types::BadMsgNotification};
use log::{debug, warn};

use crate::envelope::gzip_if_smaller;
use crate::errors::{DecryptError, InvalidBufferError, NoAuthKey, SecurityError};
use crate::message::TlMessage;

/// How many server msg ids are remembered for duplicate detection.
pub const RECENT_REMOTE_IDS: usize = 500;

// Accepted skew of server msg ids against our corrected clock.
const MAX_PAST_SECS: i64 = 300;
const MAX_FUTURE_SECS: i64 = 30;

// salt + session_id + msg_id + seq_no + length
const PLAIN_HEADER_LEN: usize = 32;

fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

fn random_i64() -> i64 {
    let mut rnd = [0u8; 8];
    getrandom::getrandom(&mut rnd).expect("getrandom");
    i64::from_le_bytes(rnd)
}

fn read_i64(b: &[u8]) -> i64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    i64::from_le_bytes(a)
}

fn read_i32(b: &[u8]) -> i32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[..4]);
    i32::from_le_bytes(a)
}

/// MTProto 2.0 session codec.
pub struct MtProtoState {
    auth_key:          Option<AuthKey>,
    time_offset:       i32,
    salt:              i64,
    session_id:        i64,
    sequence:          i32,
    last_msg_id:       i64,
    security_checks:   bool,
    recent_remote_ids: VecDeque<i64>,
}

impl MtProtoState {
    /// Create a state with a fresh random session id.
    ///
    /// With `security_checks` disabled, the auth key id, session id and
    /// server msg id checks are skipped. The `msg_key` is always verified.
    pub fn new(auth_key: Option<AuthKey>, security_checks: bool) -> Self {
        Self {
            auth_key,
            time_offset: 0,
            salt: 0,
            session_id: random_i64(),
            sequence: 0,
            last_msg_id: 0,
            security_checks,
            recent_remote_ids: VecDeque::with_capacity(RECENT_REMOTE_IDS),
        }
    }

    pub fn auth_key(&self) -> Option<&AuthKey> { self.auth_key.as_ref() }

    /// Install or drop the auth key. Any previous key is replaced.
    pub fn set_auth_key(&mut self, auth_key: Option<AuthKey>) {
        self.auth_key = auth_key;
    }

    pub fn salt(&self) -> i64 { self.salt }

    pub fn set_salt(&mut self, salt: i64) { self.salt = salt; }

    pub fn session_id(&self) -> i64 { self.session_id }

    pub fn time_offset(&self) -> i32 { self.time_offset }

    pub fn set_time_offset(&mut self, offset: i32) { self.time_offset = offset; }

    pub fn sequence(&self) -> i32 { self.sequence }

    /// Correct the sequence counter after a `bad_msg_notification`.
    pub fn shift_sequence(&mut self, delta: i32) {
        self.sequence = self.sequence.saturating_add(delta).max(0);
    }

    /// Start a new session: new session id, counters and salt cleared.
    ///
    /// The auth key and clock offset are kept.
    pub fn reset(&mut self) {
        self.session_id = random_i64();
        self.sequence = 0;
        self.last_msg_id = 0;
        self.salt = 0;
        self.recent_remote_ids.clear();
    }

    /// Allocate a new client msg id.
    ///
    /// Layout: corrected unix seconds in the high 32 bits, then milliseconds
    /// and 19 random bits, low two bits zero. Ids never go backwards.
    pub fn get_new_msg_id(&mut self) -> i64 {
        let now = now();
        let secs = now.as_secs() as i64 + i64::from(self.time_offset);
        let millis = i64::from(now.subsec_millis());
        let mut rnd = [0u8; 4];
        getrandom::getrandom(&mut rnd).expect("getrandom");
        let random = i64::from(u32::from_le_bytes(rnd) & 0x7ffff);

        let mut msg_id = (secs << 32) | (millis << 21) | (random << 2);
        if self.last_msg_id >= msg_id {
            msg_id = self.last_msg_id + 4;
        }
        self.last_msg_id = msg_id;
        msg_id
    }

    /// Recompute the clock offset from a msg id the server considers valid.
    ///
    /// Returns the new offset.
    pub fn update_time_offset(&mut self, correct_msg_id: i64) -> i32 {
        let bad = self.get_new_msg_id();
        let old = self.time_offset;
        let now = now().as_secs() as i64;
        let correct = correct_msg_id >> 32;
        self.time_offset = (correct - now) as i32;

        if self.time_offset != old {
            self.last_msg_id = 0;
            debug!(
                "[gramwire] updated time offset (old {old}, bad {bad}, good {correct_msg_id}, new {})",
                self.time_offset
            );
        }
        self.time_offset
    }

    /// Next seq_no: odd and advancing for content-related messages, even otherwise.
    pub fn get_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let seq = self.sequence * 2 + 1;
            self.sequence += 1;
            seq
        } else {
            self.sequence * 2
        }
    }

    /// Append `msg_id | seq_no | length | body` to `buffer`, returning the msg id.
    ///
    /// With `after_id`, the body is wrapped in `invokeAfterMsg`. Large
    /// content-related bodies are gzipped when that makes them smaller.
    pub fn write_data_as_message(
        &mut self,
        buffer: &mut Vec<u8>,
        data: &[u8],
        content_related: bool,
        after_id: Option<i64>,
    ) -> i64 {
        let msg_id = self.get_new_msg_id();
        let seq_no = self.get_seq_no(content_related);

        let body: Cow<'_, [u8]> = match after_id {
            None => gzip_if_smaller(content_related, data),
            Some(after) => {
                let wrapped = InvokeAfterMsg { msg_id: after, query: Blob(data.to_vec()) }.to_bytes();
                Cow::Owned(gzip_if_smaller(content_related, &wrapped).into_owned())
            }
        };

        buffer.reserve(16 + body.len());
        buffer.extend(msg_id.to_le_bytes());
        buffer.extend(seq_no.to_le_bytes());
        buffer.extend((body.len() as i32).to_le_bytes());
        buffer.extend_from_slice(&body);
        msg_id
    }

    /// Prefix `data` with salt and session id and encrypt it for the server.
    pub fn encrypt_message_data(&self, data: &[u8]) -> Result<Vec<u8>, NoAuthKey> {
        let auth_key = self.auth_key.as_ref().ok_or(NoAuthKey)?;
        let mut plain = Vec::with_capacity(16 + data.len());
        plain.extend(self.salt.to_le_bytes());
        plain.extend(self.session_id.to_le_bytes());
        plain.extend_from_slice(data);
        Ok(encrypt_data_v2(&plain, auth_key))
    }

    /// Decrypt and verify one server frame.
    ///
    /// The frame is decrypted in place.
    pub fn decrypt_message_data(&mut self, body: &mut [u8]) -> Result<TlMessage, DecryptError> {
        if body.len() < 8 {
            return Err(InvalidBufferError::new(body).into());
        }
        let auth_key = self.auth_key.as_ref().ok_or(DecryptError::NoAuthKey)?;

        if self.security_checks && body[..8] != auth_key.key_id() {
            return Err(SecurityError::AuthKeyMismatch.into());
        }
        if body.len() < 24 + PLAIN_HEADER_LEN || (body.len() - 24) % 16 != 0 {
            return Err(InvalidBufferError::new(body).into());
        }

        let plain = decrypt_data_as(body, auth_key, Side::Server)
            .map_err(|_| SecurityError::MessageKeyMismatch)?;

        let session_id = read_i64(&plain[8..]);
        if self.security_checks && session_id != self.session_id {
            return Err(SecurityError::SessionMismatch { got: session_id, expected: self.session_id }.into());
        }

        let msg_id = read_i64(&plain[16..]);
        let seq_no = read_i32(&plain[24..]);
        let len = read_i32(&plain[28..]);
        if len < 0 || PLAIN_HEADER_LEN + len as usize > plain.len() {
            return Err(InvalidBufferError::new(plain).into());
        }
        let len = len as usize;

        let padding = plain.len() - PLAIN_HEADER_LEN - len;
        if !(12..=1024).contains(&padding) {
            return Err(SecurityError::BadPadding { padding }.into());
        }

        if self.security_checks {
            if self.recent_remote_ids.contains(&msg_id) {
                warn!("[gramwire] server resent the older message {msg_id}, ignoring");
                return Err(SecurityError::Duplicate { msg_id }.into());
            }
            let skew = (msg_id >> 32) - (now().as_secs() as i64 + i64::from(self.time_offset));
            // A clock correction arrives stamped with the clock we disagree with.
            let corrects_clock = len >= 4
                && read_i32(&plain[PLAIN_HEADER_LEN..]) as u32 == BadMsgNotification::CONSTRUCTOR_ID;
            if !corrects_clock && !(-MAX_PAST_SECS..=MAX_FUTURE_SECS).contains(&skew) {
                return Err(SecurityError::OutOfWindow { msg_id, skew }.into());
            }
            if self.recent_remote_ids.len() == RECENT_REMOTE_IDS {
                self.recent_remote_ids.pop_front();
            }
            self.recent_remote_ids.push_back(msg_id);
        }

        Ok(TlMessage {
            msg_id,
            seq_no,
            body: plain[PLAIN_HEADER_LEN..PLAIN_HEADER_LEN + len].to_vec(),
        })
    }
}

impl std::fmt::Debug for MtProtoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtProtoState")
            .field("auth_key", &self.auth_key)
            .field("session_id", &self.session_id)
            .field("salt", &self.salt)
            .field("sequence", &self.sequence)
            .field("time_offset", &self.time_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> MtProtoState {
        MtProtoState::new(Some(AuthKey::from_bytes([7u8; 256])), true)
    }

    #[test]
    fn msg_ids_increase_by_multiples_of_four() {
        let mut s = state();
        let mut last = 0;
        for _ in 0..1000 {
            let id = s.get_new_msg_id();
            assert_eq!(id % 4, 0);
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn msg_id_carries_corrected_time() {
        let mut s = state();
        s.set_time_offset(3600);
        let secs = s.get_new_msg_id() >> 32;
        let now = now().as_secs() as i64;
        assert!((secs - now - 3600).abs() <= 1);
    }

    #[test]
    fn seq_no_parity() {
        let mut s = state();
        assert_eq!(s.get_seq_no(false), 0);
        assert_eq!(s.get_seq_no(true), 1);
        assert_eq!(s.get_seq_no(true), 3);
        assert_eq!(s.get_seq_no(false), 4);
        s.shift_sequence(64);
        assert_eq!(s.get_seq_no(true), 133);
    }

    #[test]
    fn update_time_offset_uses_high_bits() {
        let mut s = state();
        let now = now().as_secs() as i64;
        let offset = s.update_time_offset((now + 120) << 32);
        assert!((offset - 120).abs() <= 1);
        assert_eq!(s.time_offset(), offset);
    }

    #[test]
    fn reset_starts_new_session() {
        let mut s = state();
        let old = s.session_id();
        s.set_salt(99);
        s.get_seq_no(true);
        s.reset();
        assert_ne!(s.session_id(), old);
        assert_eq!(s.salt(), 0);
        assert_eq!(s.sequence(), 0);
        assert!(s.auth_key().is_some());
    }

    #[test]
    fn message_layout() {
        let mut s = state();
        let mut buf = Vec::new();
        let id = s.write_data_as_message(&mut buf, &[1, 2, 3, 4], true, None);
        assert_eq!(&buf[..8], &id.to_le_bytes());
        assert_eq!(&buf[8..12], &1i32.to_le_bytes());
        assert_eq!(&buf[12..16], &4i32.to_le_bytes());
        assert_eq!(&buf[16..], &[1, 2, 3, 4]);
    }

    #[test]
    fn invoke_after_wraps_body() {
        let mut s = state();
        let mut buf = Vec::new();
        s.write_data_as_message(&mut buf, &[9; 8], true, Some(0x55));
        assert_eq!(&buf[12..16], &20i32.to_le_bytes());
        assert_eq!(&buf[16..20], &gramwire_tl::functions::INVOKE_AFTER_MSG_ID.to_le_bytes());
        assert_eq!(&buf[20..28], &0x55i64.to_le_bytes());
        assert_eq!(&buf[28..], &[9; 8]);
    }

    #[test]
    fn large_content_bodies_are_gzipped() {
        let mut s = state();
        let mut buf = Vec::new();
        s.write_data_as_message(&mut buf, &[0u8; 4096], true, None);
        assert!(buf.len() < 1024);
        assert_eq!(&buf[16..20], &0x3072cfa1u32.to_le_bytes());

        buf.clear();
        s.write_data_as_message(&mut buf, &[0u8; 4096], false, None);
        assert_eq!(buf.len(), 16 + 4096);
    }

    #[test]
    fn encrypt_without_key_fails() {
        let s = MtProtoState::new(None, true);
        assert_eq!(s.encrypt_message_data(&[0; 16]), Err(NoAuthKey));
    }

    #[test]
    fn short_frames_are_invalid_buffers() {
        let mut s = state();
        let mut frame = (-404i32).to_le_bytes();
        match s.decrypt_message_data(&mut frame) {
            Err(DecryptError::InvalidBuffer(e)) => assert!(e.is_auth_key_revoked()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn foreign_key_id_is_security_error() {
        let mut s = state();
        let mut frame = vec![0u8; 24 + 48];
        assert_eq!(
            s.decrypt_message_data(&mut frame),
            Err(DecryptError::Security(SecurityError::AuthKeyMismatch))
        );
    }
}
