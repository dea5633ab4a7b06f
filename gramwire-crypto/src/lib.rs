//! Cryptographic primitives for the gramwire MTProto transport.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption
//! - SHA-1 / SHA-256 hash macros
//! - Lopatin PQ factorization
//! - RSA encryption (legacy SHA-1 prefixed scheme and RSA_PAD)
//! - `AuthKey`, the 256-byte session key
//! - MTProto 2.0 message encryption / decryption for either side
//! - DH nonce→key derivation

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod factorize;
pub mod rsa;
#[doc(hidden)]
pub mod sha;

pub use auth_key::AuthKey;
pub use factorize::{FactorizeError, factorize};

// ─── MTProto 2.0 encrypt / decrypt ───────────────────────────────────────────

/// Errors from [`decrypt_data_v2`] and [`decrypt_data_as`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer { len: usize },
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer { len } => write!(f, "invalid ciphertext buffer length {len}"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}
impl std::error::Error for DecryptError {}

/// Which party produced a ciphertext.
///
/// MTProto 2.0 offsets every slice of the auth key by `x = 0` for data sent by
/// the client and `x = 8` for data sent by the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// Offset into the auth key for this side.
    pub const fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// Derive the AES key and IV for a message with the given `msg_key`.
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256!(msg_key, &auth_key.data[x..x + 36]);
    let sha_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..24].copy_from_slice(&sha_b[8..24]);
    aes_key[24..].copy_from_slice(&sha_a[24..]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..8].copy_from_slice(&sha_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha_b[24..]);

    (aes_key, aes_iv)
}

/// `msg_key = SHA256(auth_key[88 + x..120 + x] ++ plaintext)[8..24]`.
pub fn calc_msg_key(auth_key: &AuthKey, plaintext: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256!(&auth_key.data[88 + x..88 + x + 32], plaintext);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

// 12..=1024 bytes of padding are allowed; we stay within 17..=32.
fn padding_len(len: usize) -> usize {
    16 + (16 - (len % 16))
}

/// Encrypt client plaintext using MTProto 2.0.
///
/// Returns `key_id || msg_key || ciphertext`.
pub fn encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey) -> Vec<u8> {
    encrypt_data_as(plaintext, auth_key, Side::Client)
}

/// Encrypt `plaintext` as if it had been sent by `side`.
pub fn encrypt_data_as(plaintext: &[u8], auth_key: &AuthKey, side: Side) -> Vec<u8> {
    let mut rnd = [0u8; 32];
    getrandom::getrandom(&mut rnd).expect("getrandom failed");
    do_encrypt_data(plaintext, auth_key, side, &rnd)
}

pub(crate) fn do_encrypt_data(
    plaintext: &[u8],
    auth_key: &AuthKey,
    side: Side,
    rnd: &[u8; 32],
) -> Vec<u8> {
    let pad = padding_len(plaintext.len());
    let mut out = Vec::with_capacity(24 + plaintext.len() + pad);
    out.extend_from_slice(&auth_key.key_id);
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(plaintext);
    out.extend_from_slice(&rnd[..pad]);

    let msg_key = calc_msg_key(auth_key, &out[24..], side);
    out[8..24].copy_from_slice(&msg_key);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_encrypt(&mut out[24..], &key, &iv);
    out
}

/// Decrypt an MTProto 2.0 ciphertext sent by the server.
///
/// `buffer` must start with `key_id || msg_key || ciphertext`.
/// On success returns a slice of `buffer` containing the plaintext.
pub fn decrypt_data_v2<'a>(buffer: &'a mut [u8], auth_key: &AuthKey) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() >= 8 && auth_key.key_id != buffer[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    decrypt_data_as(buffer, auth_key, Side::Server)
}

/// Decrypt a ciphertext produced by `side`, without checking the key id.
///
/// The `msg_key` is always verified.
pub fn decrypt_data_as<'a>(
    buffer: &'a mut [u8],
    auth_key: &AuthKey,
    side: Side,
) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() < 24 || (buffer.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer { len: buffer.len() });
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&buffer[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_decrypt(&mut buffer[24..], &key, &iv);

    if msg_key != calc_msg_key(auth_key, &buffer[24..], side) {
        return Err(DecryptError::MessageKeyMismatch);
    }
    Ok(&mut buffer[24..])
}

/// Derive `(key, iv)` from nonces for the handshake's encrypted DH answer.
pub fn generate_key_data_from_nonce(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}
