//! AES-256 in Infinite Garble Extension (IGE) mode.
//!
//! The 32-byte IV is split into two chained halves: `iv1 = iv[..16]` tracks
//! the previous ciphertext block and `iv2 = iv[16..]` the previous plaintext
//! block.

use ::aes::Aes256;
use ::aes::cipher::generic_array::GenericArray;
use ::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

/// Error returned by [`decrypt_ige`].
#[derive(Clone, Debug, PartialEq)]
pub enum IgeError {
    /// Ciphertext length is not a multiple of the 16-byte block size.
    Unaligned { len: usize },
}

impl std::fmt::Display for IgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unaligned { len } => write!(f, "IGE input of {len} bytes is not 16-byte aligned"),
        }
    }
}
impl std::error::Error for IgeError {}

fn split_iv(iv: &[u8; 32]) -> ([u8; 16], [u8; 16]) {
    let mut iv1 = [0u8; 16];
    let mut iv2 = [0u8; 16];
    iv1.copy_from_slice(&iv[..16]);
    iv2.copy_from_slice(&iv[16..]);
    (iv1, iv2)
}

/// Encrypt `buffer` in place. Only whole 16-byte blocks are processed.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut iv1, mut iv2) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(16) {
        let mut plain = [0u8; 16];
        plain.copy_from_slice(chunk);

        let mut block = [0u8; 16];
        for i in 0..16 {
            block[i] = plain[i] ^ iv1[i];
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        for i in 0..16 {
            chunk[i] = block[i] ^ iv2[i];
        }

        iv1.copy_from_slice(chunk);
        iv2 = plain;
    }
}

/// Decrypt `buffer` in place. Only whole 16-byte blocks are processed.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut iv1, mut iv2) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(16) {
        let mut encrypted = [0u8; 16];
        encrypted.copy_from_slice(chunk);

        let mut block = [0u8; 16];
        for i in 0..16 {
            block[i] = encrypted[i] ^ iv2[i];
        }
        cipher.decrypt_block(GenericArray::from_mut_slice(&mut block));
        for i in 0..16 {
            chunk[i] = block[i] ^ iv1[i];
        }

        iv1 = encrypted;
        iv2.copy_from_slice(chunk);
    }
}

/// Encrypt a copy of `plaintext`, zero-padding it to a multiple of 16 bytes.
pub fn encrypt_ige(plaintext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Vec<u8> {
    let mut out = plaintext.to_vec();
    let rem = out.len() % 16;
    if rem != 0 {
        out.resize(out.len() + 16 - rem, 0);
    }
    ige_encrypt(&mut out, key, iv);
    out
}

/// Decrypt a copy of `ciphertext`, which must be block aligned.
pub fn decrypt_ige(ciphertext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Result<Vec<u8>, IgeError> {
    if ciphertext.len() % 16 != 0 {
        return Err(IgeError::Unaligned { len: ciphertext.len() });
    }
    let mut out = ciphertext.to_vec();
    ige_decrypt(&mut out, key, iv);
    Ok(out)
}
