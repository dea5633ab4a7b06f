//! RSA public-key encryption for the auth key exchange.
//!
//! Two schemes are supported. [`encrypt_hashed`] is the current RSA_PAD
//! scheme; [`encrypt`] is the legacy `SHA1(data) ++ data ++ padding` scheme
//! still accepted by servers for `p_q_inner_data`.

use num_bigint::BigUint;

use crate::{aes, sha1, sha256};

/// Maximum payload accepted by [`encrypt_hashed`].
pub const MAX_HASHED_LEN: usize = 144;
/// Maximum payload accepted by [`encrypt`].
pub const MAX_LEGACY_LEN: usize = 235;

const TEMP_KEY_RETRIES: usize = 20;

/// An RSA public key `(n, e)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
}

fn tl_bytes(out: &mut Vec<u8>, data: &[u8]) {
    let header = if data.len() < 254 {
        out.push(data.len() as u8);
        1
    } else {
        out.push(254);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
        4
    };
    out.extend_from_slice(data);
    let rem = (header + data.len()) % 4;
    if rem != 0 {
        out.extend(std::iter::repeat_n(0u8, 4 - rem));
    }
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self::from_parts(
            BigUint::parse_bytes(n.as_bytes(), 10)?,
            BigUint::parse_bytes(e.as_bytes(), 10)?,
        ))
    }

    pub fn from_parts(n: BigUint, e: BigUint) -> Self {
        Self { n, e }
    }

    /// Size of the modulus in bytes.
    pub fn modulus_len(&self) -> usize {
        self.n.bits().div_ceil(8) as usize
    }

    /// The 64-bit fingerprint servers use to name this key.
    ///
    /// This is the low 64 bits of `SHA1(bytes(n) ++ bytes(e))` with both
    /// integers serialized big-endian as TL `bytes`.
    pub fn fingerprint(&self) -> i64 {
        let mut buf = Vec::with_capacity(self.modulus_len() + 12);
        tl_bytes(&mut buf, &self.n.to_bytes_be());
        tl_bytes(&mut buf, &self.e.to_bytes_be());
        let sha = sha1!(&buf);
        let mut low = [0u8; 8];
        low.copy_from_slice(&sha[12..]);
        i64::from_le_bytes(low)
    }

    /// Textbook `data^e mod n`, left-padded to the modulus length.
    pub fn encrypt_raw(&self, data: &[u8]) -> Vec<u8> {
        let c = BigUint::from_bytes_be(data).modpow(&self.e, &self.n);
        let bytes = c.to_bytes_be();
        let mut out = vec![0u8; self.modulus_len().max(bytes.len()) - bytes.len()];
        out.extend_from_slice(&bytes);
        out
    }
}

/// Legacy scheme: `SHA1(data) ++ data ++ random` up to 255 bytes, then RSA.
///
/// Returns `None` if `data` is longer than [`MAX_LEGACY_LEN`].
pub fn encrypt(data: &[u8], key: &Key, random_bytes: &[u8; 235]) -> Option<Vec<u8>> {
    if data.len() > MAX_LEGACY_LEN {
        return None;
    }
    let mut block = Vec::with_capacity(255);
    block.extend_from_slice(&sha1!(data));
    block.extend_from_slice(data);
    block.extend_from_slice(&random_bytes[..255 - block.len()]);
    Some(key.encrypt_raw(&block))
}

/// RSA_PAD: encrypt `data` with a fresh temporary AES key mixed into the block.
///
/// `random_bytes` supplies 192 bytes of padding material followed by the
/// 32-byte initial temporary key. A block that does not fit below the
/// modulus is redone with a new random temporary key. Returns `None` if
/// `data` is longer than [`MAX_HASHED_LEN`] or no candidate fit.
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Option<Vec<u8>> {
    encrypt_hashed_with(data, key, random_bytes, |temp_key| {
        getrandom::getrandom(temp_key).expect("getrandom");
    })
}

/// [`encrypt_hashed`] drawing each retry's temporary key from `next_key`.
pub fn encrypt_hashed_with(
    data:         &[u8],
    key:          &Key,
    random_bytes: &[u8; 224],
    mut next_key: impl FnMut(&mut [u8; 32]),
) -> Option<Vec<u8>> {
    if data.len() > MAX_HASHED_LEN {
        return None;
    }

    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend_from_slice(data);
    data_with_padding.extend_from_slice(&random_bytes[..192 - data.len()]);
    let reversed: Vec<u8> = data_with_padding.iter().rev().copied().collect();

    let mut temp_key = [0u8; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    for _ in 0..TEMP_KEY_RETRIES {
        let mut data_with_hash = Vec::with_capacity(224);
        data_with_hash.extend_from_slice(&reversed);
        data_with_hash.extend_from_slice(&sha256!(&temp_key, &data_with_padding));
        aes::ige_encrypt(&mut data_with_hash, &temp_key, &[0u8; 32]);

        let mut candidate = temp_key;
        for (a, b) in candidate.iter_mut().zip(sha256!(&data_with_hash)) {
            *a ^= b;
        }
        let mut block = candidate.to_vec();
        block.extend_from_slice(&data_with_hash);

        if BigUint::from_bytes_be(&block) < key.n {
            return Some(key.encrypt_raw(&block));
        }
        next_key(&mut temp_key);
    }
    None
}
