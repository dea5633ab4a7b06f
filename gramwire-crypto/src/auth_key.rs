//! The 256-byte authorization key derived from the DH handshake.

use crate::sha1;

/// An authorization key (256 bytes) plus its pre-computed identifiers.
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    pub(crate) aux_hash: [u8; 8],
    pub(crate) key_id: [u8; 8],
}

impl AuthKey {
    /// Construct from raw 256-byte DH output.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&sha[..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&sha[12..20]);
        Self { data, aux_hash, key_id }
    }

    /// Raw 256-byte representation, for persistence.
    pub fn to_bytes(&self) -> [u8; 256] { self.data }

    /// The 8-byte key identifier (SHA-1(key)[12..20]) as it appears on the wire.
    pub fn key_id(&self) -> [u8; 8] { self.key_id }

    /// The key identifier read as a little-endian integer.
    pub fn id(&self) -> u64 { u64::from_le_bytes(self.key_id) }

    /// SHA-1(key)[0..8] read as a little-endian integer.
    pub fn aux_hash(&self) -> u64 { u64::from_le_bytes(self.aux_hash) }

    /// Compute the new-nonce hash used to verify `dh_gen_ok/retry/fail`.
    ///
    /// `variant` is 1, 2 or 3 respectively. Only the low 128 bits of the
    /// SHA-1 digest are meaningful.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], variant: u8) -> [u8; 16] {
        let sha = sha1!(new_nonce, [variant], &self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&sha[4..]);
        out
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey(id={:#018x})", self.id())
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool { self.key_id == other.key_id }
}
