//! Hash helpers used throughout the handshake and message codec.

#[doc(hidden)]
pub use ::sha1 as __sha1;
#[doc(hidden)]
pub use ::sha2 as __sha2;

/// SHA-1 over the concatenation of every argument.
///
/// ```
/// let h = gramwire_crypto::sha1!(b"ab", b"c");
/// assert_eq!(h, gramwire_crypto::sha1!(b"abc"));
/// ```
#[macro_export]
macro_rules! sha1 {
    ( $( $x:expr ),+ $(,)? ) => {{
        use $crate::sha::__sha1::Digest as _;
        let mut h = $crate::sha::__sha1::Sha1::new();
        $( h.update($x); )+
        let out: [u8; 20] = h.finalize().into();
        out
    }};
}

/// SHA-256 over the concatenation of every argument.
#[macro_export]
macro_rules! sha256 {
    ( $( $x:expr ),+ $(,)? ) => {{
        use $crate::sha::__sha2::Digest as _;
        let mut h = $crate::sha::__sha2::Sha256::new();
        $( h.update($x); )+
        let out: [u8; 32] = h.finalize().into();
        out
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn macros_hash_concatenated_input() {
        let h = crate::sha1!(b"a", b"bc");
        assert_eq!(h[..4], [0xa9, 0x99, 0x3e, 0x36]);
        assert_eq!(h[16..], [0x9c, 0xd0, 0xd8, 0x9d]);

        let h = crate::sha256!(b"ab", b"c");
        assert_eq!(h[..4], [0xba, 0x78, 0x16, 0xbf]);
        assert_eq!(h[28..], [0xf2, 0x00, 0x15, 0xad]);
    }
}
