//! Sort-preserving base32 over the geohash alphabet.
//!
//! The alphabet is in ascending ASCII order and bits are packed MSB-first
//! without padding, so for equal-length inputs string order equals byte order.

use std::sync::LazyLock;

use data_encoding::{Encoding, Specification};

pub(crate) const GEOHASH_ALPHABET: &str = "0123456789bcdefghjkmnpqrstuvwxyz";

static GEOHASH32: LazyLock<Encoding> = LazyLock::new(|| {
    let mut spec = Specification::new();
    spec.symbols.push_str(GEOHASH_ALPHABET);
    spec.encoding()
        .expect("geohash alphabet is 32 distinct ascii symbols")
});

pub(crate) fn encode(bytes: &[u8]) -> String {
    GEOHASH32.encode(bytes)
}

pub(crate) fn encoded_len(byte_len: usize) -> usize {
    GEOHASH32.encode_len(byte_len)
}

/// Decode `text` into exactly `N` bytes.
///
/// Rejects foreign symbols and non-zero trailing bits, so every value has
/// exactly one accepted string form.
pub(crate) fn decode<const N: usize>(text: &str) -> Result<[u8; N], String> {
    let expected = encoded_len(N);
    if text.len() != expected {
        return Err(format!(
            "expected {expected} characters, got {}",
            text.len()
        ));
    }
    let decoded = GEOHASH32
        .decode(text.as_bytes())
        .map_err(|err| err.to_string())?;
    decoded
        .try_into()
        .map_err(|v: Vec<u8>| format!("decoded {} bytes, expected {}", v.len(), N))
}
