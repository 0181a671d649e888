use std::fmt;
use std::str::FromStr;

use crate::base32;
use crate::error::{Result, TxError};

/// Size of a TagId in bytes.
pub const TAG_ID_SIZE: usize = 24;
/// Length of the string form.
pub const TAG_ID_STRING_LEN: usize = 39;

/// A 24-byte identifier for cells, attributes and series indexes.
///
/// On the wire a TagId occupies three 64-bit slots `(hi, mid, lo)`, each a
/// big-endian word of the byte array, so slot order and byte order agree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TagId([u8; TAG_ID_SIZE]);

impl TagId {
    /// The nil identifier.
    pub const NIL: TagId = TagId([0; TAG_ID_SIZE]);

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; TAG_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive a stable identifier from a textual name (BLAKE3, truncated).
    pub fn from_name(name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; TAG_ID_SIZE];
        bytes.copy_from_slice(&digest.as_bytes()[..TAG_ID_SIZE]);
        Self(bytes)
    }

    /// Build from a small integer, placed in the low slot.
    pub fn from_u64(value: u64) -> Self {
        Self::from_triplet([0, 0, value])
    }

    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; TAG_ID_SIZE] {
        &self.0
    }

    /// True for [`TagId::NIL`].
    pub fn is_nil(&self) -> bool {
        self.0 == [0; TAG_ID_SIZE]
    }

    /// Pack into the `(hi, mid, lo)` wire slots.
    pub fn to_triplet(&self) -> [u64; 3] {
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&self.0[i * 8..i * 8 + 8]);
            u64::from_be_bytes(w)
        };
        [word(0), word(1), word(2)]
    }

    /// Unpack from the `(hi, mid, lo)` wire slots.
    pub fn from_triplet(slots: [u64; 3]) -> Self {
        let mut bytes = [0u8; TAG_ID_SIZE];
        for (chunk, slot) in bytes.chunks_exact_mut(8).zip(slots) {
            chunk.copy_from_slice(&slot.to_be_bytes());
        }
        Self(bytes)
    }

    /// Encode to the 39-character string form.
    pub fn encode(&self) -> String {
        base32::encode(&self.0)
    }

    /// Decode the 39-character string form.
    pub fn decode(text: &str) -> Result<Self> {
        base32::decode::<TAG_ID_SIZE>(text)
            .map(Self)
            .map_err(TxError::MalformedTag)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self.encode())
    }
}

impl FromStr for TagId {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
