//! Transaction identifiers.
//!
//! # Binary Form
//!
//! ```text
//! ┌────────────────────┬──────────────┬──────────────────────────┐
//! │ Unix seconds (6B)  │ Fraction(2B) │ Signature / hash (24B)   │
//! │ big-endian         │ 1/65536 s BE │                          │
//! └────────────────────┴──────────────┴──────────────────────────┘
//! ```
//!
//! Because the timestamp leads and is big-endian, comparing two TIDs as
//! raw bytes orders them chronologically, ties broken by the suffix.
//!
//! # Text Form
//!
//! 52 characters of geohash base32. String comparison matches byte
//! comparison, so encoded TIDs sort the same way as binary ones.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::base32;
use crate::error::{Result, TxError};

/// Size of a TID in bytes.
pub const TID_SIZE: usize = 32;
/// Size of the timestamp prefix (seconds + fraction).
pub const TID_TIMESTAMP_SIZE: usize = 8;
/// Size of the signature/hash suffix.
pub const TID_SUFFIX_SIZE: usize = TID_SIZE - TID_TIMESTAMP_SIZE;
/// Length of the string form.
pub const TID_STRING_LEN: usize = 52;

/// Largest representable Unix second (48 bits).
const MAX_UNIX_SECS: u64 = (1 << 48) - 1;

/// A 32-byte, time-sortable transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid([u8; TID_SIZE]);

impl Tid {
    /// The unassigned identifier.
    pub const ZERO: Tid = Tid([0; TID_SIZE]);

    /// Build a TID from a wall-clock time and a caller-supplied suffix source
    /// (a signature or hash). The suffix is truncated to 24 bytes, or
    /// zero-padded when shorter.
    pub fn new(clock_time: SystemTime, suffix_source: &[u8]) -> Result<Self> {
        if suffix_source.is_empty() {
            return Err(TxError::InvalidInput(
                "tid suffix source must not be empty".to_string(),
            ));
        }

        let since_epoch = clock_time.duration_since(UNIX_EPOCH).map_err(|_| {
            TxError::InvalidInput("clock time precedes the unix epoch".to_string())
        })?;
        let secs = since_epoch.as_secs();
        if secs > MAX_UNIX_SECS {
            return Err(TxError::InvalidInput(format!(
                "clock time {secs}s exceeds the 48-bit tid range"
            )));
        }
        let fraction = ((u64::from(since_epoch.subsec_nanos()) << 16) / 1_000_000_000) as u16;

        let mut bytes = [0u8; TID_SIZE];
        bytes[0..6].copy_from_slice(&secs.to_be_bytes()[2..8]);
        bytes[6..8].copy_from_slice(&fraction.to_be_bytes());

        let n = suffix_source.len().min(TID_SUFFIX_SIZE);
        bytes[TID_TIMESTAMP_SIZE..TID_TIMESTAMP_SIZE + n].copy_from_slice(&suffix_source[..n]);

        Ok(Self(bytes))
    }

    /// Build a TID whose suffix is the BLAKE3 digest of `content`.
    pub fn from_content(clock_time: SystemTime, content: &[u8]) -> Result<Self> {
        let digest = blake3::hash(content);
        Self::new(clock_time, digest.as_bytes())
    }

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; TID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse raw bytes from a slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; TID_SIZE] = bytes.try_into().map_err(|_| {
            TxError::MalformedTid(format!("expected {TID_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; TID_SIZE] {
        &self.0
    }

    /// True for [`Tid::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0 == [0; TID_SIZE]
    }

    /// Encode to the 52-character string form.
    pub fn encode(&self) -> String {
        base32::encode(&self.0)
    }

    /// Decode the 52-character string form.
    pub fn decode(text: &str) -> Result<Self> {
        base32::decode::<TID_SIZE>(text)
            .map(Self)
            .map_err(TxError::MalformedTid)
    }

    /// Unix seconds of the timestamp prefix.
    pub fn unix_secs(&self) -> u64 {
        let mut secs = [0u8; 8];
        secs[2..8].copy_from_slice(&self.0[0..6]);
        u64::from_be_bytes(secs)
    }

    /// Sub-second fraction in units of 1/65536 s.
    pub fn fraction(&self) -> u16 {
        u16::from_be_bytes([self.0[6], self.0[7]])
    }

    /// Signature/hash suffix.
    pub fn suffix(&self) -> &[u8] {
        &self.0[TID_TIMESTAMP_SIZE..]
    }

    /// Wall-clock time of the timestamp prefix (for display; ordering uses bytes).
    pub fn time(&self) -> SystemTime {
        let nanos = (u64::from(self.fraction()) * 1_000_000_000) >> 16;
        UNIX_EPOCH + Duration::from_secs(self.unix_secs()) + Duration::from_nanos(nanos)
    }

    /// Pack into four 64-bit wire slots, most significant first.
    pub fn to_words(&self) -> [u64; 4] {
        let mut words = [0u64; 4];
        for (word, chunk) in words.iter_mut().zip(self.0.chunks_exact(8)) {
            *word = u64::from_be_bytes(chunk.try_into().expect("chunks_exact yields 8 bytes"));
        }
        words
    }

    /// Unpack from four 64-bit wire slots.
    pub fn from_words(words: [u64; 4]) -> Self {
        let mut bytes = [0u8; TID_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        Self(bytes)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({})", self.encode())
    }
}

impl FromStr for Tid {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
