//! Transaction identifiers and TxMsg wire framing.
//!
//! Every transaction on the wire is framed as:
//! - A 16-byte header: `"amp"` marker, format version, body and data sizes
//! - An op section: a fixed [`TxInfo`] preamble followed by the ops
//! - An optional data segment holding out-of-band attribute values
//!
//! Identifiers ([`Tid`], [`TagId`]) are fixed-size byte arrays whose byte
//! order is their sort order.

mod base32;
pub mod codec;
pub mod error;
pub mod op;
pub mod reader;
pub mod status;
pub mod tag;
pub mod tid;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::TxCodec;
pub use codec::{
    decode_tx, encode_tx, TxBuilder, TxConfig, TxHeader, TxInfo, TxKind, TxMsg,
    DEFAULT_MAX_DATA_SIZE, HEADER_SIZE, INFO_SIZE, MARKER, MAX_OPS_PER_TX, VERSION,
};
pub use error::{Result, TxError};
pub use op::{value_hash, AttrId, CellId, DataRef, OpCode, SeriesIndex, TxOp, MAX_FIELDS};
pub use reader::TxReader;
pub use status::{ErrCode, OpStatus};
pub use tag::TagId;
pub use tid::Tid;
pub use writer::TxWriter;
