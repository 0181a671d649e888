//! Transaction operations.
//!
//! Each op is written as:
//!
//! ```text
//! ┌──────────┬────────────┬──────────────────────────────┐
//! │ Opcode   │ Slot count │ Slots                        │
//! │ (1B)     │ (1B)       │ (count × 8B, u64 LE each)    │
//! └──────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! Slots are positional per opcode. Identifiers take three slots
//! (`hi, mid, lo`), a data reference takes two (`offset, len`).

use bytes::BufMut;

use crate::error::{Result, TxError};
use crate::tag::TagId;

/// Maximum number of 64-bit slots a single op may carry.
pub const MAX_FIELDS: usize = 24;

/// Largest encoded size of one op.
pub const MAX_OP_WIRE_SIZE: usize = 2 + 8 * MAX_FIELDS;

/// Identifies a cell.
pub type CellId = TagId;
/// Identifies an attribute of a cell.
pub type AttrId = TagId;
/// Position of a value within an attribute series.
pub type SeriesIndex = TagId;

/// Operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    NoOp = 0,
    MetaAttr = 1,
    UpsertAttr = 2,
    DeleteAttr = 3,
    DeleteCell = 4,
    UpsertLink = 5,
    DeleteLink = 6,
}

impl OpCode {
    /// Parse a wire opcode.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoOp),
            1 => Some(Self::MetaAttr),
            2 => Some(Self::UpsertAttr),
            3 => Some(Self::DeleteAttr),
            4 => Some(Self::DeleteCell),
            5 => Some(Self::UpsertLink),
            6 => Some(Self::DeleteLink),
            _ => None,
        }
    }

    /// Number of wire slots this opcode carries.
    pub const fn slot_count(self) -> usize {
        match self {
            Self::NoOp => 0,
            Self::MetaAttr => 8,
            Self::UpsertAttr => 12,
            Self::DeleteAttr => 9,
            Self::DeleteCell => 3,
            Self::UpsertLink => 12,
            Self::DeleteLink => 9,
        }
    }

    /// Short name for logs and CLI output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoOp => "no_op",
            Self::MetaAttr => "meta_attr",
            Self::UpsertAttr => "upsert_attr",
            Self::DeleteAttr => "delete_attr",
            Self::DeleteCell => "delete_cell",
            Self::UpsertLink => "upsert_link",
            Self::DeleteLink => "delete_link",
        }
    }
}

/// Byte range of a value within the data segment of its [`TxMsg`](crate::TxMsg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DataRef {
    pub offset: u64,
    pub len: u64,
}

impl DataRef {
    /// True when the range lies inside a data segment of `data_len` bytes.
    pub fn fits(&self, data_len: usize) -> bool {
        self.offset
            .checked_add(self.len)
            .is_some_and(|end| end <= data_len as u64)
    }
}

/// Content hash stored alongside an upserted value: the leading 8 bytes of
/// its BLAKE3 digest, big-endian.
pub fn value_hash(value: &[u8]) -> u64 {
    let digest = blake3::hash(value);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(head)
}

/// A single mutation record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxOp {
    NoOp,
    /// Metadata attribute value (not part of the cell's versioned state).
    MetaAttr {
        target: CellId,
        attr: AttrId,
        value: DataRef,
    },
    UpsertAttr {
        target: CellId,
        attr: AttrId,
        index: SeriesIndex,
        /// Content hash of the value.
        hash: u64,
        value: DataRef,
    },
    DeleteAttr {
        target: CellId,
        attr: AttrId,
        index: SeriesIndex,
    },
    DeleteCell {
        target: CellId,
    },
    UpsertLink {
        from: CellId,
        target: CellId,
        attr: AttrId,
        index: SeriesIndex,
    },
    DeleteLink {
        from: CellId,
        target: CellId,
        attr: AttrId,
    },
}

impl TxOp {
    /// The opcode of this op.
    pub fn opcode(&self) -> OpCode {
        match self {
            TxOp::NoOp => OpCode::NoOp,
            TxOp::MetaAttr { .. } => OpCode::MetaAttr,
            TxOp::UpsertAttr { .. } => OpCode::UpsertAttr,
            TxOp::DeleteAttr { .. } => OpCode::DeleteAttr,
            TxOp::DeleteCell { .. } => OpCode::DeleteCell,
            TxOp::UpsertLink { .. } => OpCode::UpsertLink,
            TxOp::DeleteLink { .. } => OpCode::DeleteLink,
        }
    }

    /// The cell this op mutates.
    pub fn target(&self) -> Option<&CellId> {
        match self {
            TxOp::NoOp => None,
            TxOp::MetaAttr { target, .. }
            | TxOp::UpsertAttr { target, .. }
            | TxOp::DeleteAttr { target, .. }
            | TxOp::DeleteCell { target }
            | TxOp::UpsertLink { target, .. }
            | TxOp::DeleteLink { target, .. } => Some(target),
        }
    }

    /// The attribute this op touches, if any.
    pub fn attr(&self) -> Option<&AttrId> {
        match self {
            TxOp::NoOp | TxOp::DeleteCell { .. } => None,
            TxOp::MetaAttr { attr, .. }
            | TxOp::UpsertAttr { attr, .. }
            | TxOp::DeleteAttr { attr, .. }
            | TxOp::UpsertLink { attr, .. }
            | TxOp::DeleteLink { attr, .. } => Some(attr),
        }
    }

    /// The value this op references in the data segment, if any.
    pub fn value(&self) -> Option<DataRef> {
        match self {
            TxOp::MetaAttr { value, .. } | TxOp::UpsertAttr { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Encoded size of this op.
    pub fn wire_size(&self) -> usize {
        2 + 8 * self.opcode().slot_count()
    }

    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        let opcode = self.opcode();
        dst.put_u8(opcode as u8);
        dst.put_u8(opcode.slot_count() as u8);

        match self {
            TxOp::NoOp => {}
            TxOp::MetaAttr {
                target,
                attr,
                value,
            } => {
                put_tag(dst, target);
                put_tag(dst, attr);
                put_ref(dst, value);
            }
            TxOp::UpsertAttr {
                target,
                attr,
                index,
                hash,
                value,
            } => {
                put_tag(dst, target);
                put_tag(dst, attr);
                put_tag(dst, index);
                dst.put_u64_le(*hash);
                put_ref(dst, value);
            }
            TxOp::DeleteAttr {
                target,
                attr,
                index,
            } => {
                put_tag(dst, target);
                put_tag(dst, attr);
                put_tag(dst, index);
            }
            TxOp::DeleteCell { target } => put_tag(dst, target),
            TxOp::UpsertLink {
                from,
                target,
                attr,
                index,
            } => {
                put_tag(dst, from);
                put_tag(dst, target);
                put_tag(dst, attr);
                put_tag(dst, index);
            }
            TxOp::DeleteLink { from, target, attr } => {
                put_tag(dst, from);
                put_tag(dst, target);
                put_tag(dst, attr);
            }
        }
    }

    /// Decode one op from the front of `src`, advancing it.
    pub(crate) fn decode(src: &mut &[u8]) -> Result<TxOp> {
        if src.len() < 2 {
            return Err(TxError::MalformedTx("truncated op header".to_string()));
        }
        let opcode = OpCode::from_u8(src[0])
            .ok_or_else(|| TxError::MalformedTx(format!("unknown opcode {}", src[0])))?;
        let count = src[1] as usize;
        if count > MAX_FIELDS {
            return Err(TxError::MalformedTx(format!(
                "op carries {count} slots (max {MAX_FIELDS})"
            )));
        }
        if count != opcode.slot_count() {
            return Err(TxError::MalformedTx(format!(
                "{} expects {} slots, got {count}",
                opcode.as_str(),
                opcode.slot_count()
            )));
        }
        let body_len = 8 * count;
        if src.len() < 2 + body_len {
            return Err(TxError::MalformedTx(format!(
                "truncated {} op",
                opcode.as_str()
            )));
        }

        let mut slots = Slots {
            bytes: &src[2..2 + body_len],
        };
        let op = match opcode {
            OpCode::NoOp => TxOp::NoOp,
            OpCode::MetaAttr => TxOp::MetaAttr {
                target: slots.tag(),
                attr: slots.tag(),
                value: slots.data_ref(),
            },
            OpCode::UpsertAttr => TxOp::UpsertAttr {
                target: slots.tag(),
                attr: slots.tag(),
                index: slots.tag(),
                hash: slots.u64(),
                value: slots.data_ref(),
            },
            OpCode::DeleteAttr => TxOp::DeleteAttr {
                target: slots.tag(),
                attr: slots.tag(),
                index: slots.tag(),
            },
            OpCode::DeleteCell => TxOp::DeleteCell {
                target: slots.tag(),
            },
            OpCode::UpsertLink => TxOp::UpsertLink {
                from: slots.tag(),
                target: slots.tag(),
                attr: slots.tag(),
                index: slots.tag(),
            },
            OpCode::DeleteLink => TxOp::DeleteLink {
                from: slots.tag(),
                target: slots.tag(),
                attr: slots.tag(),
            },
        };

        *src = &src[2 + body_len..];
        Ok(op)
    }
}

fn put_tag(dst: &mut impl BufMut, tag: &TagId) {
    for slot in tag.to_triplet() {
        dst.put_u64_le(slot);
    }
}

fn put_ref(dst: &mut impl BufMut, value: &DataRef) {
    dst.put_u64_le(value.offset);
    dst.put_u64_le(value.len);
}

/// Sequential reader over an op's slot bytes. Callers check the slot count
/// against the opcode before reading, so reads never run past the end.
struct Slots<'a> {
    bytes: &'a [u8],
}

impl Slots<'_> {
    fn u64(&mut self) -> u64 {
        let (head, rest) = self.bytes.split_at(8);
        self.bytes = rest;
        let mut word = [0u8; 8];
        word.copy_from_slice(head);
        u64::from_le_bytes(word)
    }

    fn tag(&mut self) -> TagId {
        let hi = self.u64();
        let mid = self.u64();
        let lo = self.u64();
        TagId::from_triplet([hi, mid, lo])
    }

    fn data_ref(&mut self) -> DataRef {
        let offset = self.u64();
        let len = self.u64();
        DataRef { offset, len }
    }
}
