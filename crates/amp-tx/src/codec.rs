use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TxError};
use crate::op::{DataRef, TxOp, MAX_FIELDS, MAX_OP_WIRE_SIZE};
use crate::status::{ErrCode, OpStatus};
use crate::tid::{Tid, TID_SIZE};

/// Header: marker (3) + version (1) + body size (4) + data size (4) + reserved (4).
pub const HEADER_SIZE: usize = 16;

/// Info preamble: tid (32) + context id (8) + kind (1) + status (1) + err code (2) + op count (4).
pub const INFO_SIZE: usize = 48;

/// Marker bytes: "amp".
pub const MARKER: [u8; 3] = *b"amp";

/// Wire format version.
pub const VERSION: u8 = 0x33;

/// Default op capacity per transaction.
pub const MAX_OPS_PER_TX: usize = MAX_FIELDS * 256;

/// Default maximum data segment size: 16 MiB.
pub const DEFAULT_MAX_DATA_SIZE: usize = 16 * 1024 * 1024;

/// Smallest valid body: header plus info, no ops.
const MIN_BODY_SIZE: usize = HEADER_SIZE + INFO_SIZE;

/// What a transaction is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxKind {
    /// Auth handshake step.
    Login = 1,
    /// Client opens a pin.
    PinRequest = 2,
    /// Client cancels a pin.
    PinClose = 3,
    /// Host delivers state or status for a pin.
    State = 4,
    /// Client submits mutations.
    Commit = 5,
}

impl TxKind {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Login),
            2 => Some(Self::PinRequest),
            3 => Some(Self::PinClose),
            4 => Some(Self::State),
            5 => Some(Self::Commit),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::PinRequest => "pin_request",
            Self::PinClose => "pin_close",
            Self::State => "state",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed 16-byte header.
///
/// Wire format:
/// ```text
/// ┌────────────┬─────────┬─────────────┬─────────────┬────────────┐
/// │ Marker(3B) │ Version │ Body size   │ Data size   │ Reserved   │
/// │ "amp"      │ 0x33    │ (4B LE)     │ (4B LE)     │ (4B zero)  │
/// └────────────┴─────────┴─────────────┴─────────────┴────────────┘
/// ```
///
/// The body size covers the header and the op section (info + ops); the
/// data segment follows immediately after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeader {
    pub body_size: u32,
    pub data_size: u32,
}

impl TxHeader {
    /// Parse and validate the marker, version and reserved bytes.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(TxError::MalformedTx(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                src.len()
            )));
        }
        if src[0..3] != MARKER {
            return Err(TxError::MalformedTx("bad marker".to_string()));
        }
        if src[3] != VERSION {
            return Err(TxError::MalformedTx(format!(
                "unsupported version 0x{:02x}",
                src[3]
            )));
        }
        if src[12..16] != [0; 4] {
            return Err(TxError::MalformedTx("reserved header bytes set".to_string()));
        }

        let mut sizes = &src[4..12];
        Ok(Self {
            body_size: sizes.get_u32_le(),
            data_size: sizes.get_u32_le(),
        })
    }

    /// Total wire size of the message this header describes.
    pub fn total_size(&self) -> usize {
        self.body_size as usize + self.data_size as usize
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.put_slice(&MARKER);
        dst.put_u8(VERSION);
        dst.put_u32_le(self.body_size);
        dst.put_u32_le(self.data_size);
        dst.put_bytes(0, 4);
    }
}

/// Per-message control fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxInfo {
    /// Transaction id; `None` until assigned at commit. The all-zero TID is
    /// the wire form of `None` and cannot be sent as `Some`.
    pub tid: Option<Tid>,
    /// Pin request this message belongs to (0 when not pin-scoped).
    pub context_id: u64,
    pub kind: TxKind,
    pub status: OpStatus,
    pub err_code: ErrCode,
}

impl TxInfo {
    pub fn new(kind: TxKind) -> Self {
        Self {
            tid: None,
            context_id: 0,
            kind,
            status: OpStatus::NotStarted,
            err_code: ErrCode::Nil,
        }
    }
}

/// A decoded or built transaction message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMsg {
    pub info: TxInfo,
    pub ops: Vec<TxOp>,
    /// Out-of-band value bytes referenced by [`DataRef`]s in the ops.
    pub data: Bytes,
}

impl TxMsg {
    /// Start building a message of the given kind.
    pub fn builder(kind: TxKind) -> TxBuilder {
        TxBuilder::new(kind)
    }

    /// A status-only message (no ops, no data).
    pub fn status(kind: TxKind, context_id: u64, status: OpStatus, err_code: ErrCode) -> Self {
        Self {
            info: TxInfo {
                tid: None,
                context_id,
                kind,
                status,
                err_code,
            },
            ops: Vec::new(),
            data: Bytes::new(),
        }
    }

    /// Copy of this message carrying a different op list over the same data
    /// segment.
    pub fn with_ops(&self, ops: Vec<TxOp>) -> Self {
        Self {
            info: self.info,
            ops,
            data: self.data.clone(),
        }
    }

    /// Bytes a value reference points at, or `None` when out of bounds.
    pub fn value(&self, value: DataRef) -> Option<Bytes> {
        if !value.fits(self.data.len()) {
            return None;
        }
        let start = value.offset as usize;
        Some(self.data.slice(start..start + value.len as usize))
    }

    /// Size of the op section and header on the wire.
    pub fn body_size(&self) -> usize {
        MIN_BODY_SIZE + self.ops.iter().map(TxOp::wire_size).sum::<usize>()
    }

    /// Total wire size (header + op section + data).
    pub fn wire_size(&self) -> usize {
        self.body_size() + self.data.len()
    }

    /// Serialize with the default limits.
    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_tx(self, &TxConfig::default(), &mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse exactly one complete message with the default limits.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let config = TxConfig::default();
        let header = TxHeader::parse(bytes)?;
        check_header(&header, &config)?;

        let total = header.total_size();
        if bytes.len() < total {
            return Err(TxError::MalformedTx(format!(
                "declared {total} bytes, buffer holds {}",
                bytes.len()
            )));
        }
        if bytes.len() > total {
            return Err(TxError::MalformedTx(format!(
                "{} trailing bytes after message",
                bytes.len() - total
            )));
        }
        parse_message(Bytes::copy_from_slice(bytes), &header, &config)
    }
}

/// Accumulates ops and value bytes, then freezes into a [`TxMsg`].
#[derive(Debug)]
pub struct TxBuilder {
    info: TxInfo,
    ops: Vec<TxOp>,
    data: BytesMut,
}

impl TxBuilder {
    pub fn new(kind: TxKind) -> Self {
        Self {
            info: TxInfo::new(kind),
            ops: Vec::new(),
            data: BytesMut::new(),
        }
    }

    pub fn tid(mut self, tid: Tid) -> Self {
        self.info.tid = Some(tid);
        self
    }

    pub fn context_id(mut self, context_id: u64) -> Self {
        self.info.context_id = context_id;
        self
    }

    pub fn status(mut self, status: OpStatus) -> Self {
        self.info.status = status;
        self
    }

    pub fn err_code(mut self, err_code: ErrCode) -> Self {
        self.info.err_code = err_code;
        self
    }

    /// Append value bytes to the data segment.
    pub fn push_value(&mut self, value: &[u8]) -> DataRef {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(value);
        DataRef {
            offset,
            len: value.len() as u64,
        }
    }

    pub fn push_op(&mut self, op: TxOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn build(self) -> TxMsg {
        TxMsg {
            info: self.info,
            ops: self.ops,
            data: self.data.freeze(),
        }
    }
}

/// Limits and timeouts for reading and writing transactions.
#[derive(Debug, Clone)]
pub struct TxConfig {
    /// Maximum ops per message. Default: [`MAX_OPS_PER_TX`].
    pub max_ops: usize,
    /// Maximum data segment size in bytes. Default: 16 MiB.
    pub max_data_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl TxConfig {
    /// Largest body a peer may declare under these limits.
    pub fn max_body_size(&self) -> usize {
        MIN_BODY_SIZE.saturating_add(self.max_ops.saturating_mul(MAX_OP_WIRE_SIZE))
    }

    pub fn with_max_ops(mut self, max_ops: usize) -> Self {
        self.max_ops = max_ops;
        self
    }

    pub fn with_max_data_size(mut self, max_data_size: usize) -> Self {
        self.max_data_size = max_data_size;
        self
    }
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            max_ops: MAX_OPS_PER_TX,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Encode a transaction into the wire format.
pub fn encode_tx(msg: &TxMsg, config: &TxConfig, dst: &mut BytesMut) -> Result<()> {
    if msg.ops.len() > config.max_ops {
        return Err(TxError::TooManyOps {
            count: msg.ops.len(),
            max: config.max_ops,
        });
    }
    let data_max = config.max_data_size.min(u32::MAX as usize);
    if msg.data.len() > data_max {
        return Err(TxError::DataTooLarge {
            size: msg.data.len(),
            max: data_max,
        });
    }
    check_refs(&msg.ops, msg.data.len())?;
    if msg.info.tid.is_some_and(|tid| tid.is_zero()) {
        return Err(TxError::MalformedTid("zero tid is reserved for unassigned".into()));
    }

    let body_size = msg.body_size();
    let body_size = u32::try_from(body_size)
        .map_err(|_| TxError::MalformedTx(format!("body of {body_size} bytes overflows u32")))?;

    dst.reserve(msg.wire_size());
    TxHeader {
        body_size,
        data_size: msg.data.len() as u32,
    }
    .write(dst);

    let info = &msg.info;
    match &info.tid {
        Some(tid) => dst.put_slice(tid.as_bytes()),
        None => dst.put_bytes(0, TID_SIZE),
    }
    dst.put_u64_le(info.context_id);
    dst.put_u8(info.kind as u8);
    dst.put_u8(info.status as u8);
    dst.put_u16_le(info.err_code as u16);
    dst.put_u32_le(msg.ops.len() as u32);

    for op in &msg.ops {
        op.encode(dst);
    }
    dst.put_slice(&msg.data);
    Ok(())
}

/// Decode a transaction from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer. Limits are
/// checked as soon as the header is available, before waiting for the body.
pub fn decode_tx(src: &mut BytesMut, config: &TxConfig) -> Result<Option<TxMsg>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = TxHeader::parse(&src[..HEADER_SIZE])?;
    check_header(&header, config)?;

    let total = header.total_size();
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let frame = src.split_to(total).freeze();
    parse_message(frame, &header, config).map(Some)
}

fn check_header(header: &TxHeader, config: &TxConfig) -> Result<()> {
    let data_size = header.data_size as usize;
    if data_size > config.max_data_size {
        return Err(TxError::DataTooLarge {
            size: data_size,
            max: config.max_data_size,
        });
    }
    let body_size = header.body_size as usize;
    if body_size < MIN_BODY_SIZE || body_size > config.max_body_size() {
        return Err(TxError::MalformedTx(format!(
            "declared body size {body_size} outside {MIN_BODY_SIZE}..={}",
            config.max_body_size()
        )));
    }
    Ok(())
}

fn check_refs(ops: &[TxOp], data_len: usize) -> Result<()> {
    for (i, op) in ops.iter().enumerate() {
        if let Some(value) = op.value() {
            if !value.fits(data_len) {
                return Err(TxError::MalformedTx(format!(
                    "op {i} references {}..+{} outside {data_len}-byte data segment",
                    value.offset, value.len
                )));
            }
        }
    }
    Ok(())
}

/// Parse a frame whose header has already been validated and whose length
/// equals `header.total_size()`.
fn parse_message(frame: Bytes, header: &TxHeader, config: &TxConfig) -> Result<TxMsg> {
    let body_size = header.body_size as usize;
    let mut info_bytes = &frame[HEADER_SIZE..MIN_BODY_SIZE];

    let mut tid_bytes = [0u8; TID_SIZE];
    info_bytes.copy_to_slice(&mut tid_bytes);
    let tid = Tid::from_bytes(tid_bytes);
    let context_id = info_bytes.get_u64_le();
    let kind_raw = info_bytes.get_u8();
    let status_raw = info_bytes.get_u8();
    let code_raw = info_bytes.get_u16_le();
    let op_count = info_bytes.get_u32_le() as usize;

    let kind = TxKind::from_u8(kind_raw)
        .ok_or_else(|| TxError::MalformedTx(format!("unknown tx kind {kind_raw}")))?;
    let status = OpStatus::from_u8(status_raw)
        .ok_or_else(|| TxError::MalformedTx(format!("unknown op status {status_raw}")))?;
    let err_code = ErrCode::from_u16(code_raw)
        .ok_or_else(|| TxError::MalformedTx(format!("unknown error code {code_raw}")))?;

    if op_count > config.max_ops {
        return Err(TxError::TooManyOps {
            count: op_count,
            max: config.max_ops,
        });
    }

    let mut op_section = &frame[MIN_BODY_SIZE..body_size];
    let mut ops = Vec::with_capacity(op_count);
    for _ in 0..op_count {
        ops.push(TxOp::decode(&mut op_section)?);
    }
    if !op_section.is_empty() {
        return Err(TxError::MalformedTx(format!(
            "{} bytes left in op section after {op_count} ops",
            op_section.len()
        )));
    }

    let data = frame.slice(body_size..);
    check_refs(&ops, data.len())?;

    Ok(TxMsg {
        info: TxInfo {
            tid: (!tid.is_zero()).then_some(tid),
            context_id,
            kind,
            status,
            err_code,
        },
        ops,
        data,
    })
}
