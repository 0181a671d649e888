//! JSON control payloads carried inside transactions.
//!
//! Control messages (login steps, pin requests) travel as a [`TxMsg`] with a
//! single [`TxOp::MetaAttr`] whose value is a JSON document in the data
//! segment. The attribute names which payload type it is.

use amp_tx::{ErrCode, OpStatus, TagId, TxKind, TxMsg, TxOp};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{HostError, Result};

/// Attribute carrying a login step.
pub const ATTR_LOGIN: &str = "amp.login";
/// Attribute carrying a pin request.
pub const ATTR_PIN_REQUEST: &str = "amp.pin";

/// Build a control message of `kind` whose payload is `value` as JSON.
pub fn encode_payload<T: Serialize>(
    kind: TxKind,
    context_id: u64,
    attr: &str,
    value: &T,
) -> Result<TxMsg> {
    encode_payload_with_status(kind, context_id, attr, value, OpStatus::NotStarted, ErrCode::Nil)
}

/// Like [`encode_payload`] with explicit status and error code.
pub fn encode_payload_with_status<T: Serialize>(
    kind: TxKind,
    context_id: u64,
    attr: &str,
    value: &T,
    status: OpStatus,
    err_code: ErrCode,
) -> Result<TxMsg> {
    let json = serde_json::to_vec(value)?;
    let mut builder = TxMsg::builder(kind)
        .context_id(context_id)
        .status(status)
        .err_code(err_code);
    let value = builder.push_value(&json);
    builder.push_op(TxOp::MetaAttr {
        target: TagId::NIL,
        attr: TagId::from_name(attr),
        value,
    });
    Ok(builder.build())
}

/// Extract the JSON payload of a control message.
///
/// The message must hold exactly one `MetaAttr` op for `attr`.
pub fn decode_payload<T: DeserializeOwned>(msg: &TxMsg, attr: &str) -> Result<T> {
    let [TxOp::MetaAttr {
        attr: found, value, ..
    }] = msg.ops.as_slice()
    else {
        return Err(HostError::rejected(
            ErrCode::BadRequest,
            format!("{} message must carry one meta attr", msg.info.kind),
        ));
    };
    if *found != TagId::from_name(attr) {
        return Err(HostError::rejected(
            ErrCode::AttrNotFound,
            format!("expected '{attr}' payload"),
        ));
    }
    let bytes = msg.value(*value).ok_or_else(|| {
        HostError::rejected(ErrCode::MalformedTx, "payload outside data segment")
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}
