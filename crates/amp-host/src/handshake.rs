//! Four-step login handshake.
//!
//! ```text
//! client                                  host
//!   │── Claim {user, device, checkpoint?} ──▶│
//!   │◀── Challenge {nonce, correlation} ─────│   (skipped for a live checkpoint)
//!   │── Response {correlation, hash} ───────▶│
//!   │◀── Checkpoint | Failed ────────────────│
//! ```
//!
//! A failed response ends the attempt; the client may start over with a new
//! claim on the same connection, up to the host's attempt limit.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use amp_tx::{ErrCode, OpStatus, TxError, TxKind, TxMsg, TxReader, TxWriter};

use crate::auth::{
    new_nonce, random_hex, AuthCheckpoint, ChallengeResponder, CheckpointStore,
    CredentialVerifier, LoginChallenge, LoginClaim, LoginConfig, LoginFailure, LoginMessage,
    LoginResponse,
};
use crate::control::{decode_payload, encode_payload_with_status, ATTR_LOGIN};
use crate::error::{HostError, Result};

const MAX_USER_ID_LEN: usize = 256;

/// Run the host side of the handshake until a checkpoint is issued.
///
/// Terminal failures are reported to the client as a `Failed` step before
/// the error is returned.
pub fn login_host<R: Read, W: Write>(
    reader: &mut TxReader<R>,
    writer: &mut TxWriter<W>,
    verifier: &dyn CredentialVerifier,
    checkpoints: &dyn CheckpointStore,
    config: &LoginConfig,
) -> Result<AuthCheckpoint> {
    let mut failures = 0u32;

    loop {
        let claim = match recv_login(reader, config.timeout)? {
            LoginMessage::Claim(claim) => claim,
            other => {
                let err = HostError::Protocol(format!(
                    "expected login claim, got {}",
                    other.step_name()
                ));
                send_failure(writer, ErrCode::BadRequest, &err.to_string())?;
                return Err(err);
            }
        };

        if claim.user_id.is_empty() || claim.user_id.len() > MAX_USER_ID_LEN {
            return fail(writer, ErrCode::LoginFailed, "invalid user id");
        }

        if let Some(token) = claim.checkpoint.as_deref() {
            if let Some(checkpoint) = checkpoints.validate(token, &claim.user_id) {
                tracing::info!(user = %claim.user_id, "login resumed from checkpoint");
                send_login(writer, &LoginMessage::Checkpoint(checkpoint.clone()))?;
                return Ok(checkpoint);
            }
            tracing::debug!(user = %claim.user_id, "checkpoint not accepted, challenging");
        }

        if !verifier.knows(&claim.user_id) {
            return fail(writer, ErrCode::LoginFailed, "unknown user");
        }

        let challenge = LoginChallenge {
            nonce: new_nonce(),
            correlation_id: random_hex(8),
        };
        send_login(writer, &LoginMessage::Challenge(challenge.clone()))?;

        let response = match recv_login(reader, config.timeout)? {
            LoginMessage::Response(response) => response,
            other => {
                return fail(
                    writer,
                    ErrCode::BadRequest,
                    &format!("expected login response, got {}", other.step_name()),
                )
            }
        };

        if response.correlation_id == challenge.correlation_id
            && verifier.verify(&claim.user_id, &challenge.nonce, &response.hash)
        {
            let checkpoint = checkpoints.issue(&claim);
            tracing::info!(
                user = %claim.user_id,
                device = %claim.device_id,
                session = %checkpoint.session_id,
                "login succeeded"
            );
            send_login(writer, &LoginMessage::Checkpoint(checkpoint.clone()))?;
            return Ok(checkpoint);
        }

        failures += 1;
        tracing::warn!(user = %claim.user_id, failures, "login challenge failed");
        if failures >= config.max_attempts {
            return fail(writer, ErrCode::AuthFailed, "too many failed attempts");
        }
        send_failure(writer, ErrCode::AuthFailed, "challenge response rejected")?;
    }
}

/// Run the client side of one handshake attempt.
///
/// A `Failed` step from the host is returned as [`HostError::Rejected`]; the
/// caller may retry on the same streams when the code is `AuthFailed`.
pub fn login_client<R: Read, W: Write>(
    reader: &mut TxReader<R>,
    writer: &mut TxWriter<W>,
    claim: &LoginClaim,
    responder: &dyn ChallengeResponder,
    config: &LoginConfig,
) -> Result<AuthCheckpoint> {
    send_login(writer, &LoginMessage::Claim(claim.clone()))?;

    let challenge = match recv_login(reader, config.timeout)? {
        LoginMessage::Checkpoint(checkpoint) => return Ok(checkpoint),
        LoginMessage::Challenge(challenge) => challenge,
        LoginMessage::Failed(failure) => return Err(rejected(failure)),
        other => {
            return Err(HostError::Protocol(format!(
                "expected challenge, got {}",
                other.step_name()
            )))
        }
    };

    tracing::debug!(correlation = %challenge.correlation_id, "answering login challenge");
    let response = LoginResponse {
        correlation_id: challenge.correlation_id,
        hash: responder.respond(&claim.user_id, &challenge.nonce),
    };
    send_login(writer, &LoginMessage::Response(response))?;

    match recv_login(reader, config.timeout)? {
        LoginMessage::Checkpoint(checkpoint) => Ok(checkpoint),
        LoginMessage::Failed(failure) => Err(rejected(failure)),
        other => Err(HostError::Protocol(format!(
            "expected checkpoint, got {}",
            other.step_name()
        ))),
    }
}

fn rejected(failure: LoginFailure) -> HostError {
    HostError::Rejected {
        code: failure.code,
        message: failure.message,
    }
}

fn fail<W: Write, T>(writer: &mut TxWriter<W>, code: ErrCode, message: &str) -> Result<T> {
    tracing::warn!(%code, message, "login failed");
    send_failure(writer, code, message)?;
    Err(HostError::rejected(code, message))
}

fn send_failure<W: Write>(writer: &mut TxWriter<W>, code: ErrCode, message: &str) -> Result<()> {
    send_login(
        writer,
        &LoginMessage::Failed(LoginFailure {
            code,
            message: message.to_string(),
        }),
    )
}

fn send_login<W: Write>(writer: &mut TxWriter<W>, msg: &LoginMessage) -> Result<()> {
    let (status, err_code) = match msg {
        LoginMessage::Checkpoint(_) => (OpStatus::Synced, ErrCode::Nil),
        LoginMessage::Failed(failure) => (OpStatus::Closed, failure.code),
        _ => (OpStatus::Syncing, ErrCode::Nil),
    };
    let tx = encode_payload_with_status(TxKind::Login, 0, ATTR_LOGIN, msg, status, err_code)?;
    writer.write_tx(&tx)?;
    Ok(())
}

fn recv_login<R: Read>(reader: &mut TxReader<R>, timeout: Duration) -> Result<LoginMessage> {
    let msg = recv_before(reader, Instant::now() + timeout, timeout)?;
    if msg.info.kind != TxKind::Login {
        return Err(HostError::Protocol(format!(
            "expected login message, got {}",
            msg.info.kind
        )));
    }
    decode_payload(&msg, ATTR_LOGIN)
}

fn recv_before<R: Read>(
    reader: &mut TxReader<R>,
    deadline: Instant,
    timeout: Duration,
) -> Result<TxMsg> {
    loop {
        if Instant::now() >= deadline {
            return Err(HostError::Timeout(timeout));
        }

        match reader.read_tx() {
            Ok(msg) => return Ok(msg),
            Err(TxError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(TxError::ConnectionClosed) => {
                return Err(HostError::Disconnected(
                    "connection closed during login".to_string(),
                ));
            }
            Err(err) => return Err(HostError::Tx(err)),
        }
    }
}
