//! Login message types and credential collaborators.
//!
//! The credential backend itself is external; the traits here are the seams
//! the handshake calls through. [`SharedSecret`], [`StaticCredentials`] and
//! [`MemoryCheckpointStore`] are in-memory reference implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use amp_tx::{ErrCode, TagId};
use data_encoding::HEXLOWER;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of the random challenge nonce in bytes.
pub const NONCE_SIZE: usize = 32;

const RESPONSE_CONTEXT: &str = "amp 2024 login challenge response";

/// Step 1: client identifies itself.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginClaim {
    pub user_id: String,
    pub host_address: String,
    pub device_id: String,
    pub device_label: String,
    /// Token from a prior [`AuthCheckpoint`]; redacted in debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}

impl LoginClaim {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            host_address: String::new(),
            device_id: String::new(),
            device_label: String::new(),
            checkpoint: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>, label: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self.device_label = label.into();
        self
    }

    pub fn with_checkpoint(mut self, token: impl Into<String>) -> Self {
        self.checkpoint = Some(token.into());
        self
    }
}

/// Step 2: host challenges the claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginChallenge {
    /// Lowercase hex of [`NONCE_SIZE`] random bytes.
    pub nonce: String,
    /// Per-attempt correlation id echoed in the response.
    pub correlation_id: String,
}

/// Step 3: client answers the challenge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub correlation_id: String,
    pub hash: String,
}

/// Step 4 (success): session credential.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthCheckpoint {
    /// Bearer token for fast re-authentication; redacted in debug output.
    pub token: String,
    pub session_id: String,
    pub member_id: String,
    pub home_feed: String,
    pub user_id: String,
}

/// Step 4 (failure).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginFailure {
    pub code: ErrCode,
    pub message: String,
}

/// One handshake step on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum LoginMessage {
    Claim(LoginClaim),
    Challenge(LoginChallenge),
    Response(LoginResponse),
    Checkpoint(AuthCheckpoint),
    Failed(LoginFailure),
}

impl LoginMessage {
    pub fn step_name(&self) -> &'static str {
        match self {
            LoginMessage::Claim(_) => "claim",
            LoginMessage::Challenge(_) => "challenge",
            LoginMessage::Response(_) => "response",
            LoginMessage::Checkpoint(_) => "checkpoint",
            LoginMessage::Failed(_) => "failed",
        }
    }
}

impl fmt::Debug for LoginClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("LoginClaim");
        dbg.field("user_id", &self.user_id)
            .field("host_address", &self.host_address)
            .field("device_id", &self.device_id)
            .field("device_label", &self.device_label);
        if let Some(token) = &self.checkpoint {
            dbg.field(
                "checkpoint",
                &format_args!("<redacted:{} bytes>", token.len()),
            );
        } else {
            dbg.field("checkpoint", &Option::<String>::None);
        }
        dbg.finish()
    }
}

impl fmt::Debug for AuthCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCheckpoint")
            .field(
                "token",
                &format_args!("<redacted:{} bytes>", self.token.len()),
            )
            .field("session_id", &self.session_id)
            .field("member_id", &self.member_id)
            .field("home_feed", &self.home_feed)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Handshake limits.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Bound on each blocking handshake step.
    pub timeout: Duration,
    /// Failed challenge responses tolerated before the host gives up.
    pub max_attempts: u32,
    /// Data segment ceiling while unauthenticated.
    pub max_payload: usize,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            max_payload: 16 * 1024,
        }
    }
}

/// Client side: answers a challenge.
pub trait ChallengeResponder: Send + Sync {
    fn respond(&self, user_id: &str, nonce: &str) -> String;
}

/// Host side: knows users and checks challenge responses.
pub trait CredentialVerifier: Send + Sync {
    fn knows(&self, user_id: &str) -> bool;
    fn verify(&self, user_id: &str, nonce: &str, response: &str) -> bool;
}

/// Host side: issues and validates checkpoint tokens.
pub trait CheckpointStore: Send + Sync {
    fn issue(&self, claim: &LoginClaim) -> AuthCheckpoint;
    /// The checkpoint for `token` if it is live and belongs to `user_id`.
    fn validate(&self, token: &str, user_id: &str) -> Option<AuthCheckpoint>;
    /// Returns `true` if the token was live.
    fn revoke(&self, token: &str) -> bool;
}

/// Challenge response keyed by a per-user shared secret.
///
/// The response is the hex BLAKE3 keyed hash of `nonce || user_id`, keyed by
/// a key derived from the secret.
pub struct SharedSecret {
    key: [u8; 32],
}

impl SharedSecret {
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(RESPONSE_CONTEXT, secret.as_bytes()),
        }
    }

    fn digest(&self, user_id: &str, nonce: &str) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(nonce.as_bytes());
        hasher.update(user_id.as_bytes());
        hasher.finalize()
    }
}

impl ChallengeResponder for SharedSecret {
    fn respond(&self, user_id: &str, nonce: &str) -> String {
        self.digest(user_id, nonce).to_hex().to_string()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Fixed user table verified with [`SharedSecret`] derivation.
#[derive(Default)]
pub struct StaticCredentials {
    users: HashMap<String, SharedSecret>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, secret: &str) -> Self {
        self.users.insert(user_id.into(), SharedSecret::new(secret));
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialVerifier for StaticCredentials {
    fn knows(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    fn verify(&self, user_id: &str, nonce: &str, response: &str) -> bool {
        let Some(secret) = self.users.get(user_id) else {
            return false;
        };
        let Ok(given) = blake3::Hash::from_hex(response) else {
            return false;
        };
        // blake3::Hash equality is constant-time.
        secret.digest(user_id, nonce) == given
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&String> = self.users.keys().collect();
        users.sort();
        f.debug_struct("StaticCredentials")
            .field("users", &users)
            .finish()
    }
}

/// In-memory checkpoint table.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    live: RwLock<HashMap<String, AuthCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, AuthCheckpoint>> {
        self.live.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, AuthCheckpoint>> {
        self.live.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn issue(&self, claim: &LoginClaim) -> AuthCheckpoint {
        let checkpoint = AuthCheckpoint {
            token: random_hex(32),
            session_id: random_hex(8),
            member_id: TagId::from_name(&claim.user_id).encode(),
            home_feed: TagId::from_name(&format!("{}/home", claim.user_id)).encode(),
            user_id: claim.user_id.clone(),
        };
        self.write().insert(checkpoint.token.clone(), checkpoint.clone());
        checkpoint
    }

    fn validate(&self, token: &str, user_id: &str) -> Option<AuthCheckpoint> {
        self.read()
            .get(token)
            .filter(|checkpoint| checkpoint.user_id == user_id)
            .cloned()
    }

    fn revoke(&self, token: &str) -> bool {
        self.write().remove(token).is_some()
    }
}

impl fmt::Debug for MemoryCheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCheckpointStore")
            .field("live", &self.len())
            .finish()
    }
}

/// Lowercase hex of `len` random bytes.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// A fresh challenge nonce.
pub fn new_nonce() -> String {
    random_hex(NONCE_SIZE)
}
