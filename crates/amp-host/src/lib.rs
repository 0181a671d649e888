//! Host and client roles of the amp sync protocol.
//!
//! A host authenticates clients with a four-step handshake, then serves pin
//! requests: each pin streams a cell's committed state followed by live
//! updates as transactions are committed. Outbound messages for a
//! connection go through a bounded [`Mailbox`] drained by a delivery thread.

pub mod auth;
pub mod client;
pub mod connection;
pub mod control;
pub mod directory;
pub mod error;
pub mod handshake;
pub mod host;
pub mod listener;
pub mod mailbox;
pub mod pin;
pub mod registry;

pub use auth::{
    AuthCheckpoint, ChallengeResponder, CheckpointStore, CredentialVerifier, LoginChallenge,
    LoginClaim, LoginConfig, LoginFailure, LoginMessage, LoginResponse, MemoryCheckpointStore,
    SharedSecret, StaticCredentials,
};
pub use client::{Client, ClientConfig};
pub use connection::Connection;
pub use control::{ATTR_LOGIN, ATTR_PIN_REQUEST};
pub use directory::{AllowAll, Authorizer, MemoryDirectory, TargetResolver};
pub use error::{HostError, Result};
pub use handshake::{login_client, login_host};
pub use host::{Host, HostConfig};
pub use listener::{HostListener, ShutdownHandle};
pub use mailbox::{Mailbox, Notify};
pub use pin::{PinRequest, PinSession, PinTarget, SyncMode};
pub use registry::PinRegistry;
