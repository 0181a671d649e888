//! Time-ordered transaction log synchronization.
//!
//! amp streams committed cell mutations from a host to subscribed clients.
//! Every transaction carries a time-sortable, content-derived TID and travels
//! in a compact binary frame.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and local byte streams
//! - [`tx`]: TIDs, tag ids, ops and TxMsg framing
//! - [`host`]: login handshake, pins, mailbox delivery, host and client (behind `host` feature)

/// Re-export transport types.
pub mod transport {
    pub use amp_transport::*;
}

/// Re-export transaction types.
pub mod tx {
    pub use amp_tx::*;
}

/// Re-export host and client types (requires `host` feature).
#[cfg(feature = "host")]
pub mod host {
    pub use amp_host::*;
}
