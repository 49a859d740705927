//! Errors raised at the hypervisor boundary.
//!
//! Store and orchestration code use `anyhow`; these typed variants let the
//! poll orchestrator tell a failed connect apart from a failed pass.

use thiserror::Error;

pub type HypervisorResult<T> = std::result::Result<T, HypervisorError>;

#[derive(Error, Debug)]
pub enum HypervisorError {
    #[error("cannot reach host {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("login rejected by host {address}")]
    Authentication { address: String },

    #[error("{method} failed: {fault}")]
    Protocol { method: String, fault: String },

    #[error("unexpected response from {method}: {reason}")]
    Decode { method: String, reason: String },

    #[error("session already closed")]
    SessionClosed,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
