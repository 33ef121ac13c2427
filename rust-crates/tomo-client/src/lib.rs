//! Account-state resolution and transaction execution for tomo entities
//! living on a base ledger and, while delegated, on an ephemeral rollup.

pub mod address;
pub mod cache;
pub mod codec;
pub mod config;
pub mod delegation;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod instructions;
pub mod ledger;
pub mod local_identity;
pub mod program;
pub mod reader;
pub mod router;
pub mod secure_store;
pub mod wallet;
pub mod watch;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{
    Error,
    FailureStage,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;
