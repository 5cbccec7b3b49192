#![no_std]

//! Plumbing shared by the Tidepool stream and vesting contracts.
//!
//! Neither engine holds assets directly. Custody lives in an external
//! share-accounting vault reached through [`vault::VaultClient`]; this crate
//! carries the client, the claim-right registry, two-step ownership, the hook
//! clients invoked during withdrawals, and the batch executor.

#[cfg(any(test, feature = "testutils"))]
extern crate std;

pub mod admin;
pub mod batch;
pub mod claim;
mod errors;
pub mod hooks;
pub mod vault;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use errors::Error;

/// Ledgers below which a storage entry's TTL is bumped on write.
pub const TTL_THRESHOLD: u32 = 17280;
/// Ledgers a storage entry's TTL is extended to on write.
pub const TTL_EXTEND_TO: u32 = 120960;
