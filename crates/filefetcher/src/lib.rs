//! Queue orchestration for the daily file fetcher.
//!
//! The binary wires a [`filefetcher_fetch::TransferEngine`] into the
//! [`sweep`] loop, one isolated worker per enabled queue under
//! [`supervisor::run_all`]. The [`lock`] module advertises the process to the
//! external reaper.

pub mod lock;
pub mod supervisor;
pub mod sweep;
