//! Configuration, path templating, and backfill policy.
//!
//! This crate holds the data types and pure decision logic of the fetcher:
//! - [`config`] - The typed configuration document and its validation
//! - [`template`] - Day-format and field substitution for URLs and paths
//! - [`policy`] - The per-(datalogger, day) finished predicate
//!
//! Everything here is free of network and filesystem side effects apart from
//! reading the configuration file and environment variables.

pub mod config;
pub mod error;
pub mod policy;
pub mod template;

pub use config::{Config, Datalogger, Environment, OsEnvironment, Queue, RunLimits};
pub use error::ConfigError;
pub use policy::{FetchOutcome, finished};
pub use template::{TemplateError, resolve_out_path, resolve_url};
