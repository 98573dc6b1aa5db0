//! Resumable, rate-limited HTTP retrieval with atomic placement.
//!
//! One [`TransferEngine::attempt`] call retrieves a single (datalogger, day)
//! file: it resolves the day-specific URL and output path, short-circuits when
//! the file is already on disk, streams into a temp file (resuming a previous
//! partial via a byte-range request when allowed), and atomically renames the
//! temp into place. Failures are classified by an explicit transient/fatal
//! table in [`error`]; the engine never aborts the caller, it reports a
//! [`FetchOutcome`](filefetcher_core::FetchOutcome).
//!
//! The HTTP side sits behind the [`HttpClient`] trait so tests can drive the
//! engine with scripted responses.

mod engine;
mod error;
mod http;
mod throttle;

pub use engine::{Transfer, TransferEngine};
pub use error::FetchError;
pub use http::{BoxStream, HttpClient, HttpResponse, ReqwestClient, RequestOptions};
pub use throttle::TokenBucket;
