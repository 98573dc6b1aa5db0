//! The transfer engine: one resumable, rate-limited retrieval per call.

use std::ffi::OsStr;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use filefetcher_core::{Datalogger, FetchOutcome};

use crate::error::FetchError;
use crate::http::{HttpClient, RequestOptions};
use crate::throttle::TokenBucket;

/// Progress is logged at most once per this interval, independent of chunk
/// cadence.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// One transfer attempt for a (datalogger, day) pair.
///
/// Implementations never abort the caller: every failure mode collapses into
/// a [`FetchOutcome`].
pub trait Transfer: Send + Sync {
    fn attempt(
        &self,
        logger: &Datalogger,
        day: NaiveDate,
    ) -> impl Future<Output = FetchOutcome> + Send;
}

pub struct TransferEngine<C: HttpClient> {
    client: C,
    /// Dedicated directory for in-flight files. When unset, temp files sit
    /// adjacent to their final path.
    tmp_dir: Option<PathBuf>,
}

impl<C: HttpClient> TransferEngine<C> {
    pub fn new(client: C, tmp_dir: Option<PathBuf>) -> Self {
        Self { client, tmp_dir }
    }

    /// Temp path for a final path: `<basename>.tmp`, deterministic so a later
    /// run can resume what an earlier run left behind.
    fn tmp_path(&self, out_path: &Path) -> PathBuf {
        let base = out_path
            .file_name()
            .unwrap_or_else(|| OsStr::new("download"));
        let tmp_name = format!("{}.tmp", base.to_string_lossy());
        match &self.tmp_dir {
            Some(dir) => dir.join(tmp_name),
            None => out_path.with_file_name(tmp_name),
        }
    }

    async fn fetch_day(
        &self,
        logger: &Datalogger,
        url: &Url,
        out_path: &Path,
        tmp_path: &Path,
    ) -> Result<(), FetchError> {
        let resume_from = if logger.partial_downloads {
            match fs::metadata(tmp_path).await {
                Ok(meta) if meta.len() > 0 => Some(meta.len()),
                _ => None,
            }
        } else {
            None
        };

        let userpwd = match &logger.userpwd {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                FetchError::Init(format!("credential variable {var} is not set"))
            })?),
            None => None,
        };

        let options = RequestOptions {
            range_start: resume_from,
            userpwd,
        };
        let response = self.client.get(url, &options).await?;

        if let Some(parent) = tmp_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let (mut file, mut written) = match resume_from {
            Some(offset) if response.resumed => {
                debug!(logger = %logger.name, offset, "resuming partial download");
                (OpenOptions::new().append(true).open(tmp_path).await?, offset)
            }
            Some(_) => {
                debug!(logger = %logger.name, "server ignored range request, starting over");
                (File::create(tmp_path).await?, 0)
            }
            None => (File::create(tmp_path).await?, 0),
        };
        let total = response.content_length.map(|len| len + written);

        let mut bucket = logger.recv_speed.map(TokenBucket::new);
        let low_speed = match (logger.low_speed_limit, logger.low_speed_time) {
            (Some(limit), Some(secs)) => Some((limit, Duration::from_secs(secs))),
            _ => None,
        };
        let mut window_start = Instant::now();
        let mut window_bytes = 0u64;
        let mut last_report = Instant::now();

        let mut body = response.body;
        loop {
            // A fully stalled stream trips the same low-speed abort as a
            // slow one.
            let next = match low_speed {
                Some((limit, window)) => {
                    match tokio::time::timeout(window, body.next()).await {
                        Ok(item) => item,
                        Err(_) => return Err(FetchError::LowSpeed { limit, window }),
                    }
                }
                None => body.next().await,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if let Some(bucket) = bucket.as_mut() {
                bucket.acquire(chunk.len()).await;
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some((limit, window)) = low_speed {
                window_bytes += chunk.len() as u64;
                let elapsed = window_start.elapsed();
                if elapsed >= window {
                    let rate = window_bytes as f64 / elapsed.as_secs_f64();
                    if rate < limit as f64 {
                        return Err(FetchError::LowSpeed { limit, window });
                    }
                    window_start = Instant::now();
                    window_bytes = 0;
                }
            }
            if last_report.elapsed() >= PROGRESS_INTERVAL {
                debug!(logger = %logger.name, bytes = written, total, "downloaded");
                last_report = Instant::now();
            }
        }
        file.flush().await?;
        drop(file);

        if let Some(parent) = out_path.parent() {
            // Tolerates the directory already existing, racing siblings
            // included.
            fs::create_dir_all(parent).await?;
        }
        fs::rename(tmp_path, out_path).await?;
        Ok(())
    }
}

impl<C: HttpClient> Transfer for TransferEngine<C> {
    async fn attempt(&self, logger: &Datalogger, day: NaiveDate) -> FetchOutcome {
        let url = match filefetcher_core::resolve_url(logger, day) {
            Ok(url) => url,
            Err(e) => {
                error!(logger = %logger.name, error = %e, "cannot resolve URL");
                return FetchOutcome::FatalFailure;
            }
        };
        let out_path = match filefetcher_core::resolve_out_path(logger, day, &url) {
            Ok(path) => path,
            Err(e) => {
                error!(logger = %logger.name, error = %e, "cannot resolve output path");
                return FetchOutcome::FatalFailure;
            }
        };

        match fs::try_exists(&out_path).await {
            Ok(true) => {
                info!(logger = %logger.name, path = %out_path.display(), "already have it");
                return FetchOutcome::AlreadyPresent;
            }
            Ok(false) => {}
            Err(e) => {
                error!(logger = %logger.name, path = %out_path.display(), error = %e,
                       "cannot probe output path");
                return FetchOutcome::FatalFailure;
            }
        }

        info!(logger = %logger.name, path = %out_path.display(), %url, "fetching");
        let tmp_path = self.tmp_path(&out_path);
        match self.fetch_day(logger, &url, &out_path, &tmp_path).await {
            Ok(()) => FetchOutcome::Fetched,
            Err(e) if e.is_transient() => {
                info!(logger = %logger.name, path = %out_path.display(), error = %e,
                      "error retrieving file");
                if !logger.partial_downloads {
                    discard(&tmp_path).await;
                }
                FetchOutcome::TransientFailure
            }
            Err(e) => {
                error!(logger = %logger.name, path = %out_path.display(), error = ?e,
                       "unexpected error retrieving file, setting this one aside");
                discard(&tmp_path).await;
                FetchOutcome::FatalFailure
            }
        }
    }
}

/// Remove a file, treating "does not exist" as a no-op.
async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cannot remove temp file"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures_util::stream;
    use tempfile::TempDir;

    use crate::http::HttpResponse;

    use super::*;

    enum Behavior {
        Ok { honor_range: bool, chunks: Vec<Bytes> },
        Err(fn() -> FetchError),
        /// Deliver the chunks, then fail the body stream.
        ErrMidStream { chunks: Vec<Bytes>, error: fn() -> FetchError },
    }

    struct MockClient {
        behavior: Behavior,
        calls: AtomicUsize,
        seen_range: Mutex<Option<Option<u64>>>,
        seen_userpwd: Mutex<Option<Option<String>>>,
    }

    impl MockClient {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
                seen_range: Mutex::new(None),
                seen_userpwd: Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpClient for MockClient {
        async fn get(
            &self,
            _url: &Url,
            options: &RequestOptions,
        ) -> Result<HttpResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_range.lock().unwrap() = Some(options.range_start);
            *self.seen_userpwd.lock().unwrap() = Some(options.userpwd.clone());
            match &self.behavior {
                Behavior::Ok { honor_range, chunks } => {
                    let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
                    let body = stream::iter(
                        chunks.clone().into_iter().map(Ok).collect::<Vec<_>>(),
                    );
                    Ok(HttpResponse {
                        resumed: *honor_range && options.range_start.is_some(),
                        content_length: Some(total),
                        body: Box::pin(body),
                    })
                }
                Behavior::Err(make) => Err(make()),
                Behavior::ErrMidStream { chunks, error } => {
                    let mut items: Vec<Result<Bytes, FetchError>> =
                        chunks.clone().into_iter().map(Ok).collect();
                    items.push(Err(error()));
                    Ok(HttpResponse {
                        resumed: false,
                        content_length: None,
                        body: Box::pin(stream::iter(items)),
                    })
                }
            }
        }
    }

    fn logger(dir: &TempDir) -> Datalogger {
        Datalogger {
            name: "AV01".to_string(),
            url: "http://av01.example.net/data/%Y%m%d.dat".to_string(),
            out_dir: dir.path().to_path_buf(),
            out_path: Some("av01-%Y%m%d.dat".to_string()),
            backfill: None,
            minimum_lookback: None,
            recv_speed: None,
            low_speed_limit: None,
            low_speed_time: None,
            userpwd: None,
            port: None,
            partial_downloads: false,
            disabled: false,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    fn out_path(dir: &TempDir) -> PathBuf {
        dir.path().join("av01-20240201.dat")
    }

    fn tmp_path(dir: &TempDir) -> PathBuf {
        dir.path().join("av01-20240201.dat.tmp")
    }

    #[tokio::test]
    async fn existing_file_short_circuits_without_network() {
        let dir = TempDir::new().unwrap();
        std::fs::write(out_path(&dir), b"old data").unwrap();

        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok { honor_range: false, chunks: vec![Bytes::from_static(b"new")] }),
            None,
        );
        let outcome = engine.attempt(&logger(&dir), day()).await;

        assert_eq!(outcome, FetchOutcome::AlreadyPresent);
        assert_eq!(engine.client.calls(), 0);
        assert_eq!(std::fs::read(out_path(&dir)).unwrap(), b"old data");
    }

    #[tokio::test]
    async fn fetch_streams_and_publishes_atomically() {
        let dir = TempDir::new().unwrap();
        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok {
                honor_range: false,
                chunks: vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")],
            }),
            None,
        );
        let outcome = engine.attempt(&logger(&dir), day()).await;

        assert_eq!(outcome, FetchOutcome::Fetched);
        assert_eq!(std::fs::read(out_path(&dir)).unwrap(), b"hello world");
        assert!(!tmp_path(&dir).exists());
    }

    #[tokio::test]
    async fn resume_appends_to_existing_partial() {
        let dir = TempDir::new().unwrap();
        std::fs::write(tmp_path(&dir), b"AB").unwrap();

        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok { honor_range: true, chunks: vec![Bytes::from_static(b"CD")] }),
            None,
        );
        let mut dl = logger(&dir);
        dl.partial_downloads = true;
        let outcome = engine.attempt(&dl, day()).await;

        assert_eq!(outcome, FetchOutcome::Fetched);
        assert_eq!(
            *engine.client.seen_range.lock().unwrap(),
            Some(Some(2)),
            "resume request must start at the partial's size"
        );
        assert_eq!(std::fs::read(out_path(&dir)).unwrap(), b"ABCD");
    }

    #[tokio::test]
    async fn ignored_range_request_starts_over() {
        let dir = TempDir::new().unwrap();
        std::fs::write(tmp_path(&dir), b"AB").unwrap();

        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok { honor_range: false, chunks: vec![Bytes::from_static(b"CD")] }),
            None,
        );
        let mut dl = logger(&dir);
        dl.partial_downloads = true;
        let outcome = engine.attempt(&dl, day()).await;

        assert_eq!(outcome, FetchOutcome::Fetched);
        assert_eq!(std::fs::read(out_path(&dir)).unwrap(), b"CD");
    }

    #[tokio::test]
    async fn no_resume_without_partial_downloads() {
        let dir = TempDir::new().unwrap();
        std::fs::write(tmp_path(&dir), b"AB").unwrap();

        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok { honor_range: true, chunks: vec![Bytes::from_static(b"CD")] }),
            None,
        );
        let outcome = engine.attempt(&logger(&dir), day()).await;

        assert_eq!(outcome, FetchOutcome::Fetched);
        assert_eq!(*engine.client.seen_range.lock().unwrap(), Some(None));
        assert_eq!(std::fs::read(out_path(&dir)).unwrap(), b"CD");
    }

    #[tokio::test]
    async fn transient_failure_preserves_partial_for_resume() {
        let dir = TempDir::new().unwrap();
        std::fs::write(tmp_path(&dir), b"AB").unwrap();

        let engine = TransferEngine::new(
            MockClient::new(Behavior::Err(|| FetchError::Timeout)),
            None,
        );
        let mut dl = logger(&dir);
        dl.partial_downloads = true;
        let outcome = engine.attempt(&dl, day()).await;

        assert_eq!(outcome, FetchOutcome::TransientFailure);
        assert_eq!(std::fs::read(tmp_path(&dir)).unwrap(), b"AB");
        assert!(!out_path(&dir).exists());
    }

    #[tokio::test]
    async fn transient_failure_discards_temp_when_partials_disallowed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(tmp_path(&dir), b"AB").unwrap();

        let engine = TransferEngine::new(
            MockClient::new(Behavior::Err(|| {
                FetchError::ConnectionFailed("refused".into())
            })),
            None,
        );
        let outcome = engine.attempt(&logger(&dir), day()).await;

        assert_eq!(outcome, FetchOutcome::TransientFailure);
        assert!(!tmp_path(&dir).exists());
    }

    #[tokio::test]
    async fn fatal_failure_discards_temp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(tmp_path(&dir), b"AB").unwrap();

        let engine = TransferEngine::new(
            MockClient::new(Behavior::Err(|| FetchError::HttpStatus(500))),
            None,
        );
        let mut dl = logger(&dir);
        dl.partial_downloads = true;
        let outcome = engine.attempt(&dl, day()).await;

        assert_eq!(outcome, FetchOutcome::FatalFailure);
        assert!(!tmp_path(&dir).exists());
    }

    #[tokio::test]
    async fn dedicated_tmp_dir_holds_the_partial_after_a_transient_failure() {
        let dir = TempDir::new().unwrap();
        let tmp = TempDir::new().unwrap();
        let engine = TransferEngine::new(
            MockClient::new(Behavior::ErrMidStream {
                chunks: vec![Bytes::from_static(b"da")],
                error: || FetchError::Timeout,
            }),
            Some(tmp.path().to_path_buf()),
        );
        let mut dl = logger(&dir);
        dl.partial_downloads = true;
        let outcome = engine.attempt(&dl, day()).await;

        assert_eq!(outcome, FetchOutcome::TransientFailure);
        assert!(
            tmp.path().join("av01-20240201.dat.tmp").exists(),
            "staging file lives in the dedicated dir"
        );
        assert!(
            !dir.path().join("av01-20240201.dat.tmp").exists(),
            "nothing is staged next to the final path"
        );
        assert!(!out_path(&dir).exists());
    }

    #[tokio::test]
    async fn parent_directories_are_created_on_publish() {
        let dir = TempDir::new().unwrap();
        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok { honor_range: false, chunks: vec![Bytes::from_static(b"x")] }),
            None,
        );
        let mut dl = logger(&dir);
        dl.out_path = Some("nested/%Y/%m/av01.dat".to_string());
        let outcome = engine.attempt(&dl, day()).await;

        assert_eq!(outcome, FetchOutcome::Fetched);
        assert!(dir.path().join("nested/2024/02/av01.dat").exists());
    }

    #[tokio::test]
    async fn credentials_come_from_the_environment() {
        let dir = TempDir::new().unwrap();
        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok { honor_range: false, chunks: vec![Bytes::from_static(b"x")] }),
            None,
        );
        let mut dl = logger(&dir);
        dl.userpwd = Some("FF_TEST_CREDS_ENGINE".to_string());
        unsafe { std::env::set_var("FF_TEST_CREDS_ENGINE", "user:pass") };

        let outcome = engine.attempt(&dl, day()).await;
        assert_eq!(outcome, FetchOutcome::Fetched);
        assert_eq!(
            *engine.client.seen_userpwd.lock().unwrap(),
            Some(Some("user:pass".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_credential_binding_is_transient_init_failure() {
        let dir = TempDir::new().unwrap();
        let engine = TransferEngine::new(
            MockClient::new(Behavior::Ok { honor_range: false, chunks: vec![Bytes::from_static(b"x")] }),
            None,
        );
        let mut dl = logger(&dir);
        dl.userpwd = Some("FF_TEST_CREDS_UNSET".to_string());

        let outcome = engine.attempt(&dl, day()).await;
        assert_eq!(outcome, FetchOutcome::TransientFailure);
        assert_eq!(engine.client.calls(), 0);
    }

    #[tokio::test]
    async fn low_speed_abort_is_transient() {
        let dir = TempDir::new().unwrap();
        // A body stream that never yields: the read timeout must fire.
        struct StallClient;
        impl HttpClient for StallClient {
            async fn get(
                &self,
                _url: &Url,
                _options: &RequestOptions,
            ) -> Result<HttpResponse, FetchError> {
                Ok(HttpResponse {
                    resumed: false,
                    content_length: None,
                    body: Box::pin(stream::pending()),
                })
            }
        }

        let engine = TransferEngine::new(StallClient, None);
        let mut dl = logger(&dir);
        dl.partial_downloads = true;
        dl.low_speed_limit = Some(100);
        dl.low_speed_time = Some(1);

        let outcome = engine.attempt(&dl, day()).await;
        assert_eq!(outcome, FetchOutcome::TransientFailure);
        assert!(!out_path(&dir).exists());
    }
}
