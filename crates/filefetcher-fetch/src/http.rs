//! Asynchronous HTTP client abstraction.
//!
//! The engine only needs one operation: a streamed GET that can carry a
//! byte-range resume offset and basic-auth credentials. [`ReqwestClient`] is
//! the production implementation; tests substitute scripted mocks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use url::Url;

use crate::error::FetchError;

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for a single request.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Resume offset; sent as `Range: bytes=<offset>-`.
    pub range_start: Option<u64>,
    /// `user:pass` credential, applied as HTTP basic auth. Must never be
    /// written to logs.
    pub userpwd: Option<String>,
}

// Manual impl keeps the credential out of any formatted output.
impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("range_start", &self.range_start)
            .field("userpwd", &self.userpwd.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub struct HttpResponse {
    /// The server honored the byte-range request (206 Partial Content).
    /// When false the body is the whole file from byte zero.
    pub resumed: bool,
    /// Content-Length of this response body, if the server sent one.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

pub trait HttpClient: Send + Sync {
    /// Open a streaming GET.
    ///
    /// Error-status responses are mapped into [`FetchError`] here so the
    /// engine sees one error taxonomy regardless of transport.
    fn get(
        &self,
        url: &Url,
        options: &RequestOptions,
    ) -> impl Future<Output = Result<HttpResponse, FetchError>> + Send;
}

/// Production HTTP client backed by `reqwest`.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    async fn get(&self, url: &Url, options: &RequestOptions) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(offset) = options.range_start {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }
        if let Some(userpwd) = &options.userpwd {
            let (user, pass) = userpwd
                .split_once(':')
                .unwrap_or((userpwd.as_str(), ""));
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::RemoteNotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let resumed = status == reqwest::StatusCode::PARTIAL_CONTENT;
        let content_length = response.content_length();
        let body = response.bytes_stream().map(|chunk| chunk.map_err(FetchError::from));
        Ok(HttpResponse {
            resumed,
            content_length,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_the_credential() {
        let options = RequestOptions {
            range_start: Some(128),
            userpwd: Some("alice:hunter2".to_string()),
        };
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("alice"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("128"));
    }
}
