use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Value sent in the `User-Agent` header of every feed request.
pub const USER_AGENT: &str = "gator";

/// Failures of a single feed fetch. Each variant keeps the underlying cause.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be built, usually a malformed URL
    #[error("creating request: {0}")]
    Request(#[source] reqwest::Error),
    /// DNS, connect, TLS or other network-level failure
    #[error("fetching feed: {0}")]
    Transport(#[source] reqwest::Error),
    /// Anything other than 200 OK
    #[error("bad response status: {0}")]
    Status(StatusCode),
    #[error("reading response: {0}")]
    Body(#[source] reqwest::Error),
    #[error("deadline exceeded")]
    Timeout,
    #[error("fetch cancelled")]
    Cancelled,
}

/// Deadline and cancellation signal for one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl FetchContext {
    /// No deadline, never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Token shared by every clone of this context.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Request)?;

        Ok(Self { client })
    }

    /// GET `url` once and return the whole body.
    ///
    /// Fails fast if `ctx` is already cancelled or past its deadline. No
    /// retries are attempted.
    pub async fn fetch(&self, ctx: &FetchContext, url: &str) -> Result<Vec<u8>, FetchError> {
        if ctx.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        info!(url, "Fetching feed");
        let work = self.fetch_once(url);

        let result = match ctx.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Err(FetchError::Cancelled),
                    res = tokio::time::timeout_at(deadline, work) => {
                        res.unwrap_or(Err(FetchError::Timeout))
                    }
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Err(FetchError::Cancelled),
                    res = work => res,
                }
            }
        };

        if let Err(e) = &result {
            warn!(url, error = %e, "Feed fetch failed");
        }
        result
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request = self
            .client
            .get(url)
            .build()
            .map_err(FetchError::Request)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await.map_err(FetchError::Body)?;
        debug!(url, len = bytes.len(), "Feed body received");
        Ok(bytes.to_vec())
    }
}
