//! Build-ID allocation.
//!
//! Every pod the controller starts carries a build number allocated by
//! an external counting service: a GET against the allocator returns
//! the next number for a job identity as a decimal ASCII body. The
//! allocator is the only component that can hand out monotonically
//! increasing numbers across controller restarts, so allocation
//! failures defer the pod start rather than falling back to a local
//! guess.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

/// Errors returned by build-ID allocation.
///
/// All allocation failures are transient: the affected record stays
/// Triggered and allocation is retried on the next tick.
#[derive(Debug, thiserror::Error)]
#[error("build-id allocation failed: {message}")]
pub struct BuildIdError {
    /// Description of the failure.
    pub message: String,
    /// The underlying cause, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BuildIdError {
    /// Creates an allocation error without an underlying cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result alias for build-ID allocation.
pub type BuildIdResult<T> = std::result::Result<T, BuildIdError>;

/// Allocates build numbers for job identities.
#[async_trait]
pub trait BuildIdAllocator: Send + Sync {
    /// Allocates the next build number for the given job identity.
    async fn allocate(&self, job: &str) -> BuildIdResult<String>;
}

/// HTTP client for the build-ID allocator service.
///
/// Vends from `{base}/vend/{job}`. The body must be a decimal number
/// in ASCII; anything else (including non-2xx statuses) is treated as
/// a transient failure.
#[derive(Debug, Clone)]
pub struct HttpBuildIdAllocator {
    client: reqwest::Client,
    base_url: String,
}

const MAX_ATTEMPTS: usize = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

impl HttpBuildIdAllocator {
    /// Creates an allocator client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> BuildIdResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BuildIdError::with_source("failed to build HTTP client", e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn vend_url(&self, job: &str) -> String {
        format!("{}/vend/{job}", self.base_url)
    }
}

/// Validates that an allocator response body is a decimal build number.
fn parse_build_id(body: &str) -> BuildIdResult<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BuildIdError::new(format!(
            "allocator returned non-decimal body {trimmed:?}"
        )));
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl BuildIdAllocator for HttpBuildIdAllocator {
    async fn allocate(&self, job: &str) -> BuildIdResult<String> {
        let url = self.vend_url(job);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = self
                .client
                .get(&url)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp
                        .text()
                        .await
                        .map_err(|e| BuildIdError::with_source("failed to read body", e))?;
                    return parse_build_id(&body);
                }
                Ok(resp) => {
                    let status = resp.status();
                    if (status.is_server_error() || status.as_u16() == 429)
                        && attempt < MAX_ATTEMPTS
                    {
                        // Exponential backoff with a small deterministic cap.
                        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                        let backoff_ms = 50_u64
                            .saturating_mul(2_u64.saturating_pow(exponent))
                            .min(500);
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        continue;
                    }
                    return Err(BuildIdError::new(format!(
                        "allocator returned status {status} for {job}"
                    )));
                }
                Err(err) => {
                    // Don't retry timeouts: failing fast avoids wedging the tick.
                    if err.is_timeout() || attempt >= MAX_ATTEMPTS {
                        return Err(BuildIdError::with_source(
                            format!("allocator request failed for {job}"),
                            err,
                        ));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

/// In-memory allocator handing out a monotonic sequence, for tests.
#[derive(Debug)]
pub struct SequenceBuildIdAllocator {
    next: AtomicU64,
}

impl Default for SequenceBuildIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceBuildIdAllocator {
    /// Creates an allocator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Creates an allocator starting at the given number.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

#[async_trait]
impl BuildIdAllocator for SequenceBuildIdAllocator {
    async fn allocate(&self, _job: &str) -> BuildIdResult<String> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst).to_string())
    }
}

/// Allocator that always fails, for exercising deferred admission.
#[derive(Debug, Default)]
pub struct FailingBuildIdAllocator;

#[async_trait]
impl BuildIdAllocator for FailingBuildIdAllocator {
    async fn allocate(&self, job: &str) -> BuildIdResult<String> {
        Err(BuildIdError::new(format!("allocator down for {job}")))
    }
}
