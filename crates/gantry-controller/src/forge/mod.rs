//! Source-forge client capability set.
//!
//! The reconciler touches the forge for exactly one thing: fetching
//! the changed files of a pull request so follow-on jobs with a
//! change-set filter can decide whether to run. The production client
//! exposes far more (statuses, comments); this trait covers only what
//! the reconciler consumes, so a fake is a few lines.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single changed file in a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestChange {
    /// Repository-relative path of the changed file.
    pub filename: String,
}

impl PullRequestChange {
    /// Creates a change entry for the given path.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}

/// Errors returned by forge operations.
///
/// All forge failures are transient from the reconciler's point of
/// view: the affected follow-on is simply not created this tick and
/// the error is surfaced for retry.
#[derive(Debug, thiserror::Error)]
#[error("forge request failed: {message}")]
pub struct ForgeError {
    /// Description of the failure.
    pub message: String,
    /// The underlying cause, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ForgeError {
    /// Creates a forge error without an underlying cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias for forge operations.
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

/// The source-forge operations the reconciler consumes.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Fetches the changed files of a pull request.
    async fn get_pull_request_changes(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> ForgeResult<Vec<PullRequestChange>>;
}
