//! In-memory forge implementation for testing.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{Forge, ForgeError, ForgeResult, PullRequestChange};

/// In-memory forge for testing.
///
/// Returns one canned change list for every pull request, or a canned
/// error when one has been injected.
#[derive(Debug, Default)]
pub struct InMemoryForge {
    changes: RwLock<Vec<PullRequestChange>>,
    fail_with: RwLock<Option<String>>,
}

impl InMemoryForge {
    /// Creates a forge with no changes on any pull request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a forge that reports the given changed filenames.
    #[must_use]
    pub fn with_changes(filenames: &[&str]) -> Self {
        let forge = Self::default();
        *forge
            .changes
            .write()
            .unwrap_or_else(PoisonError::into_inner) = filenames
            .iter()
            .map(|f| PullRequestChange::new(*f))
            .collect();
        forge
    }

    /// Makes every subsequent call fail with the given message.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self
            .fail_with
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }
}

#[async_trait]
impl Forge for InMemoryForge {
    async fn get_pull_request_changes(
        &self,
        _org: &str,
        _repo: &str,
        _number: u64,
    ) -> ForgeResult<Vec<PullRequestChange>> {
        if let Some(message) = self
            .fail_with
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Err(ForgeError::new(message.clone()));
        }
        Ok(self
            .changes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
