//! Unique-ID generation for minted names.
//!
//! Pod names and materialized follow-on record names both embed a
//! fresh unique ID. Generation is behind a trait so tests can pin the
//! suffix.

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

/// Generates unique identifiers for minted names.
///
/// Implementations must be safe to call from concurrent fan-out
/// workers.
pub trait IdGenerator: Send + Sync {
    /// Returns a fresh unique identifier.
    fn next_id(&self) -> String;
}

/// ULID-backed generator.
///
/// ULIDs are lexicographically sortable by creation time and globally
/// unique without coordination, so minted pod names sort naturally in
/// orchestrator listings.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidIdGenerator;

impl IdGenerator for UlidIdGenerator {
    fn next_id(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }
}

/// Counter-backed generator for deterministic tests.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    next: AtomicU64,
}

impl SequenceIdGenerator {
    /// Creates a generator counting up from zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> String {
        format!("{:04}", self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_ids_are_unique() {
        let generator = UlidIdGenerator;
        let a = generator.next_id();
        let b = generator.next_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn sequence_ids_are_deterministic() {
        let generator = SequenceIdGenerator::new();
        assert_eq!(generator.next_id(), "0000");
        assert_eq!(generator.next_id(), "0001");
    }
}
