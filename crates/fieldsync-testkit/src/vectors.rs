//! Conflict-resolution decision vectors.
//!
//! Every client of the same backend must pick the same winner for the same
//! conflict, or devices would disagree after a sync. These vectors pin the
//! decision table and can be exported as JSON for other implementations.

use fieldsync_core::{
    ConflictCase, ConflictResolver, ConflictStrategy, EntityKey, EntityVersion, Operation,
    QueueItemId, Resolution, Winner,
};
use serde::Serialize;

/// Expected result of resolving a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Expected {
    Local,
    Remote,
    Deferred,
}

/// A conflict with its expected resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub strategy: ConflictStrategy,
    /// Local edit time (Unix ms).
    pub local_timestamp: i64,
    /// Remote edit time (Unix ms).
    pub remote_timestamp: i64,
    pub local_operation: Operation,
    pub remote_operation: Operation,
    pub expected: Expected,
}

impl ResolutionVector {
    /// The conflict case this vector describes, for `Job#7`.
    pub fn case(&self) -> ConflictCase {
        ConflictCase::new(
            EntityKey::new("Job", "7"),
            vec![QueueItemId::new(1)],
            EntityVersion::new(self.local_operation, "local", self.local_timestamp),
            EntityVersion::new(self.remote_operation, "remote", self.remote_timestamp),
        )
    }

    /// Resolve the case and classify the result.
    pub fn evaluate(&self) -> Expected {
        match ConflictResolver::new().resolve(&self.case(), self.strategy) {
            Resolution::Resolved(outcome) => match outcome.winner {
                Winner::Local => Expected::Local,
                Winner::Remote => Expected::Remote,
            },
            Resolution::Deferred(_) => Expected::Deferred,
        }
    }
}

const T1: i64 = 1_768_392_000_000; // 2026-01-14T12:00:00Z
const T2: i64 = T1 + 60_000;

fn vector(
    name: &'static str,
    strategy: ConflictStrategy,
    local_timestamp: i64,
    remote_timestamp: i64,
    expected: Expected,
) -> ResolutionVector {
    ResolutionVector {
        name,
        strategy,
        local_timestamp,
        remote_timestamp,
        local_operation: Operation::Update,
        remote_operation: Operation::Update,
        expected,
    }
}

/// Get all decision vectors.
pub fn all_vectors() -> Vec<ResolutionVector> {
    use ConflictStrategy::*;

    vec![
        vector("server wins over newer local", ServerWins, T2, T1, Expected::Remote),
        vector("server wins over older local", ServerWins, T1, T2, Expected::Remote),
        vector("client wins over newer remote", ClientWins, T1, T2, Expected::Local),
        vector("client wins over older remote", ClientWins, T2, T1, Expected::Local),
        vector("lww newer remote", LastWriteWins, T1, T2, Expected::Remote),
        vector("lww newer local", LastWriteWins, T2, T1, Expected::Local),
        vector("lww tie favors remote", LastWriteWins, T1, T1, Expected::Remote),
        vector("lww one ms newer local", LastWriteWins, T1 + 1, T1, Expected::Local),
        vector("manual defers", Manual, T1, T2, Expected::Deferred),
        vector("manual defers on tie", Manual, T1, T1, Expected::Deferred),
        ResolutionVector {
            local_operation: Operation::Delete,
            ..vector("lww local delete newer", LastWriteWins, T2, T1, Expected::Local)
        },
        ResolutionVector {
            remote_operation: Operation::Delete,
            ..vector("server delete wins", ServerWins, T2, T1, Expected::Remote)
        },
    ]
}

/// Evaluate every vector: `(name, matches)`.
pub fn verify_all_vectors() -> Vec<(String, bool)> {
    all_vectors()
        .iter()
        .map(|v| (v.name.to_string(), v.evaluate() == v.expected))
        .collect()
}

/// The vectors as pretty JSON.
pub fn vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&all_vectors())
}
