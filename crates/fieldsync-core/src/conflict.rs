//! Conflict detection data and the resolver.
//!
//! A conflict exists when the same entity was modified locally (a still-pending
//! queue item) and remotely (a pulled delta) since the last checkpoint. The
//! resolver is a pure function of the case and the strategy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::delta::EntityVersion;
use crate::error::CoreError;
use crate::types::{EntityKey, QueueItemId};

/// How conflicts are decided for a session.
///
/// Read once at session start and never changed mid-session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictStrategy {
    /// Remote version is applied, local items are dropped untransmitted.
    #[default]
    ServerWins,
    /// Local items are pushed as an overwrite, remote version discarded.
    ClientWins,
    /// Later timestamp wins. Ties go to the remote version.
    LastWriteWins,
    /// Decision deferred to the user.
    Manual,
}

impl ConflictStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerWins => "ServerWins",
            Self::ClientWins => "ClientWins",
            Self::LastWriteWins => "LastWriteWins",
            Self::Manual => "Manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ServerWins" => Ok(Self::ServerWins),
            "ClientWins" => Ok(Self::ClientWins),
            "LastWriteWins" => Ok(Self::LastWriteWins),
            "Manual" => Ok(Self::Manual),
            other => Err(CoreError::UnknownStrategy(other.to_string())),
        }
    }
}

/// A divergence between a locally queued change and a remotely pulled change
/// for the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictCase {
    pub entity: EntityKey,
    /// Pending queue items for the entity, oldest first.
    pub local_items: Vec<QueueItemId>,
    /// State the local items would produce (the newest one).
    pub local_version: EntityVersion,
    /// State pulled from the remote.
    pub remote_version: EntityVersion,
}

impl ConflictCase {
    pub fn new(
        entity: EntityKey,
        local_items: Vec<QueueItemId>,
        local_version: EntityVersion,
        remote_version: EntityVersion,
    ) -> Self {
        Self {
            entity,
            local_items,
            local_version,
            remote_version,
        }
    }

    pub fn local_timestamp(&self) -> i64 {
        self.local_version.timestamp
    }

    pub fn remote_timestamp(&self) -> i64 {
        self.remote_version.timestamp
    }
}

/// Which side's version survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Winner {
    Local,
    Remote,
}

/// A decided conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOutcome {
    pub entity: EntityKey,
    pub winner: Winner,
    /// The version that ends up authoritative.
    pub applied_version: EntityVersion,
    /// Local queue items affected by the decision.
    pub local_items: Vec<QueueItemId>,
}

impl ResolvedOutcome {
    /// Remote wins: local items are acknowledged without transmission and the
    /// remote version is applied locally.
    pub fn remote_wins(&self) -> bool {
        self.winner == Winner::Remote
    }
}

/// Result of running the resolver on one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Resolved(ResolvedOutcome),
    /// `Manual` strategy: handed to an external decision-maker.
    Deferred(ConflictCase),
}

/// Decision supplied by the user for a deferred conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManualChoice {
    KeepLocal,
    KeepRemote,
}

/// Pure conflict resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub const fn new() -> Self {
        Self
    }

    /// Decide a conflict under `strategy`.
    ///
    /// Deterministic: the same case and strategy always give the same result.
    pub fn resolve(&self, case: &ConflictCase, strategy: ConflictStrategy) -> Resolution {
        let winner = match strategy {
            ConflictStrategy::ServerWins => Winner::Remote,
            ConflictStrategy::ClientWins => Winner::Local,
            ConflictStrategy::LastWriteWins => {
                if case.local_timestamp() > case.remote_timestamp() {
                    Winner::Local
                } else {
                    Winner::Remote
                }
            }
            ConflictStrategy::Manual => return Resolution::Deferred(case.clone()),
        };

        Resolution::Resolved(Self::outcome(case, winner))
    }

    /// Apply a manual decision to a deferred case.
    pub fn resolve_manual(&self, case: &ConflictCase, choice: ManualChoice) -> ResolvedOutcome {
        let winner = match choice {
            ManualChoice::KeepLocal => Winner::Local,
            ManualChoice::KeepRemote => Winner::Remote,
        };
        Self::outcome(case, winner)
    }

    fn outcome(case: &ConflictCase, winner: Winner) -> ResolvedOutcome {
        let applied_version = match winner {
            Winner::Local => case.local_version.clone(),
            Winner::Remote => case.remote_version.clone(),
        };
        ResolvedOutcome {
            entity: case.entity.clone(),
            winner,
            applied_version,
            local_items: case.local_items.clone(),
        }
    }
}
