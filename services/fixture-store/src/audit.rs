//! Operator-facing audit trail
//!
//! State transitions already live in `cycle_transitions`; this table is the
//! append-only record of everything an operator may need to review later:
//! failed selections, conflicting results, reverted transactions, rebuilds.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreResult;

/// Audit trail writer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    /// Database pool
    pool: PgPool,
}

/// Audit event types
#[derive(Debug, Clone, Serialize)]
pub enum AuditEvent {
    /// A new cycle row was created at selection time.
    CycleCreated {
        /// Cycle created.
        cycle_id: u64,
    },
    /// A slate was frozen for a cycle.
    SlateFrozen {
        /// Cycle frozen.
        cycle_id: u64,
        /// Fixtures in slate order.
        fixture_ids: Vec<u64>,
        /// Computed entry close time.
        closes_at: DateTime<Utc>,
    },
    /// Selection could not find ten qualifying fixtures.
    SelectionFailed {
        /// Cycle that will not open.
        cycle_id: u64,
        /// Qualifying candidates found.
        candidates: usize,
    },
    /// A result re-submission disagreed with the stored scores.
    ResultConflict {
        /// Disputed fixture.
        fixture_id: u64,
        /// Stored home goals.
        stored_home: u16,
        /// Stored away goals.
        stored_away: u16,
        /// Rejected home goals.
        reported_home: u16,
        /// Rejected away goals.
        reported_away: u16,
    },
    /// An operator cleared a disputed result.
    DisputeCleared {
        /// Fixture whose dispute was cleared.
        fixture_id: u64,
    },
    /// A retry budget ran out; the operation was abandoned until the next
    /// sweep.
    RetryExhausted {
        /// Operation that gave up.
        operation: String,
        /// Attempts consumed.
        attempts: u32,
    },
    /// The on-chain slate hash disagreed with the persisted slate.
    SlateMismatch {
        /// Affected cycle.
        cycle_id: u64,
        /// Hash computed from the persisted slate.
        expected: String,
        /// Hash carried by the chain event.
        actual: String,
    },
    /// The on-chain result hash disagreed with the persisted results.
    ResultMismatch {
        /// Affected cycle.
        cycle_id: u64,
        /// Hash computed from the persisted results.
        expected: String,
        /// Hash carried by the chain event.
        actual: String,
    },
    /// A mutating transaction reverted on-chain.
    TransactionReverted {
        /// Affected cycle.
        cycle_id: u64,
        /// Reverted transaction.
        tx_hash: String,
    },
    /// A transaction failed to confirm within its deadline.
    ConfirmationTimeout {
        /// Affected cycle.
        cycle_id: u64,
        /// Unconfirmed transaction.
        tx_hash: String,
    },
    /// A previously-seen transaction disappeared in a reorg and was
    /// re-submitted.
    ReorgDetected {
        /// Affected cycle.
        cycle_id: u64,
        /// Transaction dropped by the reorg.
        tx_hash: String,
    },
    /// A cycle entered the Cancelled terminal state.
    CycleCancelled {
        /// Cancelled cycle.
        cycle_id: u64,
        /// Why.
        reason: String,
    },
    /// A cycle is past its resolve deadline and still unresolved.
    ResolveOverdue {
        /// Overdue cycle.
        cycle_id: u64,
        /// Deadline that passed.
        deadline: DateTime<Utc>,
    },
    /// Projections were wiped and rebuilt from raw rows.
    ProjectionsRebuilt {
        /// Cycles re-evaluated.
        cycles: usize,
    },
}

impl AuditEvent {
    /// Stable type tag stored alongside the JSON payload.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::CycleCreated { .. } => "CycleCreated",
            Self::SlateFrozen { .. } => "SlateFrozen",
            Self::SelectionFailed { .. } => "SelectionFailed",
            Self::ResultConflict { .. } => "ResultConflict",
            Self::DisputeCleared { .. } => "DisputeCleared",
            Self::RetryExhausted { .. } => "RetryExhausted",
            Self::SlateMismatch { .. } => "SlateMismatch",
            Self::ResultMismatch { .. } => "ResultMismatch",
            Self::TransactionReverted { .. } => "TransactionReverted",
            Self::ConfirmationTimeout { .. } => "ConfirmationTimeout",
            Self::ReorgDetected { .. } => "ReorgDetected",
            Self::CycleCancelled { .. } => "CycleCancelled",
            Self::ResolveOverdue { .. } => "ResolveOverdue",
            Self::ProjectionsRebuilt { .. } => "ProjectionsRebuilt",
        }
    }

    /// Cycle this event belongs to, when it is cycle-scoped.
    #[must_use]
    pub const fn cycle_id(&self) -> Option<u64> {
        match self {
            Self::CycleCreated { cycle_id }
            | Self::SlateFrozen { cycle_id, .. }
            | Self::SelectionFailed { cycle_id, .. }
            | Self::SlateMismatch { cycle_id, .. }
            | Self::ResultMismatch { cycle_id, .. }
            | Self::TransactionReverted { cycle_id, .. }
            | Self::ConfirmationTimeout { cycle_id, .. }
            | Self::ReorgDetected { cycle_id, .. }
            | Self::CycleCancelled { cycle_id, .. }
            | Self::ResolveOverdue { cycle_id, .. } => Some(*cycle_id),
            Self::ResultConflict { .. }
            | Self::DisputeCleared { .. }
            | Self::RetryExhausted { .. }
            | Self::ProjectionsRebuilt { .. } => None,
        }
    }
}

impl AuditTrail {
    /// Create a new audit trail over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event.
    pub async fn log(&self, event: &AuditEvent, now: DateTime<Utc>) -> StoreResult<()> {
        let event_data = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            r"
            INSERT INTO audit_log (id, event_type, cycle_id, event_data, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(event.event_type())
        .bind(event.cycle_id().map(|id| id as i64))
        .bind(event_data)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(event_type = event.event_type(), "audit event logged");
        Ok(())
    }
}
