//! Coordinator error types.

use services_common::CycleId;

/// Convenience alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A mandatory environment variable is absent.
    #[error("missing configuration: {key}")]
    ConfigMissing {
        /// Variable that must be set.
        key: &'static str,
    },

    /// A configuration value could not be parsed.
    #[error("invalid configuration {key}: {reason}")]
    ConfigInvalid {
        /// Variable that failed to parse.
        key: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The persisted cycle history runs ahead of the contract, which means
    /// this process is pointed at the wrong contract or the wrong database.
    #[error("store knows cycle {store_cycle} but contract reports {chain_cycle}")]
    ContractMismatch {
        /// Highest cycle id in the store.
        store_cycle: CycleId,
        /// Highest cycle id the contract has started.
        chain_cycle: CycleId,
    },

    /// A chain event referenced a cycle this store has never created.
    #[error("event for unknown cycle {cycle_id}")]
    UnknownCycle {
        /// Cycle the event named.
        cycle_id: CycleId,
    },

    /// `verify` found the store and the contract telling different stories.
    #[error("cycle {cycle_id} diverges from the contract in {count} place(s)")]
    Diverged {
        /// Cycle that was checked.
        cycle_id: CycleId,
        /// Number of mismatched facts.
        count: u32,
    },

    /// Chain interaction failure.
    #[error(transparent)]
    Gateway(#[from] chain_gateway::GatewayError),

    /// Slate selection failure.
    #[error(transparent)]
    Selector(#[from] match_selector::SelectorError),

    /// Results feed failure.
    #[error(transparent)]
    Collector(#[from] results_collector::CollectorError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] fixture_store::StoreError),

    /// Metrics registry failure.
    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Scoring or projection failure.
    #[error(transparent)]
    Projector(#[from] projector::ProjectorError),
}
