//! Collector error types.

use services_common::FixtureId;

/// Convenience alias for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors surfaced by the results collector.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// The provider request itself failed.
    #[error("feed request failed: {source}")]
    FeedRequest {
        /// Underlying transport error.
        #[from]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success HTTP status.
    #[error("feed returned HTTP {status}")]
    FeedStatus {
        /// Status code the provider answered with.
        status: u16,
    },

    /// The provider body could not be decoded at all.
    #[error("feed payload undecodable: {reason}")]
    FeedPayload {
        /// What failed while decoding.
        reason: String,
    },

    /// A single fixture entry failed validation.
    #[error("malformed feed entry for {fixture_id}: {field}")]
    MalformedEntry {
        /// Fixture the entry referred to.
        fixture_id: FixtureId,
        /// Field that failed validation.
        field: &'static str,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] fixture_store::StoreError),
}
