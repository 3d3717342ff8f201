//! Selector error types.

/// Convenience alias for selector operations.
pub type SelectorResult<T> = Result<T, SelectorError>;

/// Errors surfaced by slate selection.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    /// The candidate pool cannot fill a slate under the policy constraints.
    /// The cycle must not open; padding is never an option.
    #[error("only {eligible} of {required} fixtures available for the slate")]
    InsufficientFixtures {
        /// Candidates that survived the policy constraints.
        eligible: usize,
        /// Slate size that had to be reached.
        required: usize,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] fixture_store::StoreError),
}
