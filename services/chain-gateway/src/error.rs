//! Gateway error types and submission error classification.

use services_common::CommonError;

/// Convenience alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the chain gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The signing key could not be parsed.
    #[error("signer rejected the configured key: {source}")]
    Signer {
        /// Underlying signer error.
        #[from]
        source: alloy::signers::local::LocalSignerError,
    },

    /// The configured contract address could not be parsed.
    #[error("unparseable contract address {input:?}")]
    BadAddress {
        /// The rejected input.
        input: String,
    },

    /// A raw RPC interaction failed.
    #[error("rpc transport failed: {source}")]
    Transport {
        /// Underlying transport error.
        #[from]
        source: alloy::transports::TransportError,
    },

    /// A typed contract call failed.
    #[error("contract call failed: {source}")]
    Contract {
        /// Underlying contract error.
        #[from]
        source: alloy::contract::Error,
    },

    /// A transaction was mined and reverted. Terminal: the payload reached
    /// the contract and was rejected, so resubmitting the same bytes cannot
    /// succeed. Needs an operator decision.
    #[error("transaction {tx_hash} reverted on chain")]
    Reverted {
        /// Hash of the reverted transaction.
        tx_hash: String,
    },

    /// No attempt reached the confirmation depth within the watch budget.
    /// The transaction may still land later; event replay will observe it.
    #[error("transaction {tx_hash} unconfirmed after {waited_blocks} blocks")]
    ConfirmationTimeout {
        /// Hash of the most recent attempt.
        tx_hash: String,
        /// Blocks elapsed since first submission.
        waited_blocks: u64,
    },

    /// Our nonce was consumed by a transaction this process never broadcast.
    /// Another signer instance is live against the same key.
    #[error("nonce {nonce} consumed by an untracked transaction")]
    NonceConsumed {
        /// The consumed nonce.
        nonce: u64,
    },

    /// The node already holds an in-flight transaction at this nonce that
    /// this process did not broadcast, typically left over from a previous
    /// run. Event replay will pick up its effects once it lands.
    #[error("nonce {nonce} already occupied by an in-flight transaction")]
    UntrackedInFlight {
        /// The occupied nonce.
        nonce: u64,
    },

    /// Every allowed fee bump was spent without mempool acceptance.
    #[error("nonce {nonce} still unaccepted after {bumps} fee bumps")]
    FeeBumpsExhausted {
        /// Nonce of the stuck transaction.
        nonce: u64,
        /// Fee bumps attempted.
        bumps: u32,
    },

    /// The detached confirmation driver stopped without reporting back,
    /// which only happens when it panicked.
    #[error("confirmation driver aborted: {reason}")]
    WatcherAborted {
        /// Join failure description.
        reason: String,
    },

    /// A slate or result vector had the wrong number of positions.
    #[error("payload carries {len} positions, contract takes exactly 10")]
    PayloadShape {
        /// Positions supplied.
        len: usize,
    },

    /// A contract view answered with a field outside its documented range.
    #[error("contract view returned {field} = {value}, outside its range")]
    MalformedView {
        /// Field that failed decoding.
        field: &'static str,
        /// Raw value the contract answered with.
        value: u64,
    },

    /// A log matched our filter but could not be decoded into an event.
    #[error("undecodable log at {tx_hash}:{log_index}: {reason}")]
    MalformedEvent {
        /// Transaction the log belongs to.
        tx_hash: String,
        /// Log index within its block.
        log_index: u32,
        /// What failed while decoding.
        reason: String,
    },

    /// A block inside the confirmed range could not be fetched.
    #[error("block {number} missing from the node")]
    MissingBlock {
        /// The absent block number.
        number: u64,
    },

    /// Shared domain validation failure.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl GatewayError {
    /// True when a backoff retry of the same operation can succeed.
    ///
    /// Only network-shaped failures qualify. `Reverted` in particular is
    /// never retryable: the chain has already judged the payload.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Contract { .. } => matches!(
                classify_send_error(&self.to_string()),
                SendDisposition::RateLimited | SendDisposition::Transient
            ),
            _ => false,
        }
    }
}

/// How a rejected `eth_sendRawTransaction` should be handled.
///
/// Nodes disagree on error codes, so classification goes by message
/// substrings, normalized to lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendDisposition {
    /// Mempool wants a higher fee; bump the tip and resubmit the same nonce.
    Underpriced,
    /// The node already holds these exact bytes; watch for their receipt.
    AlreadyKnown,
    /// The account nonce moved under us; re-read it and rebuild.
    NonceTooLow,
    /// Provider throttling; back off harder than for plain transients.
    RateLimited,
    /// Connectivity hiccup; retry with backoff.
    Transient,
    /// Anything else; surface to the operator.
    Fatal,
}

pub(crate) fn classify_send_error(message: &str) -> SendDisposition {
    let m = message.to_ascii_lowercase();
    if m.contains("underpriced") || m.contains("fee too low") || m.contains("tip too low") {
        SendDisposition::Underpriced
    } else if m.contains("already known")
        || m.contains("alreadyknown")
        || m.contains("known transaction")
        || m.contains("duplicate transaction")
    {
        SendDisposition::AlreadyKnown
    } else if m.contains("nonce too low") || m.contains("invalid nonce") {
        SendDisposition::NonceTooLow
    } else if m.contains("rate limit")
        || m.contains("too many requests")
        || m.contains("-32090")
        || m.contains("429")
    {
        SendDisposition::RateLimited
    } else if m.contains("timeout")
        || m.contains("timed out")
        || m.contains("connection")
        || m.contains("reset by peer")
        || m.contains("broken pipe")
        || m.contains("temporarily unavailable")
        || m.contains("bad gateway")
        || m.contains("502")
        || m.contains("503")
    {
        SendDisposition::Transient
    } else {
        SendDisposition::Fatal
    }
}
