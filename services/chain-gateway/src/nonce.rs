//! Serialized nonce allocation for the single signing key.
//!
//! Submissions already run under the gateway's submit lock; this tracker
//! keeps the next nonce cached between them so a burst of transactions does
//! not race the node's pending-count indexing. A `nonce too low` rejection
//! drops the cache and the next reservation re-reads the chain.

use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::GatewayResult;

#[derive(Debug)]
pub(crate) struct NonceTracker {
    address: Address,
    next: Mutex<Option<u64>>,
}

impl NonceTracker {
    pub(crate) const fn new(address: Address) -> Self {
        Self {
            address,
            next: Mutex::const_new(None),
        }
    }

    /// Hand out the next nonce, reading the node's pending count on first
    /// use or after a resync.
    pub(crate) async fn reserve(&self, provider: &DynProvider) -> GatewayResult<u64> {
        let mut slot = self.next.lock().await;
        let nonce = match *slot {
            Some(n) => n,
            None => {
                let n = provider
                    .get_transaction_count(self.address)
                    .pending()
                    .await?;
                debug!(address = %self.address, nonce = n, "nonce cache primed");
                n
            }
        };
        *slot = Some(nonce + 1);
        Ok(nonce)
    }

    /// Hand back a nonce whose submission never reached the mempool.
    ///
    /// Without this a failed submission would leave a gap and wedge every
    /// later transaction behind it.
    pub(crate) async fn release(&self, nonce: u64) {
        let mut slot = self.next.lock().await;
        if *slot == Some(nonce + 1) {
            *slot = Some(nonce);
        }
    }

    /// Forget the cached nonce after a `nonce too low` rejection.
    pub(crate) async fn resync(&self) {
        *self.next.lock().await = None;
    }
}
