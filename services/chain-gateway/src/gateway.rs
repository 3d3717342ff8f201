//! Typed contract access: cached reads, serialized writes, event replay.
//!
//! Writes run inside a detached driver task: reserve the nonce, broadcast,
//! then watch the attempt hashes until one of them ages past the
//! confirmation depth. A transaction that stays unconfirmed gets its tip
//! bumped and rebroadcast under the same nonce, which also covers the reorg
//! case where a receipt vanishes again before it is deep enough. The driver
//! is spawned, so cancelling the caller never abandons a broadcast
//! transaction mid-watch; shutdown waits for drivers through [`ChainGateway::drain`].
//!
//! Nonce n+1 is never broadcast before n is accepted, because every driver
//! runs under one submit lock.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256, Bytes};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fixture_store::SlateEntry;
use rustc_hash::FxHashMap;
use services_common::constants::DEFAULT_CONFIRMATION_DEPTH;
use services_common::{Backoff, Clock, CycleId, OutcomePair, PlayerAddress, SlipId};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::ReadCache;
use crate::contract::{self, TenfoldContest};
use crate::error::{GatewayError, GatewayResult, SendDisposition, classify_send_error};
use crate::events::{EventBatch, EventEnvelope, decode_log, event_signatures};
use crate::nonce::NonceTracker;
use crate::views::{ChainSlip, ChainUserStats, CycleSnapshot, timestamp};

/// Connection and confirmation policy.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: String,
    /// Contest contract address.
    pub contract: Address,
    /// Hex signing key, with or without a `0x` prefix.
    pub private_key: String,
    /// Blocks a transaction must age before it counts as final.
    pub confirmation_depth: u64,
    /// How long polled views may be served from cache.
    pub read_ttl: Duration,
    /// Receipt and head poll cadence while watching a submission.
    pub poll_interval: Duration,
    /// Blocks without a receipt before the tip is bumped.
    pub bump_after_blocks: u64,
    /// Fee bumps before a submission is declared stuck.
    pub max_fee_bumps: u32,
    /// Tip increase per bump, in percent of the node's suggestion.
    pub tip_bump_percent: u128,
    /// Hard tip ceiling in wei.
    pub max_tip_wei: u128,
    /// Wall-clock budget for one submission to confirm.
    pub confirmation_budget: Duration,
    /// Widest block range one `eth_getLogs` call may cover.
    pub max_block_range: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract: Address::ZERO,
            private_key: String::new(),
            confirmation_depth: DEFAULT_CONFIRMATION_DEPTH,
            read_ttl: Duration::from_secs(5),
            poll_interval: Duration::from_secs(3),
            bump_after_blocks: 6,
            max_fee_bumps: 3,
            tip_bump_percent: 25,
            max_tip_wei: 500_000_000_000,
            confirmation_budget: Duration::from_secs(10 * 60),
            max_block_range: 2_000,
        }
    }
}

impl GatewayConfig {
    /// Config for one deployment with the default confirmation policy.
    ///
    /// Takes the contract address as text so callers never handle raw
    /// address types; the remaining knobs stay reachable through the public
    /// fields.
    pub fn for_contract(
        rpc_url: String,
        contract: &str,
        private_key: String,
    ) -> GatewayResult<Self> {
        let contract = contract
            .parse::<Address>()
            .map_err(|_| GatewayError::BadAddress {
                input: contract.to_string(),
            })?;
        Ok(Self {
            rpc_url,
            contract,
            private_key,
            ..Self::default()
        })
    }
}

/// A submission that reached the configured confirmation depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTx {
    /// Transaction hash.
    pub tx_hash: String,
    /// Block the transaction landed in.
    pub block_number: u64,
    /// Hash of the abi-encoded payload, for comparison against the hash the
    /// contract announces in its event.
    pub payload_hash: B256,
}

/// Chain operations the coordinator drives.
///
/// The production implementation is [`ChainGateway`]; tests substitute an
/// in-memory double.
#[async_trait]
pub trait ContestChain: Send + Sync {
    /// Highest cycle id the contract has started. Zero before the first.
    async fn current_cycle_id(&self) -> GatewayResult<CycleId>;

    /// Snapshot one cycle's on-chain state.
    async fn cycle(&self, id: CycleId) -> GatewayResult<CycleSnapshot>;

    /// Whether the contract holds results for a cycle.
    async fn is_cycle_resolved(&self, id: CycleId) -> GatewayResult<bool>;

    /// Open a cycle with a frozen ten-fixture slate.
    async fn start_cycle(&self, entries: &[SlateEntry]) -> GatewayResult<ConfirmedTx>;

    /// Write the ten-position result vector for a cycle.
    async fn resolve_cycle(
        &self,
        id: CycleId,
        results: &[OutcomePair],
    ) -> GatewayResult<ConfirmedTx>;

    /// Decode events from `from_block` up to the newest block that already
    /// has the confirmation depth.
    async fn poll_events(&self, from_block: u64) -> GatewayResult<EventBatch>;
}

/// Gateway over one JSON-RPC endpoint and one signing key.
pub struct ChainGateway {
    provider: DynProvider,
    contract_address: Address,
    signer_address: Address,
    config: GatewayConfig,
    cache: Arc<ReadCache>,
    nonces: Arc<NonceTracker>,
    submit_lock: Arc<tokio::sync::Mutex<()>>,
    in_flight: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
}

impl ChainGateway {
    /// Connect over HTTP and wrap the configured signing key.
    pub async fn connect(config: GatewayConfig, clock: Arc<dyn Clock>) -> GatewayResult<Self> {
        let key = config
            .private_key
            .strip_prefix("0x")
            .unwrap_or(&config.private_key);
        let signer: PrivateKeySigner = key.parse()?;
        let signer_address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect(&config.rpc_url)
            .await?
            .erased();
        info!(contract = %config.contract, signer = %signer_address, "chain gateway connected");
        Ok(Self::with_provider(provider, signer_address, config, clock))
    }

    /// Gateway over an existing provider, which must sign for
    /// `signer_address`.
    #[must_use]
    pub fn with_provider(
        provider: DynProvider,
        signer_address: Address,
        config: GatewayConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: Arc::new(ReadCache::new(config.read_ttl)),
            nonces: Arc::new(NonceTracker::new(signer_address)),
            submit_lock: Arc::new(tokio::sync::Mutex::new(())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            contract_address: config.contract,
            provider,
            signer_address,
            config,
            clock,
        }
    }

    /// Address the gateway signs with.
    #[must_use]
    pub const fn signer(&self) -> Address {
        self.signer_address
    }

    /// Submissions currently being driven to confirmation.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for in-flight confirmation drivers, up to `budget`.
    ///
    /// Returns false when the budget ran out first; those transactions keep
    /// being watched until the process exits and are reconciled by event
    /// replay on the next start.
    pub async fn drain(&self, budget: Duration) -> bool {
        let started = self.clock.now();
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
            if elapsed >= budget {
                warn!(remaining = self.in_flight(), "drain budget spent");
                return false;
            }
            self.clock.sleep(Duration::from_millis(200)).await;
        }
    }

    /// Read one slip directly from the contract. Uncached; used by
    /// reconciliation, which must not see stale data.
    pub async fn slip(&self, id: SlipId) -> GatewayResult<ChainSlip> {
        let contest = TenfoldContest::new(self.contract_address, &self.provider);
        let view = contest.slip(id.as_u64()).call().await?;
        ChainSlip::try_from(view)
    }

    /// Read a player's on-chain roll-up. Uncached.
    pub async fn user_stats(&self, player: &PlayerAddress) -> GatewayResult<ChainUserStats> {
        let contest = TenfoldContest::new(self.contract_address, &self.provider);
        let view = contest
            .userStats(Address::from(*player.as_bytes()))
            .call()
            .await?;
        Ok(ChainUserStats::from(view))
    }

    /// Spawn a driver for this calldata and wait for it. The driver holds
    /// the submit lock and outlives cancellation of this future.
    async fn submit_confirmed(
        &self,
        label: &'static str,
        calldata: Bytes,
    ) -> GatewayResult<(String, u64)> {
        let driver = SubmitDriver {
            provider: self.provider.clone(),
            cache: Arc::clone(&self.cache),
            nonces: Arc::clone(&self.nonces),
            submit_lock: Arc::clone(&self.submit_lock),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            signer_address: self.signer_address,
            contract_address: self.contract_address,
            in_flight: Arc::clone(&self.in_flight),
        };
        let handle = tokio::spawn(driver.run(label, calldata));
        handle.await.map_err(|e| GatewayError::WatcherAborted {
            reason: e.to_string(),
        })?
    }

    async fn block_time(
        &self,
        number: u64,
        memo: &mut FxHashMap<u64, DateTime<Utc>>,
    ) -> GatewayResult<DateTime<Utc>> {
        if let Some(at) = memo.get(&number) {
            return Ok(*at);
        }
        let block = self
            .provider
            .get_block_by_number(number.into())
            .await?
            .ok_or(GatewayError::MissingBlock { number })?;
        let at = timestamp(block.header.timestamp, "timestamp")?;
        memo.insert(number, at);
        Ok(at)
    }
}

#[async_trait]
impl ContestChain for ChainGateway {
    async fn current_cycle_id(&self) -> GatewayResult<CycleId> {
        if let Some(hit) = self.cache.current_cycle() {
            return Ok(CycleId::new(hit));
        }
        let contest = TenfoldContest::new(self.contract_address, &self.provider);
        let id = contest.currentCycleId().call().await?;
        self.cache.put_current_cycle(id);
        Ok(CycleId::new(id))
    }

    async fn cycle(&self, id: CycleId) -> GatewayResult<CycleSnapshot> {
        if let Some(hit) = self.cache.cycle(id.as_u64()) {
            return Ok(hit);
        }
        let contest = TenfoldContest::new(self.contract_address, &self.provider);
        let view = contest.cycle(id.as_u64()).call().await?;
        let snapshot = CycleSnapshot::try_from(view)?;
        self.cache.put_cycle(id.as_u64(), snapshot);
        Ok(snapshot)
    }

    async fn is_cycle_resolved(&self, id: CycleId) -> GatewayResult<bool> {
        if let Some(hit) = self.cache.resolved(id.as_u64()) {
            return Ok(hit);
        }
        let contest = TenfoldContest::new(self.contract_address, &self.provider);
        let flag = contest.isCycleResolved(id.as_u64()).call().await?;
        self.cache.put_resolved(id.as_u64(), flag);
        Ok(flag)
    }

    async fn start_cycle(&self, entries: &[SlateEntry]) -> GatewayResult<ConfirmedTx> {
        let payload = contract::slate_payload(entries)?;
        let payload_hash = contract::slate_hash(&payload);
        let calldata = TenfoldContest::startCycleCall { slate: payload }.abi_encode();
        let (tx_hash, block_number) = self.submit_confirmed("startCycle", calldata.into()).await?;
        Ok(ConfirmedTx {
            tx_hash,
            block_number,
            payload_hash,
        })
    }

    async fn resolve_cycle(
        &self,
        id: CycleId,
        results: &[OutcomePair],
    ) -> GatewayResult<ConfirmedTx> {
        let payload = contract::results_payload(results)?;
        let payload_hash = contract::result_hash(&payload);
        let calldata = TenfoldContest::resolveCycleCall {
            id: id.as_u64(),
            results: payload,
        }
        .abi_encode();
        let (tx_hash, block_number) = self
            .submit_confirmed("resolveCycle", calldata.into())
            .await?;
        Ok(ConfirmedTx {
            tx_hash,
            block_number,
            payload_hash,
        })
    }

    async fn poll_events(&self, from_block: u64) -> GatewayResult<EventBatch> {
        let head = self.provider.get_block_number().await?;
        let safe = head.saturating_sub(self.config.confirmation_depth.saturating_sub(1));
        if from_block > safe {
            return Ok(EventBatch {
                events: Vec::new(),
                next_from_block: from_block,
            });
        }
        let span = self.config.max_block_range.max(1);
        let to_block = safe.min(from_block.saturating_add(span - 1));
        let filter = Filter::new()
            .address(self.contract_address)
            .from_block(from_block)
            .to_block(to_block)
            .event_signature(event_signatures());
        let logs = self.provider.get_logs(&filter).await?;

        let mut block_times: FxHashMap<u64, DateTime<Utc>> = FxHashMap::default();
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            let Some(raw) = decode_log(log)? else {
                debug!(topic = ?log.topic0(), "skipping unrecognized event");
                continue;
            };
            let block_time = match raw.block_timestamp {
                Some(secs) => timestamp(secs, "blockTimestamp")?,
                None => self.block_time(raw.block_number, &mut block_times).await?,
            };
            events.push(EventEnvelope {
                event: raw.event,
                block_number: raw.block_number,
                block_time,
                tx_hash: raw.tx_hash,
                log_index: raw.log_index,
            });
        }
        events.sort_by_key(|e| (e.block_number, e.log_index));
        if !events.is_empty() {
            debug!(from_block, to_block, count = events.len(), "decoded confirmed events");
        }
        Ok(EventBatch {
            events,
            next_from_block: to_block + 1,
        })
    }
}

enum WatchVerdict {
    Confirmed { tx_hash: B256, block_number: u64 },
    NeedBump,
}

/// Owns one submission from nonce reservation to confirmation depth.
/// Spawned detached so a cancelled caller cannot orphan a broadcast
/// transaction.
struct SubmitDriver {
    provider: DynProvider,
    cache: Arc<ReadCache>,
    nonces: Arc<NonceTracker>,
    submit_lock: Arc<tokio::sync::Mutex<()>>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
    signer_address: Address,
    contract_address: Address,
    in_flight: Arc<AtomicUsize>,
}

impl SubmitDriver {
    async fn run(self, label: &'static str, calldata: Bytes) -> GatewayResult<(String, u64)> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = self.drive(label, &calldata).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Err(err) = &outcome {
            warn!(label, error = %err, "submission failed");
        }
        outcome
    }

    async fn drive(&self, label: &'static str, calldata: &Bytes) -> GatewayResult<(String, u64)> {
        let _guard = self.submit_lock.lock().await;
        let mut nonce = self.nonces.reserve(&self.provider).await?;
        let started = self.clock.now();
        let mut attempt_hashes: Vec<B256> = Vec::new();
        let mut bumps: u32 = 0;
        let mut transient = Backoff::standard();

        loop {
            let request = self.build_request(calldata, nonce, bumps).await?;
            match self.provider.send_transaction(request).await {
                Ok(pending) => {
                    let tx_hash = *pending.tx_hash();
                    info!(label, nonce, bumps, tx = %tx_hash, "transaction submitted");
                    self.cache.clear();
                    attempt_hashes.push(tx_hash);
                }
                Err(err) => match classify_send_error(&err.to_string()) {
                    SendDisposition::Underpriced => {
                        if bumps >= self.config.max_fee_bumps {
                            if attempt_hashes.is_empty() {
                                self.nonces.release(nonce).await;
                            }
                            return Err(GatewayError::FeeBumpsExhausted { nonce, bumps });
                        }
                        bumps += 1;
                        warn!(label, nonce, bumps, "send rejected as underpriced");
                        continue;
                    }
                    SendDisposition::AlreadyKnown => {
                        if attempt_hashes.is_empty() {
                            return Err(GatewayError::UntrackedInFlight { nonce });
                        }
                        debug!(label, nonce, "node already holds these bytes");
                    }
                    SendDisposition::NonceTooLow => {
                        self.nonces.resync().await;
                        if attempt_hashes.is_empty() {
                            nonce = self.nonces.reserve(&self.provider).await?;
                            debug!(label, nonce, "nonce re-read after rejection");
                            continue;
                        }
                        // An earlier attempt of ours was mined between polls;
                        // the watch below will find its receipt.
                    }
                    SendDisposition::RateLimited | SendDisposition::Transient => {
                        let Some(delay) = transient.next_delay() else {
                            if attempt_hashes.is_empty() {
                                self.nonces.release(nonce).await;
                            }
                            return Err(err.into());
                        };
                        warn!(label, error = %err, ?delay, "transient send failure");
                        self.clock.sleep(delay).await;
                        continue;
                    }
                    SendDisposition::Fatal => {
                        if attempt_hashes.is_empty() {
                            self.nonces.release(nonce).await;
                        }
                        return Err(err.into());
                    }
                },
            }

            match self.watch(&attempt_hashes, nonce, started).await? {
                WatchVerdict::Confirmed {
                    tx_hash,
                    block_number,
                } => {
                    info!(label, tx = %tx_hash, block_number, "transaction confirmed");
                    return Ok((format!("{tx_hash:#x}"), block_number));
                }
                WatchVerdict::NeedBump => {
                    if bumps >= self.config.max_fee_bumps {
                        return Err(GatewayError::FeeBumpsExhausted { nonce, bumps });
                    }
                    bumps += 1;
                    warn!(label, nonce, bumps, "unconfirmed too long, bumping fee");
                }
            }
        }
    }

    async fn build_request(
        &self,
        calldata: &Bytes,
        nonce: u64,
        bumps: u32,
    ) -> GatewayResult<TransactionRequest> {
        let mut request = TransactionRequest::default()
            .with_from(self.signer_address)
            .with_to(self.contract_address)
            .with_nonce(nonce)
            .with_input(calldata.clone());
        if bumps > 0 {
            let fees = self.provider.estimate_eip1559_fees().await?;
            let scale = 100 + u128::from(bumps) * self.config.tip_bump_percent;
            let tip = (fees.max_priority_fee_per_gas * scale / 100).min(self.config.max_tip_wei);
            let max_fee = (fees.max_fee_per_gas * scale / 100).max(tip);
            request = request
                .with_max_priority_fee_per_gas(tip)
                .with_max_fee_per_gas(max_fee);
        }
        Ok(request)
    }

    /// Poll until one attempt hash is deep enough, the transaction reverts,
    /// or the bump window passes with no receipt at all.
    ///
    /// A receipt that disappears again before reaching the depth, the
    /// reorged-out case, falls back into the no-receipt branch and comes
    /// back as `NeedBump`, which rebroadcasts under the same nonce.
    async fn watch(
        &self,
        hashes: &[B256],
        nonce: u64,
        started: DateTime<Utc>,
    ) -> GatewayResult<WatchVerdict> {
        let baseline = self.provider.get_block_number().await?;
        loop {
            if let Some((tx_hash, block_number, ok)) = self.scan_receipts(hashes).await? {
                if !ok {
                    return Err(GatewayError::Reverted {
                        tx_hash: format!("{tx_hash:#x}"),
                    });
                }
                let head = self.provider.get_block_number().await?;
                if head.saturating_sub(block_number) + 1 >= self.config.confirmation_depth {
                    return Ok(WatchVerdict::Confirmed {
                        tx_hash,
                        block_number,
                    });
                }
                debug!(tx = %tx_hash, block_number, head, "awaiting confirmation depth");
            } else {
                let head = self.provider.get_block_number().await?;
                let mined = self
                    .provider
                    .get_transaction_count(self.signer_address)
                    .await?;
                if mined > nonce {
                    // The nonce is spent but none of our hashes have a
                    // receipt: another signer instance is interfering.
                    if self.scan_receipts(hashes).await?.is_none() {
                        return Err(GatewayError::NonceConsumed { nonce });
                    }
                } else if head.saturating_sub(baseline) >= self.config.bump_after_blocks {
                    return Ok(WatchVerdict::NeedBump);
                }
            }
            if !self.within_budget(started) {
                let head = self.provider.get_block_number().await?;
                return Err(GatewayError::ConfirmationTimeout {
                    tx_hash: hashes
                        .last()
                        .map_or_else(|| "unsubmitted".to_string(), |h| format!("{h:#x}")),
                    waited_blocks: head.saturating_sub(baseline),
                });
            }
            self.clock.sleep(self.config.poll_interval).await;
        }
    }

    /// Newest-first pass over our attempt hashes. `Ok(None)` when no
    /// receipt exists yet.
    async fn scan_receipts(&self, hashes: &[B256]) -> GatewayResult<Option<(B256, u64, bool)>> {
        for hash in hashes.iter().rev() {
            if let Some(receipt) = self.provider.get_transaction_receipt(*hash).await? {
                let Some(block_number) = receipt.block_number else {
                    continue;
                };
                return Ok(Some((*hash, block_number, receipt.status())));
            }
        }
        Ok(None)
    }

    fn within_budget(&self, started: DateTime<Utc>) -> bool {
        let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
        elapsed <= self.config.confirmation_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use services_common::ManualClock;

    fn offline_driver(config: GatewayConfig, clock: Arc<dyn Clock>) -> SubmitDriver {
        let provider = ProviderBuilder::new()
            .connect_http("http://127.0.0.1:9".parse().unwrap())
            .erased();
        SubmitDriver {
            provider,
            cache: Arc::new(ReadCache::new(config.read_ttl)),
            nonces: Arc::new(NonceTracker::new(Address::repeat_byte(0x0a))),
            submit_lock: Arc::new(tokio::sync::Mutex::new(())),
            clock,
            signer_address: Address::repeat_byte(0x0a),
            contract_address: config.contract,
            in_flight: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    #[test]
    fn defaults_track_the_shared_confirmation_depth() {
        let config = GatewayConfig::default();
        assert_eq!(config.confirmation_depth, DEFAULT_CONFIRMATION_DEPTH);
        assert!(config.read_ttl < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn first_attempt_leaves_fees_to_the_node() {
        let clock = ManualClock::default();
        let driver = offline_driver(GatewayConfig::default(), Arc::new(clock));
        let request = driver
            .build_request(&Bytes::from(vec![0x01, 0x02]), 7, 0)
            .await
            .unwrap();
        assert_eq!(request.nonce, Some(7));
        assert_eq!(request.max_fee_per_gas, None);
        assert_eq!(request.max_priority_fee_per_gas, None);
    }

    #[test]
    fn budget_expires_on_the_clock() {
        let clock = ManualClock::default();
        let handle = clock.clone();
        let driver = offline_driver(GatewayConfig::default(), Arc::new(clock));
        let started = handle.now();
        assert!(driver.within_budget(started));
        handle.advance(Duration::from_secs(11 * 60));
        assert!(!driver.within_budget(started));
    }
}
