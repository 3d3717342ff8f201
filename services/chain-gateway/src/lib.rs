//! Contest contract gateway
//!
//! One component owns every RPC interaction: typed views with a short-TTL
//! cache, the single serialized submission path for `startCycle` and
//! `resolveCycle`, and confirmed-range event replay. Everything upstream of
//! this crate reasons in domain types; everything below it is the wire.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod contract;
pub mod error;
pub mod events;
pub mod gateway;
pub mod views;

mod cache;
mod nonce;

pub use alloy::primitives::B256;
pub use error::{GatewayError, GatewayResult};
pub use events::{ChainEvent, EventBatch, EventEnvelope};
pub use gateway::{ChainGateway, ConfirmedTx, ContestChain, GatewayConfig};
pub use views::{ChainCyclePhase, ChainSlip, ChainUserStats, CycleSnapshot};
