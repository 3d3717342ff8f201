//! Results collector service.
//!
//! Polls the sports data provider for fixtures whose kickoff has passed,
//! records final scores write-once into the fixture store, and keeps
//! fixture statuses current. Provider flakiness is absorbed here: malformed
//! payloads are dropped before they reach the store, transient failures are
//! retried on the next sweep, and fixtures that keep failing raise an audit
//! alert without blocking the rest of the sweep.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod collector;
pub mod error;
pub mod feed;
pub mod http;

pub use collector::{CollectorConfig, ResultsCollector, SweepSummary};
pub use error::{CollectorError, CollectorResult};
pub use feed::{FeedSnapshot, FeedStatus, ResultsFeed};
pub use http::{HttpFeedConfig, HttpResultsFeed};
