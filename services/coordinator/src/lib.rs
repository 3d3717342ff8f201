//! Cycle coordination service.
//!
//! The coordinator is the process that turns the other crates into a
//! running contest. Four loops share one store and one chain connection:
//! daily slate selection, the results-feed sweep, confirmed-event replay
//! and the lifecycle sweep that drives every cycle toward Evaluated and
//! owns all transaction submissions. The chain decides the contested
//! edges; this process decides the timed ones. A health and metrics
//! listener and an operator CLI round out the binary.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod alerts;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod selection;

pub use alerts::Alerter;
pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, CoordinatorResult};
pub use events::{EVENT_CURSOR, EventApplier};
pub use lifecycle::LifecycleDriver;
pub use metrics::Metrics;
pub use selection::SelectionDriver;
