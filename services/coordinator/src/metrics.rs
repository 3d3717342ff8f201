//! Prometheus counters and the scrape listener.
//!
//! One owned registry per process, carried by `Arc` into every task; no
//! global registry, so tests can assert on counters in isolation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::watch;
use tracing::info;

/// Counters of the operational surface.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Durable cycle transitions, labelled by the state entered.
    pub transitions: IntCounterVec,
    /// Transactions handed to the gateway.
    pub tx_submitted: IntCounter,
    /// Transactions that reached confirmation depth.
    pub tx_confirmed: IntCounter,
    /// Transactions mined but reverted.
    pub tx_reverted: IntCounter,
    /// Results feed sweeps completed.
    pub feed_sweeps: IntCounter,
    /// Chain events applied, labelled by event type.
    pub chain_events: IntCounterVec,
    /// Slips scored and ranked.
    pub slips_projected: IntCounter,
    /// Operator alerts raised, labelled by kind.
    pub alerts: IntCounterVec,
}

impl Metrics {
    /// Build and register every counter.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let transitions = IntCounterVec::new(
            Opts::new("tenfold_transitions_total", "Durable cycle transitions"),
            &["to_state"],
        )?;
        let tx_submitted = IntCounter::new(
            "tenfold_tx_submitted_total",
            "Transactions handed to the gateway",
        )?;
        let tx_confirmed = IntCounter::new(
            "tenfold_tx_confirmed_total",
            "Transactions confirmed at depth",
        )?;
        let tx_reverted =
            IntCounter::new("tenfold_tx_reverted_total", "Transactions mined but reverted")?;
        let feed_sweeps =
            IntCounter::new("tenfold_feed_sweeps_total", "Results feed sweeps completed")?;
        let chain_events = IntCounterVec::new(
            Opts::new("tenfold_chain_events_total", "Chain events applied"),
            &["kind"],
        )?;
        let slips_projected =
            IntCounter::new("tenfold_slips_projected_total", "Slips scored and ranked")?;
        let alerts = IntCounterVec::new(
            Opts::new("tenfold_alerts_total", "Operator alerts raised"),
            &["kind"],
        )?;

        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_confirmed.clone()))?;
        registry.register(Box::new(tx_reverted.clone()))?;
        registry.register(Box::new(feed_sweeps.clone()))?;
        registry.register(Box::new(chain_events.clone()))?;
        registry.register(Box::new(slips_projected.clone()))?;
        registry.register(Box::new(alerts.clone()))?;

        Ok(Self {
            registry,
            transitions,
            tx_submitted,
            tx_confirmed,
            tx_reverted,
            feed_sweeps,
            chain_events,
            slips_projected,
            alerts,
        })
    }

    /// Encode every registered family in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        match encoder.encode(&self.registry.gather(), &mut buffer) {
            Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

/// Serve `/healthz` and `/metrics` until `shutdown` flips.
pub async fn serve(
    metrics: Arc<Metrics>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(scrape))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics listener up");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn scrape(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.tx_submitted.inc();
        metrics.transitions.with_label_values(&["Open"]).inc();
        metrics.alerts.with_label_values(&["resolve_overdue"]).inc();

        let text = metrics.render();
        assert!(text.contains("tenfold_tx_submitted_total 1"));
        assert!(text.contains("tenfold_transitions_total{to_state=\"Open\"} 1"));
        assert!(text.contains("tenfold_alerts_total{kind=\"resolve_overdue\"} 1"));
    }

    #[test]
    fn registries_are_isolated_per_instance() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.feed_sweeps.inc();
        assert!(b.render().contains("tenfold_feed_sweeps_total 0"));
    }
}
