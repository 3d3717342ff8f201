//! Operator alerting
//!
//! An alert is three writes at once: an error log for the pager pipeline, an
//! `alerts` counter tick for dashboards and an audit row for later review.
//! Raising one must never take down the loop that found the problem, so a
//! failed audit write is logged and swallowed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fixture_store::{AuditEvent, AuditTrail};
use tracing::{error, warn};

use crate::metrics::Metrics;

/// Fans one operator-relevant event out to logs, metrics and the audit
/// trail. Cheap to clone.
#[derive(Clone)]
pub struct Alerter {
    audit: AuditTrail,
    metrics: Arc<Metrics>,
}

impl Alerter {
    /// Alerter over the shared audit trail and counter registry.
    #[must_use]
    pub const fn new(audit: AuditTrail, metrics: Arc<Metrics>) -> Self {
        Self { audit, metrics }
    }

    /// Raise one alert.
    pub async fn raise(&self, event: &AuditEvent, now: DateTime<Utc>) {
        let kind = event.event_type();
        self.metrics.alerts.with_label_values(&[kind]).inc();
        error!(kind, cycle_id = ?event.cycle_id(), "operator alert");
        if let Err(err) = self.audit.log(event, now).await {
            warn!(kind, error = %err, "alert not recorded in the audit log");
        }
    }
}
