//! Run summaries.
//!
//! Every batch job returns one of these structures. They serialize to the JSON the HTTP
//! layer returns (counts per outcome, a `details` object with ids and failure messages,
//! and an echo of the timing configuration the run used) and format to a one-line
//! summary for the logs.

use crate::config::{NotificationGate, PipelineConfig};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write;

/// The configuration values a run made its decisions with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEcho {
    /// Days before an event the owner is reminded
    pub notification_lead_days: i64,
    /// Days before delivery payment is committed and captured
    pub capture_lead_days: i64,
    /// Days before delivery an order is submitted to fulfillment
    pub shipping_buffer_days: i64,
    /// Events further away than this are held after approval
    pub hold_threshold_days: i64,
    /// How the reminder and commitment gates match
    pub notification_gate: NotificationGate,
    /// Payment status written after a successful capture
    pub captured_status_label: String,
}

impl From<&PipelineConfig> for ConfigEcho {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            notification_lead_days: config.timing.notification_lead_days,
            capture_lead_days: config.timing.capture_lead_days,
            shipping_buffer_days: config.timing.shipping_buffer_days,
            hold_threshold_days: config.timing.hold_threshold_days,
            notification_gate: config.timing.notification_gate,
            captured_status_label: config.payments.captured_status_label.clone(),
        }
    }
}

/// A row that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    /// Kind of record (`"rule"`, `"order"`, `"execution"`, `"address_token"`)
    pub entity: &'static str,
    /// Record id
    pub id: i64,
    /// Error message
    pub error: String,
}

/// A row that was looked at and deliberately left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    /// Record id
    pub id: i64,
    /// Why it was skipped
    pub reason: String,
}

/// Ids per outcome bucket of an orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorDetails {
    /// Rules whose next occurrence was (re)computed
    pub resolved_rule_ids: Vec<i64>,
    /// Rules whose owner was reminded
    pub notified_rule_ids: Vec<i64>,
    /// Orders created through checkout
    pub checkout_order_ids: Vec<i64>,
    /// Rules left alone, with the reason
    pub skipped: Vec<SkippedRow>,
    /// Rules that failed
    pub failures: Vec<RowFailure>,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorSummary {
    /// Date the run treated as today
    pub run_date: NaiveDate,
    /// Whether the date was simulated
    pub simulated: bool,
    /// Rules inside the look-ahead window
    pub rules_scanned: usize,
    /// Rules whose date was resolved
    pub dates_resolved: usize,
    /// Reminders sent
    pub notified: usize,
    /// Checkout sessions created
    pub checkout_created: usize,
    /// Rules skipped
    pub skipped: usize,
    /// Rules that failed
    pub failed: usize,
    /// Ids per bucket
    pub details: OrchestratorDetails,
    /// Effective configuration
    pub config: ConfigEcho,
}

impl OrchestratorSummary {
    /// Empty summary for a run on `run_date`.
    #[must_use]
    pub fn new(run_date: NaiveDate, simulated: bool, config: &PipelineConfig) -> Self {
        Self {
            run_date,
            simulated,
            rules_scanned: 0,
            dates_resolved: 0,
            notified: 0,
            checkout_created: 0,
            skipped: 0,
            failed: 0,
            details: OrchestratorDetails::default(),
            config: config.into(),
        }
    }

    /// Records a rule that was skipped.
    pub fn skip(&mut self, rule_id: i64, reason: impl Into<String>) {
        self.skipped += 1;
        self.details.skipped.push(SkippedRow {
            id: rule_id,
            reason: reason.into(),
        });
    }

    /// Records a rule that failed.
    pub fn fail(&mut self, rule_id: i64, error: impl ToString) {
        self.failed += 1;
        self.details.failures.push(RowFailure {
            entity: "rule",
            id: rule_id,
            error: error.to_string(),
        });
    }
}

/// Ids per outcome bucket of a scheduled order run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorDetails {
    /// Deferred orders that were authorized
    pub authorized_order_ids: Vec<i64>,
    /// Orders whose payment was captured
    pub captured_order_ids: Vec<i64>,
    /// Orders handed to fulfillment
    pub submitted_order_ids: Vec<i64>,
    /// Orders left alone, with the reason
    pub skipped: Vec<SkippedRow>,
    /// Orders that failed
    pub failures: Vec<RowFailure>,
}

/// Result of one scheduled order run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSummary {
    /// Date the run treated as today
    pub run_date: NaiveDate,
    /// Whether the date was simulated
    pub simulated: bool,
    /// Deferred authorizations
    pub authorized: usize,
    /// Captures
    pub captured: usize,
    /// Fulfillment submissions
    pub submitted: usize,
    /// Orders skipped
    pub skipped: usize,
    /// Orders that failed or need attention
    pub failed: usize,
    /// Ids per bucket
    pub details: ProcessorDetails,
    /// Effective configuration
    pub config: ConfigEcho,
}

impl ProcessorSummary {
    /// Empty summary for a run on `run_date`.
    #[must_use]
    pub fn new(run_date: NaiveDate, simulated: bool, config: &PipelineConfig) -> Self {
        Self {
            run_date,
            simulated,
            authorized: 0,
            captured: 0,
            submitted: 0,
            skipped: 0,
            failed: 0,
            details: ProcessorDetails::default(),
            config: config.into(),
        }
    }

    /// Records an order that was skipped.
    pub fn skip(&mut self, order_id: i64, reason: impl Into<String>) {
        self.skipped += 1;
        self.details.skipped.push(SkippedRow {
            id: order_id,
            reason: reason.into(),
        });
    }

    /// Records an order that failed.
    pub fn fail(&mut self, order_id: i64, error: impl ToString) {
        self.failed += 1;
        self.details.failures.push(RowFailure {
            entity: "order",
            id: order_id,
            error: error.to_string(),
        });
    }
}

/// Ids per outcome bucket of an approval maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceDetails {
    /// Executions whose retried authorization succeeded
    pub recovered_execution_ids: Vec<i64>,
    /// Executions rescheduled for another retry
    pub rescheduled_execution_ids: Vec<i64>,
    /// Executions that ran out of retries
    pub attention_execution_ids: Vec<i64>,
    /// Executions whose address token expired
    pub expired_execution_ids: Vec<i64>,
    /// Rows that failed
    pub failures: Vec<RowFailure>,
}

/// Result of one approval maintenance run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    /// Date the run treated as today
    pub run_date: NaiveDate,
    /// Whether the date was simulated
    pub simulated: bool,
    /// Retries attempted
    pub retried: usize,
    /// Retries that placed an order
    pub recovered: usize,
    /// Retries that failed again and were rescheduled
    pub rescheduled: usize,
    /// Executions moved to `requires_attention`
    pub requires_attention: usize,
    /// Address tokens expired
    pub tokens_expired: usize,
    /// Rows that failed
    pub failed: usize,
    /// Ids per bucket
    pub details: MaintenanceDetails,
    /// Effective configuration
    pub config: ConfigEcho,
}

impl MaintenanceSummary {
    /// Empty summary for a run on `run_date`.
    #[must_use]
    pub fn new(run_date: NaiveDate, simulated: bool, config: &PipelineConfig) -> Self {
        Self {
            run_date,
            simulated,
            retried: 0,
            recovered: 0,
            rescheduled: 0,
            requires_attention: 0,
            tokens_expired: 0,
            failed: 0,
            details: MaintenanceDetails::default(),
            config: config.into(),
        }
    }

    /// Records a row that failed.
    pub fn fail(&mut self, entity: &'static str, id: i64, error: impl ToString) {
        self.failed += 1;
        self.details.failures.push(RowFailure {
            entity,
            id,
            error: error.to_string(),
        });
    }
}

/// Formats an amount in cents as dollars, e.g. `$12.34`.
#[must_use]
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

fn run_header(label: &str, run_date: NaiveDate, simulated: bool) -> String {
    let mode = if simulated { " (simulated)" } else { "" };
    format!("{label} - {run_date}{mode}")
}

fn append_failures(summary: &mut String, failures: &[RowFailure]) {
    for failure in failures {
        // write! into a String cannot fail
        let _ = write!(
            summary,
            "\n  {} {} failed: {}",
            failure.entity, failure.id, failure.error
        );
    }
}

/// One-line (plus one line per failure) summary of an orchestrator run.
#[must_use]
pub fn format_orchestrator_summary(summary: &OrchestratorSummary) -> String {
    let mut text = run_header("Auto-gift run", summary.run_date, summary.simulated);
    let _ = write!(
        text,
        " | scanned {} | resolved {} | notified {} | checkouts {} | skipped {} | failed {}",
        summary.rules_scanned,
        summary.dates_resolved,
        summary.notified,
        summary.checkout_created,
        summary.skipped,
        summary.failed
    );
    append_failures(&mut text, &summary.details.failures);
    text
}

/// One-line (plus one line per failure) summary of a scheduled order run.
#[must_use]
pub fn format_processor_summary(summary: &ProcessorSummary) -> String {
    let mut text = run_header("Scheduled orders", summary.run_date, summary.simulated);
    let _ = write!(
        text,
        " | authorized {} | captured {} | submitted {} | skipped {} | failed {}",
        summary.authorized, summary.captured, summary.submitted, summary.skipped, summary.failed
    );
    append_failures(&mut text, &summary.details.failures);
    text
}

/// One-line (plus one line per failure) summary of an approval maintenance run.
#[must_use]
pub fn format_maintenance_summary(summary: &MaintenanceSummary) -> String {
    let mut text = run_header("Approval maintenance", summary.run_date, summary.simulated);
    let _ = write!(
        text,
        " | retried {} | recovered {} | rescheduled {} | attention {} | expired tokens {} | failed {}",
        summary.retried,
        summary.recovered,
        summary.rescheduled,
        summary.requires_attention,
        summary.tokens_expired,
        summary.failed
    );
    append_failures(&mut text, &summary.details.failures);
    text
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 6).unwrap()
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(1234), "$12.34");
        assert_eq!(format_cents(5), "$0.05");
        assert_eq!(format_cents(0), "$0.00");
        assert_eq!(format_cents(-250), "-$2.50");
    }

    #[test]
    fn test_summary_serializes_camel_case_with_config_echo() {
        let config = PipelineConfig::default();
        let mut summary = OrchestratorSummary::new(run_date(), true, &config);
        summary.checkout_created = 1;
        summary.fail(9, "card declined");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["checkoutCreated"], 1);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["details"]["failures"][0]["id"], 9);
        assert_eq!(json["config"]["captureLeadDays"], 4);
        assert_eq!(json["config"]["notificationGate"], "exact");
        assert_eq!(json["runDate"], "2025-03-06");
    }

    #[test]
    fn test_format_processor_summary() {
        let config = PipelineConfig::default();
        let mut summary = ProcessorSummary::new(run_date(), true, &config);
        summary.captured = 2;
        summary.fail(7, "Payment error: declined");

        let text = format_processor_summary(&summary);
        assert!(text.starts_with("Scheduled orders - 2025-03-06 (simulated)"));
        assert!(text.contains("captured 2"));
        assert!(text.contains("order 7 failed: Payment error: declined"));
    }

    #[test]
    fn test_skip_counts_and_records_reason() {
        let config = PipelineConfig::default();
        let mut summary = OrchestratorSummary::new(run_date(), false, &config);
        summary.skip(3, "already notified");
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.details.skipped[0].reason, "already notified");
        assert!(format_orchestrator_summary(&summary).contains("skipped 1"));

        let maintenance = MaintenanceSummary::new(run_date(), false, &config);
        assert!(format_maintenance_summary(&maintenance).starts_with("Approval maintenance - 2025-03-06 |"));
    }
}
