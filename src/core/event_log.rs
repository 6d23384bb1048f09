//! Append-only audit trail.
//!
//! Every decision the pipeline takes about a rule, an execution or an order is recorded
//! as an [`EventPayload`]. The variant tag doubles as the row's `event_type`, which is
//! what the orchestrator deduplicates on.

use crate::{
    entities::{EventLog, EventLogColumn, event_log},
    errors::Result,
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Typed payload of an event log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    /// A rule's next occurrence was computed
    DateResolved {
        /// Previous occurrence, if any
        previous: Option<NaiveDate>,
        /// New occurrence
        resolved: NaiveDate,
    },
    /// A rule's next occurrence could not be computed
    ResolutionFailed {
        /// Why
        reason: String,
    },
    /// The owner was reminded about an upcoming event
    Notified {
        /// Days left at the time of the reminder
        days_until: i64,
        /// Candidates included in the reminder
        candidate_count: usize,
    },
    /// A checkout session and pending order were created
    CheckoutCreated {
        /// Session at the checkout service
        session_id: String,
        /// Selected product
        product_id: String,
        /// Order total
        amount_cents: i64,
    },
    /// A row failed inside a batch
    ProcessingFailed {
        /// Component or stage that failed
        stage: String,
        /// Error message
        error: String,
    },
    /// A gift proposal was opened for approval
    ExecutionProposed {
        /// Proposed total
        total_amount_cents: i64,
    },
    /// The owner declined a proposal
    ApprovalRejected {
        /// Reason given
        reason: Option<String>,
    },
    /// An approved gift became an order
    OrderPlaced {
        /// Whether the order waits for `hold_until`
        held: bool,
        /// Earliest submission date when held
        hold_until: Option<NaiveDate>,
    },
    /// A pending recipient was asked for an address
    AddressRequested {
        /// When the collection link stops working
        expires_at: DateTime<Utc>,
    },
    /// A pending recipient provided an address
    AddressCollected,
    /// An address collection link lapsed
    AddressTokenExpired,
    /// Authorization failed and a retry was scheduled
    PaymentRetryScheduled {
        /// Attempts made so far
        attempt: i32,
        /// Next attempt
        retry_at: DateTime<Utc>,
        /// Gateway message
        error: String,
    },
    /// Authorization retries are exhausted
    PaymentAttentionRequired {
        /// Attempts made
        attempts: i32,
        /// Last gateway message
        error: String,
    },
    /// A deferred order was authorized
    OrderAuthorized {
        /// Gateway authorization
        authorization_ref: String,
    },
    /// A deferred authorization failed
    AuthorizationFailed {
        /// Gateway message
        error: String,
    },
    /// Payment was captured
    PaymentCaptured {
        /// Gateway charge
        capture_ref: String,
    },
    /// Capture was refused
    CaptureFailed {
        /// Gateway message
        error: String,
    },
    /// The order was handed to fulfillment
    OrderSubmitted {
        /// Fulfillment reference
        fulfillment_ref: String,
    },
    /// Fulfillment refused the order
    SubmissionFailed {
        /// Fulfillment message
        error: String,
    },
    /// A payload written by another producer
    #[serde(skip)]
    Unknown(Value),
}

impl EventPayload {
    /// Value stored in the `event_type` column.
    #[must_use]
    pub fn event_type(&self) -> String {
        match self {
            Self::Unknown(value) => value
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            known => serde_json::to_value(known)
                .ok()
                .and_then(|v| v.get("event").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Reads a stored payload, keeping unrecognised shapes as [`EventPayload::Unknown`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(Self::Unknown(value))
    }

    /// JSON column value.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Self::Unknown(value) => Ok(value.clone()),
            known => Ok(serde_json::to_value(known)?),
        }
    }
}

/// Records an event is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventRefs {
    /// Gifting rule
    pub rule_id: Option<i64>,
    /// Execution
    pub execution_id: Option<i64>,
    /// Order
    pub order_id: Option<i64>,
    /// Occurrence of the rule's event
    pub occurrence_date: Option<NaiveDate>,
}

impl EventRefs {
    /// References for a rule occurrence.
    #[must_use]
    pub const fn rule(rule_id: i64, occurrence_date: Option<NaiveDate>) -> Self {
        Self {
            rule_id: Some(rule_id),
            execution_id: None,
            order_id: None,
            occurrence_date,
        }
    }

    /// References for an execution.
    #[must_use]
    pub const fn execution(execution_id: i64) -> Self {
        Self {
            rule_id: None,
            execution_id: Some(execution_id),
            order_id: None,
            occurrence_date: None,
        }
    }

    /// References for an order.
    #[must_use]
    pub const fn order(order_id: i64) -> Self {
        Self {
            rule_id: None,
            execution_id: None,
            order_id: Some(order_id),
            occurrence_date: None,
        }
    }

    /// Adds an execution reference.
    #[must_use]
    pub const fn with_execution(mut self, execution_id: i64) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Adds an order reference.
    #[must_use]
    pub const fn with_order(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// Appends one row to the event log.
pub async fn append_event<C: ConnectionTrait>(
    db: &C,
    refs: EventRefs,
    payload: &EventPayload,
    is_simulated: bool,
) -> Result<event_log::Model> {
    let entry = event_log::ActiveModel {
        event_type: Set(payload.event_type()),
        rule_id: Set(refs.rule_id),
        execution_id: Set(refs.execution_id),
        order_id: Set(refs.order_id),
        occurrence_date: Set(refs.occurrence_date),
        payload: Set(payload.to_value()?),
        is_simulated: Set(is_simulated),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    Ok(entry.insert(db).await?)
}

/// Records a per-row batch failure. A failure to write the record is only logged so
/// the batch can carry on.
pub async fn record_failure<C: ConnectionTrait>(
    db: &C,
    refs: EventRefs,
    stage: &str,
    error: &crate::errors::Error,
    is_simulated: bool,
) {
    let payload = EventPayload::ProcessingFailed {
        stage: stage.to_string(),
        error: error.to_string(),
    };
    if let Err(log_error) = append_event(db, refs, &payload, is_simulated).await {
        warn!(stage, error = %log_error, "Could not record processing failure");
    }
}

/// Whether an event of `event_type` was already recorded for this rule occurrence.
pub async fn has_event<C: ConnectionTrait>(
    db: &C,
    event_type: &str,
    rule_id: i64,
    occurrence_date: NaiveDate,
) -> Result<bool> {
    let count = EventLog::find()
        .filter(EventLogColumn::EventType.eq(event_type))
        .filter(EventLogColumn::RuleId.eq(rule_id))
        .filter(EventLogColumn::OccurrenceDate.eq(occurrence_date))
        .count(db)
        .await?;
    Ok(count > 0)
}

/// Every event of `event_type`, oldest first.
pub async fn events_of_type<C: ConnectionTrait>(
    db: &C,
    event_type: &str,
) -> Result<Vec<event_log::Model>> {
    Ok(EventLog::find()
        .filter(EventLogColumn::EventType.eq(event_type))
        .order_by_asc(EventLogColumn::Id)
        .all(db)
        .await?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::setup_test_db;
    use serde_json::json;

    #[test]
    fn test_event_type_is_the_tag() {
        let payload = EventPayload::Notified {
            days_until: 7,
            candidate_count: 3,
        };
        assert_eq!(payload.event_type(), "notified");
        assert_eq!(EventPayload::AddressCollected.event_type(), "address_collected");
        assert_eq!(
            EventPayload::Unknown(json!({"event": "legacy_import"})).event_type(),
            "legacy_import"
        );
        assert_eq!(EventPayload::Unknown(json!([1, 2])).event_type(), "unknown");
    }

    #[test]
    fn test_unknown_payload_is_preserved() {
        let foreign = json!({"event": "something_else", "x": 1});
        let payload = EventPayload::from_value(foreign.clone());
        assert_eq!(payload, EventPayload::Unknown(foreign.clone()));
        assert_eq!(payload.to_value().unwrap(), foreign);

        let known = EventPayload::from_value(json!({"event": "capture_failed", "error": "no"}));
        assert_eq!(
            known,
            EventPayload::CaptureFailed {
                error: "no".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_append_and_dedupe_lookup() -> Result<()> {
        let db = setup_test_db().await?;
        let occurrence = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let payload = EventPayload::Notified {
            days_until: 7,
            candidate_count: 2,
        };

        assert!(!has_event(&db, "notified", 1, occurrence).await?);
        let row = append_event(&db, EventRefs::rule(1, Some(occurrence)), &payload, true).await?;
        assert_eq!(row.event_type, "notified");
        assert!(row.is_simulated);
        assert_eq!(EventPayload::from_value(row.payload), payload);

        assert!(has_event(&db, "notified", 1, occurrence).await?);
        assert!(!has_event(&db, "notified", 2, occurrence).await?);
        assert!(!has_event(&db, "checkout_created", 1, occurrence).await?);
        assert_eq!(events_of_type(&db, "notified").await?.len(), 1);
        Ok(())
    }
}
