//! Execution lookups, proposals and conditional status writes.
//!
//! An execution is one attempt to gift one occurrence of a rule. At most one execution
//! per `(rule, occurrence)` may be non-terminal at a time; [`propose_execution`] is the
//! only place executions are created and enforces that.

use crate::{
    core::{
        event_log::{EventPayload, EventRefs, append_event},
        status::ExecutionStatus,
    },
    entities::{Execution, ExecutionColumn, GiftingRule, execution, gifting_rule},
    errors::{Error, Result},
    models::{GiftProduct, products_to_json, total_cents},
};
use chrono::NaiveDate;
use sea_orm::{ActiveValue::Unchanged, DbErr, Set, TransactionTrait, prelude::*};
use tracing::info;

/// Retrieves an execution by id.
pub async fn get_execution<C: ConnectionTrait>(
    db: &C,
    execution_id: i64,
) -> Result<execution::Model> {
    Execution::find_by_id(execution_id)
        .one(db)
        .await?
        .ok_or(Error::ExecutionNotFound { id: execution_id })
}

/// Retrieves a gifting rule by id.
pub async fn get_rule<C: ConnectionTrait>(db: &C, rule_id: i64) -> Result<gifting_rule::Model> {
    GiftingRule::find_by_id(rule_id)
        .one(db)
        .await?
        .ok_or(Error::RuleNotFound { id: rule_id })
}

/// The non-terminal execution for a rule occurrence, if one exists.
pub async fn open_execution_for<C: ConnectionTrait>(
    db: &C,
    rule_id: i64,
    occurrence_date: NaiveDate,
) -> Result<Option<execution::Model>> {
    Ok(Execution::find()
        .filter(ExecutionColumn::RuleId.eq(rule_id))
        .filter(ExecutionColumn::OccurrenceDate.eq(occurrence_date))
        .filter(ExecutionColumn::Status.is_in(ExecutionStatus::non_terminal()))
        .one(db)
        .await?)
}

/// Opens a new execution awaiting the owner's approval.
///
/// # Errors
/// `Error::InvalidState` when the rule is inactive or the occurrence already has an open
/// execution, `Error::InvalidSelection` when `products` is empty.
pub async fn propose_execution(
    db: &DatabaseConnection,
    rule: &gifting_rule::Model,
    occurrence_date: NaiveDate,
    products: &[GiftProduct],
    is_simulated: bool,
) -> Result<execution::Model> {
    if !rule.active {
        return Err(Error::InvalidState {
            entity: "rule",
            id: rule.id,
            status: "inactive".to_string(),
        });
    }
    if products.is_empty() {
        return Err(Error::InvalidSelection {
            message: "a proposal needs at least one product".to_string(),
        });
    }

    let txn = db.begin().await?;

    if let Some(existing) = open_execution_for(&txn, rule.id, occurrence_date).await? {
        return Err(Error::InvalidState {
            entity: "execution",
            id: existing.id,
            status: existing.status,
        });
    }

    let now = chrono::Utc::now();
    let total = total_cents(products);
    let execution = execution::ActiveModel {
        rule_id: Set(rule.id),
        occurrence_date: Set(occurrence_date),
        status: Set(ExecutionStatus::PendingApproval.as_str().to_string()),
        selected_products: Set(products_to_json(products)?),
        total_amount_cents: Set(total),
        order_id: Set(None),
        rejection_reason: Set(None),
        retry_count: Set(0),
        next_retry_at: Set(None),
        last_error: Set(None),
        address_requested_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    append_event(
        &txn,
        EventRefs::rule(rule.id, Some(occurrence_date)).with_execution(execution.id),
        &EventPayload::ExecutionProposed {
            total_amount_cents: total,
        },
        is_simulated,
    )
    .await?;

    txn.commit().await?;

    info!(
        rule_id = rule.id,
        execution_id = execution.id,
        total_cents = total,
        "Proposed gift execution"
    );
    Ok(execution)
}

/// Moves `current` to `next` together with any other fields set in `changes`.
///
/// Returns `Ok(None)` when the row no longer has the status `current` was read with.
pub async fn transition_execution<C: ConnectionTrait>(
    db: &C,
    current: &execution::Model,
    next: ExecutionStatus,
    mut changes: execution::ActiveModel,
) -> Result<Option<execution::Model>> {
    changes.id = Unchanged(current.id);
    changes.status = Set(next.as_str().to_string());
    changes.updated_at = Set(chrono::Utc::now());

    match Execution::update(changes)
        .filter(ExecutionColumn::Status.eq(current.status.as_str()))
        .exec(db)
        .await
    {
        Ok(updated) => Ok(Some(updated)),
        Err(DbErr::RecordNotUpdated) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Parses the stored status of an execution.
pub fn execution_status(execution: &execution::Model) -> Result<ExecutionStatus> {
    execution.status.parse().map_err(|_| Error::InvalidState {
        entity: "execution",
        id: execution.id,
        status: execution.status.clone(),
    })
}
