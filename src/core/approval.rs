//! Approval service.
//!
//! Turns an owner's decision on a proposed gift into an outcome: a rejection, an address
//! request to the recipient, a scheduled payment retry, or an authorized order (held when
//! the event is far away). Also hosts the maintenance jobs that retry failed
//! authorizations and expire unused address links, and the entry point the address
//! collection page posts to.

use crate::{
    core::{
        Pipeline,
        event_log::{EventPayload, EventRefs, append_event, record_failure},
        executions::{execution_status, get_execution, get_rule, transition_execution},
        orchestrator::recipient_display_name,
        orders::{NewOrder, create_order},
        payments::{self, PaymentRefs},
        report::{MaintenanceSummary, format_maintenance_summary},
        status::{AddressTokenStatus, ExecutionStatus, OrderStatus, PaymentStatus},
        timing::{RunOptions, days_until, hold_until},
    },
    entities::{
        Execution, ExecutionColumn, PendingRecipientAddress, PendingRecipientAddressColumn,
        execution, gifting_rule, pending_recipient_address,
    },
    errors::{Error, Result},
    models::{GiftProduct, ShippingAddress, products_from_json, products_to_json, total_cents},
    services::{AuthorizationRequest, Notification, PaymentAuthorization},
};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use sea_orm::{
    ActiveValue::Unchanged, DbErr, QueryOrder, Set, TransactionTrait, prelude::*,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// The owner's verdict on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Buy the (possibly narrowed) selection
    Approve,
    /// Drop the proposal
    Reject,
}

/// Body of a decision request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    /// Approve or reject
    pub decision: Decision,
    /// Subset of proposed product ids to keep; empty or absent keeps all
    #[serde(default)]
    pub selected_product_ids: Option<Vec<String>>,
    /// Why the proposal was rejected
    #[serde(default)]
    pub reason: Option<String>,
}

/// What a decision led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    /// Execution decided on
    pub execution_id: i64,
    /// Execution status after the decision
    pub status: String,
    /// Order placed, if any
    pub order_id: Option<i64>,
    /// Earliest submission date of a held order
    pub hold_until: Option<NaiveDate>,
    /// Next authorization attempt, when payment is being retried
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Expiry of the address link sent to the recipient
    pub address_token_expires_at: Option<DateTime<Utc>>,
}

impl DecisionOutcome {
    fn new(execution_id: i64, status: ExecutionStatus) -> Self {
        Self {
            execution_id,
            status: status.as_str().to_string(),
            order_id: None,
            hold_until: None,
            next_retry_at: None,
            address_token_expires_at: None,
        }
    }
}

/// Result of posting an address to a collection link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressCollectionOutcome {
    /// Execution waiting for the address
    pub execution_id: i64,
    /// Execution status after the address was stored
    pub status: String,
}

/// Applies an owner's decision to an execution.
///
/// # Errors
/// - `Error::ExecutionNotFound` / `Error::RuleNotFound` for unknown ids
/// - `Error::InvalidState` when the execution is not waiting for a decision
/// - `Error::InvalidSelection` when the selection names products that were not proposed
/// - `Error::Consistency` when payment was authorized but the order could not be stored
pub async fn decide(
    pipeline: &Pipeline,
    execution_id: i64,
    request: DecisionRequest,
    options: RunOptions,
) -> Result<DecisionOutcome> {
    let execution = get_execution(&pipeline.db, execution_id).await?;
    let status = execution_status(&execution)?;
    if !status.accepts_decision() {
        return Err(Error::InvalidState {
            entity: "execution",
            id: execution.id,
            status: execution.status,
        });
    }
    let rule = get_rule(&pipeline.db, execution.rule_id).await?;

    match request.decision {
        Decision::Reject => reject(pipeline, &rule, &execution, request.reason, options).await,
        Decision::Approve => {
            approve(
                pipeline,
                &rule,
                &execution,
                request.selected_product_ids.as_deref(),
                options,
            )
            .await
        }
    }
}

async fn reject(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution: &execution::Model,
    reason: Option<String>,
    options: RunOptions,
) -> Result<DecisionOutcome> {
    let changes = execution::ActiveModel {
        rejection_reason: Set(reason.clone()),
        ..Default::default()
    };
    transition_execution(&pipeline.db, execution, ExecutionStatus::Rejected, changes)
        .await?
        .ok_or_else(|| lost_race(execution))?;

    append_event(
        &pipeline.db,
        EventRefs::rule(rule.id, Some(execution.occurrence_date)).with_execution(execution.id),
        &EventPayload::ApprovalRejected {
            reason: reason.clone(),
        },
        options.is_simulated(),
    )
    .await?;

    pipeline
        .notify_best_effort(&Notification::ApprovalRejected {
            to_user_id: rule.owner_id.clone(),
            execution_id: execution.id,
            reason,
        })
        .await;

    info!(execution_id = execution.id, rule_id = rule.id, "Gift proposal rejected");
    Ok(DecisionOutcome::new(execution.id, ExecutionStatus::Rejected))
}

async fn approve(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution: &execution::Model,
    selected_ids: Option<&[String]>,
    options: RunOptions,
) -> Result<DecisionOutcome> {
    let proposed = products_from_json(&execution.selected_products)?;
    let products = select_products(proposed, selected_ids)?;

    let changes = execution::ActiveModel {
        selected_products: Set(products_to_json(&products)?),
        total_amount_cents: Set(total_cents(&products)),
        ..Default::default()
    };
    let claimed = transition_execution(&pipeline.db, execution, ExecutionStatus::Approved, changes)
        .await?
        .ok_or_else(|| lost_race(execution))?;

    match place_approved(pipeline, rule, &claimed, &products, options).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            recover_from_placement_error(
                pipeline,
                rule,
                &claimed,
                ExecutionStatus::PendingApproval,
                &e,
                options,
            )
            .await;
            Err(e)
        }
    }
}

/// Narrows the proposed products to `selected_ids`, keeping the proposal order.
///
/// # Errors
/// `Error::InvalidSelection` when an id was not part of the proposal.
pub fn select_products(
    proposed: Vec<GiftProduct>,
    selected_ids: Option<&[String]>,
) -> Result<Vec<GiftProduct>> {
    let Some(ids) = selected_ids.filter(|ids| !ids.is_empty()) else {
        return Ok(proposed);
    };
    if let Some(unknown) = ids
        .iter()
        .find(|id| !proposed.iter().any(|p| &p.product_id == *id))
    {
        return Err(Error::InvalidSelection {
            message: format!("product '{unknown}' was not proposed"),
        });
    }
    Ok(proposed
        .into_iter()
        .filter(|p| ids.contains(&p.product_id))
        .collect())
}

/// Places the order for an execution in `approved`: asks for an address, schedules a
/// payment retry, or authorizes and stores the order.
async fn place_approved(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution: &execution::Model,
    products: &[GiftProduct],
    options: RunOptions,
) -> Result<DecisionOutcome> {
    let address = match resolve_address(pipeline, rule, execution.id).await? {
        AddressLookup::Found(address) => address,
        AddressLookup::Ask { email } => {
            return request_address(pipeline, rule, execution, email, options).await;
        }
    };

    let payment_method_ref = rule
        .payment_method_ref
        .clone()
        .filter(|r| !r.trim().is_empty())
        .ok_or(Error::PaymentMethodMissing { rule_id: rule.id })?;
    let amount_cents = total_cents(products);

    let request = AuthorizationRequest {
        payment_method_ref: payment_method_ref.clone(),
        customer_id: rule.owner_id.clone(),
        amount_cents,
        currency: pipeline.config.payments.currency.clone(),
        idempotency_key: format!("execution-{}-attempt-{}", execution.id, execution.retry_count),
        metadata: BTreeMap::from([
            ("executionId".to_string(), execution.id.to_string()),
            ("ruleId".to_string(), rule.id.to_string()),
        ]),
    };
    let refs = PaymentRefs {
        execution_id: Some(execution.id),
        order_id: None,
    };

    match payments::authorize(pipeline, refs, &request).await {
        Ok(authorization) => {
            finalize_order(
                pipeline,
                rule,
                execution,
                products,
                address,
                payment_method_ref,
                authorization,
                options,
            )
            .await
        }
        Err(e @ Error::Payment { .. }) => {
            schedule_payment_retry(pipeline, rule, execution, &e, options).await
        }
        Err(e) => Err(e),
    }
}

enum AddressLookup {
    Found(ShippingAddress),
    Ask { email: String },
}

/// A collected address for this execution wins over the recipient's profile address.
async fn resolve_address(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution_id: i64,
) -> Result<AddressLookup> {
    let collected = PendingRecipientAddress::find()
        .filter(PendingRecipientAddressColumn::ExecutionId.eq(execution_id))
        .filter(PendingRecipientAddressColumn::Status.eq(AddressTokenStatus::Collected.as_str()))
        .order_by_desc(PendingRecipientAddressColumn::CollectedAt)
        .one(&pipeline.db)
        .await?
        .and_then(|row| ShippingAddress::from_column(row.address.as_ref()));
    if let Some(address) = collected {
        return Ok(AddressLookup::Found(address));
    }

    let profile = match &rule.recipient_id {
        Some(recipient_id) => pipeline.services.profiles.profile(recipient_id).await?,
        None => None,
    };
    if let Some(address) = profile.as_ref().and_then(|p| p.shipping_address.clone()) {
        return Ok(AddressLookup::Found(address));
    }

    rule.pending_recipient_email
        .clone()
        .or_else(|| profile.map(|p| p.email))
        .filter(|email| !email.trim().is_empty())
        .map(|email| AddressLookup::Ask { email })
        .ok_or_else(|| Error::AddressUnavailable {
            recipient: rule
                .recipient_id
                .clone()
                .unwrap_or_else(|| format!("rule {}", rule.id)),
        })
}

/// Issues a single-use collection link and parks the execution until it is used.
async fn request_address(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution: &execution::Model,
    email: String,
    options: RunOptions,
) -> Result<DecisionOutcome> {
    let now = options.now();
    let ttl = TimeDelta::try_hours(pipeline.config.address_collection.token_ttl_hours)
        .unwrap_or(TimeDelta::MAX);
    let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
    let token = uuid::Uuid::new_v4().simple().to_string();
    let recipient_name = recipient_display_name(pipeline, rule).await?;

    // Short write first; the email goes out once nothing is held open.
    let txn = pipeline.db.begin().await?;

    let token_row = pending_recipient_address::ActiveModel {
        execution_id: Set(execution.id),
        token: Set(token.clone()),
        recipient_email: Set(email.clone()),
        status: Set(AddressTokenStatus::Pending.as_str().to_string()),
        address: Set(None),
        expires_at: Set(expires_at),
        collected_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let changes = execution::ActiveModel {
        address_requested_at: Set(Some(now)),
        ..Default::default()
    };
    let awaiting = transition_execution(&txn, execution, ExecutionStatus::AwaitingAddress, changes)
        .await?
        .ok_or_else(|| lost_race(execution))?;

    append_event(
        &txn,
        EventRefs::rule(rule.id, Some(execution.occurrence_date)).with_execution(execution.id),
        &EventPayload::AddressRequested { expires_at },
        options.is_simulated(),
    )
    .await?;

    txn.commit().await?;

    let sent = pipeline
        .services
        .notifier
        .send(&Notification::AddressRequest {
            to_email: email,
            recipient_name: Some(recipient_name),
            collection_url: format!(
                "{}/{token}",
                pipeline
                    .config
                    .address_collection
                    .collection_url_base
                    .trim_end_matches('/')
            ),
            expires_at,
        })
        .await;
    if let Err(e) = sent {
        withdraw_address_request(pipeline, &token_row, &awaiting).await?;
        return Err(e);
    }

    info!(execution_id = execution.id, %expires_at, "Requested recipient address");
    Ok(DecisionOutcome {
        address_token_expires_at: Some(expires_at),
        ..DecisionOutcome::new(execution.id, ExecutionStatus::AwaitingAddress)
    })
}

/// Undoes an address request whose email never went out: the link is voided and the
/// execution handed back as `approved` so the caller's failure handling applies.
async fn withdraw_address_request(
    pipeline: &Pipeline,
    token_row: &pending_recipient_address::Model,
    awaiting: &execution::Model,
) -> Result<()> {
    let txn = pipeline.db.begin().await?;

    let voided = pending_recipient_address::ActiveModel {
        id: Unchanged(token_row.id),
        status: Set(AddressTokenStatus::Expired.as_str().to_string()),
        ..Default::default()
    };
    match PendingRecipientAddress::update(voided)
        .filter(PendingRecipientAddressColumn::Status.eq(AddressTokenStatus::Pending.as_str()))
        .exec(&txn)
        .await
    {
        Ok(_) | Err(DbErr::RecordNotUpdated) => {}
        Err(e) => return Err(e.into()),
    }

    let changes = execution::ActiveModel {
        address_requested_at: Set(None),
        ..Default::default()
    };
    transition_execution(&txn, awaiting, ExecutionStatus::Approved, changes).await?;

    txn.commit().await?;
    warn!(execution_id = awaiting.id, "Withdrew address request after failed email");
    Ok(())
}

/// Stores the order for an authorized payment and links the execution to it.
#[allow(clippy::too_many_arguments)]
async fn finalize_order(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution: &execution::Model,
    products: &[GiftProduct],
    address: ShippingAddress,
    payment_method_ref: String,
    authorization: PaymentAuthorization,
    options: RunOptions,
) -> Result<DecisionOutcome> {
    let timing = &pipeline.config.timing;
    let delivery = execution.occurrence_date;
    let held = days_until(delivery, options.today()) > timing.hold_threshold_days;
    let hold = held.then(|| hold_until(delivery, timing.shipping_buffer_days));
    let next_status = if held {
        ExecutionStatus::Scheduled
    } else {
        ExecutionStatus::Completed
    };

    let stored = async {
        let txn = pipeline.db.begin().await?;
        let order = create_order(
            &txn,
            NewOrder {
                owner_id: rule.owner_id.clone(),
                rule_id: Some(rule.id),
                execution_id: Some(execution.id),
                status: OrderStatus::Scheduled,
                payment_status: PaymentStatus::Authorized,
                currency: pipeline.config.payments.currency.clone(),
                products: products.to_vec(),
                shipping_address: Some(address),
                delivery_date: delivery,
                payment_method_ref: Some(payment_method_ref),
                payment_authorization_ref: Some(authorization.authorization_ref.clone()),
                setup_ref: None,
                checkout_session_id: None,
                hold_until: hold,
                is_auto_gift: false,
            },
        )
        .await?;

        let changes = execution::ActiveModel {
            order_id: Set(Some(order.id)),
            next_retry_at: Set(None),
            ..Default::default()
        };
        transition_execution(&txn, execution, next_status, changes)
            .await?
            .ok_or_else(|| lost_race(execution))?;

        append_event(
            &txn,
            EventRefs::rule(rule.id, Some(delivery))
                .with_execution(execution.id)
                .with_order(order.id),
            &EventPayload::OrderPlaced {
                held,
                hold_until: hold,
            },
            options.is_simulated(),
        )
        .await?;

        txn.commit().await?;
        Ok::<_, Error>(order)
    }
    .await;

    let order = stored.map_err(|e| {
        error!(
            execution_id = execution.id,
            authorization_ref = %authorization.authorization_ref,
            error = %e,
            "Payment authorized but order could not be stored"
        );
        Error::Consistency {
            message: format!(
                "authorization {} for execution {} has no order: {e}",
                authorization.authorization_ref, execution.id
            ),
        }
    })?;

    pipeline
        .notify_best_effort(&Notification::OrderPlaced {
            to_user_id: rule.owner_id.clone(),
            order_id: order.id,
            delivery_date: delivery,
            hold_until: hold,
        })
        .await;

    info!(
        execution_id = execution.id,
        order_id = order.id,
        held,
        "Approved gift ordered"
    );
    Ok(DecisionOutcome {
        order_id: Some(order.id),
        hold_until: hold,
        ..DecisionOutcome::new(execution.id, next_status)
    })
}

/// Records a failed authorization and either schedules the next attempt or, once the
/// attempts are used up, hands the execution to a human.
async fn schedule_payment_retry(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution: &execution::Model,
    failure: &Error,
    options: RunOptions,
) -> Result<DecisionOutcome> {
    let payments = &pipeline.config.payments;
    let attempt = execution.retry_count.saturating_add(1);
    let refs = EventRefs::rule(rule.id, Some(execution.occurrence_date)).with_execution(execution.id);
    let message = failure.to_string();

    if attempt >= payments.max_authorization_retries {
        let changes = execution::ActiveModel {
            retry_count: Set(attempt),
            next_retry_at: Set(None),
            last_error: Set(Some(message.clone())),
            ..Default::default()
        };
        transition_execution(&pipeline.db, execution, ExecutionStatus::RequiresAttention, changes)
            .await?
            .ok_or_else(|| lost_race(execution))?;
        append_event(
            &pipeline.db,
            refs,
            &EventPayload::PaymentAttentionRequired {
                attempts: attempt,
                error: message.clone(),
            },
            options.is_simulated(),
        )
        .await?;
        pipeline
            .notify_best_effort(&Notification::PaymentMethodUpdateRequired {
                to_user_id: rule.owner_id.clone(),
                execution_id: execution.id,
                error: message,
            })
            .await;

        warn!(execution_id = execution.id, attempt, "Authorization retries exhausted");
        return Ok(DecisionOutcome::new(
            execution.id,
            ExecutionStatus::RequiresAttention,
        ));
    }

    let delay = TimeDelta::try_hours(payments.retry_delay_hours.saturating_mul(i64::from(attempt)))
        .unwrap_or(TimeDelta::MAX);
    let retry_at = options
        .now()
        .checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let changes = execution::ActiveModel {
        retry_count: Set(attempt),
        next_retry_at: Set(Some(retry_at)),
        last_error: Set(Some(message.clone())),
        ..Default::default()
    };
    transition_execution(&pipeline.db, execution, ExecutionStatus::PaymentRetryPending, changes)
        .await?
        .ok_or_else(|| lost_race(execution))?;
    append_event(
        &pipeline.db,
        refs,
        &EventPayload::PaymentRetryScheduled {
            attempt,
            retry_at,
            error: message,
        },
        options.is_simulated(),
    )
    .await?;
    pipeline
        .notify_best_effort(&Notification::PaymentRetryScheduled {
            to_user_id: rule.owner_id.clone(),
            execution_id: execution.id,
            retry_at,
            attempt,
        })
        .await;

    warn!(execution_id = execution.id, attempt, %retry_at, "Authorization failed; retry scheduled");
    Ok(DecisionOutcome {
        next_retry_at: Some(retry_at),
        ..DecisionOutcome::new(execution.id, ExecutionStatus::PaymentRetryPending)
    })
}

/// Puts an execution whose placement failed somewhere sensible.
///
/// Payment problems fail the execution and ask the owner to fix the payment method;
/// anything else returns it to `fallback` so it can be tried again.
async fn recover_from_placement_error(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    execution: &execution::Model,
    fallback: ExecutionStatus,
    failure: &Error,
    options: RunOptions,
) {
    if failure.is_fatal() {
        return;
    }
    let next = if failure.is_payment_related() {
        ExecutionStatus::Failed
    } else {
        fallback
    };
    let changes = execution::ActiveModel {
        last_error: Set(Some(failure.to_string())),
        ..Default::default()
    };

    // The execution may have moved on before the failure (e.g. a stored address
    // request); only reset it when it is still ours.
    let current = match get_execution(&pipeline.db, execution.id).await {
        Ok(current) if current.status == ExecutionStatus::Approved.as_str() => current,
        Ok(_) => return,
        Err(e) => {
            error!(execution_id = execution.id, error = %e, "Could not reload execution");
            return;
        }
    };
    if let Err(e) = transition_execution(&pipeline.db, &current, next, changes).await {
        error!(execution_id = execution.id, error = %e, "Could not reset execution");
    }
    record_failure(
        &pipeline.db,
        EventRefs::rule(rule.id, Some(execution.occurrence_date)).with_execution(execution.id),
        "approval",
        failure,
        options.is_simulated(),
    )
    .await;

    if next == ExecutionStatus::Failed {
        pipeline
            .notify_best_effort(&Notification::PaymentMethodUpdateRequired {
                to_user_id: rule.owner_id.clone(),
                execution_id: execution.id,
                error: failure.to_string(),
            })
            .await;
    }
    warn!(execution_id = execution.id, status = %next, error = %failure, "Gift placement failed");
}

fn lost_race(execution: &execution::Model) -> Error {
    Error::InvalidState {
        entity: "execution",
        id: execution.id,
        status: format!("{} (changed concurrently)", execution.status),
    }
}

/// Re-attempts authorization for executions whose retry time has come.
///
/// # Errors
/// Fails only when the batch query fails or a consistency error occurs.
pub async fn retry_due_payments(
    pipeline: &Pipeline,
    options: RunOptions,
    summary: &mut MaintenanceSummary,
) -> Result<()> {
    let now = options.now();
    let due = Execution::find()
        .filter(ExecutionColumn::Status.eq(ExecutionStatus::PaymentRetryPending.as_str()))
        .filter(ExecutionColumn::NextRetryAt.lte(now))
        .order_by_asc(ExecutionColumn::NextRetryAt)
        .all(&pipeline.db)
        .await?;

    for execution in due {
        summary.retried += 1;
        match retry_execution(pipeline, &execution, options).await {
            Ok(Some(outcome)) => match outcome.status.parse::<ExecutionStatus>() {
                Ok(ExecutionStatus::PaymentRetryPending) => {
                    summary.rescheduled += 1;
                    summary.details.rescheduled_execution_ids.push(execution.id);
                }
                Ok(ExecutionStatus::RequiresAttention) => {
                    summary.requires_attention += 1;
                    summary.details.attention_execution_ids.push(execution.id);
                }
                _ => {
                    summary.recovered += 1;
                    summary.details.recovered_execution_ids.push(execution.id);
                }
            },
            Ok(None) => summary.retried -= 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(execution_id = execution.id, error = %e, "Payment retry failed");
                summary.fail("execution", execution.id, &e);
            }
        }
    }
    Ok(())
}

/// Returns `Ok(None)` when another worker already picked the execution up.
async fn retry_execution(
    pipeline: &Pipeline,
    execution: &execution::Model,
    options: RunOptions,
) -> Result<Option<DecisionOutcome>> {
    if execution.occurrence_date < options.today() {
        return give_up_passed_retry(pipeline, execution, options).await;
    }

    let Some(claimed) = transition_execution(
        &pipeline.db,
        execution,
        ExecutionStatus::Approved,
        execution::ActiveModel { ..Default::default() },
    )
    .await?
    else {
        return Ok(None);
    };

    let placed = async {
        let rule = get_rule(&pipeline.db, claimed.rule_id).await?;
        let products = products_from_json(&claimed.selected_products)?;
        match place_approved(pipeline, &rule, &claimed, &products, options).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                recover_from_placement_error(
                    pipeline,
                    &rule,
                    &claimed,
                    ExecutionStatus::PaymentRetryPending,
                    &e,
                    options,
                )
                .await;
                Err(e)
            }
        }
    }
    .await;
    placed.map(Some)
}

/// The gift can no longer arrive in time; hand the execution to a human instead of
/// charging for it.
async fn give_up_passed_retry(
    pipeline: &Pipeline,
    execution: &execution::Model,
    options: RunOptions,
) -> Result<Option<DecisionOutcome>> {
    let rule = get_rule(&pipeline.db, execution.rule_id).await?;
    let message = format!("event date {} has passed", execution.occurrence_date);
    let changes = execution::ActiveModel {
        next_retry_at: Set(None),
        last_error: Set(Some(message.clone())),
        ..Default::default()
    };
    if transition_execution(&pipeline.db, execution, ExecutionStatus::RequiresAttention, changes)
        .await?
        .is_none()
    {
        return Ok(None);
    }

    append_event(
        &pipeline.db,
        EventRefs::rule(rule.id, Some(execution.occurrence_date)).with_execution(execution.id),
        &EventPayload::PaymentAttentionRequired {
            attempts: execution.retry_count,
            error: message.clone(),
        },
        options.is_simulated(),
    )
    .await?;
    pipeline
        .notify_best_effort(&Notification::PaymentMethodUpdateRequired {
            to_user_id: rule.owner_id.clone(),
            execution_id: execution.id,
            error: message,
        })
        .await;

    warn!(execution_id = execution.id, "Event passed before payment could be authorized");
    Ok(Some(DecisionOutcome::new(
        execution.id,
        ExecutionStatus::RequiresAttention,
    )))
}

/// Stores an address posted to a collection link and makes the execution approvable
/// again.
///
/// # Errors
/// `Error::InvalidToken` for unknown, used or expired tokens and `Error::InvalidAddress`
/// for incomplete addresses.
pub async fn record_collected_address(
    pipeline: &Pipeline,
    token: &str,
    address: ShippingAddress,
    options: RunOptions,
) -> Result<AddressCollectionOutcome> {
    if !address.is_complete() {
        return Err(Error::InvalidAddress {
            message: "recipient name, street, city, postal code and country are required"
                .to_string(),
        });
    }

    let row = PendingRecipientAddress::find()
        .filter(PendingRecipientAddressColumn::Token.eq(token))
        .one(&pipeline.db)
        .await?
        .ok_or_else(|| Error::InvalidToken {
            message: "unknown token".to_string(),
        })?;

    if row.status != AddressTokenStatus::Pending.as_str() {
        return Err(Error::InvalidToken {
            message: format!("token is {}", row.status),
        });
    }

    let now = options.now();
    if row.expires_at <= now {
        expire_token(pipeline, &row, options).await?;
        return Err(Error::InvalidToken {
            message: "token has expired".to_string(),
        });
    }

    let txn = pipeline.db.begin().await?;

    let collected = pending_recipient_address::ActiveModel {
        id: Unchanged(row.id),
        status: Set(AddressTokenStatus::Collected.as_str().to_string()),
        address: Set(Some(address.to_column()?)),
        collected_at: Set(Some(now)),
        ..Default::default()
    };
    match PendingRecipientAddress::update(collected)
        .filter(PendingRecipientAddressColumn::Status.eq(AddressTokenStatus::Pending.as_str()))
        .exec(&txn)
        .await
    {
        Ok(_) => {}
        Err(DbErr::RecordNotUpdated) => {
            return Err(Error::InvalidToken {
                message: "token was already used".to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    }

    let execution = get_execution(&txn, row.execution_id).await?;
    let status = if execution.status == ExecutionStatus::AwaitingAddress.as_str() {
        transition_execution(
            &txn,
            &execution,
            ExecutionStatus::Processing,
            execution::ActiveModel { ..Default::default() },
        )
        .await?
        .map_or(execution.status.clone(), |updated| updated.status)
    } else {
        warn!(
            execution_id = execution.id,
            status = %execution.status,
            "Address collected for an execution that was not waiting for one"
        );
        execution.status.clone()
    };

    append_event(
        &txn,
        EventRefs::rule(execution.rule_id, Some(execution.occurrence_date))
            .with_execution(execution.id),
        &EventPayload::AddressCollected,
        options.is_simulated(),
    )
    .await?;

    txn.commit().await?;

    info!(execution_id = execution.id, "Recipient address collected");
    Ok(AddressCollectionOutcome {
        execution_id: execution.id,
        status,
    })
}

/// Expires pending address links whose deadline has passed and fails their executions.
///
/// # Errors
/// Fails only when the batch query fails.
pub async fn expire_address_tokens(
    pipeline: &Pipeline,
    options: RunOptions,
    summary: &mut MaintenanceSummary,
) -> Result<()> {
    let overdue = PendingRecipientAddress::find()
        .filter(PendingRecipientAddressColumn::Status.eq(AddressTokenStatus::Pending.as_str()))
        .filter(PendingRecipientAddressColumn::ExpiresAt.lte(options.now()))
        .order_by_asc(PendingRecipientAddressColumn::ExpiresAt)
        .all(&pipeline.db)
        .await?;

    for row in overdue {
        match expire_token(pipeline, &row, options).await {
            Ok(true) => {
                summary.tokens_expired += 1;
                summary.details.expired_execution_ids.push(row.execution_id);
            }
            Ok(false) => {}
            Err(e) => {
                error!(execution_id = row.execution_id, error = %e, "Could not expire address token");
                record_failure(
                    &pipeline.db,
                    EventRefs::execution(row.execution_id),
                    "address_expiry",
                    &e,
                    options.is_simulated(),
                )
                .await;
                summary.fail("address_token", row.id, &e);
            }
        }
    }
    Ok(())
}

/// Marks one token expired and fails its execution. Returns `false` when the token
/// was no longer pending.
async fn expire_token(
    pipeline: &Pipeline,
    row: &pending_recipient_address::Model,
    options: RunOptions,
) -> Result<bool> {
    let txn = pipeline.db.begin().await?;

    let expired = pending_recipient_address::ActiveModel {
        id: Unchanged(row.id),
        status: Set(AddressTokenStatus::Expired.as_str().to_string()),
        ..Default::default()
    };
    match PendingRecipientAddress::update(expired)
        .filter(PendingRecipientAddressColumn::Status.eq(AddressTokenStatus::Pending.as_str()))
        .exec(&txn)
        .await
    {
        Ok(_) => {}
        Err(DbErr::RecordNotUpdated) => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let execution = get_execution(&txn, row.execution_id).await?;
    if execution.status == ExecutionStatus::AwaitingAddress.as_str() {
        let changes = execution::ActiveModel {
            last_error: Set(Some("recipient address was not provided in time".to_string())),
            ..Default::default()
        };
        transition_execution(&txn, &execution, ExecutionStatus::Failed, changes).await?;
    }

    append_event(
        &txn,
        EventRefs::rule(execution.rule_id, Some(execution.occurrence_date))
            .with_execution(execution.id),
        &EventPayload::AddressTokenExpired,
        options.is_simulated(),
    )
    .await?;

    txn.commit().await?;
    info!(execution_id = execution.id, "Address collection link expired");
    Ok(true)
}

/// Runs the approval maintenance jobs: payment retries, then address link expiry.
///
/// # Errors
/// Fails only when a batch query fails or a consistency error occurs.
pub async fn run_maintenance(pipeline: &Pipeline, options: RunOptions) -> Result<MaintenanceSummary> {
    let mut summary = MaintenanceSummary::new(options.today(), options.is_simulated(), &pipeline.config);
    info!(today = %options.today(), simulated = options.is_simulated(), "Starting approval maintenance");

    retry_due_payments(pipeline, options, &mut summary).await?;
    expire_address_tokens(pipeline, options, &mut summary).await?;

    info!("{}", format_maintenance_summary(&summary));
    Ok(summary)
}
