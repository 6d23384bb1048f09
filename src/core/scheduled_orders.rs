//! Scheduled order processor.
//!
//! Three stages run one after the other on every invocation:
//!
//! 0. deferred (checkout-created) orders inside the capture window are authorized,
//! 1. authorized orders inside the capture window are captured,
//! 2. paid orders inside the shipping window, and past their hold, are submitted.
//!
//! Each stage loads its candidates with a loose date bound and re-checks the exact ready
//! predicate per row. Every status write is conditional on the status the row was read
//! with, so an order some other worker already advanced is skipped.

use crate::{
    core::{
        Pipeline,
        event_log::{EventPayload, EventRefs, append_event, record_failure},
        orders::{claim_payment, orders_due, transition_order},
        payments::{self, PaymentRefs},
        report::{ProcessorSummary, format_processor_summary},
        status::{OrderStatus, PaymentStatus},
        timing::{RunOptions, add_days, is_ready},
    },
    entities::order,
    errors::{Error, Result},
    models::{ShippingAddress, products_from_json},
    services::{AuthorizationRequest, CaptureRequest, FulfillmentRequest, Notification},
};
use sea_orm::Set;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// What happened to one order in a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StageOutcome {
    /// The stage moved the order forward
    Advanced,
    /// Not ready yet, or claimed by someone else
    Skipped(String),
    /// The order stopped in a sink
    Stopped(String),
}

/// Runs the authorize, capture and submit stages for `options.today()`.
///
/// # Errors
/// Fails only when a batch query fails or a consistency error occurs; per-order
/// failures are recorded in the summary.
pub async fn run(pipeline: &Pipeline, options: RunOptions) -> Result<ProcessorSummary> {
    let today = options.today();
    let mut summary = ProcessorSummary::new(today, options.is_simulated(), &pipeline.config);
    info!(%today, simulated = options.is_simulated(), "Starting scheduled order run");

    authorize_deferred(pipeline, options, &mut summary).await?;
    capture_authorized(pipeline, options, &mut summary).await?;
    submit_confirmed(pipeline, options, &mut summary).await?;

    info!("{}", format_processor_summary(&summary));
    Ok(summary)
}

async fn authorize_deferred(
    pipeline: &Pipeline,
    options: RunOptions,
    summary: &mut ProcessorSummary,
) -> Result<()> {
    let today = options.today();
    let lead = pipeline.config.timing.capture_lead_days;
    let orders = orders_due(
        &pipeline.db,
        OrderStatus::PendingPayment,
        None,
        add_days(today, lead),
    )
    .await?;

    for order in orders {
        if !is_ready(order.scheduled_delivery_date, lead, today) {
            summary.skip(order.id, "outside the capture window");
            continue;
        }
        match authorize_order(pipeline, &order, options).await {
            Ok(StageOutcome::Advanced) => {
                summary.authorized += 1;
                summary.details.authorized_order_ids.push(order.id);
            }
            outcome => tally(pipeline, summary, &order, "authorize", outcome, options).await?,
        }
    }
    Ok(())
}

async fn authorize_order(
    pipeline: &Pipeline,
    order: &order::Model,
    options: RunOptions,
) -> Result<StageOutcome> {
    let refs = PaymentRefs {
        execution_id: order.execution_id,
        order_id: Some(order.id),
    };

    let authorization = async {
        let setup_ref = order
            .setup_ref
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Payment {
                message: "order has no payment setup record".to_string(),
            })?;
        let payment_method_ref = payments::saved_payment_method(pipeline, refs, setup_ref).await?;
        let request = AuthorizationRequest {
            payment_method_ref: payment_method_ref.clone(),
            customer_id: order.owner_id.clone(),
            amount_cents: order.total_amount_cents,
            currency: order.currency.clone(),
            idempotency_key: format!("authorize-{}", order.id),
            metadata: BTreeMap::from([("orderId".to_string(), order.id.to_string())]),
        };
        let authorization = payments::authorize(pipeline, refs, &request).await?;
        Ok::<_, Error>((payment_method_ref, authorization))
    }
    .await;

    let (payment_method_ref, authorization) = match authorization {
        Ok(authorized) => authorized,
        Err(e) if e.is_payment_related() => {
            return stop(
                pipeline,
                order,
                OrderStatus::RequiresAttention,
                PaymentStatus::AuthorizationFailed,
                &EventPayload::AuthorizationFailed {
                    error: e.to_string(),
                },
                format!("Deferred authorization failed: {e}"),
                options,
            )
            .await;
        }
        Err(e) => return Err(e),
    };

    let changes = order::ActiveModel {
        payment_status: Set(PaymentStatus::Authorized.as_str().to_string()),
        payment_method_ref: Set(Some(payment_method_ref)),
        payment_authorization_ref: Set(Some(authorization.authorization_ref.clone())),
        ..Default::default()
    };
    if transition_order(&pipeline.db, order, OrderStatus::Scheduled, changes)
        .await?
        .is_none()
    {
        return Err(Error::Consistency {
            message: format!(
                "authorization {} for order {} was not recorded",
                authorization.authorization_ref, order.id
            ),
        });
    }

    append_event(
        &pipeline.db,
        order_refs(order),
        &EventPayload::OrderAuthorized {
            authorization_ref: authorization.authorization_ref,
        },
        options.is_simulated(),
    )
    .await?;
    info!(order_id = order.id, "Deferred order authorized");
    Ok(StageOutcome::Advanced)
}

async fn capture_authorized(
    pipeline: &Pipeline,
    options: RunOptions,
    summary: &mut ProcessorSummary,
) -> Result<()> {
    let today = options.today();
    let lead = pipeline.config.timing.capture_lead_days;
    let orders = orders_due(
        &pipeline.db,
        OrderStatus::Scheduled,
        Some(PaymentStatus::Authorized),
        add_days(today, lead),
    )
    .await?;

    for order in orders {
        if !is_ready(order.scheduled_delivery_date, lead, today) {
            summary.skip(order.id, "outside the capture window");
            continue;
        }
        match capture_order(pipeline, &order, options).await {
            Ok(StageOutcome::Advanced) => {
                summary.captured += 1;
                summary.details.captured_order_ids.push(order.id);
            }
            outcome => tally(pipeline, summary, &order, "capture", outcome, options).await?,
        }
    }
    Ok(())
}

async fn capture_order(
    pipeline: &Pipeline,
    order: &order::Model,
    options: RunOptions,
) -> Result<StageOutcome> {
    let Some(authorization_ref) = order.payment_authorization_ref.clone() else {
        return stop(
            pipeline,
            order,
            OrderStatus::RequiresAttention,
            PaymentStatus::CaptureFailed,
            &EventPayload::CaptureFailed {
                error: "missing authorization reference".to_string(),
            },
            "Authorized order has no authorization reference".to_string(),
            options,
        )
        .await;
    };

    // At most one capture per order: whoever swaps authorized -> capturing owns it.
    let Some(claimed) = claim_payment(
        &pipeline.db,
        order,
        PaymentStatus::Authorized,
        PaymentStatus::Capturing,
    )
    .await?
    else {
        return Ok(StageOutcome::Skipped("already claimed for capture".to_string()));
    };

    let request = CaptureRequest {
        authorization_ref,
        amount_cents: order.total_amount_cents,
        idempotency_key: format!("capture-{}", order.id),
    };
    let refs = PaymentRefs {
        execution_id: order.execution_id,
        order_id: Some(order.id),
    };

    let receipt = match payments::capture(pipeline, refs, &request).await {
        Ok(receipt) => receipt,
        Err(e) if e.is_payment_related() => {
            return stop(
                pipeline,
                &claimed,
                OrderStatus::Failed,
                PaymentStatus::CaptureFailed,
                &EventPayload::CaptureFailed {
                    error: e.to_string(),
                },
                format!("Payment capture failed: {e}"),
                options,
            )
            .await;
        }
        Err(e) => return Err(e),
    };

    let changes = order::ActiveModel {
        payment_status: Set(pipeline.config.payments.captured_status_label.clone()),
        ..Default::default()
    };
    if transition_order(&pipeline.db, &claimed, OrderStatus::PaymentConfirmed, changes)
        .await?
        .is_none()
    {
        error!(order_id = order.id, capture_ref = %receipt.capture_ref, "Captured order changed underneath");
        return Err(Error::Consistency {
            message: format!(
                "capture {} for order {} was not recorded",
                receipt.capture_ref, order.id
            ),
        });
    }

    append_event(
        &pipeline.db,
        order_refs(order),
        &EventPayload::PaymentCaptured {
            capture_ref: receipt.capture_ref,
        },
        options.is_simulated(),
    )
    .await?;
    info!(order_id = order.id, amount_cents = order.total_amount_cents, "Payment captured");
    Ok(StageOutcome::Advanced)
}

async fn submit_confirmed(
    pipeline: &Pipeline,
    options: RunOptions,
    summary: &mut ProcessorSummary,
) -> Result<()> {
    let today = options.today();
    let buffer = pipeline.config.timing.shipping_buffer_days;
    let orders = orders_due(
        &pipeline.db,
        OrderStatus::PaymentConfirmed,
        None,
        add_days(today, buffer),
    )
    .await?;

    for order in orders {
        if !is_ready(order.scheduled_delivery_date, buffer, today) {
            summary.skip(order.id, "outside the shipping window");
            continue;
        }
        if let Some(hold) = order.hold_until.filter(|_| order.hold_for_scheduled_delivery) {
            if today < hold {
                summary.skip(order.id, format!("held until {hold}"));
                continue;
            }
        }
        match submit_order(pipeline, &order, options).await {
            Ok(StageOutcome::Advanced) => {
                summary.submitted += 1;
                summary.details.submitted_order_ids.push(order.id);
            }
            outcome => tally(pipeline, summary, &order, "submit", outcome, options).await?,
        }
    }
    Ok(())
}

async fn submit_order(
    pipeline: &Pipeline,
    order: &order::Model,
    options: RunOptions,
) -> Result<StageOutcome> {
    let request = FulfillmentRequest {
        order_id: order.id,
        products: products_from_json(&order.products)?,
        shipping_address: ShippingAddress::from_column(order.shipping_address.as_ref()),
        delivery_date: order.scheduled_delivery_date,
    };

    let receipt = match pipeline.services.fulfillment.submit(&request).await {
        Ok(receipt) => receipt,
        Err(e) if !e.is_fatal() => {
            let note = format!("Fulfillment submission failed: {e}");
            let changes = order::ActiveModel {
                note: Set(Some(note.clone())),
                ..Default::default()
            };
            if transition_order(&pipeline.db, order, OrderStatus::Failed, changes)
                .await?
                .is_none()
            {
                return Ok(StageOutcome::Skipped("advanced by another worker".to_string()));
            }
            append_event(
                &pipeline.db,
                order_refs(order),
                &EventPayload::SubmissionFailed {
                    error: e.to_string(),
                },
                options.is_simulated(),
            )
            .await?;
            notify_attention(pipeline, order, &note).await;
            return Ok(StageOutcome::Stopped(note));
        }
        Err(e) => return Err(e),
    };

    let changes = order::ActiveModel {
        fulfillment_ref: Set(Some(receipt.fulfillment_ref.clone())),
        ..Default::default()
    };
    if transition_order(&pipeline.db, order, OrderStatus::Processing, changes)
        .await?
        .is_none()
    {
        warn!(order_id = order.id, "Submitted order changed underneath");
        return Ok(StageOutcome::Skipped("advanced by another worker".to_string()));
    }

    append_event(
        &pipeline.db,
        order_refs(order),
        &EventPayload::OrderSubmitted {
            fulfillment_ref: receipt.fulfillment_ref,
        },
        options.is_simulated(),
    )
    .await?;
    info!(order_id = order.id, "Order submitted to fulfillment");
    Ok(StageOutcome::Advanced)
}

/// Parks an order in a sink with a payment status and a note, then tells the owner.
#[allow(clippy::too_many_arguments)]
async fn stop(
    pipeline: &Pipeline,
    order: &order::Model,
    sink: OrderStatus,
    payment_status: PaymentStatus,
    event: &EventPayload,
    note: String,
    options: RunOptions,
) -> Result<StageOutcome> {
    let changes = order::ActiveModel {
        payment_status: Set(payment_status.as_str().to_string()),
        note: Set(Some(note.clone())),
        ..Default::default()
    };
    if transition_order(&pipeline.db, order, sink, changes)
        .await?
        .is_none()
    {
        return Ok(StageOutcome::Skipped("advanced by another worker".to_string()));
    }
    append_event(&pipeline.db, order_refs(order), event, options.is_simulated()).await?;
    notify_attention(pipeline, order, &note).await;
    warn!(order_id = order.id, status = %sink, %note, "Order stopped");
    Ok(StageOutcome::Stopped(note))
}

async fn notify_attention(pipeline: &Pipeline, order: &order::Model, note: &str) {
    pipeline
        .notify_best_effort(&Notification::OrderNeedsAttention {
            to_user_id: order.owner_id.clone(),
            order_id: order.id,
            note: note.to_string(),
        })
        .await;
}

/// Books a non-advancing outcome into the summary. Fatal errors end the run.
async fn tally(
    pipeline: &Pipeline,
    summary: &mut ProcessorSummary,
    order: &order::Model,
    stage: &str,
    outcome: Result<StageOutcome>,
    options: RunOptions,
) -> Result<()> {
    match outcome {
        Ok(StageOutcome::Advanced) => {}
        Ok(StageOutcome::Skipped(reason)) => summary.skip(order.id, reason),
        Ok(StageOutcome::Stopped(note)) => summary.fail(order.id, note),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            error!(order_id = order.id, stage, error = %e, "Scheduled order stage failed");
            record_failure(&pipeline.db, order_refs(order), stage, &e, options.is_simulated())
                .await;
            summary.fail(order.id, &e);
        }
    }
    Ok(())
}

fn order_refs(order: &order::Model) -> EventRefs {
    let mut refs = EventRefs::order(order.id);
    refs.rule_id = order.rule_id;
    refs.execution_id = order.execution_id;
    refs.occurrence_date = Some(order.scheduled_delivery_date);
    refs
}
