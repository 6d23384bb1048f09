//! Order creation and status transitions.
//!
//! Orders only move forward. Every status write goes through [`transition_order`], which
//! is a conditional update on the status the caller read: when another worker has already
//! advanced the row the update touches nothing and the caller skips the order.

use crate::{
    core::status::{OrderStatus, PaymentStatus},
    entities::{Order, OrderColumn, order},
    errors::{Error, Result},
    models::{GiftProduct, ShippingAddress, products_to_json},
};
use chrono::NaiveDate;
use sea_orm::{ActiveValue::Unchanged, Condition, DbErr, QueryOrder, Set, prelude::*};

/// Fields of an order about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    /// Paying user
    pub owner_id: String,
    /// Triggering rule
    pub rule_id: Option<i64>,
    /// Approved execution
    pub execution_id: Option<i64>,
    /// Initial status
    pub status: OrderStatus,
    /// Initial payment status
    pub payment_status: PaymentStatus,
    /// ISO currency code
    pub currency: String,
    /// Products being bought
    pub products: Vec<GiftProduct>,
    /// Destination
    pub shipping_address: Option<ShippingAddress>,
    /// Delivery deadline
    pub delivery_date: NaiveDate,
    /// Saved payment method
    pub payment_method_ref: Option<String>,
    /// Held authorization, when already authorized
    pub payment_authorization_ref: Option<String>,
    /// Setup record for deferred authorization
    pub setup_ref: Option<String>,
    /// Checkout session that created the order
    pub checkout_session_id: Option<String>,
    /// Earliest submission date; `Some` marks the order as held
    pub hold_until: Option<NaiveDate>,
    /// Created by the orchestrator rather than by an approval
    pub is_auto_gift: bool,
}

/// Inserts a new order. The total is the sum of the product prices.
pub async fn create_order<C: ConnectionTrait>(db: &C, new: NewOrder) -> Result<order::Model> {
    let now = chrono::Utc::now();
    let total = crate::models::total_cents(&new.products);
    let shipping_address = new
        .shipping_address
        .as_ref()
        .map(ShippingAddress::to_column)
        .transpose()?;

    let order = order::ActiveModel {
        owner_id: Set(new.owner_id),
        rule_id: Set(new.rule_id),
        execution_id: Set(new.execution_id),
        status: Set(new.status.as_str().to_string()),
        payment_status: Set(new.payment_status.as_str().to_string()),
        total_amount_cents: Set(total),
        currency: Set(new.currency),
        products: Set(products_to_json(&new.products)?),
        shipping_address: Set(shipping_address),
        scheduled_delivery_date: Set(new.delivery_date),
        payment_method_ref: Set(new.payment_method_ref),
        payment_authorization_ref: Set(new.payment_authorization_ref),
        setup_ref: Set(new.setup_ref),
        checkout_session_id: Set(new.checkout_session_id),
        fulfillment_ref: Set(None),
        hold_for_scheduled_delivery: Set(new.hold_until.is_some()),
        hold_until: Set(new.hold_until),
        is_auto_gift: Set(new.is_auto_gift),
        note: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    Ok(order.insert(db).await?)
}

/// Retrieves an order by id.
pub async fn get_order<C: ConnectionTrait>(db: &C, order_id: i64) -> Result<order::Model> {
    Order::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(Error::OrderNotFound { id: order_id })
}

/// The order already created for a rule occurrence, if any.
pub async fn find_order_for_occurrence<C: ConnectionTrait>(
    db: &C,
    rule_id: i64,
    delivery_date: NaiveDate,
) -> Result<Option<order::Model>> {
    Ok(Order::find()
        .filter(OrderColumn::RuleId.eq(rule_id))
        .filter(OrderColumn::ScheduledDeliveryDate.eq(delivery_date))
        .one(db)
        .await?)
}

/// Orders in `status` delivering on or before `latest_delivery`, soonest first.
///
/// The date bound is loose; callers re-check their exact ready predicate per row.
pub async fn orders_due<C: ConnectionTrait>(
    db: &C,
    status: OrderStatus,
    payment_status: Option<PaymentStatus>,
    latest_delivery: NaiveDate,
) -> Result<Vec<order::Model>> {
    let mut query = Order::find()
        .filter(OrderColumn::Status.eq(status.as_str()))
        .filter(OrderColumn::ScheduledDeliveryDate.lte(latest_delivery));
    if let Some(payment_status) = payment_status {
        query = query.filter(OrderColumn::PaymentStatus.eq(payment_status.as_str()));
    }
    Ok(query
        .order_by_asc(OrderColumn::ScheduledDeliveryDate)
        .order_by_asc(OrderColumn::Id)
        .all(db)
        .await?)
}

/// Moves `current` to `next`, writing any other fields set in `changes` in the same
/// statement.
///
/// Returns `Ok(None)` when the row no longer has the status `current` was read with.
///
/// # Errors
/// `Error::InvalidState` when `next` would move the order backward or out of a sink.
pub async fn transition_order<C: ConnectionTrait>(
    db: &C,
    current: &order::Model,
    next: OrderStatus,
    mut changes: order::ActiveModel,
) -> Result<Option<order::Model>> {
    let from: OrderStatus = current.status.parse().map_err(|_| Error::InvalidState {
        entity: "order",
        id: current.id,
        status: current.status.clone(),
    })?;
    if !from.can_transition_to(next) {
        return Err(Error::InvalidState {
            entity: "order",
            id: current.id,
            status: format!("{from} -> {next}"),
        });
    }

    changes.id = Unchanged(current.id);
    changes.status = Set(next.as_str().to_string());
    changes.updated_at = Set(chrono::Utc::now());

    conditional_update(
        db,
        changes,
        Condition::all().add(OrderColumn::Status.eq(from.as_str())),
    )
    .await
}

/// Claims an order for a payment operation by swapping its payment status.
///
/// Only one caller can win the claim; everyone else gets `Ok(None)`.
pub async fn claim_payment<C: ConnectionTrait>(
    db: &C,
    current: &order::Model,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<Option<order::Model>> {
    let changes = order::ActiveModel {
        id: Unchanged(current.id),
        payment_status: Set(to.as_str().to_string()),
        updated_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    conditional_update(
        db,
        changes,
        Condition::all()
            .add(OrderColumn::Status.eq(current.status.as_str()))
            .add(OrderColumn::PaymentStatus.eq(from.as_str())),
    )
    .await
}

async fn conditional_update<C: ConnectionTrait>(
    db: &C,
    changes: order::ActiveModel,
    condition: Condition,
) -> Result<Option<order::Model>> {
    match Order::update(changes).filter(condition).exec(db).await {
        Ok(updated) => Ok(Some(updated)),
        Err(DbErr::RecordNotUpdated) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
