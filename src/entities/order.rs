//! Order entity - The financial and shipping unit of the pipeline.
//!
//! An order is created once and then only moves forward through its status set.
//! Status writes are conditional on the previously read status, see
//! [`crate::core::orders::transition_order`].

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Order database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Unique identifier for the order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User paying for the order
    pub owner_id: String,
    /// Rule that triggered the order, for orchestrator-driven orders
    pub rule_id: Option<i64>,
    /// Execution that produced the order, for approved orders
    pub execution_id: Option<i64>,
    /// See [`crate::core::status::OrderStatus`]
    pub status: String,
    /// See [`crate::core::status::PaymentStatus`]
    pub payment_status: String,
    /// Order total, in cents
    pub total_amount_cents: i64,
    /// ISO currency code
    pub currency: String,
    /// Products in the order (`Vec<GiftProduct>` as JSON)
    pub products: Json,
    /// Shipping address (`ShippingAddress` as JSON)
    pub shipping_address: Option<Json>,
    /// Date the gift must arrive
    pub scheduled_delivery_date: Date,
    /// Saved payment method used for authorization
    pub payment_method_ref: Option<String>,
    /// Authorization held at the gateway
    pub payment_authorization_ref: Option<String>,
    /// Setup record created by the checkout flow for deferred orders
    pub setup_ref: Option<String>,
    /// Checkout session that created the order
    pub checkout_session_id: Option<String>,
    /// Reference returned by the fulfillment service
    pub fulfillment_ref: Option<String>,
    /// Whether the order is held until closer to the event
    pub hold_for_scheduled_delivery: bool,
    /// Earliest day the order may be submitted when held
    pub hold_until: Option<Date>,
    /// Whether the order came from an automatic gifting rule
    pub is_auto_gift: bool,
    /// Human-readable note, set on failures
    pub note: Option<String>,
    /// When the order was created
    pub created_at: DateTimeUtc,
    /// When the order was last modified
    pub updated_at: DateTimeUtc,
}

/// `Order` has no relations managed by the pipeline
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
