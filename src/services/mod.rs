//! External collaborators of the pipeline.
//!
//! Payment gateway, checkout sessions, fulfillment submission, notifications, the gift
//! catalog and the profile store are all reached through the traits in this module. The
//! pipeline receives them as a [`Collaborators`] bundle built once at startup, so a worker
//! carries no global state and tests swap in recording fakes.

/// HTTP JSON clients for the remote collaborators
pub mod http;
/// Database-backed catalog and profile readers
pub mod store;

use crate::{
    errors::Result,
    models::{GiftProduct, ShippingAddress},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Manual-capture authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    /// Saved payment method to charge
    pub payment_method_ref: String,
    /// Paying user
    pub customer_id: String,
    /// Amount to hold, in cents
    pub amount_cents: i64,
    /// ISO currency code
    pub currency: String,
    /// Key the gateway uses to collapse duplicate requests
    pub idempotency_key: String,
    /// Free-form references echoed back by the gateway
    pub metadata: BTreeMap<String, String>,
}

/// Held authorization returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    /// Gateway id of the authorization
    pub authorization_ref: String,
}

/// Capture of a previously held authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    /// Authorization to capture
    pub authorization_ref: String,
    /// Amount to capture, in cents
    pub amount_cents: i64,
    /// Key the gateway uses to collapse duplicate requests
    pub idempotency_key: String,
}

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReceipt {
    /// Gateway id of the charge
    pub capture_ref: String,
}

/// Metadata linking a checkout back to the rule that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutMetadata {
    /// Always true for orchestrator checkouts
    pub is_auto_gift: bool,
    /// Triggering rule
    pub rule_id: i64,
    /// Occurrence being gifted
    pub occurrence_date: NaiveDate,
}

/// Request for a pending-order checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Paying user
    pub owner_id: String,
    /// Order total, in cents
    pub amount_cents: i64,
    /// ISO currency code
    pub currency: String,
    /// Products being bought
    pub products: Vec<GiftProduct>,
    /// Destination
    pub shipping_address: ShippingAddress,
    /// Delivery deadline
    pub delivery_date: NaiveDate,
    /// Saved payment method of the rule
    pub payment_method_ref: String,
    /// Auto-gift linkage
    pub metadata: CheckoutMetadata,
}

/// Checkout session created for a pending order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    /// Session id at the checkout service
    pub session_id: String,
    /// Setup record holding the payment method for later authorization
    #[serde(default)]
    pub setup_ref: Option<String>,
}

/// Order handed to the fulfillment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentRequest {
    /// Pipeline order id; the fulfillment service deduplicates on it
    pub order_id: i64,
    /// Products to buy and ship
    pub products: Vec<GiftProduct>,
    /// Destination
    pub shipping_address: Option<ShippingAddress>,
    /// Delivery deadline
    pub delivery_date: NaiveDate,
}

/// Result of a fulfillment submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentReceipt {
    /// Reference at the fulfillment service
    pub fulfillment_ref: String,
}

/// Every message the pipeline sends, one variant per template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum Notification {
    /// Upcoming event with gift suggestions
    GiftReminder {
        /// Rule owner
        to_user_id: String,
        /// Recipient display name
        recipient_name: String,
        /// Occasion label
        occasion: String,
        /// Date of the event
        event_date: NaiveDate,
        /// Inexpensive-first candidates
        candidates: Vec<GiftProduct>,
    },
    /// A proposed gift was declined
    ApprovalRejected {
        /// Rule owner
        to_user_id: String,
        /// Execution that was rejected
        execution_id: i64,
        /// Reason given
        reason: Option<String>,
    },
    /// Ask a pending recipient for a shipping address
    AddressRequest {
        /// Recipient email
        to_email: String,
        /// Recipient display name
        recipient_name: Option<String>,
        /// Link carrying the collection token
        collection_url: String,
        /// When the link stops working
        expires_at: DateTime<Utc>,
    },
    /// Authorization failed and will be retried
    PaymentRetryScheduled {
        /// Rule owner
        to_user_id: String,
        /// Execution being paid for
        execution_id: i64,
        /// Next attempt
        retry_at: DateTime<Utc>,
        /// Attempts made so far
        attempt: i32,
    },
    /// Payment cannot proceed until the owner updates the payment method
    PaymentMethodUpdateRequired {
        /// Rule owner
        to_user_id: String,
        /// Execution being paid for
        execution_id: i64,
        /// Gateway message
        error: String,
    },
    /// An approved gift was ordered
    OrderPlaced {
        /// Rule owner
        to_user_id: String,
        /// New order
        order_id: i64,
        /// Delivery deadline
        delivery_date: NaiveDate,
        /// Earliest submission date when held
        hold_until: Option<NaiveDate>,
    },
    /// An order stopped and needs a human
    OrderNeedsAttention {
        /// Order owner
        to_user_id: String,
        /// Affected order
        order_id: i64,
        /// What happened
        note: String,
    },
}

impl Notification {
    /// Template name used by the sender.
    #[must_use]
    pub const fn template(&self) -> &'static str {
        match self {
            Self::GiftReminder { .. } => "gift_reminder",
            Self::ApprovalRejected { .. } => "approval_rejected",
            Self::AddressRequest { .. } => "address_request",
            Self::PaymentRetryScheduled { .. } => "payment_retry_scheduled",
            Self::PaymentMethodUpdateRequired { .. } => "payment_method_update_required",
            Self::OrderPlaced { .. } => "order_placed",
            Self::OrderNeedsAttention { .. } => "order_needs_attention",
        }
    }
}

/// Read-only view of a user profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientProfile {
    /// User id
    pub user_id: String,
    /// Name shown in notifications
    pub display_name: String,
    /// Contact email
    pub email: String,
    /// `MM-DD` or `YYYY-MM-DD`
    pub date_of_birth: Option<String>,
    /// Usable default address, if any
    pub shipping_address: Option<ShippingAddress>,
}

/// Authorizes and captures payments.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Holds funds without charging them.
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<PaymentAuthorization>;
    /// Converts a held authorization into a charge.
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReceipt>;
    /// Payment method saved on a setup record by the checkout flow.
    async fn saved_payment_method(&self, setup_ref: &str) -> Result<String>;
}

/// Creates checkout sessions for orchestrator-driven orders.
#[async_trait]
pub trait CheckoutService: Send + Sync {
    /// Creates a session for a pending order.
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;
}

/// Hands paid orders to the party that buys and ships the item.
#[async_trait]
pub trait FulfillmentService: Send + Sync {
    /// Submits an order.
    async fn submit(&self, request: &FulfillmentRequest) -> Result<FulfillmentReceipt>;
}

/// Sends emails and in-app notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Source of gift candidates.
#[async_trait]
pub trait GiftCatalog: Send + Sync {
    /// Every item on a user's wishlist.
    async fn wishlist(&self, user_id: &str) -> Result<Vec<GiftProduct>>;
    /// Available catalog products priced at or below `max_price_cents`, cheapest first.
    async fn search(
        &self,
        preferences: Option<&str>,
        max_price_cents: i64,
        limit: u64,
    ) -> Result<Vec<GiftProduct>>;
}

/// Read access to user profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Profile for `user_id`, if the user exists.
    async fn profile(&self, user_id: &str) -> Result<Option<RecipientProfile>>;
}

/// The collaborator set a pipeline run talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Payment gateway
    pub payments: Arc<dyn PaymentGateway>,
    /// Checkout session service
    pub checkout: Arc<dyn CheckoutService>,
    /// Fulfillment submission service
    pub fulfillment: Arc<dyn FulfillmentService>,
    /// Notification sender
    pub notifier: Arc<dyn Notifier>,
    /// Gift catalog
    pub catalog: Arc<dyn GiftCatalog>,
    /// Profile store
    pub profiles: Arc<dyn ProfileStore>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
