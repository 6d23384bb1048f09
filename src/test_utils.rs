//! Shared test utilities for the gift pipeline.
//!
//! This module provides an in-memory database, row builders with sensible defaults and
//! recording fakes for every collaborator trait, bundled into a [`TestHarness`].

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::{
    config::PipelineConfig,
    core::{
        Pipeline,
        orders::NewOrder,
        status::{OrderStatus, PaymentStatus},
    },
    entities::{catalog_product, gifting_rule, profile, wishlist_item},
    errors::{Error, Result},
    models::{GiftProduct, ProductSource, ShippingAddress},
    services::{
        AuthorizationRequest, CaptureReceipt, CaptureRequest, CheckoutRequest, CheckoutService,
        CheckoutSession, Collaborators, FulfillmentReceipt, FulfillmentRequest,
        FulfillmentService, Notification, Notifier, PaymentAuthorization, PaymentGateway,
        store::{DbGiftCatalog, DbProfileStore},
    },
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{ActiveValue::Unchanged, DatabaseConnection, Set, prelude::*};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Shorthand for a calendar date.
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// A complete address addressed to `name`.
pub fn sample_address(name: &str) -> ShippingAddress {
    ShippingAddress {
        recipient_name: name.to_string(),
        line1: "12 Harbour Street".to_string(),
        line2: None,
        city: "Portland".to_string(),
        region: "OR".to_string(),
        postal_code: "97201".to_string(),
        country: "US".to_string(),
    }
}

/// A catalog product priced at `price_cents`.
pub fn product(product_id: &str, price_cents: i64) -> GiftProduct {
    GiftProduct {
        product_id: product_id.to_string(),
        title: format!("Product {product_id}"),
        price_cents,
        source: ProductSource::Catalog,
    }
}

/// An authorized, unheld order of 30.00 for rule 1.
///
/// # Defaults
/// * status `scheduled`, payment status `authorized`
/// * one product of 3000 cents, shipping to [`sample_address`]
pub fn new_order(owner_id: &str, delivery_date: NaiveDate) -> NewOrder {
    NewOrder {
        owner_id: owner_id.to_string(),
        rule_id: Some(1),
        execution_id: None,
        status: OrderStatus::Scheduled,
        payment_status: PaymentStatus::Authorized,
        currency: "usd".to_string(),
        products: vec![product("gift-1", 3000)],
        shipping_address: Some(sample_address("Bob")),
        delivery_date,
        payment_method_ref: Some("pm_card".to_string()),
        payment_authorization_ref: Some("pi_seeded".to_string()),
        setup_ref: None,
        checkout_session_id: None,
        hold_until: None,
        is_auto_gift: false,
    }
}

/// Fields of a gifting rule to insert.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub owner_id: String,
    pub recipient_id: Option<String>,
    pub pending_recipient_email: Option<String>,
    pub recipient_name: Option<String>,
    pub date_type: String,
    pub event_date: Option<String>,
    pub holiday_key: Option<String>,
    pub budget_limit_cents: i64,
    pub payment_method_ref: Option<String>,
    pub gift_preferences: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
}

impl RuleSpec {
    /// Birthday rule for a registered recipient.
    ///
    /// # Defaults
    /// * no event date (falls back to the recipient's date of birth)
    /// * budget 50.00, payment method `pm_card`
    pub fn birthday(owner_id: &str, recipient_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            recipient_id: Some(recipient_id.to_string()),
            pending_recipient_email: None,
            recipient_name: None,
            date_type: "birthday".to_string(),
            event_date: None,
            holiday_key: None,
            budget_limit_cents: 5000,
            payment_method_ref: Some("pm_card".to_string()),
            gift_preferences: None,
            scheduled_date: None,
        }
    }

    /// Birthday rule for a recipient known only by email.
    pub fn pending_email(owner_id: &str, email: &str) -> Self {
        Self {
            recipient_id: None,
            pending_recipient_email: Some(email.to_string()),
            recipient_name: Some("Friend".to_string()),
            event_date: Some("03-20".to_string()),
            ..Self::birthday(owner_id, "")
        }
    }
}

/// Inserts a rule built from a [`RuleSpec`].
pub async fn insert_rule_with(
    db: &DatabaseConnection,
    spec: RuleSpec,
) -> Result<gifting_rule::Model> {
    let now = chrono::Utc::now();
    let rule = gifting_rule::ActiveModel {
        owner_id: Set(spec.owner_id),
        recipient_id: Set(spec.recipient_id),
        pending_recipient_email: Set(spec.pending_recipient_email),
        recipient_name: Set(spec.recipient_name),
        date_type: Set(spec.date_type),
        event_date: Set(spec.event_date),
        holiday_key: Set(spec.holiday_key),
        budget_limit_cents: Set(spec.budget_limit_cents),
        payment_method_ref: Set(spec.payment_method_ref),
        gift_preferences: Set(spec.gift_preferences),
        scheduled_date: Set(spec.scheduled_date),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Ok(rule.insert(db).await?)
}

/// Inserts a birthday rule from `owner_id` to `bob` with default settings.
pub async fn insert_rule(db: &DatabaseConnection, owner_id: &str) -> Result<gifting_rule::Model> {
    insert_rule_with(db, RuleSpec::birthday(owner_id, "bob")).await
}

/// Inserts a profile whose email is `{user_id}@example.com`.
pub async fn insert_profile(
    db: &DatabaseConnection,
    user_id: &str,
    display_name: &str,
    address: Option<&ShippingAddress>,
) -> Result<profile::Model> {
    let row = profile::ActiveModel {
        id: Set(user_id.to_string()),
        display_name: Set(display_name.to_string()),
        email: Set(format!("{user_id}@example.com")),
        date_of_birth: Set(None),
        shipping_address: Set(address.map(ShippingAddress::to_column).transpose()?),
    };
    Ok(row.insert(db).await?)
}

/// Sets the date of birth of an existing profile.
pub async fn set_date_of_birth(
    db: &DatabaseConnection,
    user_id: &str,
    date_of_birth: &str,
) -> Result<()> {
    profile::ActiveModel {
        id: Unchanged(user_id.to_string()),
        date_of_birth: Set(Some(date_of_birth.to_string())),
        ..Default::default()
    }
    .update(db)
    .await?;
    Ok(())
}

/// Adds an item to a user's wishlist.
pub async fn insert_wishlist_item(
    db: &DatabaseConnection,
    user_id: &str,
    product_id: &str,
    title: &str,
    price_cents: i64,
) -> Result<wishlist_item::Model> {
    let row = wishlist_item::ActiveModel {
        user_id: Set(user_id.to_string()),
        product_id: Set(product_id.to_string()),
        title: Set(title.to_string()),
        price_cents: Set(price_cents),
        ..Default::default()
    };
    Ok(row.insert(db).await?)
}

/// Adds a catalog product.
pub async fn insert_catalog_product(
    db: &DatabaseConnection,
    product_id: &str,
    title: &str,
    price_cents: i64,
    category: &str,
    available: bool,
) -> Result<catalog_product::Model> {
    let row = catalog_product::ActiveModel {
        id: Set(product_id.to_string()),
        title: Set(title.to_string()),
        price_cents: Set(price_cents),
        category: Set(category.to_string()),
        available: Set(available),
    };
    Ok(row.insert(db).await?)
}

/// Gateway fake that records every call and fails on demand.
#[derive(Debug, Default)]
pub struct FakePayments {
    authorizations: Mutex<Vec<AuthorizationRequest>>,
    captures: Mutex<Vec<CaptureRequest>>,
    authorization_failure: Mutex<Option<String>>,
    capture_failure: Mutex<Option<String>>,
    setup_failure: Mutex<Option<String>>,
}

impl FakePayments {
    /// Every later authorization fails with `message`.
    pub fn fail_authorizations(&self, message: &str) {
        *self.authorization_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Authorizations succeed again.
    pub fn succeed_authorizations(&self) {
        *self.authorization_failure.lock().unwrap() = None;
    }

    /// Every later capture fails with `message`.
    pub fn fail_captures(&self, message: &str) {
        *self.capture_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Every later setup lookup fails with `message`.
    pub fn fail_setup_lookups(&self, message: &str) {
        *self.setup_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Authorization attempts so far, failed ones included.
    pub fn authorizations(&self) -> Vec<AuthorizationRequest> {
        self.authorizations.lock().unwrap().clone()
    }

    /// Capture attempts so far, failed ones included.
    pub fn captures(&self) -> Vec<CaptureRequest> {
        self.captures.lock().unwrap().clone()
    }
}

fn failure(slot: &Mutex<Option<String>>) -> Result<()> {
    match slot.lock().unwrap().clone() {
        Some(message) => Err(Error::Payment { message }),
        None => Ok(()),
    }
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<PaymentAuthorization> {
        let attempt = {
            let mut calls = self.authorizations.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };
        failure(&self.authorization_failure)?;
        Ok(PaymentAuthorization {
            authorization_ref: format!("pi_{attempt}"),
        })
    }

    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReceipt> {
        let attempt = {
            let mut calls = self.captures.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };
        failure(&self.capture_failure)?;
        Ok(CaptureReceipt {
            capture_ref: format!("ch_{attempt}"),
        })
    }

    async fn saved_payment_method(&self, _setup_ref: &str) -> Result<String> {
        failure(&self.setup_failure)?;
        Ok("pm_saved".to_string())
    }
}

/// Checkout fake returning `cs_{n}` sessions with `seti_{n}` setup records.
#[derive(Debug, Default)]
pub struct FakeCheckout {
    requests: Mutex<Vec<CheckoutRequest>>,
}

impl FakeCheckout {
    /// Sessions requested so far.
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckoutService for FakeCheckout {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let n = requests.len();
        Ok(CheckoutSession {
            session_id: format!("cs_{n}"),
            setup_ref: Some(format!("seti_{n}")),
        })
    }
}

/// Fulfillment fake that records submissions.
#[derive(Debug, Default)]
pub struct FakeFulfillment {
    submissions: Mutex<Vec<FulfillmentRequest>>,
    failure: Mutex<Option<String>>,
}

impl FakeFulfillment {
    /// Every later submission fails with `message`.
    pub fn fail_submissions(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Submissions attempted so far.
    pub fn submissions(&self) -> Vec<FulfillmentRequest> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl FulfillmentService for FakeFulfillment {
    async fn submit(&self, request: &FulfillmentRequest) -> Result<FulfillmentReceipt> {
        self.submissions.lock().unwrap().push(request.clone());
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(Error::Fulfillment { message });
        }
        Ok(FulfillmentReceipt {
            fulfillment_ref: format!("ful_{}", request.order_id),
        })
    }
}

/// Notifier fake that keeps every delivered notification.
#[derive(Debug, Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<Notification>>,
    failure: Mutex<Option<String>>,
}

impl FakeNotifier {
    /// Every later send fails with `message`.
    pub fn fail_sends(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Sends succeed again.
    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(Error::Notification { message });
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A pipeline over an in-memory database with recording fakes for the remote
/// collaborators and the database-backed catalog and profile readers.
pub struct TestHarness {
    pub db: DatabaseConnection,
    pub pipeline: Pipeline,
    pub payments: Arc<FakePayments>,
    pub checkout: Arc<FakeCheckout>,
    pub fulfillment: Arc<FakeFulfillment>,
    pub notifier: Arc<FakeNotifier>,
}

impl TestHarness {
    /// Fresh database, default configuration, fakes that succeed.
    pub async fn new() -> Result<Self> {
        init_test_tracing();
        let db = setup_test_db().await?;
        let payments = Arc::new(FakePayments::default());
        let checkout = Arc::new(FakeCheckout::default());
        let fulfillment = Arc::new(FakeFulfillment::default());
        let notifier = Arc::new(FakeNotifier::default());

        let services = Collaborators {
            payments: Arc::clone(&payments) as Arc<dyn PaymentGateway>,
            checkout: Arc::clone(&checkout) as Arc<dyn CheckoutService>,
            fulfillment: Arc::clone(&fulfillment) as Arc<dyn FulfillmentService>,
            notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
            catalog: Arc::new(DbGiftCatalog::new(db.clone())),
            profiles: Arc::new(DbProfileStore::new(db.clone())),
        };
        let pipeline = Pipeline::new(db.clone(), PipelineConfig::default(), services);

        Ok(Self {
            db,
            pipeline,
            payments,
            checkout,
            fulfillment,
            notifier,
        })
    }

    /// Rebuilds the pipeline with an adjusted configuration.
    pub fn configure(&mut self, adjust: impl FnOnce(&mut PipelineConfig)) {
        let mut config = (*self.pipeline.config).clone();
        adjust(&mut config);
        self.pipeline = Pipeline::new(self.db.clone(), config, self.pipeline.services.clone());
    }
}
