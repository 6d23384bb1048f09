//! Gifting rule entity - A standing instruction to send a gift for a recurring event.
//!
//! Rules are created by the user-facing setup flow. The pipeline only refreshes
//! `scheduled_date` once an occurrence has passed and never hard-deletes a rule;
//! deactivation flips `active`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Gifting rule database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gifting_rules")]
pub struct Model {
    /// Unique identifier for the rule
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who owns the rule and pays for the gifts
    pub owner_id: String,
    /// Registered recipient, if any
    pub recipient_id: Option<String>,
    /// Email of a recipient who has not registered yet
    pub pending_recipient_email: Option<String>,
    /// Display name used in notifications
    pub recipient_name: Option<String>,
    /// `"birthday"`, `"holiday"` or `"custom"`
    pub date_type: String,
    /// `MM-DD` or `YYYY-MM-DD` for birthdays and custom dates
    pub event_date: Option<String>,
    /// Holiday key such as `"mothers_day"` when `date_type` is `"holiday"`
    pub holiday_key: Option<String>,
    /// Spending limit per occurrence, in cents
    pub budget_limit_cents: i64,
    /// Saved payment method at the gateway
    pub payment_method_ref: Option<String>,
    /// Free-text catalog search hint used when the wishlist has nothing affordable
    pub gift_preferences: Option<String>,
    /// Next resolved occurrence of the event
    pub scheduled_date: Option<Date>,
    /// Soft-deactivation flag
    pub active: bool,
    /// When the rule was created
    pub created_at: DateTimeUtc,
    /// When the rule was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `GiftingRule` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One rule has many executions
    #[sea_orm(has_many = "super::execution::Entity")]
    Executions,
}

impl Related<super::execution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Executions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
