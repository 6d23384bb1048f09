//! Execution entity - One attempt to fulfill a gifting rule for one occurrence.
//!
//! At most one non-terminal execution exists per `(rule_id, occurrence_date)`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Execution database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "executions")]
pub struct Model {
    /// Unique identifier for the execution
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Rule this execution fulfills
    pub rule_id: i64,
    /// Occurrence of the event being gifted
    pub occurrence_date: Date,
    /// See [`crate::core::status::ExecutionStatus`]
    pub status: String,
    /// Products proposed or, after approval, selected (`Vec<GiftProduct>` as JSON)
    pub selected_products: Json,
    /// Sum of the selected products, in cents
    pub total_amount_cents: i64,
    /// Order created for this execution
    pub order_id: Option<i64>,
    /// Reason given on rejection
    pub rejection_reason: Option<String>,
    /// Number of failed payment authorization attempts
    pub retry_count: i32,
    /// When the next authorization retry is due
    pub next_retry_at: Option<DateTimeUtc>,
    /// Last error recorded for this execution
    pub last_error: Option<String>,
    /// When an address collection link was sent
    pub address_requested_at: Option<DateTimeUtc>,
    /// When the execution was created
    pub created_at: DateTimeUtc,
    /// When the execution was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Execution and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each execution belongs to one rule
    #[sea_orm(
        belongs_to = "super::gifting_rule::Entity",
        from = "Column::RuleId",
        to = "super::gifting_rule::Column::Id"
    )]
    GiftingRule,
}

impl Related<super::gifting_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GiftingRule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
