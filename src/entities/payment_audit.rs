//! Payment audit entity - Append-only record of every gateway call that moves money.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment audit database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_audit")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Execution the payment belongs to
    pub execution_id: Option<i64>,
    /// Order the payment belongs to
    pub order_id: Option<i64>,
    /// `"authorize"`, `"capture"` or `"setup_lookup"`
    pub operation: String,
    /// Amount involved, in cents
    pub amount_cents: i64,
    /// `"succeeded"` or `"failed"`
    pub outcome: String,
    /// Gateway reference on success
    pub gateway_ref: Option<String>,
    /// Gateway message on failure
    pub error: Option<String>,
    /// When the call completed
    pub created_at: DateTimeUtc,
}

/// `PaymentAudit` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
