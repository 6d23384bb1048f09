//! Pending recipient address entity - Single-use address collection token.
//!
//! Issued when an approved gift goes to a recipient known only by email. The row is
//! terminal once an address is collected or the token expires.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Pending recipient address database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_recipient_addresses")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Execution waiting on this address
    pub execution_id: i64,
    /// Random collection token sent to the recipient
    #[sea_orm(unique)]
    pub token: String,
    /// Email the collection link was sent to
    pub recipient_email: String,
    /// `"pending"`, `"collected"` or `"expired"`
    pub status: String,
    /// Collected shipping address (`ShippingAddress` as JSON)
    pub address: Option<Json>,
    /// Token expiry
    pub expires_at: DateTimeUtc,
    /// When the address arrived
    pub collected_at: Option<DateTimeUtc>,
    /// When the token was issued
    pub created_at: DateTimeUtc,
}

/// `PendingRecipientAddress` belongs to an execution
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The execution waiting on this address
    #[sea_orm(
        belongs_to = "super::execution::Entity",
        from = "Column::ExecutionId",
        to = "super::execution::Column::Id"
    )]
    Execution,
}

impl Related<super::execution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Execution.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
