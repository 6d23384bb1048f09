//! Event log entity - Append-only audit trail of pipeline events.
//!
//! Rows are inserted through [`crate::core::event_log::append_event`] and never updated.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Event log database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "event_log")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event name such as `"notified"` or `"checkout_created"`
    pub event_type: String,
    /// Rule the event concerns
    pub rule_id: Option<i64>,
    /// Execution the event concerns
    pub execution_id: Option<i64>,
    /// Order the event concerns
    pub order_id: Option<i64>,
    /// Occurrence of the event being gifted
    pub occurrence_date: Option<Date>,
    /// Structured payload (`EventPayload` as JSON)
    pub payload: Json,
    /// Whether the run used a simulated date
    pub is_simulated: bool,
    /// When the event was recorded
    pub created_at: DateTimeUtc,
}

/// `EventLog` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
