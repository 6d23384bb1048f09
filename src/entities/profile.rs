//! Profile entity - Read-only view of user profiles owned by the application.
//!
//! The pipeline reads names, emails, dates of birth and shipping addresses from here
//! and never writes to it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Profile database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profiles")]
pub struct Model {
    /// User id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Name shown in notifications
    pub display_name: String,
    /// Contact email
    pub email: String,
    /// `MM-DD` or `YYYY-MM-DD`
    pub date_of_birth: Option<String>,
    /// Default shipping address (`ShippingAddress` as JSON)
    pub shipping_address: Option<Json>,
}

/// `Profile` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
