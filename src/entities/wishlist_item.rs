//! Wishlist item entity - Read-only wishlist entries maintained by recipients.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wishlist item database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wishlist_items")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the wishlist
    pub user_id: String,
    /// Catalog product id
    pub product_id: String,
    /// Product title
    pub title: String,
    /// Price in cents
    pub price_cents: i64,
}

/// `WishlistItem` has no relationships managed by the pipeline
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
