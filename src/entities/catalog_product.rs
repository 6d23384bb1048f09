//! Catalog product entity - Read-only product catalog used as a gift fallback.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog product database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "catalog_products")]
pub struct Model {
    /// Product id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Product title
    pub title: String,
    /// Price in cents
    pub price_cents: i64,
    /// Category used for preference matching
    pub category: String,
    /// Whether the product can currently be ordered
    pub available: bool,
}

/// `CatalogProduct` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
