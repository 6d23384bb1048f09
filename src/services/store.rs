//! Database-backed catalog and profile readers.
//!
//! The application owns the profile, wishlist and catalog tables; these readers only
//! query them.

use super::{GiftCatalog, ProfileStore, RecipientProfile};
use crate::{
    entities::{CatalogProduct, Profile, WishlistItem, catalog_product, wishlist_item},
    errors::Result,
    models::{GiftProduct, ProductSource, ShippingAddress},
};
use async_trait::async_trait;
use sea_orm::{Condition, DatabaseConnection, QueryOrder, QuerySelect, prelude::*};

/// Catalog reader over the `wishlist_items` and `catalog_products` tables.
#[derive(Debug, Clone)]
pub struct DbGiftCatalog {
    db: DatabaseConnection,
}

impl DbGiftCatalog {
    /// Creates a catalog reader on `db`.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GiftCatalog for DbGiftCatalog {
    async fn wishlist(&self, user_id: &str) -> Result<Vec<GiftProduct>> {
        let items = WishlistItem::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .order_by_asc(wishlist_item::Column::PriceCents)
            .all(&self.db)
            .await?;

        Ok(items
            .into_iter()
            .map(|item| GiftProduct {
                product_id: item.product_id,
                title: item.title,
                price_cents: item.price_cents,
                source: ProductSource::Wishlist,
            })
            .collect())
    }

    async fn search(
        &self,
        preferences: Option<&str>,
        max_price_cents: i64,
        limit: u64,
    ) -> Result<Vec<GiftProduct>> {
        let mut query = CatalogProduct::find()
            .filter(catalog_product::Column::Available.eq(true))
            .filter(catalog_product::Column::PriceCents.lte(max_price_cents));

        if let Some(preference) = preferences.map(str::trim).filter(|p| !p.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(catalog_product::Column::Category.eq(preference))
                    .add(catalog_product::Column::Title.contains(preference)),
            );
        }

        let products = query
            .order_by_asc(catalog_product::Column::PriceCents)
            .limit(limit)
            .all(&self.db)
            .await?;

        Ok(products
            .into_iter()
            .map(|product| GiftProduct {
                product_id: product.id,
                title: product.title,
                price_cents: product.price_cents,
                source: ProductSource::Catalog,
            })
            .collect())
    }
}

/// Profile reader over the `profiles` table.
#[derive(Debug, Clone)]
pub struct DbProfileStore {
    db: DatabaseConnection,
}

impl DbProfileStore {
    /// Creates a profile reader on `db`.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileStore for DbProfileStore {
    async fn profile(&self, user_id: &str) -> Result<Option<RecipientProfile>> {
        let profile = Profile::find_by_id(user_id.to_string()).one(&self.db).await?;
        Ok(profile.map(|p| RecipientProfile {
            shipping_address: ShippingAddress::from_column(p.shipping_address.as_ref()),
            user_id: p.id,
            display_name: p.display_name,
            email: p.email,
            date_of_birth: p.date_of_birth,
        }))
    }
}
