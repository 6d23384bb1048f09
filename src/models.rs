//! Typed payloads stored in JSON columns.
//!
//! Products and addresses travel between the orchestrator, the approval service, the
//! order processor and the collaborators as these structs; JSON only exists at the
//! database and HTTP boundaries.

use crate::errors::Result;
use sea_orm::prelude::Json;
use serde::{Deserialize, Serialize};

/// Where a gift candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSource {
    /// The recipient's wishlist
    Wishlist,
    /// Catalog search fallback
    Catalog,
}

/// A gift candidate or a selected gift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftProduct {
    /// Catalog product id
    pub product_id: String,
    /// Product title
    pub title: String,
    /// Price in cents
    pub price_cents: i64,
    /// Origin of the candidate
    pub source: ProductSource,
}

/// A postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    /// Name on the parcel
    pub recipient_name: String,
    /// Street line
    pub line1: String,
    /// Apartment, suite, etc.
    #[serde(default)]
    pub line2: Option<String>,
    /// City
    pub city: String,
    /// State or region
    pub region: String,
    /// Postal code
    pub postal_code: String,
    /// ISO country code
    pub country: String,
}

impl ShippingAddress {
    /// An address is usable when every mandatory line is filled in.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [
            &self.recipient_name,
            &self.line1,
            &self.city,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }

    /// Reads an address from an optional JSON column; malformed or incomplete
    /// addresses count as missing.
    #[must_use]
    pub fn from_column(value: Option<&Json>) -> Option<Self> {
        value
            .and_then(|json| serde_json::from_value::<Self>(json.clone()).ok())
            .filter(Self::is_complete)
    }

    /// JSON column value for this address.
    pub fn to_column(&self) -> Result<Json> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Serializes products for a JSON column.
pub fn products_to_json(products: &[GiftProduct]) -> Result<Json> {
    Ok(serde_json::to_value(products)?)
}

/// Deserializes products from a JSON column.
pub fn products_from_json(value: &Json) -> Result<Vec<GiftProduct>> {
    Ok(serde_json::from_value(value.clone())?)
}

/// Sum of product prices, in cents.
#[must_use]
pub fn total_cents(products: &[GiftProduct]) -> i64 {
    products
        .iter()
        .fold(0_i64, |acc, p| acc.saturating_add(p.price_cents))
}
