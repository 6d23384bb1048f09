//! Database configuration module for the gift pipeline.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs without hand-written SQL.

use crate::entities::{
    CatalogProduct, EventLog, Execution, GiftingRule, Order, PaymentAudit,
    PendingRecipientAddress, Profile, WishlistItem,
};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/giftflow.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table_for<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all pipeline and read-model tables if they do not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table_for(db, &schema, GiftingRule).await?;
    create_table_for(db, &schema, Execution).await?;
    create_table_for(db, &schema, PendingRecipientAddress).await?;
    create_table_for(db, &schema, Order).await?;
    create_table_for(db, &schema, EventLog).await?;
    create_table_for(db, &schema, PaymentAudit).await?;
    create_table_for(db, &schema, Profile).await?;
    create_table_for(db, &schema, WishlistItem).await?;
    create_table_for(db, &schema, CatalogProduct).await?;

    info!("Database tables ensured.");
    Ok(())
}
