//! Entity module - Contains all SeaORM entity definitions for the database.
//! Pipeline-owned tables (rules, executions, orders, audit trails) live next to the
//! read-only tables the default collaborators read from (profiles, wishlists, catalog).

pub mod catalog_product;
pub mod event_log;
pub mod execution;
pub mod gifting_rule;
pub mod order;
pub mod payment_audit;
pub mod pending_recipient_address;
pub mod profile;
pub mod wishlist_item;

// Re-export specific types to avoid conflicts
pub use catalog_product::{Entity as CatalogProduct, Model as CatalogProductModel};
pub use event_log::{Column as EventLogColumn, Entity as EventLog, Model as EventLogModel};
pub use execution::{Column as ExecutionColumn, Entity as Execution, Model as ExecutionModel};
pub use gifting_rule::{
    Column as GiftingRuleColumn, Entity as GiftingRule, Model as GiftingRuleModel,
};
pub use order::{Column as OrderColumn, Entity as Order, Model as OrderModel};
pub use payment_audit::{Entity as PaymentAudit, Model as PaymentAuditModel};
pub use pending_recipient_address::{
    Column as PendingRecipientAddressColumn, Entity as PendingRecipientAddress,
    Model as PendingRecipientAddressModel,
};
pub use profile::{Entity as Profile, Model as ProfileModel};
pub use wishlist_item::{Entity as WishlistItem, Model as WishlistItemModel};
