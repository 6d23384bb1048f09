//! Unified error type for the gift fulfillment pipeline.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped the way
//! the pipeline treats them: resolution errors block a single rule or execution, payment
//! errors feed the retry/attention flow, fulfillment errors fail an order, and consistency
//! errors are always propagated to the caller.

use thiserror::Error;

/// Errors produced by the pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Any failure reported by the database layer
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// No gifting rule with this id
    #[error("Gifting rule {id} not found")]
    RuleNotFound {
        /// Rule id that was looked up
        id: i64,
    },

    /// No execution with this id
    #[error("Execution {id} not found")]
    ExecutionNotFound {
        /// Execution id that was looked up
        id: i64,
    },

    /// No order with this id
    #[error("Order {id} not found")]
    OrderNotFound {
        /// Order id that was looked up
        id: i64,
    },

    /// A record is not in a status that allows the requested action
    #[error("Invalid state for {entity} {id}: {status}")]
    InvalidState {
        /// Kind of record (`"execution"`, `"order"`, ...)
        entity: &'static str,
        /// Record id
        id: i64,
        /// Status the record was found in
        status: String,
    },

    /// A product selection that does not match the proposed products
    #[error("Invalid product selection: {message}")]
    InvalidSelection {
        /// Description of the mismatch
        message: String,
    },

    /// The address collection token is unknown, used or expired
    #[error("Address collection token is not valid: {message}")]
    InvalidToken {
        /// Why the token was refused
        message: String,
    },

    /// A submitted shipping address is missing mandatory lines
    #[error("Invalid shipping address: {message}")]
    InvalidAddress {
        /// What is missing
        message: String,
    },

    /// The gifting rule has no payment method configured
    #[error("No payment method configured for rule {rule_id}")]
    PaymentMethodMissing {
        /// Rule missing its payment method
        rule_id: i64,
    },

    /// No shipping address could be resolved for the recipient
    #[error("No shipping address available for {recipient}")]
    AddressUnavailable {
        /// Recipient id or email
        recipient: String,
    },

    /// Neither the wishlist nor the catalog produced a gift within budget
    #[error("No gift found within budget of {budget_cents} cents")]
    NoAffordableGift {
        /// Budget limit that was applied
        budget_cents: i64,
    },

    /// The event date for a rule could not be computed
    #[error("Could not resolve event date for rule {rule_id}")]
    DateUnresolvable {
        /// Rule whose date is unresolvable
        rule_id: i64,
    },

    /// Payment gateway refused or failed an operation
    #[error("Payment error: {message}")]
    Payment {
        /// Message reported by the gateway
        message: String,
    },

    /// Fulfillment submission failed
    #[error("Fulfillment error: {message}")]
    Fulfillment {
        /// Message reported by the fulfillment service
        message: String,
    },

    /// Checkout session creation failed
    #[error("Checkout error: {message}")]
    Checkout {
        /// Message reported by the checkout service
        message: String,
    },

    /// A notification could not be delivered
    #[error("Notification error: {message}")]
    Notification {
        /// Message reported by the sender
        message: String,
    },

    /// Money moved but the matching records could not be linked
    #[error("Consistency error: {message}")]
    Consistency {
        /// What was left inconsistent
        message: String,
    },

    /// Transport failure talking to a collaborator
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Payload (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or unreadable environment variable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Payment errors are routed to the retry or "update your payment method" flows.
    #[must_use]
    pub const fn is_payment_related(&self) -> bool {
        matches!(self, Self::Payment { .. } | Self::PaymentMethodMissing { .. })
    }

    /// Errors caused by the request rather than by the pipeline.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::InvalidSelection { .. }
                | Self::InvalidToken { .. }
                | Self::InvalidAddress { .. }
        )
    }

    /// Errors that must never be swallowed by a batch loop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_errors_are_classified() {
        assert!(
            Error::Payment {
                message: "card_declined".to_string()
            }
            .is_payment_related()
        );
        assert!(Error::PaymentMethodMissing { rule_id: 1 }.is_payment_related());
        assert!(
            !Error::Fulfillment {
                message: "down".to_string()
            }
            .is_payment_related()
        );
    }

    #[test]
    fn test_client_and_fatal_classification() {
        let invalid = Error::InvalidState {
            entity: "execution",
            id: 3,
            status: "rejected".to_string(),
        };
        assert!(invalid.is_client_error());
        assert!(!invalid.is_fatal());
        assert_eq!(invalid.to_string(), "Invalid state for execution 3: rejected");

        let consistency = Error::Consistency {
            message: "order 9 not linked".to_string(),
        };
        assert!(consistency.is_fatal());
        assert!(!consistency.is_client_error());
    }
}
