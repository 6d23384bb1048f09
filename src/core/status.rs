//! Status vocabularies for executions, orders, payments and address tokens.
//!
//! Statuses are persisted as strings; these enums are the only place the strings are
//! spelled out. The order status set is strictly ordered and [`OrderStatus::can_transition_to`]
//! is the single authority on which moves are legal.

use std::fmt;
use std::str::FromStr;

/// Lifecycle of an [`Order`](crate::entities::order::Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    /// Created through a setup-only checkout; no authorization yet
    PendingPayment,
    /// Payment authorized; possibly held until closer to the event
    Scheduled,
    /// Payment captured
    PaymentConfirmed,
    /// Submitted to fulfillment
    Processing,
    /// Needs a human before anything else happens
    RequiresAttention,
    /// Terminal failure
    Failed,
}

impl OrderStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Scheduled => "scheduled",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::Processing => "processing",
            Self::RequiresAttention => "requires_attention",
            Self::Failed => "failed",
        }
    }

    /// Position in the forward chain; `None` for the error sinks.
    #[must_use]
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::PendingPayment => Some(0),
            Self::Scheduled => Some(1),
            Self::PaymentConfirmed => Some(2),
            Self::Processing => Some(3),
            Self::RequiresAttention | Self::Failed => None,
        }
    }

    /// Error sinks accept no further transitions.
    #[must_use]
    pub const fn is_sink(self) -> bool {
        self.rank().is_none()
    }

    /// Orders only move forward, or from any non-sink status into a sink.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self.rank(), next.rank()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(target)) => target > current,
        }
    }
}

/// Payment progress of an order. The captured state is written with the configured
/// label (see [`PaymentConfig::captured_status_label`](crate::config::PaymentConfig)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    /// Waiting for the saved payment method to be authorized
    RequiresSetup,
    /// Funds are held at the gateway
    Authorized,
    /// A capture call is in flight
    Capturing,
    /// Deferred authorization failed
    AuthorizationFailed,
    /// Capture was refused
    CaptureFailed,
}

impl PaymentStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequiresSetup => "requires_setup",
            Self::Authorized => "authorized",
            Self::Capturing => "capturing",
            Self::AuthorizationFailed => "authorization_failed",
            Self::CaptureFailed => "capture_failed",
        }
    }
}

/// Lifecycle of an [`Execution`](crate::entities::execution::Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    /// Waiting for the owner's decision
    PendingApproval,
    /// Being worked on, or ready to be approved again after an address arrived
    Processing,
    /// Approved, order placement in progress
    Approved,
    /// Declined by the owner
    Rejected,
    /// Waiting for a pending recipient to provide an address
    AwaitingAddress,
    /// Authorization failed; a retry is scheduled
    PaymentRetryPending,
    /// Order placed and held until closer to the event
    Scheduled,
    /// Order placed for immediate processing
    Completed,
    /// Terminal failure
    Failed,
    /// Retries exhausted; needs a human
    RequiresAttention,
}

impl ExecutionStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Processing => "processing",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AwaitingAddress => "awaiting_address",
            Self::PaymentRetryPending => "payment_retry_pending",
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RequiresAttention => "requires_attention",
        }
    }

    /// Terminal executions no longer block a new attempt for the same occurrence.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::Scheduled
                | Self::Completed
                | Self::Failed
                | Self::RequiresAttention
        )
    }

    /// Statuses in which an approve/reject decision is accepted.
    #[must_use]
    pub const fn accepts_decision(self) -> bool {
        matches!(self, Self::PendingApproval | Self::Processing)
    }

    /// All statuses that still occupy the (rule, occurrence) slot.
    #[must_use]
    pub fn non_terminal() -> Vec<&'static str> {
        ALL_EXECUTION_STATUSES
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.as_str())
            .collect()
    }
}

const ALL_EXECUTION_STATUSES: [ExecutionStatus; 10] = [
    ExecutionStatus::PendingApproval,
    ExecutionStatus::Processing,
    ExecutionStatus::Approved,
    ExecutionStatus::Rejected,
    ExecutionStatus::AwaitingAddress,
    ExecutionStatus::PaymentRetryPending,
    ExecutionStatus::Scheduled,
    ExecutionStatus::Completed,
    ExecutionStatus::Failed,
    ExecutionStatus::RequiresAttention,
];

/// Lifecycle of a pending recipient address token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressTokenStatus {
    /// Link sent, no address yet
    Pending,
    /// Address received
    Collected,
    /// Token lapsed
    Expired,
}

impl AddressTokenStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Collected => "collected",
            Self::Expired => "expired",
        }
    }
}

/// Error for status strings that are not part of a vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::PendingPayment,
            Self::Scheduled,
            Self::PaymentConfirmed,
            Self::Processing,
            Self::RequiresAttention,
            Self::Failed,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl FromStr for ExecutionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_EXECUTION_STATUSES
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
