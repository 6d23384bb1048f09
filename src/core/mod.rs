//! Core business logic - framework-agnostic pipeline components.
//!
//! The orchestrator, the approval service and the scheduled order processor are plain
//! async functions over a [`Pipeline`]. The HTTP layer only parses requests and renders
//! the summaries these functions return.

/// Approval decisions, payment retries and address collection
pub mod approval;
/// Event date resolution for birthdays, holidays and custom dates
pub mod dates;
/// Append-only audit trail
pub mod event_log;
/// Execution lookups and the one-open-execution-per-occurrence rule
pub mod executions;
/// Rule scanning, reminders and auto-gift checkouts
pub mod orchestrator;
/// Order creation and conditional status transitions
pub mod orders;
/// Audited payment gateway calls
pub mod payments;
/// Run summaries returned by every batch job
pub mod report;
/// Authorize, capture and submit stages for scheduled orders
pub mod scheduled_orders;
/// Status vocabularies
pub mod status;
/// Lead-time arithmetic shared by every component
pub mod timing;

use crate::{
    config::PipelineConfig,
    services::{Collaborators, Notification},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::warn;

/// Everything a pipeline run needs: the store, the configuration and the collaborators.
///
/// Built once at startup and cloned into each request; cloning is cheap.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Database connection pool
    pub db: DatabaseConnection,
    /// Effective configuration
    pub config: Arc<PipelineConfig>,
    /// External collaborators
    pub services: Collaborators,
}

impl Pipeline {
    /// Bundles a connection, a configuration and a collaborator set.
    #[must_use]
    pub fn new(db: DatabaseConnection, config: PipelineConfig, services: Collaborators) -> Self {
        Self {
            db,
            config: Arc::new(config),
            services,
        }
    }

    /// Sends a notification whose failure must not undo the work it reports on.
    pub async fn notify_best_effort(&self, notification: &Notification) {
        if let Err(e) = self.services.notifier.send(notification).await {
            warn!(template = notification.template(), error = %e, "Notification failed");
        }
    }
}
