//! HTTP invocation surface.
//!
//! - `GET /health`
//! - `POST /jobs/auto-gift`, `/jobs/scheduled-orders`, `/jobs/approval-maintenance`,
//!   each with an optional `{ "simulatedDate": "YYYY-MM-DD" }` body
//! - `POST /rules/{id}/executions` proposes a gift for approval
//! - `POST /executions/{id}/decision`, optionally with `simulatedDate` in the body
//! - `POST /address-collection/{token}`, optionally with a `?simulatedDate=` query
//!
//! Failures are rendered as Problem Details, see [`error::ApiError`].

/// Problem Details error responses
pub mod error;
/// Route handlers
pub mod handlers;

use crate::core::Pipeline;
use axum::{
    Router,
    routing::{get, post},
};

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Pipeline the handlers drive
    pub pipeline: Pipeline,
}

impl AppState {
    /// Wraps a pipeline for the router.
    #[must_use]
    pub const fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}

/// Builds the router with every route registered.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/jobs/auto-gift", post(handlers::run_auto_gift))
        .route("/jobs/scheduled-orders", post(handlers::run_scheduled_orders))
        .route(
            "/jobs/approval-maintenance",
            post(handlers::run_approval_maintenance),
        )
        .route("/rules/{id}/executions", post(handlers::propose))
        .route("/executions/{id}/decision", post(handlers::decide))
        .route(
            "/address-collection/{token}",
            post(handlers::collect_address),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::{executions::propose_execution, orders::create_order},
        entities::PendingRecipientAddress,
        errors::Result,
        test_utils::{
            RuleSpec, TestHarness, date, insert_profile, insert_rule_with, new_order, product,
            sample_address,
        },
    };
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use sea_orm::EntityTrait;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn app(harness: &TestHarness) -> Router {
        router(AppState::new(harness.pipeline.clone()))
    }

    #[tokio::test]
    async fn test_health() -> Result<()> {
        let harness = TestHarness::new().await?;
        let (status, body) = call(app(&harness), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduled_orders_job_with_simulated_date() -> Result<()> {
        let harness = TestHarness::new().await?;
        create_order(&harness.db, new_order("alice", date(2025, 3, 10))).await?;

        let (status, body) = call(
            app(&harness),
            Method::POST,
            "/jobs/scheduled-orders",
            Some(json!({ "simulatedDate": "2025-03-06" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["captured"], 1);
        assert_eq!(body["simulated"], true);
        assert_eq!(body["runDate"], "2025-03-06");
        assert_eq!(body["config"]["captureLeadDays"], 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_jobs_accept_an_empty_body() -> Result<()> {
        let harness = TestHarness::new().await?;
        let (status, body) = call(app(&harness), Method::POST, "/jobs/auto-gift", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["simulated"], false);

        let (status, _) =
            call(app(&harness), Method::POST, "/jobs/approval-maintenance", None).await;
        assert_eq!(status, StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_decision_errors_map_to_problem_responses() -> Result<()> {
        let harness = TestHarness::new().await?;
        let (status, body) = call(
            app(&harness),
            Method::POST,
            "/executions/999/decision",
            Some(json!({ "decision": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        insert_profile(&harness.db, "bob", "Bob", Some(&sample_address("Bob"))).await?;
        let rule = insert_rule_with(&harness.db, RuleSpec::birthday("alice", "bob")).await?;
        let execution =
            propose_execution(&harness.db, &rule, date(2030, 3, 10), &[product("p-1", 1000)], false)
                .await?;
        let uri = format!("/executions/{}/decision", execution.id);

        let (status, _) = call(
            app(&harness),
            Method::POST,
            &uri,
            Some(json!({ "decision": "approve", "selectedProductIds": ["nope"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            app(&harness),
            Method::POST,
            &uri,
            Some(json!({ "decision": "reject", "reason": "not this year" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "rejected");

        let (status, body) = call(
            app(&harness),
            Method::POST,
            &uri,
            Some(json!({ "decision": "reject" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["title"], "Conflict");
        Ok(())
    }

    fn proposed_products() -> Value {
        json!([
            { "productId": "p-1", "title": "Scarf", "priceCents": 2000, "source": "catalog" },
            { "productId": "p-2", "title": "Mug", "priceCents": 1500, "source": "catalog" }
        ])
    }

    #[tokio::test]
    async fn test_propose_then_approve_on_a_simulated_date() -> Result<()> {
        let harness = TestHarness::new().await?;
        insert_profile(&harness.db, "bob", "Bob", Some(&sample_address("Bob"))).await?;
        let rule = insert_rule_with(&harness.db, RuleSpec::birthday("alice", "bob")).await?;

        let (status, body) = call(
            app(&harness),
            Method::POST,
            &format!("/rules/{}/executions", rule.id),
            Some(json!({
                "occurrenceDate": "2025-03-20",
                "products": proposed_products(),
                "simulatedDate": "2025-03-03"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending_approval");
        assert_eq!(body["totalAmountCents"], 3500);
        let execution_id = body["executionId"].as_i64().unwrap();

        // Same occurrence again while the first is open
        let (status, _) = call(
            app(&harness),
            Method::POST,
            &format!("/rules/{}/executions", rule.id),
            Some(json!({ "occurrenceDate": "2025-03-20", "products": proposed_products() })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Seventeen days out on the simulated date, so the order is held
        let (status, body) = call(
            app(&harness),
            Method::POST,
            &format!("/executions/{execution_id}/decision"),
            Some(json!({
                "decision": "approve",
                "selectedProductIds": ["p-1"],
                "simulatedDate": "2025-03-03"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "scheduled");
        assert_eq!(body["holdUntil"], "2025-03-17");
        assert!(body["orderId"].is_i64());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_rule_cannot_take_proposals() -> Result<()> {
        let harness = TestHarness::new().await?;
        let (status, body) = call(
            app(&harness),
            Method::POST,
            "/rules/77/executions",
            Some(json!({ "occurrenceDate": "2025-03-20", "products": proposed_products() })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
        Ok(())
    }

    #[tokio::test]
    async fn test_address_collection_on_a_simulated_date() -> Result<()> {
        let harness = TestHarness::new().await?;
        let rule =
            insert_rule_with(&harness.db, RuleSpec::pending_email("alice", "friend@example.com"))
                .await?;
        let execution = propose_execution(
            &harness.db,
            &rule,
            date(2025, 3, 20),
            &[product("p-1", 2000)],
            true,
        )
        .await?;
        let decision_uri = format!("/executions/{}/decision", execution.id);

        let (status, body) = call(
            app(&harness),
            Method::POST,
            &decision_uri,
            Some(json!({ "decision": "approve", "simulatedDate": "2025-03-03" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "awaiting_address");
        let token = PendingRecipientAddress::find()
            .one(&harness.db)
            .await?
            .unwrap()
            .token;

        // The link is a week old on the wall clock but fresh on the simulated date
        let (status, body) = call(
            app(&harness),
            Method::POST,
            &format!("/address-collection/{token}?simulatedDate=2025-03-04"),
            Some(serde_json::to_value(sample_address("Friend"))?),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processing");

        let (status, body) = call(
            app(&harness),
            Method::POST,
            &decision_uri,
            Some(json!({ "decision": "approve", "simulatedDate": "2025-03-04" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "scheduled");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_address_token_is_rejected() -> Result<()> {
        let harness = TestHarness::new().await?;
        let (status, _) = call(
            app(&harness),
            Method::POST,
            "/address-collection/unknown",
            Some(serde_json::to_value(sample_address("Friend"))?),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }
}
