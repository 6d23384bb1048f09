//! Gateway calls with an audit trail.
//!
//! Every call that can move money writes one `payment_audit` row with its outcome,
//! whether it succeeded or not.

use crate::{
    core::Pipeline,
    entities::payment_audit,
    errors::{Error, Result},
    services::{AuthorizationRequest, CaptureReceipt, CaptureRequest, PaymentAuthorization},
};
use sea_orm::{ActiveModelTrait, Set};
use tracing::warn;

/// What a payment audit row is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentRefs {
    /// Execution being paid for
    pub execution_id: Option<i64>,
    /// Order being paid for
    pub order_id: Option<i64>,
}

/// Requests a manual-capture authorization.
pub async fn authorize(
    pipeline: &Pipeline,
    refs: PaymentRefs,
    request: &AuthorizationRequest,
) -> Result<PaymentAuthorization> {
    let result = pipeline.services.payments.authorize(request).await;
    let gateway_ref = result.as_ref().ok().map(|a| a.authorization_ref.clone());
    audit(pipeline, refs, "authorize", request.amount_cents, gateway_ref, result.as_ref().err()).await;
    result
}

/// Captures a held authorization.
pub async fn capture(
    pipeline: &Pipeline,
    refs: PaymentRefs,
    request: &CaptureRequest,
) -> Result<CaptureReceipt> {
    let result = pipeline.services.payments.capture(request).await;
    let gateway_ref = result.as_ref().ok().map(|c| c.capture_ref.clone());
    audit(pipeline, refs, "capture", request.amount_cents, gateway_ref, result.as_ref().err()).await;
    result
}

/// Looks up the payment method saved on a checkout setup record.
pub async fn saved_payment_method(
    pipeline: &Pipeline,
    refs: PaymentRefs,
    setup_ref: &str,
) -> Result<String> {
    let result = pipeline.services.payments.saved_payment_method(setup_ref).await;
    audit(
        pipeline,
        refs,
        "setup_lookup",
        0,
        Some(setup_ref.to_string()),
        result.as_ref().err(),
    )
    .await;
    result
}

async fn audit(
    pipeline: &Pipeline,
    refs: PaymentRefs,
    operation: &str,
    amount_cents: i64,
    gateway_ref: Option<String>,
    error: Option<&Error>,
) {
    let row = payment_audit::ActiveModel {
        execution_id: Set(refs.execution_id),
        order_id: Set(refs.order_id),
        operation: Set(operation.to_string()),
        amount_cents: Set(amount_cents),
        outcome: Set(if error.is_some() { "failed" } else { "succeeded" }.to_string()),
        gateway_ref: Set(gateway_ref),
        error: Set(error.map(ToString::to_string)),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    if let Err(e) = row.insert(&pipeline.db).await {
        warn!(
            operation,
            execution_id = refs.execution_id,
            order_id = refs.order_id,
            error = %e,
            "Could not write payment audit row"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::PaymentAudit, test_utils::TestHarness};
    use sea_orm::EntityTrait;
    use std::collections::BTreeMap;

    fn request(amount_cents: i64) -> AuthorizationRequest {
        AuthorizationRequest {
            payment_method_ref: "pm_card".to_string(),
            customer_id: "alice".to_string(),
            amount_cents,
            currency: "usd".to_string(),
            idempotency_key: "authorize-test".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_every_outcome_is_audited() -> Result<()> {
        let harness = TestHarness::new().await?;
        let refs = PaymentRefs {
            execution_id: Some(1),
            order_id: None,
        };

        authorize(&harness.pipeline, refs, &request(2500)).await?;
        harness.payments.fail_authorizations("card declined");
        let failed = authorize(&harness.pipeline, refs, &request(2500)).await;
        assert!(matches!(failed, Err(Error::Payment { .. })));

        let rows = PaymentAudit::find().all(&harness.db).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].outcome, "succeeded");
        assert!(rows[0].gateway_ref.is_some());
        assert_eq!(rows[1].outcome, "failed");
        assert_eq!(rows[1].error.as_deref(), Some("Payment error: card declined"));
        assert_eq!(rows[1].execution_id, Some(1));
        Ok(())
    }
}
