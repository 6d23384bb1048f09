//! HTTP JSON clients for the remote collaborators.
//!
//! Each collaborator is a thin wrapper over [`JsonEndpoint`], which POSTs a JSON body,
//! forwards an idempotency key when one is given, and turns both transport failures and
//! non-2xx responses into the error variant of that collaborator.

use super::{
    AuthorizationRequest, CaptureReceipt, CaptureRequest, CheckoutRequest, CheckoutService,
    CheckoutSession, FulfillmentReceipt, FulfillmentRequest, FulfillmentService, Notification,
    Notifier, PaymentAuthorization, PaymentGateway,
};
use crate::{
    config::ServiceEndpoints,
    errors::{Error, Result},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, warn};

/// Which collaborator an endpoint talks to; selects the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Remote {
    Payments,
    Checkout,
    Fulfillment,
    Notifications,
}

impl Remote {
    fn error(self, message: String) -> Error {
        match self {
            Self::Payments => Error::Payment { message },
            Self::Checkout => Error::Checkout { message },
            Self::Fulfillment => Error::Fulfillment { message },
            Self::Notifications => Error::Notification { message },
        }
    }
}

/// A base URL plus the shared client and credentials.
#[derive(Debug, Clone)]
struct JsonEndpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    remote: Remote,
}

impl JsonEndpoint {
    fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>, remote: Remote) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            remote,
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B, idempotency_key: Option<&str>) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        self.send(path, body, idempotency_key)
            .await?
            .json::<R>()
            .await
            .map_err(|e| self.remote.error(format!("invalid response from {url}: {e}")))
    }

    async fn send<B>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: Option<&str>,
    ) -> Result<reqwest::Response>
    where
        B: Serialize + Sync,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "POST to collaborator");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.remote.error(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, %status, "collaborator returned an error");
            return Err(self.remote.error(format!("{status}: {body}")));
        }
        Ok(response)
    }
}

/// Builds the shared HTTP client used by every collaborator.
///
/// # Errors
/// Returns `Error::Http` if the TLS backend cannot be initialised.
pub fn build_client(endpoints: &ServiceEndpoints) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(endpoints.request_timeout_secs))
        .build()?)
}

/// Payment gateway over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    endpoint: JsonEndpoint,
}

impl HttpPaymentGateway {
    /// Creates a gateway client for `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            endpoint: JsonEndpoint::new(client, base_url, api_key, Remote::Payments),
        }
    }
}

#[derive(Debug, Serialize)]
struct SetupLookup<'a> {
    setup_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct SetupRecord {
    payment_method: Option<String>,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<PaymentAuthorization> {
        self.endpoint
            .post(
                "/payment-intents/authorize",
                request,
                Some(&request.idempotency_key),
            )
            .await
    }

    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReceipt> {
        self.endpoint
            .post(
                "/payment-intents/capture",
                request,
                Some(&request.idempotency_key),
            )
            .await
    }

    async fn saved_payment_method(&self, setup_ref: &str) -> Result<String> {
        let record: SetupRecord = self
            .endpoint
            .post("/setup-intents/retrieve", &SetupLookup { setup_ref }, None)
            .await?;
        record.payment_method.ok_or_else(|| Error::Payment {
            message: format!("setup record {setup_ref} has no saved payment method"),
        })
    }
}

/// Checkout session service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCheckoutService {
    endpoint: JsonEndpoint,
}

impl HttpCheckoutService {
    /// Creates a checkout client for `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            endpoint: JsonEndpoint::new(client, base_url, api_key, Remote::Checkout),
        }
    }
}

#[async_trait]
impl CheckoutService for HttpCheckoutService {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let key = format!(
            "auto-gift-{}-{}",
            request.metadata.rule_id, request.metadata.occurrence_date
        );
        self.endpoint.post("/sessions", request, Some(&key)).await
    }
}

/// Fulfillment submission over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFulfillmentService {
    endpoint: JsonEndpoint,
}

impl HttpFulfillmentService {
    /// Creates a fulfillment client for `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            endpoint: JsonEndpoint::new(client, base_url, api_key, Remote::Fulfillment),
        }
    }
}

#[async_trait]
impl FulfillmentService for HttpFulfillmentService {
    async fn submit(&self, request: &FulfillmentRequest) -> Result<FulfillmentReceipt> {
        let key = format!("fulfillment-{}", request.order_id);
        self.endpoint.post("/orders", request, Some(&key)).await
    }
}

/// Notification sender over HTTP.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    endpoint: JsonEndpoint,
}

impl HttpNotifier {
    /// Creates a notification client for `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            endpoint: JsonEndpoint::new(client, base_url, api_key, Remote::Notifications),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.endpoint
            .send(
                &format!("/notifications/{}", notification.template()),
                notification,
                None,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_keep_their_kind() {
        assert!(Remote::Payments.error("declined".to_string()).is_payment_related());
        assert!(matches!(
            Remote::Fulfillment.error("down".to_string()),
            Error::Fulfillment { .. }
        ));
        assert!(matches!(
            Remote::Checkout.error("bad".to_string()),
            Error::Checkout { .. }
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let endpoint = JsonEndpoint::new(
            reqwest::Client::new(),
            "http://gateway.local/",
            None,
            Remote::Payments,
        );
        assert_eq!(endpoint.base_url, "http://gateway.local");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_a_payment_error() {
        let client = build_client(&ServiceEndpoints {
            request_timeout_secs: 1,
            ..ServiceEndpoints::default()
        });
        let Ok(client) = client else {
            return;
        };
        let gateway = HttpPaymentGateway::new(client, "http://127.0.0.1:9", None);
        let result = gateway.saved_payment_method("seti_123").await;
        assert!(matches!(result, Err(Error::Payment { .. })));
    }
}
