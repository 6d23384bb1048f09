//! Pipeline configuration loading from config.toml
//!
//! Lead times, the hold threshold, the captured-status label, the retry policy and the
//! collaborator endpoints are read once at startup and passed to every component, so
//! changing a lead time here changes the timing of the whole pipeline.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// How the orchestrator decides that today is the day to act on a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationGate {
    /// Act only when the day count equals the lead time exactly
    #[default]
    Exact,
    /// Act on any day inside the window that has not been handled yet
    CatchUp,
}

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Lead times and thresholds
    pub timing: TimingConfig,
    /// Currency, status labels and retry policy
    pub payments: PaymentConfig,
    /// Address collection token settings
    pub address_collection: AddressCollectionConfig,
    /// Base URLs of the external collaborators
    pub services: ServiceEndpoints,
}

/// Day counts that drive every timing decision in the pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Days before the event when the owner is reminded
    pub notification_lead_days: i64,
    /// Days before delivery when payment is committed and captured
    pub capture_lead_days: i64,
    /// Days before delivery when the order is submitted for shipping
    pub shipping_buffer_days: i64,
    /// Approved orders further away than this are held
    pub hold_threshold_days: i64,
    /// Day-matching behaviour of the orchestrator
    pub notification_gate: NotificationGate,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            notification_lead_days: 7,
            capture_lead_days: 4,
            shipping_buffer_days: 3,
            hold_threshold_days: 7,
            notification_gate: NotificationGate::Exact,
        }
    }
}

/// Payment settings shared by the approval service and the order processor
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// ISO currency code used for authorizations
    pub currency: String,
    /// `payment_status` written after a successful capture
    pub captured_status_label: String,
    /// Base delay between authorization retries
    pub retry_delay_hours: i64,
    /// Failed authorizations tolerated before the execution needs attention
    pub max_authorization_retries: i32,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            captured_status_label: "captured".to_string(),
            retry_delay_hours: 24,
            max_authorization_retries: 3,
        }
    }
}

/// Settings for the pending-recipient address flow
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AddressCollectionConfig {
    /// Lifetime of a collection token
    pub token_ttl_hours: i64,
    /// Link sent to the recipient; the token is appended
    pub collection_url_base: String,
}

impl Default for AddressCollectionConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: 168,
            collection_url_base: "http://localhost:8080/address-collection".to_string(),
        }
    }
}

/// Base URLs of the HTTP collaborators
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    /// Payment gateway
    pub payment_gateway_url: String,
    /// Checkout session service
    pub checkout_url: String,
    /// Fulfillment submission service
    pub fulfillment_url: String,
    /// Notification and email sender
    pub notifier_url: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            payment_gateway_url: "http://localhost:9101".to_string(),
            checkout_url: "http://localhost:9102".to_string(),
            fulfillment_url: "http://localhost:9103".to_string(),
            notifier_url: "http://localhost:9104".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Rejects settings that would make the timing windows meaningless.
    ///
    /// # Errors
    /// Returns `Error::Config` when a day count or retry setting is out of range.
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if t.capture_lead_days < 0 || t.shipping_buffer_days < 0 || t.hold_threshold_days < 0 {
            return Err(Error::Config {
                message: "lead times must not be negative".to_string(),
            });
        }
        if t.notification_lead_days < t.capture_lead_days {
            return Err(Error::Config {
                message: format!(
                    "notification_lead_days ({}) must be at least capture_lead_days ({})",
                    t.notification_lead_days, t.capture_lead_days
                ),
            });
        }
        if self.payments.retry_delay_hours <= 0 || self.payments.max_authorization_retries < 0 {
            return Err(Error::Config {
                message: "retry policy must use a positive delay".to_string(),
            });
        }
        if self.payments.captured_status_label.trim().is_empty() {
            return Err(Error::Config {
                message: "captured_status_label cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads pipeline configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value fails [`PipelineConfig::validate`]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    debug!("Loading pipeline configuration from {:?}", path.as_ref());
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    let config: PipelineConfig = toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    config.validate()?;
    Ok(config)
}

/// Loads configuration from `GIFTFLOW_CONFIG` or `./config.toml`, falling back to
/// defaults when no file exists.
///
/// # Errors
/// Returns an error if a file exists but cannot be parsed or validated.
pub fn load_default_config() -> Result<PipelineConfig> {
    let path = std::env::var("GIFTFLOW_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    if Path::new(&path).exists() {
        load_config(path)
    } else {
        warn!("No configuration file at {}, using defaults", path);
        let config = PipelineConfig::default();
        config.validate()?;
        Ok(config)
    }
}
