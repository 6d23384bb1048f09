/// Database configuration and connection management
pub mod database;

/// Pipeline timing, payment and collaborator settings from config.toml
pub mod pipeline;

pub use pipeline::{
    AddressCollectionConfig, NotificationGate, PaymentConfig, PipelineConfig, ServiceEndpoints,
    TimingConfig,
};
