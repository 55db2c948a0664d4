// BSN.cloud client core - session management and resilient HTTP transport

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod request;
pub mod utils;

pub use auth::{AuthManager, Credentials, Network, Token};
pub use client::{ApiSession, BsnClient};
pub use config::{Config, ConfigBuilder, DebugMode};
pub use error::{
    is_api_error, is_authentication_error, is_cancelled, is_configuration_error,
    is_network_error, is_retryable_error, is_retryable_status, is_validation_error, BsnError,
    NetworkErrorKind, Result,
};
pub use http_client::HttpTransport;
pub use request::{RequestSpec, Unwrap};
pub use tokio_util::sync::CancellationToken;
