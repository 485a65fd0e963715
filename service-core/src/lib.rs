//! service-core: Shared infrastructure for the banking services.
pub mod config;
pub mod error;
pub mod grpc;
pub mod middleware;
pub mod observability;

pub use axum;
pub use serde;
pub use tokio;
pub use tonic;
pub use tracing;
