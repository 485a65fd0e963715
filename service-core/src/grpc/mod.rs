//! gRPC utilities shared by the banking services.
//!
//! - Conversion of domain and infrastructure errors into `tonic::Status`
//! - Interceptors for request id and trace context propagation

pub mod error;
pub mod interceptors;

pub use error::IntoStatus;
pub use interceptors::{
    REQUEST_ID_KEY, TRACEPARENT_KEY, extract_request_id, extract_traceparent,
    trace_context_interceptor, with_request_id,
};
