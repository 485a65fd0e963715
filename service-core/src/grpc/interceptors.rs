//! gRPC interceptors for request id and trace context propagation.

use tonic::{Request, Status};
use uuid::Uuid;

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Interceptor that logs the caller's trace context and makes sure every
/// request carries an `x-request-id`, assigning a UUID when absent.
///
/// The id is recorded on the current span when the span declares a
/// `request_id` field.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = extract_traceparent(&request) {
        tracing::debug!(traceparent = %traceparent, "Received trace context");
    }

    let (request, request_id) = match extract_request_id(&request) {
        Some(id) if !id.is_empty() => (request, id),
        _ => {
            let id = Uuid::new_v4().to_string();
            (with_request_id(request, &id), id)
        }
    };
    tracing::Span::current().record("request_id", request_id.as_str());

    Ok(request)
}

/// Attach a request id to a request.
pub fn with_request_id<T>(mut request: Request<T>, request_id: &str) -> Request<T> {
    if let Ok(value) = request_id.parse() {
        request.metadata_mut().insert(REQUEST_ID_KEY, value);
    }
    request
}

pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(TRACEPARENT_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
