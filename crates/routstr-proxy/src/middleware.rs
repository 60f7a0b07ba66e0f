//! Request correlation: every response carries an `x-routstr-request-id`
//! header, and the id is threaded through the request's extensions so
//! handlers can echo it into error envelopes.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

/// Request-scoped correlation id.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Stamps every request with a fresh UUIDv4 request id, exposes it to
/// handlers via request extensions, and mirrors it onto the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-routstr-request-id", value);
    }
    response
}
