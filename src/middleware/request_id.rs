use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Attach a request id to every request and echo it on the response so logs
/// and client reports can be correlated. An id supplied by an upstream proxy
/// is kept as-is.
pub async fn inject_request_id(mut request: Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    let request_id = incoming.unwrap_or_else(|| Uuid::new_v4().to_string());

    match HeaderValue::from_str(&request_id) {
        Ok(header_value) => {
            request
                .headers_mut()
                .insert(REQUEST_ID_HEADER, header_value.clone());
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(REQUEST_ID_HEADER, header_value);
            response
        }
        Err(_) => next.run(request).await,
    }
}
