use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;

/// Reject requests whose Host header is not on the configured allowlist.
/// An empty allowlist disables the check (local development).
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.config.trusted_hosts.is_empty() {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(normalize_host)
        .unwrap_or_default();

    let allowed = state
        .config
        .trusted_hosts
        .iter()
        .any(|trusted| host_matches(&host, trusted));

    if allowed {
        next.run(request).await
    } else {
        tracing::warn!(host = %host, "Rejected request from untrusted host");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": { "code": "untrusted_host", "message": "Untrusted host." }
            })),
        )
            .into_response()
    }
}

fn normalize_host(raw: &str) -> String {
    raw.split(':').next().unwrap_or(raw).trim().to_ascii_lowercase()
}

fn host_matches(host: &str, trusted: &str) -> bool {
    let trusted = trusted.trim().to_ascii_lowercase();
    if trusted == "*" {
        return true;
    }
    if let Some(suffix) = trusted.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }
    host == trusted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_ports_and_case() {
        assert_eq!(normalize_host("API.Example.com:8080"), "api.example.com");
        assert_eq!(normalize_host("localhost"), "localhost");
    }

    #[test]
    fn exact_and_wildcard_matching() {
        assert!(host_matches("api.example.com", "api.example.com"));
        assert!(host_matches("anything.at.all", "*"));
        assert!(!host_matches("evil.com", "api.example.com"));
    }

    #[test]
    fn subdomain_wildcards_cover_the_apex_too() {
        assert!(host_matches("api.example.com", "*.example.com"));
        assert!(host_matches("example.com", "*.example.com"));
        assert!(!host_matches("example.com.evil.io", "*.example.com"));
    }
}
