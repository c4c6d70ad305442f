use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Claims minted by the access-control gate sitting in front of this service.
/// The gate has already authenticated the user and resolved their permitted
/// actions; this service only has to trust and enforce them.
#[derive(Debug, Clone, Deserialize)]
pub struct GateClaims {
    pub sub: String,
    pub org: String,
    #[serde(default)]
    pub actions: Vec<String>,
    pub exp: usize,
}

/// Identity every protected route works with.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub actions: Vec<String>,
}

impl Caller {
    pub fn can(&self, action: &str) -> bool {
        self.actions
            .iter()
            .any(|granted| granted == action || granted == "*")
    }

    pub fn require_action(&self, action: &str) -> AppResult<()> {
        if self.can(action) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Forbidden: action '{action}' is not permitted for this caller."
            )))
        }
    }
}

/// Resolve the caller from a `Bearer` gate token. In non-production
/// environments the `x-debug-user` / `x-debug-org` headers can stand in for
/// the gate so the API is exercisable without it.
pub fn require_caller(state: &AppState, headers: &HeaderMap) -> AppResult<Caller> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(caller) = dev_override_caller(state, headers)? {
            return Ok(caller);
        }
    }

    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization bearer token.".to_string()))?;

    let secret = state.config.gate_jwt_secret.as_deref().ok_or_else(|| {
        AppError::Configuration("GATE_JWT_SECRET is not set; cannot validate gate tokens".into())
    })?;

    caller_from_token(token, secret)
}

pub fn caller_from_token(token: &str, secret: &str) -> AppResult<Caller> {
    let decoded = decode::<GateClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|error| AppError::Unauthorized(format!("Invalid gate token: {error}")))?;

    let claims = decoded.claims;
    let user_id = claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| AppError::Unauthorized("Gate token subject is not a user id.".to_string()))?;
    let organization_id = claims.org.parse::<Uuid>().map_err(|_| {
        AppError::Unauthorized("Gate token organization is not an id.".to_string())
    })?;

    Ok(Caller {
        user_id,
        organization_id,
        actions: claims.actions,
    })
}

/// Shared-secret check for operational endpoints (manual billing triggers).
/// These are reachable by cron and scripts, not only by gate-authenticated
/// humans.
pub fn require_internal_key(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    let expected = state.config.internal_api_key.as_deref().ok_or_else(|| {
        AppError::Configuration("INTERNAL_API_KEY is not set; internal endpoints are locked".into())
    })?;

    let provided = headers
        .get("x-internal-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided == expected {
        Ok(())
    } else {
        Err(AppError::Unauthorized(
            "Invalid or missing internal API key.".to_string(),
        ))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn dev_override_caller(state: &AppState, headers: &HeaderMap) -> AppResult<Option<Caller>> {
    let Some(user_header) = headers
        .get("x-debug-user")
        .and_then(|value| value.to_str().ok())
    else {
        return Ok(None);
    };

    let user_id = user_header
        .parse::<Uuid>()
        .map_err(|_| AppError::BadRequest("x-debug-user must be a UUID.".to_string()))?;

    let organization_id = match headers
        .get("x-debug-org")
        .and_then(|value| value.to_str().ok())
    {
        Some(raw) => raw
            .parse::<Uuid>()
            .map_err(|_| AppError::BadRequest("x-debug-org must be a UUID.".to_string()))?,
        None => state
            .config
            .default_org_id
            .as_deref()
            .and_then(|raw| raw.parse::<Uuid>().ok())
            .ok_or_else(|| {
                AppError::BadRequest(
                    "x-debug-org header or DEFAULT_ORG_ID is required.".to_string(),
                )
            })?,
    };

    Ok(Some(Caller {
        user_id,
        organization_id,
        actions: vec!["*".to_string()],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn decodes_a_valid_gate_token() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();
        let token = token_for(
            &serde_json::json!({
                "sub": user.to_string(),
                "org": org.to_string(),
                "actions": ["payment:verify"],
                "exp": far_future(),
            }),
            "secret",
        );

        let caller = caller_from_token(&token, "secret").unwrap();
        assert_eq!(caller.user_id, user);
        assert_eq!(caller.organization_id, org);
        assert!(caller.can("payment:verify"));
        assert!(!caller.can("invoice:create"));
    }

    #[test]
    fn rejects_a_token_signed_with_the_wrong_secret() {
        let token = token_for(
            &serde_json::json!({
                "sub": Uuid::new_v4().to_string(),
                "org": Uuid::new_v4().to_string(),
                "exp": far_future(),
            }),
            "wrong",
        );

        let err = caller_from_token(&token, "secret").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn rejects_a_non_uuid_subject() {
        let token = token_for(
            &serde_json::json!({
                "sub": "not-a-uuid",
                "org": Uuid::new_v4().to_string(),
                "exp": far_future(),
            }),
            "secret",
        );

        let err = caller_from_token(&token, "secret").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn wildcard_action_grants_everything() {
        let caller = Caller {
            user_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            actions: vec!["*".to_string()],
        };
        assert!(caller.require_action("billing:run").is_ok());
    }

    #[test]
    fn refuses_an_action_the_gate_did_not_grant() {
        // Holding other grants (or a role in the org) is not enough; the
        // sensitive action itself must be on the token.
        let token = token_for(
            &serde_json::json!({
                "sub": Uuid::new_v4().to_string(),
                "org": Uuid::new_v4().to_string(),
                "actions": ["invoice:list", "billing:run"],
                "exp": far_future(),
            }),
            "secret",
        );

        let caller = caller_from_token(&token, "secret").unwrap();
        assert!(caller.require_action("billing:run").is_ok());
        let err = caller.require_action("payment:verify").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn a_token_without_an_actions_claim_gets_no_actions() {
        let token = token_for(
            &serde_json::json!({
                "sub": Uuid::new_v4().to_string(),
                "org": Uuid::new_v4().to_string(),
                "exp": far_future(),
            }),
            "secret",
        );

        let caller = caller_from_token(&token, "secret").unwrap();
        assert!(caller.require_action("settings:write").is_err());
    }
}
