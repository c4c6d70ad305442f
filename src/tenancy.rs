use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::{db_pool, AppState};

/// Look up the caller's role in an organization. Hits the short-TTL cache
/// first; a miss goes to the database and populates it. Non-membership is
/// never cached so a fresh grant takes effect immediately.
pub async fn org_role(
    state: &AppState,
    user_id: Uuid,
    org_id: Uuid,
) -> AppResult<Option<String>> {
    if let Some(role) = state.membership_cache.get(&(org_id, user_id)).await {
        return Ok(Some(role));
    }

    let pool = db_pool(state)?;
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT role::text FROM organization_members
         WHERE organization_id = $1 AND user_id = $2",
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    if let Some((role,)) = &row {
        state
            .membership_cache
            .insert((org_id, user_id), role.clone())
            .await;
    }
    Ok(row.map(|(role,)| role))
}

pub async fn assert_org_member(state: &AppState, user_id: Uuid, org_id: Uuid) -> AppResult<String> {
    org_role(state, user_id, org_id).await?.ok_or_else(|| {
        AppError::Forbidden("Forbidden: not a member of this organization.".to_string())
    })
}

pub async fn assert_org_role(
    state: &AppState,
    user_id: Uuid,
    org_id: Uuid,
    allowed_roles: &[&str],
) -> AppResult<String> {
    let role = assert_org_member(state, user_id, org_id).await?;
    if allowed_roles.contains(&role.as_str()) {
        return Ok(role);
    }

    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}

/// Phone of the organization's primary administrator; used for operator
/// alerts (payments parked for review). Prefers the member marked primary.
pub async fn primary_admin_phone(state: &AppState, org_id: Uuid) -> AppResult<Option<String>> {
    let pool = db_pool(state)?;
    let row: Option<(Option<String>,)> = sqlx::query_as(
        "SELECT u.phone_e164
         FROM organization_members m
         JOIN app_users u ON u.id = m.user_id
         WHERE m.organization_id = $1 AND m.role = 'owner_admin'
         ORDER BY m.is_primary DESC, m.created_at
         LIMIT 1",
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.and_then(|(phone,)| phone))
}

/// Timezone an organization's billing day is computed in. Falls back to the
/// configured default when the row is missing, the lookup fails, or the
/// stored name does not parse; a bad timezone row must not stall billing.
pub async fn org_timezone(state: &AppState, org_id: Uuid) -> chrono_tz::Tz {
    let fallback = state.config.default_org_timezone();
    let Ok(pool) = db_pool(state) else {
        return fallback;
    };

    let row: Result<Option<(String,)>, sqlx::Error> =
        sqlx::query_as("SELECT timezone FROM organizations WHERE id = $1")
            .bind(org_id)
            .fetch_optional(pool)
            .await;
    match row {
        Ok(Some((name,))) => parse_timezone(&name, fallback),
        Ok(None) => fallback,
        Err(error) => {
            tracing::debug!(org_id = %org_id, error = %error, "Could not resolve organization timezone");
            fallback
        }
    }
}

fn parse_timezone(name: &str, fallback: chrono_tz::Tz) -> chrono_tz::Tz {
    name.trim().parse().unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::parse_timezone;

    #[test]
    fn org_timezone_names_parse_with_a_default() {
        let nairobi = chrono_tz::Africa::Nairobi;
        assert_eq!(
            parse_timezone("Africa/Kampala", nairobi),
            chrono_tz::Africa::Kampala
        );
        assert_eq!(parse_timezone(" Africa/Nairobi ", nairobi), nairobi);
        assert_eq!(parse_timezone("not-a-zone", nairobi), nairobi);
        assert_eq!(parse_timezone("", nairobi), nairobi);
    }
}
