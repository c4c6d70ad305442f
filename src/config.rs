#![allow(dead_code)]

use std::env;

use url::Url;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub trusted_hosts: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub run_migrations_on_start: bool,
    /// Shared secret for verifying gate-issued caller tokens (HS256).
    pub gate_jwt_secret: Option<String>,
    /// Shared key accepted from schedulers hitting the trigger surface.
    pub internal_api_key: Option<String>,
    pub default_org_id: Option<String>,
    pub default_user_id: Option<String>,
    pub org_membership_cache_ttl_seconds: u64,
    pub org_membership_cache_max_entries: u64,
    pub billing_settings_cache_ttl_seconds: u64,
    pub billing_settings_cache_max_entries: u64,
    pub daraja_base_url: String,
    pub daraja_consumer_key: Option<String>,
    pub daraja_consumer_secret: Option<String>,
    pub daraja_short_code: Option<String>,
    pub daraja_passkey: Option<String>,
    pub mpesa_webhook_secret: Option<String>,
    pub notify_dispatch_url: Option<String>,
    pub notify_dispatch_token: Option<String>,
    pub billing_scheduler_enabled: bool,
    pub billing_run_hour_utc: u32,
    pub reconcile_min_age_seconds: i64,
    pub default_timezone: String,
    pub app_public_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Makao Billing API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            trusted_hosts: parse_csv(&env_or("TRUSTED_HOSTS", "localhost,127.0.0.1")),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            run_migrations_on_start: env_parse_bool_or("RUN_MIGRATIONS_ON_START", false),
            gate_jwt_secret: env_opt("GATE_JWT_SECRET"),
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            default_org_id: env_opt("DEFAULT_ORG_ID"),
            default_user_id: env_opt("DEFAULT_USER_ID"),
            org_membership_cache_ttl_seconds: env_parse_or("ORG_MEMBERSHIP_CACHE_TTL_SECONDS", 30),
            org_membership_cache_max_entries: env_parse_or(
                "ORG_MEMBERSHIP_CACHE_MAX_ENTRIES",
                10000,
            ),
            billing_settings_cache_ttl_seconds: env_parse_or(
                "BILLING_SETTINGS_CACHE_TTL_SECONDS",
                15,
            ),
            billing_settings_cache_max_entries: env_parse_or(
                "BILLING_SETTINGS_CACHE_MAX_ENTRIES",
                1000,
            ),
            daraja_base_url: env_or("DARAJA_BASE_URL", "https://api.safaricom.co.ke"),
            daraja_consumer_key: env_opt("DARAJA_CONSUMER_KEY"),
            daraja_consumer_secret: env_opt("DARAJA_CONSUMER_SECRET"),
            daraja_short_code: env_opt("DARAJA_SHORT_CODE"),
            daraja_passkey: env_opt("DARAJA_PASSKEY"),
            mpesa_webhook_secret: env_opt("MPESA_WEBHOOK_SECRET"),
            notify_dispatch_url: env_opt("NOTIFY_DISPATCH_URL"),
            notify_dispatch_token: env_opt("NOTIFY_DISPATCH_TOKEN"),
            billing_scheduler_enabled: env_parse_bool_or("BILLING_SCHEDULER_ENABLED", true),
            billing_run_hour_utc: env_parse_or("BILLING_RUN_HOUR_UTC", 5),
            reconcile_min_age_seconds: env_parse_or("RECONCILE_MIN_AGE_SECONDS", 60),
            default_timezone: env_or("DEFAULT_TIMEZONE", "Africa/Nairobi"),
            app_public_url: env_or("APP_PUBLIC_URL", "http://localhost:3000"),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }

    /// The gateway counts as configured only when every Daraja credential is
    /// present. The reconciler treats a partial configuration as a
    /// configuration error rather than limping through a cycle.
    pub fn daraja_configured(&self) -> bool {
        self.daraja_consumer_key.is_some()
            && self.daraja_consumer_secret.is_some()
            && self.daraja_short_code.is_some()
            && self.daraja_passkey.is_some()
    }

    /// Parsed dispatcher endpoint, None when unset or unparseable.
    pub fn dispatcher_url(&self) -> Option<Url> {
        let raw = self.notify_dispatch_url.as_deref()?;
        match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(error) => {
                tracing::warn!(url = raw, error = %error, "NOTIFY_DISPATCH_URL is not a valid URL");
                None
            }
        }
    }

    /// Deployment-wide default; organizations can carry their own timezone,
    /// resolved through the tenancy layer.
    pub fn default_org_timezone(&self) -> chrono_tz::Tz {
        self.default_timezone
            .parse()
            .unwrap_or(chrono_tz::Africa::Nairobi)
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn csv_parsing_trims_and_skips_empties() {
        assert_eq!(
            parse_csv("a, b,, c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_csv("").is_empty());
    }
}
