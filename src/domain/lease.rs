use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "lease_status", rename_all = "snake_case")]
pub enum LeaseStatus {
    Pending,
    Active,
    Renewed,
    Terminated,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Lease {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub tenant_user_id: Option<Uuid>,
    pub tenant_name: String,
    pub tenant_phone_e164: Option<String>,
    pub monthly_rent: f64,
    pub currency: String,
    pub status: LeaseStatus,
    pub start_date: NaiveDate,
    pub rent_paid_until: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
