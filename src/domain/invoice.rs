use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "invoice_type", rename_all = "snake_case")]
pub enum InvoiceType {
    Rent,
    Water,
    Combined,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub organization_id: Uuid,
    pub invoice_type: InvoiceType,
    pub period_start: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: f64,
    pub is_paid: bool,
    pub is_overdue: bool,
    pub months_covered: i32,
    pub description: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
