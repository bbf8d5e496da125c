//! Audit log persistence operations.
//!
//! The `audit_logs` table is append-only; there is no update or delete.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};

/// Append one audit record.
pub async fn insert(pool: &PgPool, record: &AuditRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_logs (id, user_id, application_id, phone, action, category,
         outcome, status_code, request, response, duration_ms, error_message,
         ip_address, user_agent, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(record.application_id)
    .bind(&record.phone)
    .bind(&record.action)
    .bind(record.category.as_str())
    .bind(record.outcome.as_str())
    .bind(i32::from(record.status_code))
    .bind(&record.request)
    .bind(&record.response)
    .bind(i64::try_from(record.duration_ms).unwrap_or(i64::MAX))
    .bind(&record.error_message)
    .bind(&record.ip_address)
    .bind(&record.user_agent)
    .bind(record.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent records for an application.
pub async fn list_for_application(
    pool: &PgPool,
    application_id: Uuid,
    limit: i64,
) -> Result<Vec<AuditRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT id, user_id, application_id, phone, action, category, outcome,
         status_code, request, response, duration_ms, error_message, ip_address,
         user_agent, created_at
         FROM audit_logs WHERE application_id = $1
         ORDER BY created_at DESC LIMIT $2",
    )
    .bind(application_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(AuditRow::into_record).collect())
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    user_id: Option<Uuid>,
    application_id: Option<Uuid>,
    phone: Option<String>,
    action: String,
    category: String,
    outcome: String,
    status_code: i32,
    request: Value,
    response: Value,
    duration_ms: i64,
    error_message: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_record(self) -> AuditRecord {
        AuditRecord {
            id: self.id,
            user_id: self.user_id,
            application_id: self.application_id,
            phone: self.phone,
            action: self.action,
            category: AuditCategory::parse(&self.category),
            outcome: if self.outcome == "failure" {
                AuditOutcome::Failure
            } else {
                AuditOutcome::Success
            },
            status_code: u16::try_from(self.status_code).unwrap_or(0),
            request: self.request,
            response: self.response,
            duration_ms: u64::try_from(self.duration_ms).unwrap_or(0),
            error_message: self.error_message,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            created_at: self.created_at,
        }
    }
}
