//! Application persistence operations.
//!
//! All functions take a `&PgPool` and operate on the `applications` table.
//! Sub-documents are stored as JSONB and decoded leniently: a row whose
//! JSON no longer fits the current shape loads with empty sub-documents
//! and a warning rather than failing startup.

use chrono::{DateTime, Utc};
use dsa_core::{ApplicationStatus, CompanySubType, CompletedSteps, EntityType};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::state::{ApplicationRecord, KycDetails};

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Insert or fully replace an application.
pub async fn upsert(pool: &PgPool, record: &ApplicationRecord) -> Result<(), sqlx::Error> {
    let completed_steps = to_json(&record.completed_steps)?;
    let kyc = to_json(&record.kyc)?;
    let bank = record.bank.as_ref().map(to_json).transpose()?;
    let company = record.company.as_ref().map(to_json).transpose()?;

    sqlx::query(
        "INSERT INTO applications (id, phone, entity_type, company_sub_type, status,
         completed_steps, kyc, bank, company, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (id) DO UPDATE SET
            entity_type = EXCLUDED.entity_type,
            company_sub_type = EXCLUDED.company_sub_type,
            status = EXCLUDED.status,
            completed_steps = EXCLUDED.completed_steps,
            kyc = EXCLUDED.kyc,
            bank = EXCLUDED.bank,
            company = EXCLUDED.company,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.phone)
    .bind(record.entity_type.as_str())
    .bind(record.company_sub_type.map(|s| s.as_str()))
    .bind(record.status.as_str())
    .bind(completed_steps)
    .bind(kyc)
    .bind(bank)
    .bind(company)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all applications into the in-memory store on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<ApplicationRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ApplicationRow>(
        "SELECT id, phone, entity_type, company_sub_type, status, completed_steps,
         kyc, bank, company, created_at, updated_at
         FROM applications ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ApplicationRow::into_record).collect())
}

fn decode_or_default<T: DeserializeOwned + Default>(id: Uuid, column: &str, value: Value) -> T {
    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(application_id = %id, column, error = %e, "undecodable application column");
        T::default()
    })
}

fn decode_optional<T: DeserializeOwned>(id: Uuid, column: &str, value: Option<Value>) -> Option<T> {
    value.and_then(|v| match serde_json::from_value(v) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(application_id = %id, column, error = %e, "undecodable application column");
            None
        }
    })
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: Uuid,
    phone: String,
    entity_type: String,
    company_sub_type: Option<String>,
    status: String,
    completed_steps: Value,
    kyc: Value,
    bank: Option<Value>,
    company: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApplicationRow {
    fn into_record(self) -> ApplicationRecord {
        let id = self.id;
        ApplicationRecord {
            id,
            phone: self.phone,
            entity_type: EntityType::parse(&self.entity_type).unwrap_or(EntityType::Individual),
            company_sub_type: self.company_sub_type.as_deref().and_then(CompanySubType::parse),
            status: ApplicationStatus::parse(&self.status).unwrap_or(ApplicationStatus::Initiated),
            completed_steps: decode_or_default::<CompletedSteps>(id, "completed_steps", self.completed_steps),
            kyc: decode_or_default::<KycDetails>(id, "kyc", self.kyc),
            bank: decode_optional(id, "bank", self.bank),
            company: decode_optional(id, "company", self.company),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
