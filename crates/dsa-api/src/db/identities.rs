//! Identity persistence operations.
//!
//! All functions take a `&PgPool` and operate on the `identities` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::otp::OtpState;
use crate::state::IdentityRecord;

/// Insert or fully replace an identity.
pub async fn upsert(pool: &PgPool, record: &IdentityRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO identities (id, phone, email, name, otp_hash, otp_expires_at,
         otp_attempts, is_verified, refresh_token_hash, refresh_token_expires_at,
         last_login_at, application_id, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         ON CONFLICT (id) DO UPDATE SET
            email = EXCLUDED.email,
            name = EXCLUDED.name,
            otp_hash = EXCLUDED.otp_hash,
            otp_expires_at = EXCLUDED.otp_expires_at,
            otp_attempts = EXCLUDED.otp_attempts,
            is_verified = EXCLUDED.is_verified,
            refresh_token_hash = EXCLUDED.refresh_token_hash,
            refresh_token_expires_at = EXCLUDED.refresh_token_expires_at,
            last_login_at = EXCLUDED.last_login_at,
            application_id = EXCLUDED.application_id,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.phone)
    .bind(&record.email)
    .bind(&record.name)
    .bind(&record.otp.hash)
    .bind(record.otp.expires_at)
    .bind(i32::try_from(record.otp.attempts).unwrap_or(i32::MAX))
    .bind(record.is_verified)
    .bind(&record.refresh_token_hash)
    .bind(record.refresh_token_expires_at)
    .bind(record.last_login_at)
    .bind(record.application_id)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all identities into the in-memory store on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<IdentityRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, IdentityRow>(
        "SELECT id, phone, email, name, otp_hash, otp_expires_at, otp_attempts,
         is_verified, refresh_token_hash, refresh_token_expires_at, last_login_at,
         application_id, created_at, updated_at
         FROM identities ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(IdentityRow::into_record).collect())
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    phone: String,
    email: Option<String>,
    name: Option<String>,
    otp_hash: Option<String>,
    otp_expires_at: Option<DateTime<Utc>>,
    otp_attempts: i32,
    is_verified: bool,
    refresh_token_hash: Option<String>,
    refresh_token_expires_at: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    application_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IdentityRow {
    fn into_record(self) -> IdentityRecord {
        IdentityRecord {
            id: self.id,
            phone: self.phone,
            email: self.email,
            name: self.name,
            otp: OtpState {
                hash: self.otp_hash,
                expires_at: self.otp_expires_at,
                attempts: u32::try_from(self.otp_attempts).unwrap_or(0),
            },
            is_verified: self.is_verified,
            refresh_token_hash: self.refresh_token_hash,
            refresh_token_expires_at: self.refresh_token_expires_at,
            last_login_at: self.last_login_at,
            application_id: self.application_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
