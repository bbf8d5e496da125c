//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! - **Identities**: one per phone number, mutated only by the auth flow.
//! - **Applications**: onboarding applications; at most one non-terminal
//!   application per phone.
//! - **Collaborators**: OTP delivery, verification provider and audit sink,
//!   each behind a trait object.
//!
//! Stores are in-memory and authoritative for reads. When a database pool
//! is configured, every mutation is written through to Postgres after the
//! in-memory change, and [`AppState::hydrate_from_db`] reloads the stores
//! on startup.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dsa_core::{ApplicationStatus, CompanySubType, CompletedSteps, EntityType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditRecorder, AuditSink, MemoryAuditSink, PgAuditSink};
use crate::auth::otp::{LogOtpDelivery, OtpDelivery, OtpState};
use crate::auth::token::TokenService;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::middleware::rate_limit::Limiters;
use crate::providers::{SimulatedProvider, VerificationProvider};

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// All operations are synchronous (the RwLock is `parking_lot`, not `tokio::sync`)
/// because the lock is never held across `.await` points.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// First record matching `pred`.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.data.read().values().find(|v| pred(v)).cloned()
    }

    /// Return the first record matching `pred`, or insert the one built by
    /// `make`. Check and insert happen under one write lock. The flag is
    /// `true` when a record was created.
    pub fn find_or_insert_with(
        &self,
        pred: impl Fn(&T) -> bool,
        make: impl FnOnce() -> (Uuid, T),
    ) -> (T, bool) {
        let mut guard = self.data.write();
        if let Some(existing) = guard.values().find(|v| pred(v)) {
            return (existing.clone(), false);
        }
        let (id, value) = make();
        guard.insert(id, value.clone());
        (value, true)
    }

    /// Update a record in place. Returns the updated record, or `None` if not found.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        guard.get_mut(id).map(|entry| {
            f(entry);
            entry.clone()
        })
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure may inspect the current state, mutate the record and
    /// return `Ok(R)` or `Err(E)`. The whole operation runs under a single
    /// write lock. Mutations made before an `Err` are kept.
    ///
    /// Returns `None` if the record doesn't exist.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    /// [`Store::try_update`] on the first record matching `pred`.
    pub fn try_update_where<R, E>(
        &self,
        pred: impl Fn(&T) -> bool,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().values_mut().find(|v| pred(v)).map(f)
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Identity -----------------------------------------------------------------

/// A phone-number identity. Holds credential material; never serialised
/// to clients directly (see [`UserView`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: Uuid,
    pub phone: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub otp: OtpState,
    pub is_verified: bool,
    pub refresh_token_hash: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub application_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(phone: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.into(),
            email: None,
            name: None,
            otp: OtpState::default(),
            is_verified: false,
            refresh_token_hash: None,
            refresh_token_expires_at: None,
            last_login_at: None,
            application_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn view(&self) -> UserView {
        UserView {
            id: self.id,
            phone: self.phone.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            is_verified: self.is_verified,
            last_login_at: self.last_login_at,
            application_id: self.application_id,
            created_at: self.created_at,
        }
    }
}

/// Client-facing projection of an identity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub phone: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub is_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub application_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// -- Application --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AadhaarDetails {
    /// Last four digits visible.
    pub masked_number: String,
    pub name: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PanDetails {
    pub number: String,
    pub name: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KycDetails {
    pub aadhaar: Option<AadhaarDetails>,
    pub pan: Option<PanDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    /// Last four digits visible.
    pub masked_account_number: String,
    pub ifsc: String,
    pub account_holder_name: Option<String>,
    pub bank_name: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompanyDetails {
    #[schema(value_type = String)]
    pub sub_type: CompanySubType,
    pub cin: Option<String>,
    pub llpin: Option<String>,
    pub gstin: Option<String>,
    pub registered_name: Option<String>,
    pub verified_at: DateTime<Utc>,
}

/// One onboarding attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub phone: String,
    #[schema(value_type = String)]
    pub entity_type: EntityType,
    #[schema(value_type = Option<String>)]
    pub company_sub_type: Option<CompanySubType>,
    #[schema(value_type = String)]
    pub status: ApplicationStatus,
    #[schema(value_type = Object)]
    pub completed_steps: CompletedSteps,
    pub kyc: KycDetails,
    pub bank: Option<BankDetails>,
    pub company: Option<CompanyDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    pub fn new(
        phone: impl Into<String>,
        entity_type: EntityType,
        company_sub_type: Option<CompanySubType>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.into(),
            entity_type,
            company_sub_type,
            status: ApplicationStatus::Initiated,
            completed_steps: CompletedSteps::default(),
            kyc: KycDetails::default(),
            bank: None,
            company: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the status forward; never regresses.
    pub fn advance(&mut self, next: ApplicationStatus, now: DateTime<Utc>) {
        self.status = self.status.advance_to(next);
        self.updated_at = now;
    }

    /// Refuse further steps on a completed or rejected application.
    pub fn ensure_open(&self) -> Result<(), AppError> {
        if self.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "Application is {} and can no longer be modified",
                self.status.as_str()
            ))
            .with_code("APPLICATION_CLOSED"));
        }
        Ok(())
    }
}

// -- Application State --------------------------------------------------------

/// Shared application state accessible to all route handlers.
///
/// Clone-friendly via `Arc` internals.
#[derive(Debug, Clone)]
pub struct AppState {
    pub identities: Store<IdentityRecord>,
    pub applications: Store<ApplicationRecord>,

    /// Access/refresh credential issuance and rotation.
    pub tokens: TokenService,
    pub limiters: Limiters,
    pub audit: AuditRecorder,
    pub otp_delivery: Arc<dyn OtpDelivery>,
    pub provider: Arc<dyn VerificationProvider>,

    // -- Database persistence (optional) --
    /// When `Some`, identities, applications and audit records are
    /// persisted to Postgres in addition to the in-memory stores.
    pub db_pool: Option<PgPool>,

    pub config: AppConfig,
}

impl AppState {
    /// In-memory state with default collaborators.
    pub fn new(config: AppConfig) -> Self {
        Self::with_pool(config, None)
    }

    /// State backed by `db_pool` when present. The audit sink follows the pool.
    pub fn with_pool(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        let identities = Store::new();
        let sink: Arc<dyn AuditSink> = match &db_pool {
            Some(pool) => Arc::new(PgAuditSink::new(pool.clone())),
            None => Arc::new(MemoryAuditSink::new()),
        };
        Self {
            tokens: TokenService::new(&config, identities.clone()),
            identities,
            applications: Store::new(),
            limiters: Limiters::in_memory(&config.rate_limits),
            audit: AuditRecorder::new(sink),
            otp_delivery: Arc::new(LogOtpDelivery),
            provider: Arc::new(SimulatedProvider),
            db_pool,
            config,
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = AuditRecorder::new(sink);
        self
    }

    pub fn with_otp_delivery(mut self, delivery: Arc<dyn OtpDelivery>) -> Self {
        self.otp_delivery = delivery;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn VerificationProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// The caller's open application, if any.
    pub fn open_application_for(&self, phone: &str) -> Option<ApplicationRecord> {
        self.applications
            .find(|a| a.phone == phone && !a.status.is_terminal())
    }

    /// Write an identity through to Postgres.
    pub async fn persist_identity(&self, record: &IdentityRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::identities::upsert(pool, record)
                .await
                .map_err(|e| {
                    tracing::error!(identity_id = %record.id, error = %e, "failed to persist identity");
                    AppError::internal(format!("identity persistence failed: {e}"))
                })?;
        }
        Ok(())
    }

    /// Write an application through to Postgres.
    pub async fn persist_application(&self, record: &ApplicationRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::applications::upsert(pool, record)
                .await
                .map_err(|e| {
                    tracing::error!(application_id = %record.id, error = %e, "failed to persist application");
                    AppError::internal(format!("application persistence failed: {e}"))
                })?;
        }
        Ok(())
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a database pool is available.
    pub async fn hydrate_from_db(&self) -> Result<(), sqlx::Error> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };

        let identities = crate::db::identities::load_all(pool).await?;
        let identity_count = identities.len();
        for record in identities {
            self.identities.insert(record.id, record);
        }

        let applications = crate::db::applications::load_all(pool).await?;
        let application_count = applications.len();
        for record in applications {
            self.applications.insert(record.id, record);
        }

        tracing::info!(
            identities = identity_count,
            applications = application_count,
            "Hydrated in-memory stores from database"
        );
        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}
