use std::time::Duration;

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ConsentError;

use super::model::{ConsentRecord, ConsentStatus, ConsentType, FieldSpec};
use super::repo_types::ConsentRow;

/// Fields needed to insert a brand-new consent row. Everything else
/// (`consent_id`, `created_at`, `updated_at`) is assigned by the store.
pub struct NewConsent {
    pub consent_id: Uuid,
    pub owner_id: String,
    pub owner_email: String,
    pub app_id: String,
    pub app_name: Option<String>,
    pub consent_type: ConsentType,
    pub grant_duration: String,
    pub fields: Vec<FieldSpec>,
    pub session_id: Option<String>,
    pub consent_portal_url: String,
    pub pending_expires_at: Option<OffsetDateTime>,
    pub grant_expires_at: Option<OffsetDateTime>,
    pub updated_by: String,
}

/// C3: persistence and query surface for consent records.
///
/// Postgres SQLSTATE `23505` (unique_violation) against the partial
/// unique index on `(owner_id, owner_email, app_id)` surfaces as
/// [`ConsentError::Conflict`]; the engine retries the reuse-update path
/// exactly once before surfacing it to the caller (§5).
#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn insert(&self, new: NewConsent) -> Result<ConsentRecord, ConsentError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<ConsentRecord>, ConsentError>;
    /// Looks up the active (pending/approved) record for `app_id`
    /// matched against whichever of `owner_id`/`owner_email` is
    /// supplied (I1's uniqueness tuple is `(owner_id, owner_email,
    /// app_id)`; a caller that only knows one of the two still gets a
    /// correct, non-misattributed match).
    async fn find_active(
        &self,
        app_id: &str,
        owner_id: Option<&str>,
        owner_email: Option<&str>,
    ) -> Result<Option<ConsentRecord>, ConsentError>;
    async fn find_any_recent(
        &self,
        app_id: &str,
        owner_id: &str,
    ) -> Result<Option<ConsentRecord>, ConsentError>;
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConsentRecord>, ConsentError>;
    async fn list_by_app(&self, app_id: &str) -> Result<Vec<ConsentRecord>, ConsentError>;
    /// Persists the full row as given; the engine computes the new
    /// state (status/fields/expiries) and hands back the record to save.
    async fn replace(&self, record: &ConsentRecord) -> Result<(), ConsentError>;
    /// Marks rows whose deadlines have elapsed as `expired`; returns the
    /// number of affected rows. Per-row failures are the caller's (C5)
    /// concern when this is driven row-by-row; the Postgres impl runs it
    /// as one bulk `UPDATE ... WHERE` (§4.5).
    async fn sweep_expired(&self, now: OffsetDateTime) -> Result<u64, ConsentError>;
}

pub struct PgConsentStore {
    pool: PgPool,
    query_timeout: Duration,
    transaction_timeout: Duration,
}

impl PgConsentStore {
    pub fn new(pool: PgPool, query_timeout: Duration, transaction_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
            transaction_timeout,
        }
    }

    /// Bounds a single query by the configured per-query timeout (§5);
    /// a hung connection surfaces as a plain `sqlx::Error` so callers
    /// keep using the existing error-mapping path.
    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, sqlx::Error> {
        Self::bounded(self.query_timeout, fut).await
    }

    /// Bounds the sweep's bulk `UPDATE` by the transaction timeout (§5)
    /// rather than the single-row query timeout, since it may touch
    /// many rows.
    async fn timed_tx<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, sqlx::Error> {
        Self::bounded(self.transaction_timeout, fut).await
    }

    async fn bounded<T>(
        budget: Duration,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, sqlx::Error> {
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(sqlx::Error::PoolTimedOut),
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    consent_id, owner_id, owner_email, app_id, app_name, status, consent_type,
    created_at, updated_at, pending_expires_at, grant_expires_at, grant_duration,
    fields, session_id, consent_portal_url, updated_by
"#;

#[async_trait]
impl ConsentStore for PgConsentStore {
    async fn insert(&self, new: NewConsent) -> Result<ConsentRecord, ConsentError> {
        let id = new.consent_id;
        let now = OffsetDateTime::now_utc();

        let query = format!(
            r#"
            INSERT INTO consent_records
                (consent_id, owner_id, owner_email, app_id, app_name, status, consent_type,
                 created_at, updated_at, pending_expires_at, grant_expires_at, grant_duration,
                 fields, session_id, consent_portal_url, updated_by)
            VALUES
                ($1, $2, $3, $4, $5, 'pending', $6, $7, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let row: ConsentRow = self
            .timed(
                sqlx::query_as(&query)
                    .bind(id)
                    .bind(&new.owner_id)
                    .bind(&new.owner_email)
                    .bind(&new.app_id)
                    .bind(&new.app_name)
                    .bind(new.consent_type)
                    .bind(now)
                    .bind(new.pending_expires_at)
                    .bind(new.grant_expires_at)
                    .bind(&new.grant_duration)
                    .bind(Json(new.fields))
                    .bind(&new.session_id)
                    .bind(&new.consent_portal_url)
                    .bind(&new.updated_by)
                    .fetch_one(&self.pool),
            )
            .await
            .map_err(map_insert_error)?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ConsentRecord>, ConsentError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM consent_records WHERE consent_id = $1");
        let row: Option<ConsentRow> = self
            .timed(sqlx::query_as(&query).bind(id).fetch_optional(&self.pool))
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_active(
        &self,
        app_id: &str,
        owner_id: Option<&str>,
        owner_email: Option<&str>,
    ) -> Result<Option<ConsentRecord>, ConsentError> {
        let query = format!(
            r#"SELECT {SELECT_COLUMNS} FROM consent_records
               WHERE app_id = $1
                 AND ($2::text IS NULL OR owner_id = $2)
                 AND ($3::text IS NULL OR owner_email = $3)
                 AND status IN ('pending', 'approved')
               ORDER BY (status = 'pending') DESC, created_at DESC
               LIMIT 1"#
        );
        let row: Option<ConsentRow> = self
            .timed(
                sqlx::query_as(&query)
                    .bind(app_id)
                    .bind(owner_id)
                    .bind(owner_email)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_any_recent(
        &self,
        app_id: &str,
        owner_id: &str,
    ) -> Result<Option<ConsentRecord>, ConsentError> {
        let query = format!(
            r#"SELECT {SELECT_COLUMNS} FROM consent_records
               WHERE app_id = $1 AND owner_id = $2
               ORDER BY created_at DESC
               LIMIT 1"#
        );
        let row: Option<ConsentRow> = self
            .timed(
                sqlx::query_as(&query)
                    .bind(app_id)
                    .bind(owner_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConsentRecord>, ConsentError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM consent_records WHERE owner_id = $1 ORDER BY created_at DESC"
        );
        let rows: Vec<ConsentRow> = self
            .timed(sqlx::query_as(&query).bind(owner_id).fetch_all(&self.pool))
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_by_app(&self, app_id: &str) -> Result<Vec<ConsentRecord>, ConsentError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM consent_records WHERE app_id = $1 ORDER BY created_at DESC"
        );
        let rows: Vec<ConsentRow> = self
            .timed(sqlx::query_as(&query).bind(app_id).fetch_all(&self.pool))
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn replace(&self, record: &ConsentRecord) -> Result<(), ConsentError> {
        let rows = self
            .timed(
                sqlx::query(
                    r#"
                    UPDATE consent_records SET
                        app_name = $2, status = $3, consent_type = $4, updated_at = $5,
                        pending_expires_at = $6, grant_expires_at = $7, grant_duration = $8,
                        fields = $9, session_id = $10, consent_portal_url = $11, updated_by = $12
                    WHERE consent_id = $1
                    "#,
                )
                .bind(record.consent_id)
                .bind(&record.app_name)
                .bind(record.status)
                .bind(record.consent_type)
                .bind(record.updated_at)
                .bind(record.pending_expires_at)
                .bind(record.grant_expires_at)
                .bind(&record.grant_duration)
                .bind(Json(&record.fields))
                .bind(&record.session_id)
                .bind(&record.consent_portal_url)
                .bind(&record.updated_by)
                .execute(&self.pool),
            )
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(ConsentError::NotFound);
        }
        Ok(())
    }

    async fn sweep_expired(&self, now: OffsetDateTime) -> Result<u64, ConsentError> {
        let rows = self
            .timed_tx(
                sqlx::query(
                    r#"
                    UPDATE consent_records
                       SET status = 'expired', updated_at = $1, updated_by = 'system'
                     WHERE (status = 'approved' AND grant_expires_at IS NOT NULL AND grant_expires_at < $1)
                        OR (status = 'pending' AND pending_expires_at IS NOT NULL AND pending_expires_at < $1)
                    "#,
                )
                .bind(now)
                .execute(&self.pool),
            )
            .await?
            .rows_affected();

        Ok(rows)
    }
}

fn map_insert_error(e: sqlx::Error) -> ConsentError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return ConsentError::Conflict;
        }
    }
    ConsentError::from(e)
}

/// An in-memory `ConsentStore` used by engine/HTTP tests so property 1,
/// 2, 4, 5 can be exercised without a live Postgres instance (mirrors
/// the teacher's `AppState::fake()` no-DB testing style).
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryConsentStore {
        rows: Mutex<Vec<ConsentRecord>>,
    }

    #[async_trait]
    impl ConsentStore for InMemoryConsentStore {
        async fn insert(&self, new: NewConsent) -> Result<ConsentRecord, ConsentError> {
            let mut rows = self.rows.lock().unwrap();
            let active_exists = rows.iter().any(|r| {
                r.app_id == new.app_id && r.owner_id == new.owner_id && r.status.is_active()
            });
            if active_exists {
                return Err(ConsentError::Conflict);
            }
            let now = OffsetDateTime::now_utc();
            let record = ConsentRecord {
                consent_id: new.consent_id,
                owner_id: new.owner_id,
                owner_email: new.owner_email,
                app_id: new.app_id,
                app_name: new.app_name,
                status: ConsentStatus::Pending,
                consent_type: new.consent_type,
                created_at: now,
                updated_at: now,
                pending_expires_at: new.pending_expires_at,
                grant_expires_at: new.grant_expires_at,
                grant_duration: new.grant_duration,
                fields: new.fields,
                session_id: new.session_id,
                consent_portal_url: new.consent_portal_url,
                updated_by: new.updated_by,
            };
            rows.push(record.clone());
            Ok(record)
        }

        async fn get_by_id(&self, id: Uuid) -> Result<Option<ConsentRecord>, ConsentError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.consent_id == id)
                .cloned())
        }

        async fn find_active(
            &self,
            app_id: &str,
            owner_id: Option<&str>,
            owner_email: Option<&str>,
        ) -> Result<Option<ConsentRecord>, ConsentError> {
            let matches = |r: &&ConsentRecord| {
                r.app_id == app_id
                    && owner_id.is_none_or(|oid| r.owner_id == oid)
                    && owner_email.is_none_or(|oe| r.owner_email == oe)
            };
            let rows = self.rows.lock().unwrap();
            let pending = rows
                .iter()
                .filter(matches)
                .find(|r| r.status == ConsentStatus::Pending)
                .cloned();
            Ok(pending.or_else(|| rows.iter().filter(matches).find(|r| r.status.is_active()).cloned()))
        }

        async fn find_any_recent(
            &self,
            app_id: &str,
            owner_id: &str,
        ) -> Result<Option<ConsentRecord>, ConsentError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|r| r.app_id == app_id && r.owner_id == owner_id)
                .max_by_key(|r| r.created_at)
                .cloned())
        }

        async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConsentRecord>, ConsentError> {
            let mut rows: Vec<_> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.owner_id == owner_id)
                .cloned()
                .collect();
            rows.sort_by_key(|r| std::cmp::Reverse(r.created_at));
            Ok(rows)
        }

        async fn list_by_app(&self, app_id: &str) -> Result<Vec<ConsentRecord>, ConsentError> {
            let mut rows: Vec<_> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.app_id == app_id)
                .cloned()
                .collect();
            rows.sort_by_key(|r| std::cmp::Reverse(r.created_at));
            Ok(rows)
        }

        async fn replace(&self, record: &ConsentRecord) -> Result<(), ConsentError> {
            let mut rows = self.rows.lock().unwrap();
            let slot = rows
                .iter_mut()
                .find(|r| r.consent_id == record.consent_id)
                .ok_or(ConsentError::NotFound)?;
            *slot = record.clone();
            Ok(())
        }

        async fn sweep_expired(&self, now: OffsetDateTime) -> Result<u64, ConsentError> {
            let mut rows = self.rows.lock().unwrap();
            let mut count = 0;
            for r in rows.iter_mut() {
                let expire = (r.status == ConsentStatus::Approved
                    && r.grant_expires_at.is_some_and(|t| t < now))
                    || (r.status == ConsentStatus::Pending
                        && r.pending_expires_at.is_some_and(|t| t < now));
                if expire {
                    r.status = ConsentStatus::Expired;
                    r.updated_at = now;
                    r.updated_by = "system".to_string();
                    count += 1;
                }
            }
            Ok(count)
        }
    }
}
