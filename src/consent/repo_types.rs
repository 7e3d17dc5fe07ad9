use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{ConsentRecord, ConsentStatus, ConsentType, FieldSpec};

/// Raw row shape as persisted; `fields` is stored as `JSONB`.
#[derive(Debug, FromRow)]
pub(crate) struct ConsentRow {
    pub consent_id: Uuid,
    pub owner_id: String,
    pub owner_email: String,
    pub app_id: String,
    pub app_name: Option<String>,
    pub status: ConsentStatus,
    pub consent_type: ConsentType,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub pending_expires_at: Option<OffsetDateTime>,
    pub grant_expires_at: Option<OffsetDateTime>,
    pub grant_duration: String,
    pub fields: sqlx::types::Json<Vec<FieldSpec>>,
    pub session_id: Option<String>,
    pub consent_portal_url: String,
    pub updated_by: String,
}

impl From<ConsentRow> for ConsentRecord {
    fn from(r: ConsentRow) -> Self {
        ConsentRecord {
            consent_id: r.consent_id,
            owner_id: r.owner_id,
            owner_email: r.owner_email,
            app_id: r.app_id,
            app_name: r.app_name,
            status: r.status,
            consent_type: r.consent_type,
            created_at: r.created_at,
            updated_at: r.updated_at,
            pending_expires_at: r.pending_expires_at,
            grant_expires_at: r.grant_expires_at,
            grant_duration: r.grant_duration,
            fields: r.fields.0,
            session_id: r.session_id,
            consent_portal_url: r.consent_portal_url,
            updated_by: r.updated_by,
        }
    }
}
