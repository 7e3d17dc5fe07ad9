//! Wire types for both the internal and portal APIs.
//!
//! Grounded on the teacher's `auth/dto.rs` (flat request/response structs,
//! `#[serde(rename_all = "camelCase")]`, hand-written `From<Model>` impls).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::consent::engine::{ConsentPatch, CreateOrReuseRequest};
use crate::consent::model::{deserialize_double_option, ConsentRecord, ConsentStatus, ConsentType, FieldSpec};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpecDto {
    pub field_name: String,
    pub schema_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
}

impl From<FieldSpecDto> for FieldSpec {
    fn from(dto: FieldSpecDto) -> Self {
        FieldSpec {
            field_name: dto.field_name,
            schema_id: dto.schema_id,
            display_name: dto.display_name,
            description: dto.description,
            owner: dto.owner,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpecView {
    pub field_name: String,
    pub schema_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl From<&FieldSpec> for FieldSpecView {
    fn from(f: &FieldSpec) -> Self {
        FieldSpecView {
            field_name: f.field_name.clone(),
            schema_id: f.schema_id.clone(),
            display_name: f.display_name.clone(),
            description: f.description.clone(),
            owner: f.owner.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequirementDto {
    pub owner: Option<String>,
    pub owner_id: String,
    pub owner_email: String,
    pub fields: Vec<FieldSpecDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsentRequest {
    pub app_id: String,
    pub app_name: Option<String>,
    pub consent_requirement: ConsentRequirementDto,
    pub grant_duration: Option<String>,
    pub consent_type: Option<ConsentType>,
    pub session_id: Option<String>,
}

impl From<CreateConsentRequest> for CreateOrReuseRequest {
    fn from(req: CreateConsentRequest) -> Self {
        CreateOrReuseRequest {
            app_id: req.app_id,
            app_name: req.app_name,
            owner_id: req.consent_requirement.owner_id,
            owner_email: req.consent_requirement.owner_email,
            fields: req
                .consent_requirement
                .fields
                .into_iter()
                .map(Into::into)
                .collect(),
            grant_duration: req.grant_duration,
            consent_type: req.consent_type,
            session_id: req.session_id,
        }
    }
}

/// Internal-API response shape: `{ consentId, status, consentPortalUrl?, fields? }`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalConsentView {
    pub consent_id: Uuid,
    pub status: ConsentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_portal_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSpecView>>,
}

impl From<&ConsentRecord> for InternalConsentView {
    fn from(r: &ConsentRecord) -> Self {
        InternalConsentView {
            consent_id: r.consent_id,
            status: r.status,
            consent_portal_url: r.disclosable_portal_url().map(|s| s.to_string()),
            fields: Some(r.fields.iter().map(Into::into).collect()),
        }
    }
}

/// Portal `GET /api/v1/consents/{id}` view. Deliberately omits
/// `consentPortalUrl` (§6.2).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConsentView {
    pub app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    pub owner_id: String,
    pub owner_email: String,
    pub status: ConsentStatus,
    #[serde(rename = "type")]
    pub consent_type: ConsentType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub fields: Vec<FieldSpecView>,
}

impl From<&ConsentRecord> for PortalConsentView {
    fn from(r: &ConsentRecord) -> Self {
        PortalConsentView {
            app_id: r.app_id.clone(),
            app_name: r.app_name.clone(),
            owner_id: r.owner_id.clone(),
            owner_email: r.owner_email.clone(),
            status: r.status,
            consent_type: r.consent_type,
            created_at: r.created_at,
            updated_at: r.updated_at,
            fields: r.fields.iter().map(Into::into).collect(),
        }
    }
}

/// `PUT`/`PATCH /api/v1/consents/{id}`. `fields` uses the
/// absent-vs-null-vs-provided idiom (I3): omitted means "don't touch",
/// `null` means "explicit empty list", a list means "replace".
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConsentRequest {
    pub status: Option<ConsentStatus>,
    pub updated_by: Option<String>,
    pub grant_duration: Option<String>,
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub fields: Option<Option<Vec<FieldSpecDto>>>,
}

impl UpdateConsentRequest {
    pub fn into_patch(self) -> ConsentPatch {
        let fields = match self.fields {
            None => None,
            Some(None) => Some(Vec::new()),
            Some(Some(fields)) => Some(fields.into_iter().map(Into::into).collect()),
        };
        ConsentPatch {
            status: self.status,
            grant_duration: self.grant_duration,
            fields,
            updated_by: self.updated_by,
            reason: self.reason,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActiveLookupQuery {
    pub app_id: String,
    pub owner_id: Option<String>,
    pub owner_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DataInfoView {
    pub owner_id: String,
    pub owner_email: String,
}

impl From<&ConsentRecord> for DataInfoView {
    fn from(r: &ConsentRecord) -> Self {
        DataInfoView {
            owner_id: r.owner_id.clone(),
            owner_email: r.owner_email.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerConsentsView {
    pub owner_id: String,
    pub consents: Vec<PortalConsentView>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerConsentsView {
    pub consumer: String,
    pub consents: Vec<PortalConsentView>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryCheckResponse {
    pub expired_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
