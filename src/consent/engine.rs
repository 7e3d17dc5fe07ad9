use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::duration::parse_duration;
use crate::error::ConsentError;

use super::model::{ConsentRecord, ConsentStatus, ConsentType, FieldSpec};
use super::store::{ConsentStore, NewConsent};

/// Input to `CreateOrReuse` (teacher's naming: an "internal create"
/// request body, see `http::dto::CreateConsentRequest` for the wire
/// shape this is built from).
pub struct CreateOrReuseRequest {
    pub app_id: String,
    pub app_name: Option<String>,
    pub owner_id: String,
    pub owner_email: String,
    pub fields: Vec<FieldSpec>,
    pub grant_duration: Option<String>,
    pub consent_type: Option<ConsentType>,
    pub session_id: Option<String>,
}

impl CreateOrReuseRequest {
    fn validate(&self) -> Result<(), ConsentError> {
        if self.app_id.trim().is_empty() {
            return Err(ConsentError::validation("appId", "is required"));
        }
        if self.owner_id.trim().is_empty() {
            return Err(ConsentError::validation(
                "consentRequirement.ownerId",
                "is required",
            ));
        }
        if self.fields.is_empty() {
            return Err(ConsentError::validation(
                "consentRequirement.fields",
                "must contain at least one field",
            ));
        }
        for (i, f) in self.fields.iter().enumerate() {
            f.validate(i)?;
        }
        Ok(())
    }
}

/// A patch to apply via `Update`. The outer `Option` on `fields`
/// distinguishes "not provided" from "provided" (I3); the inner
/// `Option` distinguishes an explicit empty list from one with items.
#[derive(Default)]
pub struct ConsentPatch {
    pub status: Option<ConsentStatus>,
    pub grant_duration: Option<String>,
    pub fields: Option<Vec<FieldSpec>>,
    pub updated_by: Option<String>,
    pub reason: Option<String>,
}

/// C4: the consent state machine. One implementation ships today;
/// the trait seam exists so an alternate revision could be swapped in
/// by configuration (§9 design note) without touching callers.
#[async_trait]
pub trait ConsentEngine: Send + Sync {
    async fn create_or_reuse(&self, req: CreateOrReuseRequest) -> Result<ConsentRecord, ConsentError>;
    async fn get_by_id(&self, id: Uuid) -> Result<ConsentRecord, ConsentError>;
    /// The internal API's "lookup active" operation (§6.1 `GET
    /// /internal/api/v1/consents`); `owner_id`/`owner_email` are
    /// whichever of the two query params the caller supplied.
    async fn find_active(
        &self,
        app_id: &str,
        owner_id: Option<&str>,
        owner_email: Option<&str>,
    ) -> Result<ConsentRecord, ConsentError>;
    async fn update(&self, id: Uuid, patch: ConsentPatch) -> Result<ConsentRecord, ConsentError>;
    async fn revoke(&self, id: Uuid, reason: Option<String>) -> Result<ConsentRecord, ConsentError>;
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConsentRecord>, ConsentError>;
    async fn list_by_app(&self, app_id: &str) -> Result<Vec<ConsentRecord>, ConsentError>;
    /// C5's sweep, delegated straight to the store's bulk `UPDATE`.
    async fn sweep_expired(&self, now: OffsetDateTime) -> Result<u64, ConsentError>;

    /// `ProcessPortalAction`: maps a fixed portal action to the
    /// corresponding status and delegates to `Update`/`Revoke`.
    async fn process_portal_action(
        &self,
        id: Uuid,
        action: PortalAction,
        reason: Option<String>,
    ) -> Result<ConsentRecord, ConsentError> {
        match action {
            PortalAction::Revoke => self.revoke(id, reason).await,
            PortalAction::Approve | PortalAction::Deny => {
                self.update(
                    id,
                    ConsentPatch {
                        status: Some(action.target_status()),
                        reason,
                        ..Default::default()
                    },
                )
                .await
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalAction {
    Approve,
    Deny,
    Revoke,
}

impl PortalAction {
    fn target_status(self) -> ConsentStatus {
        match self {
            PortalAction::Approve => ConsentStatus::Approved,
            PortalAction::Deny => ConsentStatus::Rejected,
            PortalAction::Revoke => ConsentStatus::Revoked,
        }
    }
}

pub struct DefaultConsentEngine<S: ConsentStore> {
    store: S,
    default_portal_base: String,
}

impl<S: ConsentStore> DefaultConsentEngine<S> {
    pub fn new(store: S, consent_portal_base: String) -> Self {
        Self {
            store,
            default_portal_base: consent_portal_base,
        }
    }

    fn portal_url(&self, consent_id: Uuid) -> String {
        format!("{}/?consent_id={consent_id}", self.default_portal_base)
    }

    /// Applies the reuse-update: overwrite fields/grant_duration and
    /// recompute grant_expires_at from `now`, keeping the existing id.
    fn apply_reuse(&self, existing: &mut ConsentRecord, req: &CreateOrReuseRequest) -> Result<(), ConsentError> {
        let now = OffsetDateTime::now_utc();
        let duration = parse_duration(req.grant_duration.as_deref())?;
        existing.fields = req.fields.clone();
        existing.grant_duration = req
            .grant_duration
            .clone()
            .unwrap_or_else(|| "PT1H".to_string());
        existing.app_name = req.app_name.clone().or(existing.app_name.take());
        existing.session_id = req.session_id.clone().or(existing.session_id.take());
        existing.updated_at = now;
        if existing.status == ConsentStatus::Pending {
            existing.pending_expires_at = Some(now + duration);
        } else {
            existing.grant_expires_at = Some(now + duration);
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ConsentStore> ConsentEngine for DefaultConsentEngine<S> {
    async fn create_or_reuse(&self, req: CreateOrReuseRequest) -> Result<ConsentRecord, ConsentError> {
        req.validate()?;

        if let Some(mut existing) = self
            .store
            .find_active(&req.app_id, Some(&req.owner_id), Some(&req.owner_email))
            .await?
        {
            self.apply_reuse(&mut existing, &req)?;
            self.store.replace(&existing).await?;
            return Ok(existing);
        }

        let now = OffsetDateTime::now_utc();
        let duration = parse_duration(req.grant_duration.as_deref())?;
        let consent_id = Uuid::new_v4();
        let new = NewConsent {
            consent_id,
            owner_id: req.owner_id.clone(),
            owner_email: req.owner_email.clone(),
            app_id: req.app_id.clone(),
            app_name: req.app_name.clone(),
            consent_type: req.consent_type.unwrap_or_default(),
            grant_duration: req
                .grant_duration
                .clone()
                .unwrap_or_else(|| "PT1H".to_string()),
            fields: req.fields.clone(),
            session_id: req.session_id.clone(),
            consent_portal_url: self.portal_url(consent_id),
            pending_expires_at: Some(now + duration),
            grant_expires_at: None,
            updated_by: "system".to_string(),
        };

        match self.store.insert(new).await {
            Ok(record) => Ok(record),
            Err(ConsentError::Conflict) => {
                // Lost the race to a concurrent creator (§5): retry once
                // as a reuse-update against the row that just won.
                let mut existing = self
                    .store
                    .find_active(&req.app_id, Some(&req.owner_id), Some(&req.owner_email))
                    .await?
                    .ok_or(ConsentError::Conflict)?;
                self.apply_reuse(&mut existing, &req)?;
                self.store.replace(&existing).await?;
                Ok(existing)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<ConsentRecord, ConsentError> {
        self.store.get_by_id(id).await?.ok_or(ConsentError::NotFound)
    }

    async fn find_active(
        &self,
        app_id: &str,
        owner_id: Option<&str>,
        owner_email: Option<&str>,
    ) -> Result<ConsentRecord, ConsentError> {
        self.store
            .find_active(app_id, owner_id, owner_email)
            .await?
            .ok_or(ConsentError::NotFound)
    }

    async fn update(&self, id: Uuid, patch: ConsentPatch) -> Result<ConsentRecord, ConsentError> {
        let mut record = self.get_by_id(id).await?;

        if let Some(new_status) = patch.status {
            if !record.status.can_transition_to(new_status) {
                return Err(ConsentError::InvalidTransition {
                    from: record.status.as_str().to_string(),
                    to: new_status.as_str().to_string(),
                });
            }
            record.status = new_status;
        }

        if let Some(fields) = patch.fields {
            if !fields.is_empty() {
                record.fields = fields;
            }
        }

        let now = OffsetDateTime::now_utc();
        if let Some(gd) = &patch.grant_duration {
            record.grant_duration = gd.clone();
        }
        let duration = parse_duration(Some(record.grant_duration.as_str()))?;

        match record.status {
            ConsentStatus::Approved => {
                record.grant_expires_at = Some(now + duration);
            }
            ConsentStatus::Pending if record.pending_expires_at.is_none() => {
                record.pending_expires_at = Some(now + duration);
            }
            _ => {}
        }

        record.updated_at = now;
        record.updated_by = patch
            .updated_by
            .unwrap_or_else(|| record.updated_by.clone());

        let _ = patch.reason; // carried to the audit emitter by the HTTP layer, not persisted

        self.store.replace(&record).await?;
        Ok(record)
    }

    async fn revoke(&self, id: Uuid, reason: Option<String>) -> Result<ConsentRecord, ConsentError> {
        self.update(
            id,
            ConsentPatch {
                status: Some(ConsentStatus::Revoked),
                updated_by: Some("system".to_string()),
                reason,
                ..Default::default()
            },
        )
        .await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConsentRecord>, ConsentError> {
        self.store.list_by_owner(owner_id).await
    }

    async fn list_by_app(&self, app_id: &str) -> Result<Vec<ConsentRecord>, ConsentError> {
        self.store.list_by_app(app_id).await
    }

    async fn sweep_expired(&self, now: OffsetDateTime) -> Result<u64, ConsentError> {
        self.store.sweep_expired(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::store::test_support::InMemoryConsentStore;

    fn field(name: &str) -> FieldSpec {
        FieldSpec {
            field_name: name.to_string(),
            schema_id: "drp-v1".to_string(),
            display_name: None,
            description: None,
            owner: None,
        }
    }

    fn req() -> CreateOrReuseRequest {
        CreateOrReuseRequest {
            app_id: "passport-app".into(),
            app_name: None,
            owner_id: "u@x".into(),
            owner_email: "u@x".into(),
            fields: vec![field("personInfo.name")],
            grant_duration: None,
            consent_type: None,
            session_id: None,
        }
    }

    fn engine() -> DefaultConsentEngine<InMemoryConsentStore> {
        DefaultConsentEngine::new(InMemoryConsentStore::default(), "http://portal".into())
    }

    #[tokio::test]
    async fn create_then_reuse_is_idempotent() {
        let engine = engine();
        let first = engine.create_or_reuse(req()).await.unwrap();
        let second = engine.create_or_reuse(req()).await.unwrap();
        assert_eq!(first.consent_id, second.consent_id);
        assert_eq!(second.status, ConsentStatus::Pending);
        assert_eq!(engine.list_by_owner("u@x").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_reports_field_path() {
        let mut r = req();
        r.fields[0].schema_id = String::new();
        let err = engine().create_or_reuse(r).await.unwrap_err();
        match err {
            ConsentError::Validation { field, .. } => {
                assert_eq!(field, "consentRequirement.fields[0].schemaId")
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn approve_then_illegal_transition_to_pending() {
        let engine = engine();
        let created = engine.create_or_reuse(req()).await.unwrap();
        let approved = engine
            .update(
                created.consent_id,
                ConsentPatch {
                    status: Some(ConsentStatus::Approved),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(approved.status, ConsentStatus::Approved);
        assert!(approved.grant_expires_at.unwrap() > approved.updated_at);

        let err = engine
            .update(
                created.consent_id,
                ConsentPatch {
                    status: Some(ConsentStatus::Pending),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConsentError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn rejected_is_terminal_except_expire() {
        let engine = engine();
        let created = engine.create_or_reuse(req()).await.unwrap();
        engine
            .update(
                created.consent_id,
                ConsentPatch {
                    status: Some(ConsentStatus::Rejected),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = engine
            .update(
                created.consent_id,
                ConsentPatch {
                    status: Some(ConsentStatus::Approved),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConsentError::InvalidTransition { .. }));

        let expired = engine
            .update(
                created.consent_id,
                ConsentPatch {
                    status: Some(ConsentStatus::Expired),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(expired.status, ConsentStatus::Expired);
    }

    #[tokio::test]
    async fn portal_url_disclosed_only_while_pending() {
        let engine = engine();
        let created = engine.create_or_reuse(req()).await.unwrap();
        assert!(created.disclosable_portal_url().is_some());

        let approved = engine
            .update(
                created.consent_id,
                ConsentPatch {
                    status: Some(ConsentStatus::Approved),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(approved.disclosable_portal_url().is_none());
    }
}
