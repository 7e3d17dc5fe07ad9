//! Portal (user-facing) API — §6.2. Every write route requires a
//! bearer token whose `email` claim matches the record's `ownerEmail`
//! (I4), enforced by the [`AuthorizedConsent`] extractor (C2).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{Actor, EventAction, EventStatus, ManagementEvent};
use crate::auth::middleware::{AuthenticatedUser, AuthorizedConsent};
use crate::consent::engine::PortalAction;
use crate::consent::model::ConsentStatus;
use crate::error::ConsentError;
use crate::state::AppState;

use super::dto::{
    ConsumerConsentsView, DataInfoView, OwnerConsentsView, PortalConsentView, RevokeRequest,
    UpdateConsentRequest,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/consents/:id",
            get(get_consent).put(update_consent).patch(update_consent).delete(revoke_consent),
        )
        .route("/data-info/:id", get(get_data_info))
        .route("/data-owner/:owner_id", get(get_owner_consents))
        .route("/consumer/:app_id", get(get_consumer_consents))
}

#[instrument(skip(_state, authz))]
async fn get_consent(
    State(_state): State<AppState>,
    authz: AuthorizedConsent,
) -> Json<PortalConsentView> {
    Json(PortalConsentView::from(&authz.record))
}

#[instrument(skip(state, authz, payload))]
async fn update_consent(
    State(state): State<AppState>,
    authz: AuthorizedConsent,
    Json(payload): Json<UpdateConsentRequest>,
) -> Result<Json<PortalConsentView>, ConsentError> {
    let consent_id = authz.record.consent_id;

    // A pure status-only patch to approved/rejected is the fixed
    // `ProcessPortalAction` action; anything else (grant_duration,
    // fields, or a status outside that pair) goes through `Update`.
    let is_plain_action = payload.updated_by.is_none() && payload.grant_duration.is_none() && payload.fields.is_none();
    let action = match (is_plain_action, payload.status) {
        (true, Some(ConsentStatus::Approved)) => Some(PortalAction::Approve),
        (true, Some(ConsentStatus::Rejected)) => Some(PortalAction::Deny),
        _ => None,
    };

    let result = match action {
        Some(action) => {
            state
                .engine
                .process_portal_action(consent_id, action, payload.reason)
                .await
        }
        None => {
            let mut patch = payload.into_patch();
            if patch.updated_by.is_none() {
                patch.updated_by = Some(authz.email.clone());
            }
            state.engine.update(consent_id, patch).await
        }
    };
    emit_write_audit(&state, EventAction::Update, consent_id, authz.email, &result).await;

    Ok(Json(PortalConsentView::from(&result?)))
}

#[instrument(skip(state, authz, payload))]
async fn revoke_consent(
    State(state): State<AppState>,
    authz: AuthorizedConsent,
    Json(payload): Json<RevokeRequest>,
) -> Result<Json<PortalConsentView>, ConsentError> {
    let consent_id = authz.record.consent_id;
    let result = state
        .engine
        .process_portal_action(consent_id, PortalAction::Revoke, payload.reason)
        .await;
    emit_write_audit(&state, EventAction::Delete, consent_id, authz.email, &result).await;

    Ok(Json(PortalConsentView::from(&result?)))
}

#[instrument(skip(_state, authz))]
async fn get_data_info(
    State(_state): State<AppState>,
    authz: AuthorizedConsent,
) -> Json<DataInfoView> {
    Json(DataInfoView::from(&authz.record))
}

#[instrument(skip(state, _user))]
async fn get_owner_consents(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    _user: AuthenticatedUser,
) -> Result<Json<OwnerConsentsView>, ConsentError> {
    let consents = state.engine.list_by_owner(&owner_id).await?;
    let count = consents.len();
    Ok(Json(OwnerConsentsView {
        owner_id,
        consents: consents.iter().map(Into::into).collect(),
        count,
    }))
}

#[instrument(skip(state, _user))]
async fn get_consumer_consents(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    _user: AuthenticatedUser,
) -> Result<Json<ConsumerConsentsView>, ConsentError> {
    let consents = state.engine.list_by_app(&app_id).await?;
    let count = consents.len();
    Ok(Json(ConsumerConsentsView {
        consumer: app_id,
        consents: consents.iter().map(Into::into).collect(),
        count,
    }))
}

async fn emit_write_audit(
    state: &AppState,
    action: EventAction,
    consent_id: Uuid,
    email: String,
    result: &Result<crate::consent::model::ConsentRecord, ConsentError>,
) {
    let status = if result.is_ok() {
        EventStatus::Success
    } else {
        EventStatus::Failure
    };
    state
        .audit
        .emit(ManagementEvent::new(action, status, Actor::user(&email), consent_id))
        .await;
}
