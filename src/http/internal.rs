//! Internal (service-to-service) API — §6.1. No JWT; reached only from
//! peer services on a trusted network boundary (§4.2).

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use time::OffsetDateTime;
use tracing::instrument;

use crate::audit::{Actor, EventAction, EventStatus, ManagementEvent};
use crate::error::ConsentError;
use crate::state::AppState;

use super::dto::{ActiveLookupQuery, CreateConsentRequest, ExpiryCheckResponse, InternalConsentView};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/consents", post(create_or_reuse).get(find_active))
        .route("/admin/expiry-check", post(run_expiry_check))
}

#[instrument(skip(state, payload))]
async fn create_or_reuse(
    State(state): State<AppState>,
    Json(payload): Json<CreateConsentRequest>,
) -> Result<(axum::http::StatusCode, Json<InternalConsentView>), ConsentError> {
    let result = state.engine.create_or_reuse(payload.into()).await;

    match &result {
        Ok(record) => {
            state
                .audit
                .emit(ManagementEvent::new(
                    EventAction::Create,
                    EventStatus::Success,
                    Actor::system(),
                    record.consent_id,
                ))
                .await;
        }
        Err(_) => {
            state
                .audit
                .emit(ManagementEvent::new(
                    EventAction::Create,
                    EventStatus::Failure,
                    Actor::system(),
                    uuid::Uuid::nil(),
                ))
                .await;
        }
    }

    let record = result?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(InternalConsentView::from(&record)),
    ))
}

#[instrument(skip(state))]
async fn find_active(
    State(state): State<AppState>,
    Query(query): Query<ActiveLookupQuery>,
) -> Result<Json<InternalConsentView>, ConsentError> {
    if query.owner_id.is_none() && query.owner_email.is_none() {
        return Err(ConsentError::validation("ownerId", "or ownerEmail is required"));
    }

    let active = state
        .engine
        .find_active(&query.app_id, query.owner_id.as_deref(), query.owner_email.as_deref())
        .await?;
    Ok(Json(InternalConsentView::from(&active)))
}

#[instrument(skip(state))]
async fn run_expiry_check(
    State(state): State<AppState>,
) -> Result<Json<ExpiryCheckResponse>, ConsentError> {
    let expired_count = crate::expiry::sweep_once(&state).await?;
    Ok(Json(ExpiryCheckResponse {
        expired_count,
        checked_at: OffsetDateTime::now_utc(),
    }))
}
