use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use jitgate_application::{
    ApproveRequestInput, CreateRequestInput, DenyRequestInput, RevokeRequestInput,
};
use jitgate_core::Actor;
use uuid::Uuid;

use crate::dto::{
    ApproveRequestRequest, CreateRequestRequest, DenyRequestRequest, ListRequestsQuery,
    ListRequestsResponse, RequestResponse, RevokeRequestRequest,
};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_request_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateRequestRequest>,
) -> ApiResult<(StatusCode, Json<RequestResponse>)> {
    let request = state
        .request_service
        .create(CreateRequestInput {
            account_id: payload.account_id,
            channel_id: payload.channel_id,
            requester_chat_id: payload.requester_chat_id,
            requester_email: payload.requester_email,
            ticket_ref: payload.ticket_ref,
            reason: payload.reason,
            requested_duration_minutes: payload.requested_duration_minutes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(RequestResponse::from(request))))
}

pub async fn approve_request_handler(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<ApproveRequestRequest>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state
        .request_service
        .approve(ApproveRequestInput {
            request_id,
            approver: payload.into_actor(),
        })
        .await?;

    Ok(Json(RequestResponse::from(request)))
}

pub async fn deny_request_handler(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<DenyRequestRequest>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state
        .request_service
        .deny(DenyRequestInput {
            request_id,
            denier: Actor::new(payload.denier_chat_id, payload.denier_email),
            reason: payload.reason,
        })
        .await?;

    Ok(Json(RequestResponse::from(request)))
}

pub async fn revoke_request_handler(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<RevokeRequestRequest>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state
        .request_service
        .revoke(RevokeRequestInput {
            request_id,
            actor: payload.into_actor(),
        })
        .await?;

    Ok(Json(RequestResponse::from(request)))
}

pub async fn get_request_handler(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state.request_service.get(request_id).await?;
    Ok(Json(RequestResponse::from(request)))
}

pub async fn list_requests_handler(
    State(state): State<AppState>,
    Query(query): Query<ListRequestsQuery>,
) -> ApiResult<Json<ListRequestsResponse>> {
    let listing = state.request_service.list(query.into_query()?).await?;
    Ok(Json(ListRequestsResponse::from(listing)))
}
