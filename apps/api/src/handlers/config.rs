use axum::Json;
use axum::extract::{Query, State};
use jitgate_application::{BindAccountInput, SetApproversInput};

use crate::dto::{
    BindAccountRequest, BindingResponse, BoundAccountsQuery, SetApproversRequest,
};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn bind_account_handler(
    State(state): State<AppState>,
    Json(payload): Json<BindAccountRequest>,
) -> ApiResult<Json<BindingResponse>> {
    let binding = state
        .config_service
        .bind_account(BindAccountInput {
            channel_id: payload.channel_id,
            account_id: payload.account_id,
        })
        .await?;

    Ok(Json(BindingResponse::from(binding)))
}

pub async fn set_approvers_handler(
    State(state): State<AppState>,
    Json(payload): Json<SetApproversRequest>,
) -> ApiResult<Json<Vec<BindingResponse>>> {
    let bindings = state
        .config_service
        .set_approvers(SetApproversInput {
            channel_id: payload.channel_id,
            approver_chat_ids: payload.approver_ids,
        })
        .await?
        .into_iter()
        .map(BindingResponse::from)
        .collect();

    Ok(Json(bindings))
}

pub async fn bound_accounts_handler(
    State(state): State<AppState>,
    Query(query): Query<BoundAccountsQuery>,
) -> ApiResult<Json<Vec<BindingResponse>>> {
    let bindings = state
        .config_service
        .list_bound_accounts(query.channel_id.as_str())
        .await?
        .into_iter()
        .map(BindingResponse::from)
        .collect();

    Ok(Json(bindings))
}
