use crate::layers::auth::CurrentUser;
use crate::layers::client_info::ClientInfo;
use crate::models::api::prelude::*;
use crate::models::invite_code::{
    InviteCodeStats, InviteCodeStatus, InviteCodeView, NewInviteCode, PublicInviteCodeView,
};
use crate::models::invite_code_usage::InviteCodeUsageView;
use crate::services::invite_code::InviteCodeService;
use crate::services::states::db::{PageQueryBinder, PageQueryResult};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;

pub type InviteCodeRouterState = State<Arc<InviteCodeService>>;

pub async fn create_invite_code(
    CurrentUser(user): CurrentUser,
    State(svc): InviteCodeRouterState,
    Json(req): Json<NewInviteCode>,
) -> ApiResult<Response> {
    let created = svc.create(&user, req).await?;
    Ok(GeneralResponse::new("Invite code created", Some(created.to_view()))
        .into_response(StatusCode::CREATED))
}

pub async fn list_my_invite_codes(
    CurrentUser(user): CurrentUser,
    State(svc): InviteCodeRouterState,
    Query(page): Query<PageQueryBinder>,
) -> ApiResult<Json<GeneralResponse<PageQueryResult<InviteCodeView>>>> {
    let page = svc.list_mine(&user, page).await?;
    Ok(general_json_res!("Invite codes fetched", page))
}

pub async fn list_my_invite_code_usages(
    CurrentUser(user): CurrentUser,
    State(svc): InviteCodeRouterState,
    Query(page): Query<PageQueryBinder>,
) -> ApiResult<Json<GeneralResponse<PageQueryResult<InviteCodeUsageView>>>> {
    let page = svc.usages_of_created(&user, page).await?;
    Ok(general_json_res!("Invite code usages fetched", page))
}

pub async fn get_invite_code(
    CurrentUser(user): CurrentUser,
    State(svc): InviteCodeRouterState,
    Path(id): Path<i64>,
) -> ApiResult<Json<GeneralResponse<InviteCodeView>>> {
    let view = svc.get_with_relations(id, &user).await?;
    Ok(general_json_res!("Invite code fetched", view))
}

pub async fn list_invite_code_usages(
    CurrentUser(user): CurrentUser,
    State(svc): InviteCodeRouterState,
    Path(id): Path<i64>,
    Query(page): Query<PageQueryBinder>,
) -> ApiResult<Json<GeneralResponse<PageQueryResult<InviteCodeUsageView>>>> {
    let page = svc.usages(id, &user, page).await?;
    Ok(general_json_res!("Invite code usages fetched", page))
}

#[derive(Debug, Deserialize)]
pub struct UpdateInviteCodeStatusReq {
    pub status: InviteCodeStatus,
}

pub async fn update_invite_code_status(
    CurrentUser(user): CurrentUser,
    State(svc): InviteCodeRouterState,
    Path(id): Path<i64>,
    Json(req): Json<UpdateInviteCodeStatusReq>,
) -> ApiResult<Json<GeneralResponse<InviteCodeView>>> {
    let updated = svc.update_status(id, req.status, &user).await?;
    Ok(general_json_res!("Invite code status updated", updated.to_view()))
}

pub async fn delete_invite_code(
    CurrentUser(user): CurrentUser,
    State(svc): InviteCodeRouterState,
    Path(id): Path<i64>,
) -> ApiResult<Json<GeneralResponse<()>>> {
    svc.soft_delete(id, &user).await?;
    Ok(general_json_res!("Invite code deleted"))
}

pub async fn validate_invite_code(
    State(svc): InviteCodeRouterState,
    Path(code): Path<String>,
) -> ApiResult<Json<GeneralResponse<PublicInviteCodeView>>> {
    let code = code.trim();
    if code.is_empty() {
        return Err(bad_request!("Invite code is required"));
    }
    let valid = svc.validate(code).await?;
    Ok(general_json_res!("Invite code is valid", valid.to_public_view()))
}

#[derive(Debug, Deserialize)]
pub struct RedeemInviteCodeReq {
    pub code: String,
}

pub async fn redeem_invite_code(
    CurrentUser(user): CurrentUser,
    client: ClientInfo,
    State(svc): InviteCodeRouterState,
    Json(req): Json<RedeemInviteCodeReq>,
) -> ApiResult<Json<GeneralResponse<InviteCodeView>>> {
    let redeemed = svc
        .redeem(req.code.trim(), user.id, &client.origin())
        .await?;
    Ok(general_json_res!("Invite code redeemed", redeemed.to_view()))
}

pub async fn list_all_invite_codes(
    State(svc): InviteCodeRouterState,
    Query(page): Query<PageQueryBinder>,
) -> ApiResult<Json<GeneralResponse<PageQueryResult<InviteCodeView>>>> {
    let page = svc.list_all(page).await?;
    Ok(general_json_res!("Invite codes fetched", page))
}

pub async fn get_invite_code_stats(
    State(svc): InviteCodeRouterState,
) -> ApiResult<Json<GeneralResponse<InviteCodeStats>>> {
    let stats = svc.stats().await?;
    Ok(general_json_res!("Invite code statistics fetched", stats))
}
