use crate::layers::auth::CurrentUser;
use crate::models::api::prelude::*;
use crate::models::invite_code_usage::InviteCodeUsageView;
use crate::models::users::User;
use crate::services::auth::{AuthService, ChangePasswordRequest, UpdateProfileRequest};
use crate::services::invite_code::InviteCodeService;
use crate::services::states::db::{PageQueryBinder, PageQueryResult};
use axum::Json;
use axum::extract::{Query, State};
use std::sync::Arc;

pub type UserRouterState = State<(Arc<AuthService>, Arc<InviteCodeService>)>;

pub async fn fetch_profile(
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<GeneralResponse<User>>> {
    Ok(general_json_res!("Profile fetched", user.to_public()))
}

pub async fn modify_profile(
    CurrentUser(user): CurrentUser,
    State((auth, _)): UserRouterState,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<GeneralResponse<User>>> {
    let updated = auth.update_profile(&user, req).await?;
    Ok(general_json_res!("Profile updated", updated))
}

pub async fn change_password(
    CurrentUser(user): CurrentUser,
    State((auth, _)): UserRouterState,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<GeneralResponse<()>>> {
    auth.change_password(&user, req).await?;
    Ok(general_json_res!("Password changed"))
}

pub async fn list_my_redemptions(
    CurrentUser(user): CurrentUser,
    State((_, invite)): UserRouterState,
    Query(page): Query<PageQueryBinder>,
) -> ApiResult<Json<GeneralResponse<PageQueryResult<InviteCodeUsageView>>>> {
    let page = invite.usages_by_user(user.id, page).await?;
    Ok(general_json_res!("Redemptions fetched", page))
}
