use crate::models::invite_code_usage::RedemptionOrigin;
use crate::models::token::TokenResponse;
use crate::models::users::{NewUser, UserRow};
use crate::services::auth::{AuthError, AuthResult};
use crate::services::invite_code::InviteCodeService;
use crate::services::invite_code::redemption::{claim, retry_on_conflict};
use crate::services::states::LinkState;
use crate::services::states::config::InviteRedemptionPolicy;
use crate::services::states::db::LinkDatabaseExecutor;
use std::time::Duration;

async fn insert_user(exec: &mut LinkDatabaseExecutor<'_>, new_user: &NewUser) -> AuthResult<UserRow> {
    let id = exec.users().add_user(new_user).await?;
    exec.users()
        .query_user_by_id(id)
        .await?
        .ok_or(AuthError::UserUnavailable)
}

/// Creates accounts and, when a code is presented, consumes one of its uses.
///
/// How a failed redemption affects the account depends on
/// [`InviteRedemptionPolicy`]: `best_effort` keeps the account and logs the failure,
/// `atomic` creates the account and consumes the code in one transaction.
pub struct Registrar<'a> {
    state: &'a LinkState,
    invite: &'a InviteCodeService,
}

impl<'a> Registrar<'a> {
    pub fn new(state: &'a LinkState, invite: &'a InviteCodeService) -> Self {
        Self { state, invite }
    }

    pub async fn register_with_optional_code(
        &self,
        new_user: NewUser,
        code: Option<&str>,
        origin: &RedemptionOrigin,
    ) -> AuthResult<(UserRow, TokenResponse)> {
        let user = match code {
            None => self.create_user(new_user).await?,
            Some(code) => match self.state.config.registration.invite_redemption {
                InviteRedemptionPolicy::BestEffort => {
                    self.register_best_effort(new_user, code, origin).await?
                }
                InviteRedemptionPolicy::Atomic => {
                    self.register_atomic(new_user, code, origin).await?
                }
            },
        };
        let token = self.state.auth.issue(&user)?;
        Ok((user, token))
    }

    async fn create_user(&self, new_user: NewUser) -> AuthResult<UserRow> {
        self.state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| insert_user(&mut exec, &new_user).await)
            .await
    }

    async fn register_best_effort(
        &self,
        mut new_user: NewUser,
        code: &str,
        origin: &RedemptionOrigin,
    ) -> AuthResult<UserRow> {
        let valid = self.invite.validate(code).await?;
        new_user.invite_code_id = Some(valid.id);
        new_user.invite_code_used = Some(valid.code.clone());
        let user = self.create_user(new_user).await?;
        if let Err(e) = self.invite.redeem(&valid.code, user.id, origin).await {
            tracing::error!(
                user_id = user.id,
                invite_code_id = valid.id,
                "Account created but the invite code could not be redeemed: {e}"
            );
        }
        Ok(user)
    }

    async fn register_atomic(
        &self,
        new_user: NewUser,
        code: &str,
        origin: &RedemptionOrigin,
    ) -> AuthResult<UserRow> {
        let cfg = &self.state.config.invite;
        let db = &self.state.db;
        let new_user = &new_user;
        let (user, usage_id) = retry_on_conflict(
            cfg.redeem_busy_retries,
            Duration::from_millis(cfg.redeem_retry_backoff_ms),
            move || {
                db.transaction(async move |mut exec: LinkDatabaseExecutor<'_>| {
                    let claimed = claim(&mut exec, code).await?;
                    let mut with_code = new_user.clone();
                    with_code.invite_code_id = Some(claimed.id);
                    with_code.invite_code_used = Some(claimed.code.clone());
                    let user = insert_user(&mut exec, &with_code).await?;
                    let usage = exec
                        .invite_code_usage()
                        .insert_usage(claimed.id, user.id, origin)
                        .await?;
                    Ok::<_, AuthError>((user, usage.id))
                })
            },
        )
        .await
        .inspect_err(|e| tracing::warn!("Registration with invite code rolled back: {e}"))?;
        tracing::info!(
            user_id = user.id,
            invite_code_id = user.invite_code_id,
            usage_id,
            "Invite code redeemed with registration"
        );
        Ok(user)
    }
}
