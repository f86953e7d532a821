pub mod generator;
pub mod ledger;
pub mod redemption;

use crate::models::invite_code::{
    Ineligibility, InviteCode, InviteCodeStats, InviteCodeStatus, InviteCodeView, NewInviteCode,
};
use crate::models::invite_code_usage::{InviteCodeUsageView, RedemptionOrigin};
use crate::models::users::UserRow;
use crate::services::invite_code::generator::CodeGenerator;
use crate::services::invite_code::ledger::{Hydrate, hydrate};
use crate::services::invite_code::redemption::{ConflictAware, redeem_in, retry_on_conflict};
use crate::services::states::LinkState;
use crate::services::states::db::{
    DataBaseError, LinkDatabaseExecutor, PageQueryBinder, PageQueryResult,
};
use ahash::{AHashMap, AHashSet};
use linkgate_macros::BusinessError;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, thiserror::Error, BusinessError)]
pub enum InviteCodeError {
    #[code(30001)]
    #[error("{0}")]
    Validation(String),
    #[code(30002)]
    #[error("Invite code not found")]
    NotFound,
    #[code(30003)]
    #[error("Invite code has reached maximum uses")]
    Exhausted,
    #[code(30004)]
    #[error("Invite code is disabled")]
    Disabled,
    #[code(30005)]
    #[error("Invite code is not active")]
    Inactive,
    #[code(30006)]
    #[error("You can only manage your own invite codes")]
    Forbidden,
    #[code(30007)]
    #[error("Invite code is being modified concurrently, please retry")]
    Conflict,
    #[code(30008)]
    #[error("Failed to generate a unique invite code after {0} attempts")]
    GenerationExhausted(u32),
    #[error(transparent)]
    Database(DataBaseError),
}

impl InviteCodeError {
    /// Business rejections a redeemer can act on, as opposed to infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            InviteCodeError::NotFound
                | InviteCodeError::Exhausted
                | InviteCodeError::Disabled
                | InviteCodeError::Inactive
        )
    }
}

impl From<DataBaseError> for InviteCodeError {
    fn from(e: DataBaseError) -> Self {
        match e {
            e if e.is_busy() => InviteCodeError::Conflict,
            DataBaseError::NoAffectedRows | DataBaseError::RowNotFound => InviteCodeError::NotFound,
            e => InviteCodeError::Database(e),
        }
    }
}

impl From<Ineligibility> for InviteCodeError {
    fn from(reason: Ineligibility) -> Self {
        match reason {
            Ineligibility::Exhausted => InviteCodeError::Exhausted,
            Ineligibility::Disabled => InviteCodeError::Disabled,
            Ineligibility::Inactive => InviteCodeError::Inactive,
        }
    }
}

impl From<validator::ValidationErrors> for InviteCodeError {
    fn from(e: validator::ValidationErrors) -> Self {
        InviteCodeError::Validation(e.to_string())
    }
}

impl ConflictAware for InviteCodeError {
    fn is_conflict(&self) -> bool {
        matches!(self, InviteCodeError::Conflict)
    }
}

pub type InviteCodeResult<T> = Result<T, InviteCodeError>;

/// Issues, administers and redeems invite codes.
pub struct InviteCodeService {
    state: Arc<LinkState>,
    generator: CodeGenerator,
}

async fn attach_creators(
    exec: &mut LinkDatabaseExecutor<'_>,
    codes: &[InviteCode],
) -> Result<Vec<InviteCodeView>, DataBaseError> {
    let ids = codes
        .iter()
        .map(|c| c.created_by_id)
        .collect::<AHashSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let creators = exec
        .users()
        .query_users_by_ids(&ids)
        .await?
        .into_iter()
        .map(|u| (u.id, u.to_public()))
        .collect::<AHashMap<_, _>>();
    Ok(codes
        .iter()
        .map(|c| {
            let mut view = c.to_view();
            view.created_by = creators.get(&c.created_by_id).cloned();
            view
        })
        .collect())
}

impl InviteCodeService {
    pub fn new(state: Arc<LinkState>) -> Self {
        let generator = CodeGenerator::new(state.config.invite.generate_attempts);
        Self { state, generator }
    }

    pub async fn create(&self, creator: &UserRow, req: NewInviteCode) -> InviteCodeResult<InviteCode> {
        req.validate()?;
        let generator = self.generator;
        let created = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let code = generator.generate(&mut exec).await?;
                exec.invite_code()
                    .insert_invite_code(
                        &code,
                        creator.id,
                        req.max_uses,
                        &req.description,
                        req.metadata.as_ref(),
                    )
                    .await
                    .map_err(|e| match e {
                        // Lost a race against another insert of the same fresh code.
                        DataBaseError::UniqueViolation { .. } => InviteCodeError::Conflict,
                        e => e.into(),
                    })
            })
            .await
            .inspect_err(|e| {
                tracing::error!(created_by_id = creator.id, "Failed to create invite code: {e}")
            })?;
        tracing::info!(
            invite_code_id = created.id,
            created_by_id = creator.id,
            max_uses = created.max_uses,
            "Invite code created"
        );
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> InviteCodeResult<InviteCode> {
        self.state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.invite_code().get_invite_code_by_id(id).await
            })
            .await?
            .ok_or(InviteCodeError::NotFound)
    }

    pub async fn get_by_code(&self, code: &str) -> InviteCodeResult<InviteCode> {
        self.state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.invite_code().get_invite_code_by_code(code).await
            })
            .await?
            .ok_or(InviteCodeError::NotFound)
    }

    /// Like [`Self::get`], restricted to the code's creator and administrators.
    pub async fn get_owned(&self, id: i64, actor: &UserRow) -> InviteCodeResult<InviteCode> {
        let code = self.get(id).await?;
        if code.created_by_id != actor.id && !actor.is_admin() {
            tracing::warn!(
                invite_code_id = id,
                actor_id = actor.id,
                "Rejected access to a foreign invite code"
            );
            return Err(InviteCodeError::Forbidden);
        }
        Ok(code)
    }

    /// The code with its creator and every redemption, users resolved.
    pub async fn get_with_relations(&self, id: i64, actor: &UserRow) -> InviteCodeResult<InviteCodeView> {
        let code = self.get_owned(id, actor).await?;
        let view = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let mut view = attach_creators(&mut exec, std::slice::from_ref(&code))
                    .await?
                    .pop()
                    .unwrap_or_else(|| code.to_view());
                let usages = exec.invite_code_usage().list_all_usages_by_code(code.id).await?;
                view.usage_records = Some(hydrate(&mut exec, usages, Hydrate::USERS).await?);
                Ok::<_, DataBaseError>(view)
            })
            .await?;
        Ok(view)
    }

    /// Read-only eligibility check. Never changes the code.
    pub async fn validate(&self, code: &str) -> InviteCodeResult<InviteCode> {
        let found = self.get_by_code(code).await?;
        match found.ineligibility() {
            Some(reason) => Err(reason.into()),
            None => Ok(found),
        }
    }

    /// Only `active` and `disabled` can be set; `used` follows from redemptions alone.
    pub async fn update_status(
        &self,
        id: i64,
        status: InviteCodeStatus,
        actor: &UserRow,
    ) -> InviteCodeResult<InviteCode> {
        if status == InviteCodeStatus::Used {
            return Err(InviteCodeError::Validation(
                "status must be one of: active, disabled".to_owned(),
            ));
        }
        self.get_owned(id, actor).await?;
        let updated = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                if let Some(updated) = exec.invite_code().update_invite_code_status(id, status).await? {
                    return Ok(updated);
                }
                match exec.invite_code().get_invite_code_by_id(id).await? {
                    Some(current) if current.is_exhausted() => Err(InviteCodeError::Exhausted),
                    _ => Err(InviteCodeError::NotFound),
                }
            })
            .await?;
        tracing::info!(
            invite_code_id = id,
            actor_id = actor.id,
            status = status.as_str(),
            "Invite code status updated"
        );
        Ok(updated)
    }

    pub async fn soft_delete(&self, id: i64, actor: &UserRow) -> InviteCodeResult<()> {
        self.get_owned(id, actor).await?;
        self.state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.invite_code().soft_delete_invite_code(id).await
            })
            .await?;
        tracing::info!(invite_code_id = id, actor_id = actor.id, "Invite code deleted");
        Ok(())
    }

    pub async fn list_mine(
        &self,
        actor: &UserRow,
        page: PageQueryBinder,
    ) -> InviteCodeResult<PageQueryResult<InviteCodeView>> {
        let page = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.invite_code()
                    .list_invite_codes_by_creator_page(actor.id, page)
                    .await
            })
            .await?;
        Ok(page.map_items(|c| c.to_view()))
    }

    pub async fn list_all(
        &self,
        page: PageQueryBinder,
    ) -> InviteCodeResult<PageQueryResult<InviteCodeView>> {
        let page = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let page = exec.invite_code().list_invite_codes_page(page).await?;
                let views = attach_creators(&mut exec, &page.items).await?;
                Ok::<_, DataBaseError>(page.swap_items(views))
            })
            .await?;
        Ok(page)
    }

    pub async fn stats(&self) -> InviteCodeResult<InviteCodeStats> {
        let stats = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.invite_code().invite_code_stats().await
            })
            .await?;
        Ok(stats)
    }

    /// Consumes one use of `code` for `user_id` and appends the ledger entry, atomically.
    ///
    /// Lock contention is retried a bounded number of times before surfacing as
    /// [`InviteCodeError::Conflict`].
    pub async fn redeem(
        &self,
        code: &str,
        user_id: i64,
        origin: &RedemptionOrigin,
    ) -> InviteCodeResult<InviteCode> {
        let cfg = &self.state.config.invite;
        let db = &self.state.db;
        let res = retry_on_conflict(
            cfg.redeem_busy_retries,
            Duration::from_millis(cfg.redeem_retry_backoff_ms),
            move || {
                db.transaction(async move |mut exec: LinkDatabaseExecutor<'_>| {
                    redeem_in(&mut exec, code, user_id, origin).await
                })
            },
        )
        .await;
        match res {
            Ok((redeemed, usage)) => {
                tracing::info!(
                    invite_code_id = redeemed.id,
                    user_id,
                    usage_id = usage.id,
                    used_count = redeemed.used_count,
                    status = redeemed.status.as_str(),
                    "Invite code redeemed"
                );
                Ok(redeemed)
            }
            Err(e) if e.is_rejection() => {
                tracing::warn!(user_id, "Invite code redemption rejected: {e}");
                Err(e)
            }
            Err(e) => {
                tracing::error!(user_id, "Invite code redemption failed: {e:?}");
                Err(e)
            }
        }
    }

    /// Redemptions of one code, newest first.
    pub async fn usages(
        &self,
        id: i64,
        actor: &UserRow,
        page: PageQueryBinder,
    ) -> InviteCodeResult<PageQueryResult<InviteCodeUsageView>> {
        let code = self.get_owned(id, actor).await?;
        let page = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let mut page = exec
                    .invite_code_usage()
                    .list_usages_by_code_page(code.id, page)
                    .await?;
                let items = page.take_items();
                let views = hydrate(&mut exec, items, Hydrate::USERS).await?;
                Ok::<_, DataBaseError>(page.swap_items(views))
            })
            .await?;
        Ok(page)
    }

    /// Redemptions of any code `actor` created.
    pub async fn usages_of_created(
        &self,
        actor: &UserRow,
        page: PageQueryBinder,
    ) -> InviteCodeResult<PageQueryResult<InviteCodeUsageView>> {
        let page = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let mut page = exec
                    .invite_code_usage()
                    .list_usages_by_creator_page(actor.id, page)
                    .await?;
                let items = page.take_items();
                let views = hydrate(&mut exec, items, Hydrate::ALL).await?;
                Ok::<_, DataBaseError>(page.swap_items(views))
            })
            .await?;
        Ok(page)
    }

    /// Codes `user_id` has redeemed.
    pub async fn usages_by_user(
        &self,
        user_id: i64,
        page: PageQueryBinder,
    ) -> InviteCodeResult<PageQueryResult<InviteCodeUsageView>> {
        let page = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let mut page = exec
                    .invite_code_usage()
                    .list_usages_by_user_page(user_id, page)
                    .await?;
                let items = page.take_items();
                let hydrate_codes = Hydrate {
                    users: false,
                    invite_codes: true,
                };
                let views = hydrate(&mut exec, items, hydrate_codes).await?;
                Ok::<_, DataBaseError>(page.swap_items(views))
            })
            .await?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::Role;
    use crate::services::states::testing::{seed_user, test_state};
    use crate::services::states::db::testing::execute_raw;
    use futures::future::join_all;

    fn new_code(max_uses: i64, description: &str) -> NewInviteCode {
        NewInviteCode {
            max_uses,
            description: description.to_owned(),
            metadata: None,
        }
    }

    fn origin() -> RedemptionOrigin {
        RedemptionOrigin::new(Some("127.0.0.1".into()), Some("linkgate-test".into()))
    }

    fn assert_invariants(code: &InviteCode) {
        assert!(0 <= code.used_count && code.used_count <= code.max_uses);
        assert_eq!(
            code.status == InviteCodeStatus::Used,
            code.used_count == code.max_uses,
            "status {:?} with {}/{} uses",
            code.status,
            code.used_count,
            code.max_uses
        );
    }

    async fn ledger_count(svc: &InviteCodeService, id: i64) -> i64 {
        svc.state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.invite_code_usage().count_usages_by_code(id).await
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn single_use_code_is_spent_by_one_redemption() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let redeemer = seed_user(&state, "redeemer", Role::User).await;
        let code = svc.create(&creator, new_code(1, "")).await.unwrap();
        assert_eq!(code.code.len(), 32);
        assert_eq!((code.status, code.used_count), (InviteCodeStatus::Active, 0));

        let redeemed = svc.redeem(&code.code, redeemer.id, &origin()).await.unwrap();
        assert_eq!(redeemed.status, InviteCodeStatus::Used);
        assert_eq!(redeemed.used_count, 1);
        assert_invariants(&redeemed);

        let again = svc.redeem(&code.code, creator.id, &origin()).await;
        assert!(matches!(again, Err(InviteCodeError::Exhausted)));
        assert_eq!(ledger_count(&svc, code.id).await, 1);
    }

    #[tokio::test]
    async fn partially_used_code_stays_active_and_lists_newest_first() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let code = svc.create(&creator, new_code(3, "team invite")).await.unwrap();
        assert_eq!(code.description, "team invite");
        for name in ["first", "second"] {
            let user = seed_user(&state, name, Role::User).await;
            let redeemed = svc.redeem(&code.code, user.id, &origin()).await.unwrap();
            assert_invariants(&redeemed);
        }
        let current = svc.get(code.id).await.unwrap();
        assert_eq!((current.status, current.used_count), (InviteCodeStatus::Active, 2));

        let usages = svc
            .usages(code.id, &creator, PageQueryBinder::default())
            .await
            .unwrap();
        assert_eq!(usages.total, 2);
        assert_eq!(usages.items.len(), 2);
        assert!(usages.items[0].used_at >= usages.items[1].used_at);
        assert!(usages.items[0].id > usages.items[1].id);
        assert_eq!(
            usages.items[0].used_by.as_ref().map(|u| u.username.as_str()),
            Some("second")
        );
        assert_eq!(usages.items[0].user_agent, "linkgate-test");
    }

    #[tokio::test]
    async fn disabled_code_rejects_redemption() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let code = svc.create(&creator, new_code(5, "")).await.unwrap();
        let disabled = svc
            .update_status(code.id, InviteCodeStatus::Disabled, &creator)
            .await
            .unwrap();
        assert_eq!(disabled.status, InviteCodeStatus::Disabled);

        let res = svc.redeem(&code.code, creator.id, &origin()).await;
        assert!(matches!(res, Err(InviteCodeError::Disabled)));
        let current = svc.get(code.id).await.unwrap();
        assert_eq!(current.used_count, 0);
        assert_eq!(ledger_count(&svc, code.id).await, 0);

        svc.update_status(code.id, InviteCodeStatus::Active, &creator)
            .await
            .unwrap();
        svc.redeem(&code.code, creator.id, &origin()).await.unwrap();
    }

    #[tokio::test]
    async fn soft_deleted_code_is_not_found() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let code = svc.create(&creator, new_code(2, "")).await.unwrap();
        svc.soft_delete(code.id, &creator).await.unwrap();

        assert!(matches!(svc.validate(&code.code).await, Err(InviteCodeError::NotFound)));
        assert!(matches!(svc.get(code.id).await, Err(InviteCodeError::NotFound)));
        assert!(matches!(
            svc.redeem(&code.code, creator.id, &origin()).await,
            Err(InviteCodeError::NotFound)
        ));
        assert!(matches!(
            svc.soft_delete(code.id, &creator).await,
            Err(InviteCodeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_redemptions_never_oversell() {
        const MAX_USES: i64 = 5;
        const EXTRA: usize = 4;
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let code = svc.create(&creator, new_code(MAX_USES, "")).await.unwrap();
        let mut users = Vec::new();
        for n in 0..MAX_USES as usize + EXTRA {
            users.push(seed_user(&state, &format!("racer{n}"), Role::User).await);
        }

        let origin = origin();
        let results = join_all(
            users
                .iter()
                .map(|u| svc.redeem(&code.code, u.id, &origin)),
        )
        .await;
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let exhausted = results
            .iter()
            .filter(|r| matches!(r, Err(InviteCodeError::Exhausted)))
            .count();
        assert_eq!(ok, MAX_USES as usize);
        assert_eq!(exhausted, EXTRA);

        let current = svc.get(code.id).await.unwrap();
        assert_eq!(current.used_count, MAX_USES);
        assert_invariants(&current);
        assert_eq!(ledger_count(&svc, code.id).await, current.used_count);
    }

    #[tokio::test]
    async fn validation_is_read_only() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let code = svc.create(&creator, new_code(2, "")).await.unwrap();
        svc.redeem(&code.code, creator.id, &origin()).await.unwrap();
        for _ in 0..10 {
            let seen = svc.validate(&code.code).await.unwrap();
            assert_eq!((seen.status, seen.used_count), (InviteCodeStatus::Active, 1));
        }
        let current = svc.get(code.id).await.unwrap();
        assert_eq!(current.used_count, 1);
        assert_eq!(ledger_count(&svc, code.id).await, 1);
    }

    #[tokio::test]
    async fn validation_reports_why_a_code_is_unusable() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        assert!(matches!(
            svc.validate("ffffffffffffffffffffffffffffffff").await,
            Err(InviteCodeError::NotFound)
        ));
        let code = svc.create(&creator, new_code(1, "")).await.unwrap();
        svc.redeem(&code.code, creator.id, &origin()).await.unwrap();
        assert!(matches!(svc.validate(&code.code).await, Err(InviteCodeError::Exhausted)));
    }

    #[tokio::test]
    async fn used_status_cannot_be_set_or_undone() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let code = svc.create(&creator, new_code(1, "")).await.unwrap();
        assert!(matches!(
            svc.update_status(code.id, InviteCodeStatus::Used, &creator).await,
            Err(InviteCodeError::Validation(_))
        ));
        svc.redeem(&code.code, creator.id, &origin()).await.unwrap();
        assert!(matches!(
            svc.update_status(code.id, InviteCodeStatus::Active, &creator).await,
            Err(InviteCodeError::Exhausted)
        ));
        let current = svc.get(code.id).await.unwrap();
        assert_invariants(&current);
    }

    #[tokio::test]
    async fn only_creator_or_admin_may_manage_a_code() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let stranger = seed_user(&state, "stranger", Role::User).await;
        let admin = seed_user(&state, "admin", Role::Admin).await;
        let code = svc.create(&creator, new_code(2, "")).await.unwrap();
        assert!(matches!(
            svc.update_status(code.id, InviteCodeStatus::Disabled, &stranger).await,
            Err(InviteCodeError::Forbidden)
        ));
        assert!(matches!(
            svc.soft_delete(code.id, &stranger).await,
            Err(InviteCodeError::Forbidden)
        ));
        let view = svc.get_with_relations(code.id, &admin).await.unwrap();
        assert_eq!(view.created_by.map(|u| u.id), Some(creator.id));
        assert_eq!(view.usage_records.map(|u| u.len()), Some(0));
        svc.soft_delete(code.id, &admin).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_persisting() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        for bad in [new_code(0, ""), new_code(101, ""), new_code(1, &"x".repeat(256))] {
            match svc.create(&creator, bad).await {
                Err(InviteCodeError::Validation(msg)) => assert!(!msg.is_empty()),
                other => panic!("expected a validation error, got {other:?}"),
            }
        }
        assert_eq!(svc.stats().await.unwrap(), InviteCodeStats::default());
    }

    #[tokio::test]
    async fn stats_and_listings_skip_deleted_codes() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let alice = seed_user(&state, "alice", Role::User).await;
        let bob = seed_user(&state, "bob", Role::User).await;

        let spent = svc.create(&alice, new_code(1, "")).await.unwrap();
        let partial = svc.create(&alice, new_code(3, "")).await.unwrap();
        let off = svc.create(&bob, new_code(2, "")).await.unwrap();
        let gone = svc.create(&bob, new_code(4, "")).await.unwrap();
        svc.redeem(&spent.code, bob.id, &origin()).await.unwrap();
        svc.redeem(&partial.code, bob.id, &origin()).await.unwrap();
        svc.redeem(&gone.code, alice.id, &origin()).await.unwrap();
        svc.update_status(off.id, InviteCodeStatus::Disabled, &bob)
            .await
            .unwrap();
        svc.soft_delete(gone.id, &bob).await.unwrap();

        let stats = svc.stats().await.unwrap();
        assert_eq!(
            stats,
            InviteCodeStats {
                total_codes: 3,
                active_codes: 1,
                used_codes: 1,
                disabled_codes: 1,
                total_redemptions: 2,
            }
        );

        let all = svc.list_all(PageQueryBinder::default()).await.unwrap();
        assert_eq!(all.total, 3);
        assert!(all.items.iter().all(|v| v.created_by.is_some()));
        let mine = svc
            .list_mine(&alice, PageQueryBinder { page: 1, page_size: 1 })
            .await
            .unwrap();
        assert_eq!((mine.total, mine.items.len()), (2, 1));
        assert_eq!(mine.items[0].id, partial.id);

        // Ledger history survives the deletion of its code.
        let redeemed_by_alice = svc
            .usages_by_user(alice.id, PageQueryBinder::default())
            .await
            .unwrap();
        assert_eq!(redeemed_by_alice.total, 1);
        assert_eq!(
            redeemed_by_alice.items[0].invite_code.as_ref().map(|c| c.id),
            Some(gone.id)
        );
        let of_alices_codes = svc
            .usages_of_created(&alice, PageQueryBinder::default())
            .await
            .unwrap();
        assert_eq!(of_alices_codes.total, 2);
        assert!(of_alices_codes.items.iter().all(|u| u.used_by_id == bob.id));
    }

    #[tokio::test]
    async fn failed_ledger_write_rolls_the_claim_back() {
        let (state, _tdb) = test_state().await;
        let svc = InviteCodeService::new(state.clone());
        let creator = seed_user(&state, "creator", Role::User).await;
        let code = svc.create(&creator, new_code(1, "")).await.unwrap();
        execute_raw(&state.db, "DROP TABLE invite_code_usages").await;

        let res = svc.redeem(&code.code, creator.id, &origin()).await;
        assert!(matches!(res, Err(InviteCodeError::Database(_))));
        let current = svc.get(code.id).await.unwrap();
        assert_eq!((current.status, current.used_count), (InviteCodeStatus::Active, 0));
    }
}
