use crate::models::invite_code_usage::{InviteCodeUsage, RedemptionOrigin};
use crate::services::states::db::{
    DataBaseResult, PageQueryBinder, PageQueryResult, SqliteBaseResultExt,
};
use sqlx::{Executor, Sqlite, query_as, query_scalar};
use time::OffsetDateTime;

macro_rules! select_usages {
    ($tail:literal) => {
        concat!(
            r#"
                SELECT
                    u.id,
                    u.invite_code_id,
                    u.used_by_id,
                    u.used_at,
                    u.ip_address,
                    u.user_agent,
                    u.created_at
                FROM invite_code_usages u
            "#,
            $tail
        )
    };
}

pub struct InviteCodeUsageRepo<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    pub inner: &'a mut E,
}

impl<'a, E> InviteCodeUsageRepo<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    pub async fn insert_usage(
        &mut self,
        invite_code_id: i64,
        used_by_id: i64,
        origin: &RedemptionOrigin,
    ) -> DataBaseResult<InviteCodeUsage> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query_as::<_, InviteCodeUsage>(
            r#"
                INSERT INTO invite_code_usages
                    (invite_code_id, used_by_id, used_at, ip_address, user_agent, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id, invite_code_id, used_by_id, used_at, ip_address, user_agent, created_at
            "#,
        )
        .bind(invite_code_id)
        .bind(used_by_id)
        .bind(now)
        .bind(origin.ip_or_unknown())
        .bind(origin.user_agent_or_unknown())
        .bind(now)
        .fetch_one(&mut *self.inner)
        .await
        .resolve()
    }

    pub async fn count_usages_by_code(&mut self, invite_code_id: i64) -> DataBaseResult<i64> {
        query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM invite_code_usages WHERE invite_code_id = ? AND deleted_at IS NULL",
        )
        .bind(invite_code_id)
        .fetch_one(&mut *self.inner)
        .await
        .resolve()
    }

    pub async fn list_all_usages_by_code(
        &mut self,
        invite_code_id: i64,
    ) -> DataBaseResult<Vec<InviteCodeUsage>> {
        query_as::<_, InviteCodeUsage>(select_usages!(
            "WHERE u.invite_code_id = ? AND u.deleted_at IS NULL ORDER BY u.used_at DESC, u.id DESC"
        ))
        .bind(invite_code_id)
        .fetch_all(&mut *self.inner)
        .await
        .resolve()
    }

    pub async fn list_usages_by_code_page(
        &mut self,
        invite_code_id: i64,
        page: PageQueryBinder,
    ) -> DataBaseResult<PageQueryResult<InviteCodeUsage>> {
        page.query_page_ctx(|pq| async move {
            let total = query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM invite_code_usages WHERE invite_code_id = ? AND deleted_at IS NULL",
            )
            .bind(invite_code_id)
            .fetch_one(&mut *self.inner)
            .await?;
            let items = query_as::<_, InviteCodeUsage>(select_usages!(
                r#"
                    WHERE u.invite_code_id = ? AND u.deleted_at IS NULL
                    ORDER BY u.used_at DESC, u.id DESC
                    LIMIT ? OFFSET ?
                "#
            ))
            .bind(invite_code_id)
            .bind(pq.limit)
            .bind(pq.offset)
            .fetch_all(&mut *self.inner)
            .await?;
            Ok((items, total))
        })
        .await
    }

    pub async fn list_usages_by_user_page(
        &mut self,
        used_by_id: i64,
        page: PageQueryBinder,
    ) -> DataBaseResult<PageQueryResult<InviteCodeUsage>> {
        page.query_page_ctx(|pq| async move {
            let total = query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM invite_code_usages WHERE used_by_id = ? AND deleted_at IS NULL",
            )
            .bind(used_by_id)
            .fetch_one(&mut *self.inner)
            .await?;
            let items = query_as::<_, InviteCodeUsage>(select_usages!(
                r#"
                    WHERE u.used_by_id = ? AND u.deleted_at IS NULL
                    ORDER BY u.used_at DESC, u.id DESC
                    LIMIT ? OFFSET ?
                "#
            ))
            .bind(used_by_id)
            .bind(pq.limit)
            .bind(pq.offset)
            .fetch_all(&mut *self.inner)
            .await?;
            Ok((items, total))
        })
        .await
    }

    /// Redemptions of any code the user created, soft-deleted codes included.
    pub async fn list_usages_by_creator_page(
        &mut self,
        creator_id: i64,
        page: PageQueryBinder,
    ) -> DataBaseResult<PageQueryResult<InviteCodeUsage>> {
        page.query_page_ctx(|pq| async move {
            let total = query_scalar::<_, i64>(
                r#"
                    SELECT COUNT(*)
                    FROM invite_code_usages u
                    JOIN invite_codes c ON c.id = u.invite_code_id
                    WHERE c.created_by_id = ? AND u.deleted_at IS NULL
                "#,
            )
            .bind(creator_id)
            .fetch_one(&mut *self.inner)
            .await?;
            let items = query_as::<_, InviteCodeUsage>(select_usages!(
                r#"
                    JOIN invite_codes c ON c.id = u.invite_code_id
                    WHERE c.created_by_id = ? AND u.deleted_at IS NULL
                    ORDER BY u.used_at DESC, u.id DESC
                    LIMIT ? OFFSET ?
                "#
            ))
            .bind(creator_id)
            .bind(pq.limit)
            .bind(pq.offset)
            .fetch_all(&mut *self.inner)
            .await?;
            Ok((items, total))
        })
        .await
    }
}
