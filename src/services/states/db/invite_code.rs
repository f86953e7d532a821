use crate::models::invite_code::{InviteCode, InviteCodeStats, InviteCodeStatus};
use crate::services::states::db::{
    DataBaseResult, PageQueryBinder, PageQueryResult, SqliteBaseResultExt, SqliteQueryResultExt,
};
use sqlx::types::Json;
use sqlx::{Executor, Sqlite, query, query_as, query_scalar};
use time::OffsetDateTime;

macro_rules! select_invite_codes {
    ($tail:literal) => {
        concat!(
            r#"
                SELECT
                    id,
                    code,
                    created_by_id,
                    status,
                    max_uses,
                    used_count,
                    description,
                    metadata,
                    created_at,
                    updated_at,
                    deleted_at
                FROM invite_codes
            "#,
            $tail
        )
    };
}

pub struct InviteCodeRepo<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    pub inner: &'a mut E,
}

impl<'a, E> InviteCodeRepo<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    pub async fn insert_invite_code(
        &mut self,
        code: &str,
        created_by_id: i64,
        max_uses: i64,
        description: &str,
        metadata: Option<&serde_json::Value>,
    ) -> DataBaseResult<InviteCode> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query_as::<_, InviteCode>(
            r#"
                INSERT INTO invite_codes
                    (code, created_by_id, status, max_uses, used_count, description, metadata, created_at, updated_at)
                VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?)
                RETURNING
                    id, code, created_by_id, status, max_uses, used_count,
                    description, metadata, created_at, updated_at, deleted_at
            "#,
        )
        .bind(code)
        .bind(created_by_id)
        .bind(InviteCodeStatus::Active)
        .bind(max_uses)
        .bind(description)
        .bind(metadata.map(Json))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.inner)
        .await
        .resolve()
    }

    /// Soft-deleted rows still hold their code in the unique index, so they count here.
    pub async fn code_exists(&mut self, code: &str) -> DataBaseResult<bool> {
        query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM invite_codes WHERE code = ?)")
            .bind(code)
            .fetch_one(&mut *self.inner)
            .await
            .resolve()
    }

    pub async fn get_invite_code_by_id(&mut self, id: i64) -> DataBaseResult<Option<InviteCode>> {
        query_as::<_, InviteCode>(select_invite_codes!(
            "WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&mut *self.inner)
        .await
        .resolve()
    }

    pub async fn get_invite_code_by_code<T>(
        &mut self,
        code: T,
    ) -> DataBaseResult<Option<InviteCode>>
    where
        T: AsRef<str>,
    {
        query_as::<_, InviteCode>(select_invite_codes!(
            "WHERE code = ? AND deleted_at IS NULL"
        ))
        .bind(code.as_ref())
        .fetch_optional(&mut *self.inner)
        .await
        .resolve()
    }

    /// Includes soft-deleted codes: callers resolve history, not live codes.
    pub async fn get_invite_codes_by_ids(&mut self, ids: &[i64]) -> DataBaseResult<Vec<InviteCode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids_json = serde_json::to_string(ids)?;
        query_as::<_, InviteCode>(select_invite_codes!(
            "WHERE id IN (SELECT je.value FROM json_each(?) AS je)"
        ))
        .bind(ids_json)
        .fetch_all(&mut *self.inner)
        .await
        .resolve()
    }

    /// Takes one use of the code if it is still redeemable, flipping it to `used` on the
    /// last one. `None` means nothing was claimed.
    pub async fn claim_invite_code_slot(&mut self, code: &str) -> DataBaseResult<Option<InviteCode>> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query_as::<_, InviteCode>(
            r#"
                UPDATE invite_codes
                SET used_count = used_count + 1,
                    status     = CASE WHEN used_count + 1 >= max_uses THEN 'used' ELSE status END,
                    updated_at = ?
                WHERE code = ?
                  AND deleted_at IS NULL
                  AND status = 'active'
                  AND used_count < max_uses
                RETURNING
                    id, code, created_by_id, status, max_uses, used_count,
                    description, metadata, created_at, updated_at, deleted_at
            "#,
        )
        .bind(now)
        .bind(code)
        .fetch_optional(&mut *self.inner)
        .await
        .resolve()
    }

    /// Only touches live, non-exhausted codes.
    pub async fn update_invite_code_status(
        &mut self,
        id: i64,
        status: InviteCodeStatus,
    ) -> DataBaseResult<Option<InviteCode>> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query_as::<_, InviteCode>(
            r#"
                UPDATE invite_codes
                SET status = ?, updated_at = ?
                WHERE id = ?
                  AND deleted_at IS NULL
                  AND used_count < max_uses
                RETURNING
                    id, code, created_by_id, status, max_uses, used_count,
                    description, metadata, created_at, updated_at, deleted_at
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.inner)
        .await
        .resolve()
    }

    pub async fn soft_delete_invite_code(&mut self, id: i64) -> DataBaseResult<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query("UPDATE invite_codes SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *self.inner)
            .await
            .resolve_affected()?;
        Ok(())
    }

    pub async fn list_invite_codes_page(
        &mut self,
        page: PageQueryBinder,
    ) -> DataBaseResult<PageQueryResult<InviteCode>> {
        page.query_page_ctx(|pq| async move {
            let total = query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM invite_codes WHERE deleted_at IS NULL",
            )
            .fetch_one(&mut *self.inner)
            .await?;
            let items = query_as::<_, InviteCode>(select_invite_codes!(
                "WHERE deleted_at IS NULL ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
            ))
            .bind(pq.limit)
            .bind(pq.offset)
            .fetch_all(&mut *self.inner)
            .await?;
            Ok((items, total))
        })
        .await
    }

    pub async fn list_invite_codes_by_creator_page(
        &mut self,
        creator_id: i64,
        page: PageQueryBinder,
    ) -> DataBaseResult<PageQueryResult<InviteCode>> {
        page.query_page_ctx(|pq| async move {
            let total = query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM invite_codes WHERE created_by_id = ? AND deleted_at IS NULL",
            )
            .bind(creator_id)
            .fetch_one(&mut *self.inner)
            .await?;
            let items = query_as::<_, InviteCode>(select_invite_codes!(
                r#"
                    WHERE created_by_id = ? AND deleted_at IS NULL
                    ORDER BY created_at DESC, id DESC
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

    pub async fn invite_code_stats(&mut self) -> DataBaseResult<InviteCodeStats> {
        query_as::<_, InviteCodeStats>(
            r#"
                SELECT
                    COUNT(*)                                                        AS total_codes,
                    COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0)   AS active_codes,
                    COALESCE(SUM(CASE WHEN status = 'used' THEN 1 ELSE 0 END), 0)     AS used_codes,
                    COALESCE(SUM(CASE WHEN status = 'disabled' THEN 1 ELSE 0 END), 0) AS disabled_codes,
                    COALESCE(SUM(used_count), 0)                                    AS total_redemptions
                FROM invite_codes
                WHERE deleted_at IS NULL
            "#,
        )
        .fetch_one(&mut *self.inner)
        .await
        .resolve()
    }
}
