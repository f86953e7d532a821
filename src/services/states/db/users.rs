use crate::models::users::{AuthProvider, NewUser, UserRow, UserRowOptional, UserStatus};
use crate::services::states::db::{DataBaseResult, SqliteBaseResultExt, SqliteQueryResultExt};
use sqlx::{Executor, Sqlite, query, query_as, query_scalar};
use time::OffsetDateTime;

macro_rules! select_users {
    ($tail:literal) => {
        concat!(
            r#"
                SELECT
                    id,
                    email,
                    username,
                    name,
                    avatar,
                    password_hash,
                    provider,
                    provider_id,
                    status,
                    role,
                    invite_code_id,
                    invite_code_used,
                    created_at,
                    updated_at,
                    deleted_at
                FROM users
            "#,
            $tail
        )
    };
}

pub struct UsersRepo<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    pub inner: &'a mut E,
}

impl<'a, E> UsersRepo<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    pub async fn get_user_count(&mut self) -> DataBaseResult<i64> {
        query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *self.inner)
            .await
            .resolve()
    }

    pub async fn add_user(&mut self, user: &NewUser) -> DataBaseResult<i64> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query(
            r#"
                INSERT INTO users
                    (email, username, name, avatar, password_hash, provider, provider_id,
                     status, role, invite_code_id, invite_code_used, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.avatar)
        .bind(user.password_hash.as_deref())
        .bind(user.provider)
        .bind(user.provider_id.as_deref())
        .bind(UserStatus::Active)
        .bind(user.role)
        .bind(user.invite_code_id)
        .bind(user.invite_code_used.as_deref())
        .bind(now)
        .bind(now)
        .execute(&mut *self.inner)
        .await
        .resolve()
        .map(|result| result.last_insert_rowid())
    }

    /// Soft-deleted users are returned too; callers decide whether they still count.
    pub async fn query_user_by_id(&mut self, id: i64) -> DataBaseResult<Option<UserRow>> {
        query_as::<_, UserRow>(select_users!("WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.inner)
            .await
            .resolve()
    }

    pub async fn query_user_by_email(&mut self, email: &str) -> DataBaseResult<Option<UserRow>> {
        query_as::<_, UserRow>(select_users!("WHERE email = ? AND deleted_at IS NULL"))
            .bind(email)
            .fetch_optional(&mut *self.inner)
            .await
            .resolve()
    }

    pub async fn query_user_by_provider(
        &mut self,
        provider: AuthProvider,
        provider_id: &str,
    ) -> DataBaseResult<Option<UserRow>> {
        query_as::<_, UserRow>(select_users!(
            "WHERE provider = ? AND provider_id = ? AND deleted_at IS NULL"
        ))
        .bind(provider)
        .bind(provider_id)
        .fetch_optional(&mut *self.inner)
        .await
        .resolve()
    }

    pub async fn query_users_by_ids(&mut self, ids: &[i64]) -> DataBaseResult<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids_json = serde_json::to_string(ids)?;
        query_as::<_, UserRow>(select_users!(
            "WHERE id IN (SELECT je.value FROM json_each(?) AS je)"
        ))
        .bind(ids_json)
        .fetch_all(&mut *self.inner)
        .await
        .resolve()
    }

    pub async fn username_exists(&mut self, username: &str) -> DataBaseResult<bool> {
        query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
            .bind(username)
            .fetch_one(&mut *self.inner)
            .await
            .resolve()
    }

    pub async fn email_exists(&mut self, email: &str) -> DataBaseResult<bool> {
        query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
            .bind(email)
            .fetch_one(&mut *self.inner)
            .await
            .resolve()
    }

    pub(in crate::services) async fn update_profile(
        &mut self,
        update_user: UserRowOptional,
    ) -> DataBaseResult<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query(
            r#"
                UPDATE users
                SET username   = COALESCE(?, username),
                    name       = COALESCE(?, name),
                    avatar     = COALESCE(?, avatar),
                    updated_at = ?
                WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(update_user.username)
        .bind(update_user.name)
        .bind(update_user.avatar)
        .bind(now)
        .bind(update_user.id)
        .execute(&mut *self.inner)
        .await
        .resolve_affected()?;
        Ok(())
    }

    pub(in crate::services) async fn update_password(
        &mut self,
        id: i64,
        password_hash: &str,
    ) -> DataBaseResult<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(password_hash)
            .bind(now)
            .bind(id)
            .execute(&mut *self.inner)
            .await
            .resolve_affected()?;
        Ok(())
    }

    pub(in crate::services) async fn update_oauth_profile(
        &mut self,
        id: i64,
        name: &str,
        avatar: &str,
    ) -> DataBaseResult<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        query(
            r#"
                UPDATE users
                SET name       = ?,
                    avatar     = ?,
                    updated_at = ?
                WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(avatar)
        .bind(now)
        .bind(id)
        .execute(&mut *self.inner)
        .await
        .resolve_affected()?;
        Ok(())
    }
}
