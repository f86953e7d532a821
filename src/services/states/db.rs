mod invite_code;
mod invite_code_usage;
mod users;

use crate::services::states::db::invite_code::InviteCodeRepo;
use crate::services::states::db::invite_code_usage::InviteCodeUsageRepo;
use crate::services::states::db::users::UsersRepo;
use linkgate_macros::BusinessError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{Acquire, Connection, Executor, Pool, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, thiserror::Error, BusinessError)]
pub enum DataBaseError {
    #[error("{0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Row not found!")]
    RowNotFound,
    #[error("No affected rows!")]
    NoAffectedRows,
    #[error("Unique violation error! code: {code:?}, msg: {msg}")]
    UniqueViolation { code: Option<String>, msg: String },
    #[error("Foreign key violation error! code: {code:?}, msg: {msg}")]
    ForeignKeyViolation { code: Option<String>, msg: String },
    #[error("Database is busy! code: {code:?}, msg: {msg}")]
    Busy { code: Option<String>, msg: String },
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("sqlx error: {0}")]
    SqlxOther(#[from] sqlx::Error),
}

impl DataBaseError {
    /// Lock contention that a fresh attempt may get past.
    pub fn is_busy(&self) -> bool {
        matches!(self, DataBaseError::Busy { .. })
    }
}

#[serde_inline_default]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageQueryBinder {
    #[serde_inline_default(1)]
    pub page: u32,
    #[serde_inline_default(10)]
    #[serde(alias = "limit")]
    pub page_size: u32,
}

impl Default for PageQueryBinder {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
        }
    }
}

pub struct PageQueryInner {
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct PageQueryResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> PageQueryResult<T> {
    pub fn take_items(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    pub fn swap_items<S>(self, items: Vec<S>) -> PageQueryResult<S> {
        PageQueryResult {
            items,
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }

    pub fn map_items<S, F>(self, f: F) -> PageQueryResult<S>
    where
        F: FnMut(T) -> S,
    {
        PageQueryResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

impl PageQueryBinder {
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Page numbers start at 1; out-of-range sizes fall back to the default of 10.
    pub fn normalized(self) -> Self {
        let page = self.page.max(1);
        let page_size = match self.page_size {
            0 => 10,
            n if n > Self::MAX_PAGE_SIZE => 10,
            n => n,
        };
        Self { page, page_size }
    }

    /// `query_fn` returns the page rows together with the total row count.
    pub async fn query_page_ctx<T, F, Fut>(self, query_fn: F) -> DataBaseResult<PageQueryResult<T>>
    where
        F: FnOnce(PageQueryInner) -> Fut,
        Fut: Future<Output = Result<(Vec<T>, i64), sqlx::Error>>,
    {
        let page = self.normalized();
        let inner = PageQueryInner {
            offset: (page.page as i64 - 1) * page.page_size as i64,
            limit: page.page_size as i64,
        };
        let (items, total) = query_fn(inner).await.resolve()?;
        Ok(PageQueryResult {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }
}

pub trait SqliteBaseResultExt<T> {
    fn resolve(self) -> DataBaseResult<T>;
}

impl<T> SqliteBaseResultExt<T> for Result<T, sqlx::Error> {
    fn resolve(self) -> DataBaseResult<T> {
        match self {
            Ok(result) => Ok(result),
            Err(sqlx::Error::RowNotFound) => Err(DataBaseError::RowNotFound),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DataBaseError::UniqueViolation {
                    code: e.code().map(|c| c.to_string()),
                    msg: e.message().to_string(),
                })
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(DataBaseError::ForeignKeyViolation {
                    code: e.code().map(|c| c.to_string()),
                    msg: e.message().to_string(),
                })
            }
            Err(sqlx::Error::Database(e)) if is_busy_code(e.code().as_deref()) => {
                Err(DataBaseError::Busy {
                    code: e.code().map(|c| c.to_string()),
                    msg: e.message().to_string(),
                })
            }
            Err(e) => Err(DataBaseError::SqlxOther(e)),
        }
    }
}

// Extended result codes keep the primary code in the low byte.
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

pub trait SqliteQueryResultExt {
    fn resolve_affected(self) -> DataBaseResult<SqliteQueryResult>;
}

impl SqliteQueryResultExt for Result<SqliteQueryResult, sqlx::Error> {
    fn resolve_affected(self) -> DataBaseResult<SqliteQueryResult> {
        match self {
            Ok(res) if res.rows_affected() == 0 => Err(DataBaseError::NoAffectedRows),
            other => other.resolve(),
        }
    }
}

pub type DataBaseResult<T> = Result<T, DataBaseError>;

pub struct DataBaseExecutor<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    inner: &'a mut E,
}

impl<'a, E> DataBaseExecutor<'a, E>
where
    for<'c> &'c mut E: Executor<'c, Database = Sqlite>,
{
    #[inline]
    pub fn invite_code(&mut self) -> InviteCodeRepo<'_, E> {
        InviteCodeRepo {
            inner: &mut *self.inner,
        }
    }

    #[inline]
    pub fn invite_code_usage(&mut self) -> InviteCodeUsageRepo<'_, E> {
        InviteCodeUsageRepo {
            inner: &mut *self.inner,
        }
    }

    #[inline]
    pub fn users(&mut self) -> UsersRepo<'_, E> {
        UsersRepo {
            inner: &mut *self.inner,
        }
    }
}

pub type LinkDatabaseExecutor<'a> = DataBaseExecutor<'a, SqliteConnection>;

#[derive(Clone)]
pub struct DataBaseState {
    pool: Arc<Pool<Sqlite>>,
}

impl DataBaseState {
    pub async fn single<F, R, E>(&self, f: F) -> Result<R, E>
    where
        for<'q> F: AsyncFnOnce(LinkDatabaseExecutor<'q>) -> Result<R, E> + Send,
        R: Send,
        E: Send + From<DataBaseError>,
    {
        let mut conn = self.pool.acquire().await.resolve()?;
        let exec = DataBaseExecutor { inner: &mut *conn };
        f(exec).await
    }

    /// Runs `f` inside a transaction: committed on `Ok`, rolled back on `Err`.
    pub async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        for<'q> F: AsyncFnOnce(LinkDatabaseExecutor<'q>) -> Result<R, E> + Send,
        R: Send,
        E: Send + From<DataBaseError>,
    {
        let mut conn = self.pool.acquire().await.resolve()?;
        let tx = conn.begin().await.resolve()?;
        Self::run_in(tx, f).await
    }

    /// Like [`Self::transaction`], but takes the write lock at `BEGIN`, so contenders wait
    /// out `busy_timeout` instead of failing when a read has to be upgraded to a write.
    pub async fn write_transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        for<'q> F: AsyncFnOnce(LinkDatabaseExecutor<'q>) -> Result<R, E> + Send,
        R: Send,
        E: Send + From<DataBaseError>,
    {
        let mut conn = self.pool.acquire().await.resolve()?;
        let tx = Connection::begin_with(&mut *conn, "BEGIN IMMEDIATE")
            .await
            .resolve()?;
        Self::run_in(tx, f).await
    }

    async fn run_in<F, R, E>(mut tx: Transaction<'_, Sqlite>, f: F) -> Result<R, E>
    where
        for<'q> F: AsyncFnOnce(LinkDatabaseExecutor<'q>) -> Result<R, E> + Send,
        R: Send,
        E: Send + From<DataBaseError>,
    {
        let exec = DataBaseExecutor { inner: &mut *tx };
        let out = f(exec).await;
        match out {
            Ok(val) => {
                tx.commit().await.resolve()?;
                Ok(val)
            }
            Err(err) => {
                tx.rollback().await.resolve()?;
                Err(err)
            }
        }
    }
}

impl DataBaseState {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn migrate(&self) -> DataBaseResult<()> {
        sqlx::migrate!("./migrations").run(&*self.pool).await?;
        Ok(())
    }

    pub async fn close_conn(&self) {
        self.pool.close().await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_codes_are_recognised_through_extended_codes() {
        assert!(is_busy_code(Some("5")));
        assert!(is_busy_code(Some("517")));
        assert!(is_busy_code(Some("6")));
        assert!(!is_busy_code(Some("2067")));
        assert!(!is_busy_code(None));
    }

    #[test]
    fn page_binder_normalizes_out_of_range_values() {
        let p = PageQueryBinder {
            page: 0,
            page_size: 500,
        }
        .normalized();
        assert_eq!((p.page, p.page_size), (1, 10));
        let p = PageQueryBinder {
            page: 3,
            page_size: 25,
        }
        .normalized();
        assert_eq!((p.page, p.page_size), (3, 25));
    }

    #[test]
    fn page_binder_fills_defaults_when_deserialized() {
        let p: PageQueryBinder = serde_json::from_str("{}").unwrap();
        assert_eq!((p.page, p.page_size), (1, 10));
    }
}
