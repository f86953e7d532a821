/// Stable numeric code a domain error exposes to API clients.
///
/// Implemented through `#[derive(linkgate_macros::BusinessError)]`.
pub trait BusinessErrCode {
    fn code(&self) -> Option<u32>;
}

impl BusinessErrCode for std::convert::Infallible {
    fn code(&self) -> Option<u32> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    DataBase(#[from] crate::services::states::db::DataBaseError),
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    ConfigError(#[from] Box<figment::Error>),
    #[error("Sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

pub type AppResult<T> = Result<T, AppError>;
