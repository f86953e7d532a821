use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// `user:<id>`, `uid` carries the numeric form.
    pub sub: String,
    pub uid: i64,
    pub email: String,
    pub username: String,
    pub provider: String,
    pub iss: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}
