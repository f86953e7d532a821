use crate::models::token::{Claims, TOKEN_TYPE, TokenResponse};
use crate::models::users::UserRow;
use crate::services::states::config::AuthConfig;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use linkgate_macros::BusinessError;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, BusinessError)]
pub enum TokenError {
    #[code(20001)]
    #[error("Token has expired")]
    Expired,
    #[code(20002)]
    #[error("Invalid token")]
    Invalid,
    #[code(20003)]
    #[error("Token is not close to expiry, no need to refresh")]
    NotRefreshable,
    #[error("Failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

pub type TokenResult<T> = Result<T, TokenError>;

/// Issues and verifies the HS256 access tokens handed out after login or registration.
pub struct AuthState {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    expire: Duration,
    refresh_window: Duration,
    bcrypt_cost: u32,
}

impl AuthState {
    pub fn new(cfg: &AuthConfig) -> Self {
        let secret = if cfg.jwt_secret.is_empty() {
            tracing::warn!("No jwt secret configured, tokens will not survive a restart!");
            rand::random::<[u8; 32]>().to_vec()
        } else {
            cfg.jwt_secret.as_bytes().to_vec()
        };
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[cfg.jwt_issuer.as_ref()]);
        validation.validate_nbf = true;
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            validation,
            issuer: cfg.jwt_issuer.to_string(),
            expire: Duration::hours(cfg.jwt_expire_hours),
            refresh_window: Duration::seconds(cfg.refresh_window_secs),
            bcrypt_cost: cfg.bcrypt_cost,
        }
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    pub fn issue(&self, user: &UserRow) -> TokenResult<TokenResponse> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: format!("user:{}", user.id),
            uid: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            provider: user.provider.as_str().to_owned(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            exp: (now + self.expire).unix_timestamp(),
        };
        self.sign(claims, now)
    }

    pub fn verify(&self, token: &str) -> TokenResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }

    /// Re-signs a still valid token that expires within the refresh window.
    pub fn refresh(&self, token: &str) -> TokenResult<TokenResponse> {
        let mut claims = self.verify(token)?;
        let now = OffsetDateTime::now_utc();
        if claims.exp - now.unix_timestamp() > self.refresh_window.whole_seconds() {
            return Err(TokenError::NotRefreshable);
        }
        claims.jti = Uuid::new_v4().to_string();
        claims.iat = now.unix_timestamp();
        claims.nbf = now.unix_timestamp();
        claims.exp = (now + self.expire).unix_timestamp();
        self.sign(claims, now)
    }

    fn sign(&self, claims: Claims, now: OffsetDateTime) -> TokenResult<TokenResponse> {
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(TokenError::Sign)?;
        Ok(TokenResponse {
            access_token,
            token_type: TOKEN_TYPE.to_owned(),
            expires_in: self.expire.whole_seconds(),
            expires_at: now + self.expire,
        })
    }
}
