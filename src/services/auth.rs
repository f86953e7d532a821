use crate::models::invite_code_usage::RedemptionOrigin;
use crate::models::token::TokenResponse;
use crate::models::users::{AuthProvider, NewUser, Role, User, UserRow, UserRowOptional};
use crate::services::invite_code::redemption::{ConflictAware, retry_on_conflict};
use crate::services::invite_code::{InviteCodeError, InviteCodeService};
use crate::services::registration::Registrar;
use crate::services::states::LinkState;
use crate::services::states::auth::TokenError;
use crate::services::states::db::{DataBaseError, LinkDatabaseExecutor};
use linkgate_macros::BusinessError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use validator::Validate;

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_SUFFIX_ATTEMPTS: usize = 10;

#[derive(Debug, thiserror::Error, BusinessError)]
pub enum AuthError {
    #[code(10001)]
    #[error("{0}")]
    Validation(String),
    #[code(10002)]
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[code(10003)]
    #[error("This account uses {0} authentication. Please use the appropriate login method")]
    WrongProvider(&'static str),
    #[code(10004)]
    #[error("Account is {0}. Please contact support")]
    AccountUnavailable(&'static str),
    #[code(10005)]
    #[error("User with email {0} already exists")]
    EmailTaken(String),
    #[code(10006)]
    #[error("Account already exists")]
    AccountExists,
    #[code(10007)]
    #[error("Username is already taken")]
    UsernameTaken,
    #[code(10008)]
    #[error("Invite code is required for registration")]
    InviteCodeRequired,
    #[code(10009)]
    #[error("Current password is incorrect")]
    WrongPassword,
    #[code(10010)]
    #[error("Password change is only available for local accounts")]
    NotLocalAccount,
    #[code(10011)]
    #[error("User not found or inactive")]
    UserUnavailable,
    #[error(transparent)]
    InviteCode(#[from] InviteCodeError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("Failed to process password: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("Password hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Database(DataBaseError),
}

impl From<DataBaseError> for AuthError {
    fn from(e: DataBaseError) -> Self {
        match e {
            DataBaseError::UniqueViolation { .. } => AuthError::AccountExists,
            e => AuthError::Database(e),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(e: validator::ValidationErrors) -> Self {
        AuthError::Validation(e.to_string())
    }
}

impl ConflictAware for AuthError {
    fn is_conflict(&self) -> bool {
        match self {
            AuthError::InviteCode(e) => e.is_conflict(),
            AuthError::Database(e) => e.is_busy(),
            _ => false,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
    #[serde(default)]
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 3, max = 50, message = "username must be 3 to 50 characters"))]
    pub username: Option<String>,
    #[validate(length(max = 100, message = "name must be at most 100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "avatar must be at most 500 characters"))]
    pub avatar: Option<String>,
}

/// A user record as an OAuth provider reports it, already normalised.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProfile {
    pub provider: AuthProvider,
    pub provider_id: String,
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: TokenResponse,
}

/// `john.doe+x_y` becomes `johndoexy`; names shorter than three characters get a `user` tail.
fn username_base(local_part: &str) -> String {
    let mut base = local_part
        .to_lowercase()
        .replace(['.', '+', '_'], "");
    if base.chars().count() < USERNAME_MIN_LEN {
        base.push_str("user");
    }
    base
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn unique_username(exec: &mut LinkDatabaseExecutor<'_>, base: &str) -> AuthResult<String> {
    if !exec.users().username_exists(base).await? {
        return Ok(base.to_owned());
    }
    for _ in 0..USERNAME_SUFFIX_ATTEMPTS {
        let candidate = format!("{base}{}", rand::random_range(1..=9999u32));
        if !exec.users().username_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Ok(format!("{base}{}", OffsetDateTime::now_utc().unix_timestamp()))
}

pub struct AuthService {
    state: Arc<LinkState>,
    invite: Arc<InviteCodeService>,
}

impl AuthService {
    pub fn new(state: Arc<LinkState>, invite: Arc<InviteCodeService>) -> Self {
        Self { state, invite }
    }

    async fn hash_password(&self, password: String) -> AuthResult<String> {
        let cost = self.state.auth.bcrypt_cost();
        Ok(tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??)
    }

    async fn verify_password(password: String, hash: String) -> AuthResult<bool> {
        Ok(tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??)
    }

    /// Local sign-up. Username and display name are derived from the email address.
    pub async fn register(
        &self,
        req: RegisterRequest,
        origin: &RedemptionOrigin,
    ) -> AuthResult<AuthResponse> {
        req.validate()?;
        let email = req.email.trim().to_owned();
        let code = req
            .invite_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let local_part = email.split('@').next().unwrap_or_default().to_owned();
        let base = username_base(&local_part);
        let (user_count, email_taken, username) = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let user_count = exec.users().get_user_count().await?;
                let email_taken = exec.users().email_exists(&email).await?;
                let username = unique_username(&mut exec, &base).await?;
                Ok::<_, AuthError>((user_count, email_taken, username))
            })
            .await?;
        if email_taken {
            return Err(AuthError::EmailTaken(email));
        }
        let reg_cfg = &self.state.config.registration;
        let brand_new_server = user_count == 0;
        if reg_cfg.require_invite_code && code.is_none() && !brand_new_server {
            return Err(AuthError::InviteCodeRequired);
        }
        let role = match brand_new_server && reg_cfg.first_user_is_admin {
            true => Role::Admin,
            false => Role::User,
        };
        let password_hash = self.hash_password(req.password).await?;
        let new_user = NewUser {
            email,
            username,
            name: capitalize(&local_part),
            avatar: String::new(),
            password_hash: Some(password_hash),
            provider: AuthProvider::Local,
            provider_id: None,
            role,
            invite_code_id: None,
            invite_code_used: None,
        };
        let (user, token) = Registrar::new(&self.state, &self.invite)
            .register_with_optional_code(new_user, code, origin)
            .await?;
        tracing::info!(user_id = user.id, role = ?user.role, "User registered");
        Ok(AuthResponse {
            user: user.to_public(),
            token,
        })
    }

    pub async fn login(&self, req: LoginRequest) -> AuthResult<AuthResponse> {
        req.validate()?;
        let user = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.users().query_user_by_email(req.email.trim()).await
            })
            .await?;
        let Some(user) = user else {
            tracing::warn!(email = %req.email, "Login attempt with unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if !user.is_local_account() {
            tracing::warn!(user_id = user.id, "Local login attempt for an OAuth account");
            return Err(AuthError::WrongProvider(user.provider.as_str()));
        }
        if !user.is_active() {
            tracing::warn!(user_id = user.id, "Login attempt for an inactive account");
            return Err(AuthError::AccountUnavailable(user.status.as_str()));
        }
        let hash = user.password_hash.clone().unwrap_or_default();
        if !Self::verify_password(req.password, hash).await? {
            tracing::warn!(user_id = user.id, "Login attempt with a wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        let token = self.state.auth.issue(&user)?;
        tracing::info!(user_id = user.id, "User logged in");
        Ok(AuthResponse {
            user: user.to_public(),
            token,
        })
    }

    /// Finds the active account bound to the provider identity, creating it on first sight.
    pub async fn oauth_login(&self, profile: OAuthProfile) -> AuthResult<AuthResponse> {
        if profile.provider == AuthProvider::Local || profile.provider_id.is_empty() {
            return Err(AuthError::Validation(
                "an external provider identity is required".to_owned(),
            ));
        }
        let cfg = &self.state.config.invite;
        let db = &self.state.db;
        let profile = &profile;
        let user = retry_on_conflict(
            cfg.redeem_busy_retries,
            Duration::from_millis(cfg.redeem_retry_backoff_ms),
            move || {
                db.write_transaction(async move |mut exec: LinkDatabaseExecutor<'_>| {
                    let existing = exec
                        .users()
                        .query_user_by_provider(profile.provider, &profile.provider_id)
                        .await?
                        .filter(UserRow::is_active);
                    let id = match existing {
                        Some(user) if user.name == profile.name && user.avatar == profile.avatar => {
                            return Ok::<_, AuthError>(user);
                        }
                        Some(user) => {
                            exec.users()
                                .update_oauth_profile(user.id, &profile.name, &profile.avatar)
                                .await?;
                            tracing::info!(user_id = user.id, "OAuth profile refreshed");
                            user.id
                        }
                        None => {
                            let local_part = profile.email.split('@').next().unwrap_or_default();
                            let wanted = match profile.username.is_empty() {
                                true => username_base(local_part),
                                false => profile.username.to_lowercase(),
                            };
                            let username = unique_username(&mut exec, &wanted).await?;
                            let new_user = NewUser {
                                email: profile.email.clone(),
                                username,
                                name: profile.name.clone(),
                                avatar: profile.avatar.clone(),
                                password_hash: None,
                                provider: profile.provider,
                                provider_id: Some(profile.provider_id.clone()),
                                role: Role::User,
                                invite_code_id: None,
                                invite_code_used: None,
                            };
                            let id = exec.users().add_user(&new_user).await?;
                            tracing::info!(
                                user_id = id,
                                provider = profile.provider.as_str(),
                                "OAuth user created"
                            );
                            id
                        }
                    };
                    exec.users()
                        .query_user_by_id(id)
                        .await?
                        .ok_or(AuthError::UserUnavailable)
                })
            },
        )
        .await?;
        let token = self.state.auth.issue(&user)?;
        Ok(AuthResponse {
            user: user.to_public(),
            token,
        })
    }

    pub async fn change_password(&self, user: &UserRow, req: ChangePasswordRequest) -> AuthResult<()> {
        req.validate()?;
        if !user.is_local_account() {
            return Err(AuthError::NotLocalAccount);
        }
        let hash = user.password_hash.clone().unwrap_or_default();
        if !Self::verify_password(req.old_password, hash).await? {
            tracing::warn!(user_id = user.id, "Password change with a wrong current password");
            return Err(AuthError::WrongPassword);
        }
        let new_hash = self.hash_password(req.new_password).await?;
        self.state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.users().update_password(user.id, &new_hash).await
            })
            .await?;
        tracing::info!(user_id = user.id, "Password changed");
        Ok(())
    }

    pub async fn update_profile(&self, user: &UserRow, req: UpdateProfileRequest) -> AuthResult<User> {
        req.validate()?;
        let update = UserRowOptional {
            id: user.id,
            username: req.username.map(|u| u.trim().to_lowercase()),
            name: req.name,
            avatar: req.avatar,
        };
        let updated = self
            .state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.users().update_profile(update).await.map_err(|e| match e {
                    DataBaseError::UniqueViolation { .. } => AuthError::UsernameTaken,
                    e => e.into(),
                })?;
                exec.users()
                    .query_user_by_id(user.id)
                    .await?
                    .ok_or(AuthError::UserUnavailable)
            })
            .await?;
        tracing::info!(user_id = user.id, "Profile updated");
        Ok(updated.to_public())
    }

    /// Verifies a bearer token and loads its user, who must still be active.
    pub async fn authenticate(&self, token: &str) -> AuthResult<UserRow> {
        let claims = self.state.auth.verify(token)?;
        self.state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                exec.users().query_user_by_id(claims.uid).await
            })
            .await?
            .filter(UserRow::is_active)
            .ok_or(AuthError::UserUnavailable)
    }

    pub fn refresh(&self, token: &str) -> AuthResult<TokenResponse> {
        Ok(self.state.auth.refresh(token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::UserStatus;
    use crate::services::states::config::AppConfig;
    use crate::services::states::testing::{seed_user, test_state, test_state_with};

    fn register_req(email: &str, code: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            email: email.to_owned(),
            password: "hunter22".to_owned(),
            invite_code: code.map(str::to_owned),
        }
    }

    fn services(state: &Arc<LinkState>) -> AuthService {
        AuthService::new(state.clone(), Arc::new(InviteCodeService::new(state.clone())))
    }

    #[test]
    fn usernames_are_derived_from_the_local_part() {
        assert_eq!(username_base("John.Doe+news_x"), "johndoenewsx");
        assert_eq!(username_base("al"), "aluser");
        assert_eq!(capitalize("john.doe"), "John.doe");
        assert_eq!(capitalize(""), "");
    }

    #[tokio::test]
    async fn first_account_becomes_admin_and_can_log_in() {
        let (state, _tdb) = test_state().await;
        let auth = services(&state);
        let first = auth
            .register(register_req("ada@example.com", None), &RedemptionOrigin::default())
            .await
            .unwrap();
        assert_eq!(first.user.role, Role::Admin);
        assert_eq!(first.user.username, "ada");
        assert_eq!(first.user.name, "Ada");
        let second = auth
            .register(register_req("ada@example.org", None), &RedemptionOrigin::default())
            .await
            .unwrap();
        assert_eq!(second.user.role, Role::User);
        assert_ne!(second.user.username, "ada");
        assert!(second.user.username.starts_with("ada"));

        let login = auth
            .login(LoginRequest {
                email: "ada@example.com".into(),
                password: "hunter22".into(),
            })
            .await
            .unwrap();
        let me = auth.authenticate(&login.token.access_token).await.unwrap();
        assert_eq!(me.id, first.user.id);
    }

    #[tokio::test]
    async fn login_failures_do_not_reveal_which_part_was_wrong() {
        let (state, _tdb) = test_state().await;
        let auth = services(&state);
        auth.register(register_req("ada@example.com", None), &RedemptionOrigin::default())
            .await
            .unwrap();
        for (email, password) in [("ada@example.com", "wrong-pass"), ("bob@example.com", "hunter22")] {
            let res = auth
                .login(LoginRequest {
                    email: email.into(),
                    password: password.into(),
                })
                .await;
            assert!(matches!(res, Err(AuthError::InvalidCredentials)));
        }
    }

    #[tokio::test]
    async fn duplicate_email_and_short_password_are_rejected() {
        let (state, _tdb) = test_state().await;
        let auth = services(&state);
        auth.register(register_req("ada@example.com", None), &RedemptionOrigin::default())
            .await
            .unwrap();
        let dup = auth
            .register(register_req("ada@example.com", None), &RedemptionOrigin::default())
            .await;
        assert!(matches!(dup, Err(AuthError::EmailTaken(_))));
        let mut weak = register_req("bob@example.com", None);
        weak.password = "123".into();
        assert!(matches!(
            auth.register(weak, &RedemptionOrigin::default()).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn required_invite_code_spares_only_the_first_account() {
        let mut cfg = AppConfig::default();
        cfg.registration.require_invite_code = true;
        let (state, _tdb) = test_state_with(cfg).await;
        let auth = services(&state);
        auth.register(register_req("root@example.com", None), &RedemptionOrigin::default())
            .await
            .unwrap();
        let res = auth
            .register(register_req("bob@example.com", Some("  ")), &RedemptionOrigin::default())
            .await;
        assert!(matches!(res, Err(AuthError::InviteCodeRequired)));
    }

    #[tokio::test]
    async fn oauth_login_creates_then_refreshes_the_account() {
        let (state, _tdb) = test_state().await;
        let auth = services(&state);
        let profile = OAuthProfile {
            provider: AuthProvider::Github,
            provider_id: "4242".into(),
            email: "octo@example.com".into(),
            username: "Octo".into(),
            name: "Octo Cat".into(),
            avatar: "https://avatars.example.com/1".into(),
        };
        let created = auth.oauth_login(profile.clone()).await.unwrap();
        assert_eq!(created.user.username, "octo");
        assert_eq!(created.user.provider, AuthProvider::Github);

        let renamed = OAuthProfile {
            name: "Octo Renamed".into(),
            ..profile
        };
        let again = auth.oauth_login(renamed).await.unwrap();
        assert_eq!(again.user.id, created.user.id);
        assert_eq!(again.user.name, "Octo Renamed");

        let local = auth
            .login(LoginRequest {
                email: "octo@example.com".into(),
                password: "whatever".into(),
            })
            .await;
        assert!(matches!(local, Err(AuthError::WrongProvider("github"))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_oauth_signups_all_succeed() {
        const SIGNUPS: usize = 16;
        let (state, _tdb) = test_state().await;
        let auth = Arc::new(services(&state));
        let handles = (0..SIGNUPS)
            .map(|n| {
                let auth = auth.clone();
                tokio::spawn(async move {
                    auth.oauth_login(OAuthProfile {
                        provider: AuthProvider::Github,
                        provider_id: format!("gh-{n}"),
                        email: format!("octo{n}@example.com"),
                        username: String::new(),
                        name: format!("Octo {n}"),
                        avatar: String::new(),
                    })
                    .await
                })
            })
            .collect::<Vec<_>>();
        let mut ids = Vec::new();
        for res in futures::future::join_all(handles).await {
            let signed_up = res.unwrap().unwrap();
            assert_eq!(signed_up.user.provider, AuthProvider::Github);
            ids.push(signed_up.user.id);
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), SIGNUPS);
    }

    #[tokio::test]
    async fn password_change_requires_the_current_password() {
        let (state, _tdb) = test_state().await;
        let auth = services(&state);
        let reg = auth
            .register(register_req("ada@example.com", None), &RedemptionOrigin::default())
            .await
            .unwrap();
        let me = auth.authenticate(&reg.token.access_token).await.unwrap();
        let wrong = auth
            .change_password(
                &me,
                ChangePasswordRequest {
                    old_password: "nope-nope".into(),
                    new_password: "brand-new".into(),
                },
            )
            .await;
        assert!(matches!(wrong, Err(AuthError::WrongPassword)));
        auth.change_password(
            &me,
            ChangePasswordRequest {
                old_password: "hunter22".into(),
                new_password: "brand-new".into(),
            },
        )
        .await
        .unwrap();
        auth.login(LoginRequest {
            email: "ada@example.com".into(),
            password: "brand-new".into(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn profile_updates_keep_usernames_unique() {
        let (state, _tdb) = test_state().await;
        let auth = services(&state);
        let ada = seed_user(&state, "ada", Role::User).await;
        seed_user(&state, "bob", Role::User).await;
        let taken = auth
            .update_profile(
                &ada,
                UpdateProfileRequest {
                    username: Some("bob".into()),
                    name: None,
                    avatar: None,
                },
            )
            .await;
        assert!(matches!(taken, Err(AuthError::UsernameTaken)));
        let updated = auth
            .update_profile(
                &ada,
                UpdateProfileRequest {
                    username: None,
                    name: Some("Ada L.".into()),
                    avatar: None,
                },
            )
            .await
            .unwrap();
        assert_eq!((updated.username.as_str(), updated.name.as_str()), ("ada", "Ada L."));
        assert_eq!(updated.status, UserStatus::Active);
    }
}
