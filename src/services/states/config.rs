use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    pub host: Cow<'static, str>,
    pub port: usize,
    pub log_level: Cow<'static, str>,
    pub concurrency_limit: usize,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 18200,
            log_level: "info,linkgate=debug".into(),
            concurrency_limit: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBaseConfig {
    pub db_url: Cow<'static, str>,
    pub sqlite_connection_nums: u32,
    /// How long a writer waits on SQLite's lock before giving up with `SQLITE_BUSY`.
    pub busy_timeout_ms: u64,
}

impl Default for DataBaseConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite://data/linkgate.db".into(),
            sqlite_connection_nums: 10,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. Left empty, a random one is generated per process.
    pub jwt_secret: Cow<'static, str>,
    pub jwt_issuer: Cow<'static, str>,
    pub jwt_expire_hours: i64,
    /// Only tokens this close to expiry may be refreshed.
    pub refresh_window_secs: i64,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "".into(),
            jwt_issuer: "linkgate".into(),
            jwt_expire_hours: 24,
            refresh_window_secs: 60 * 60,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteConfig {
    pub generate_attempts: u32,
    /// Extra attempts for a redemption that lost a lock race.
    pub redeem_busy_retries: u32,
    pub redeem_retry_backoff_ms: u64,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            generate_attempts: 5,
            redeem_busy_retries: 3,
            redeem_retry_backoff_ms: 20,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteRedemptionPolicy {
    /// Account first, redemption afterwards; a failed redemption is logged and dropped.
    #[default]
    BestEffort,
    /// Account and redemption commit or roll back together.
    Atomic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub invite_redemption: InviteRedemptionPolicy,
    /// Every account but the very first one must bring an invite code.
    pub require_invite_code: bool,
    /// Grants the admin role to the very first account on an empty database.
    pub first_user_is_admin: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            invite_redemption: InviteRedemptionPolicy::BestEffort,
            require_invite_code: false,
            first_user_is_admin: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub common: CommonConfig,
    pub db: DataBaseConfig,
    pub auth: AuthConfig,
    pub invite: InviteConfig,
    pub registration: RegistrationConfig,
}

impl AppConfig {
    pub fn load(cfg_path: &str) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed("LINKGATE_").split("__").global());
        if Path::new(cfg_path).exists() {
            figment = figment.merge(Toml::file(cfg_path));
        }
        figment.extract().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_a_missing_file() {
        let cfg = AppConfig::load("does-not-exist.toml").unwrap();
        assert_eq!(cfg.common.port, 18200);
        assert_eq!(
            cfg.registration.invite_redemption,
            InviteRedemptionPolicy::BestEffort
        );
        assert_eq!(cfg.invite.generate_attempts, 5);
    }

    #[test]
    fn toml_overrides_nested_sections() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "linkgate.toml",
                r#"
                    [registration]
                    invite_redemption = "atomic"

                    [auth]
                    jwt_expire_hours = 2
                "#,
            )?;
            let cfg = AppConfig::load("linkgate.toml").map_err(|e| *e)?;
            assert_eq!(
                cfg.registration.invite_redemption,
                InviteRedemptionPolicy::Atomic
            );
            assert_eq!(cfg.auth.jwt_expire_hours, 2);
            assert_eq!(cfg.auth.jwt_issuer, "linkgate");
            Ok(())
        });
    }
}
