pub mod auth;
pub mod config;
pub mod db;

use auth::AuthState;
use config::AppConfig;
use db::DataBaseState;
use std::sync::Arc;

pub struct LinkState {
    pub db: DataBaseState,
    pub auth: AuthState,
    pub config: Arc<AppConfig>,
}

impl LinkState {
    pub fn new(db: DataBaseState, config: Arc<AppConfig>) -> Self {
        let auth = AuthState::new(&config.auth);
        Self { db, auth, config }
    }
}

#[cfg(test)]
pub mod testing {
    use super::LinkState;
    use super::config::AppConfig;
    use super::db::LinkDatabaseExecutor;
    use super::db::testing::{TestDb, test_db};
    use crate::models::users::{AuthProvider, NewUser, Role, UserRow};
    use std::sync::Arc;

    /// Application state over a throwaway database. Keep `TestDb` alive for the whole test.
    pub async fn test_state_with(mut config: AppConfig) -> (Arc<LinkState>, TestDb) {
        config.auth.jwt_secret = "linkgate-test-secret".into();
        config.auth.bcrypt_cost = 4;
        let tdb = test_db().await;
        let state = Arc::new(LinkState::new(tdb.db.clone(), Arc::new(config)));
        (state, tdb)
    }

    pub async fn test_state() -> (Arc<LinkState>, TestDb) {
        test_state_with(AppConfig::default()).await
    }

    /// Inserts a local account named after `name` and returns its row.
    pub async fn seed_user(state: &LinkState, name: &str, role: Role) -> UserRow {
        let new_user = NewUser {
            email: format!("{name}@example.com"),
            username: name.to_owned(),
            name: name.to_owned(),
            avatar: String::new(),
            password_hash: None,
            provider: AuthProvider::Local,
            provider_id: None,
            role,
            invite_code_id: None,
            invite_code_used: None,
        };
        state
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let id = exec.users().add_user(&new_user).await?;
                exec.users().query_user_by_id(id).await
            })
            .await
            .unwrap()
            .unwrap()
    }
}
