use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    /// Administrators see every invite code and the global statistics.
    Admin = 1,
    User = 2,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Banned => "banned",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
    Github,
    Telegram,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "local",
            AuthProvider::Google => "google",
            AuthProvider::Github => "github",
            AuthProvider::Telegram => "telegram",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub name: String,
    pub avatar: String,
    pub password_hash: Option<String>,
    pub provider: AuthProvider,
    pub provider_id: Option<String>,
    pub status: UserStatus,
    pub role: Role,
    pub invite_code_id: Option<i64>,
    pub invite_code_used: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl UserRow {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active && !self.is_deleted()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin && self.is_active()
    }

    pub fn is_local_account(&self) -> bool {
        self.provider == AuthProvider::Local
    }

    pub fn to_public(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            provider: self.provider,
            status: self.status,
            role: self.role,
            invite_code_id: self.invite_code_id,
            invite_code_used: self.invite_code_used.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Fields for a fresh account; the store fills in status and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub name: String,
    pub avatar: String,
    pub password_hash: Option<String>,
    pub provider: AuthProvider,
    pub provider_id: Option<String>,
    pub role: Role,
    pub invite_code_id: Option<i64>,
    pub invite_code_used: Option<String>,
}

#[derive(Debug, Default)]
pub struct UserRowOptional {
    pub id: i64,
    pub username: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub name: String,
    pub avatar: String,
    pub provider: AuthProvider,
    pub status: UserStatus,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code_used: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
}
