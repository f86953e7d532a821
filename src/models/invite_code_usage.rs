use crate::models::invite_code::InviteCodeView;
use crate::models::users::User;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, FromRow)]
pub struct InviteCodeUsage {
    pub id: i64,
    pub invite_code_id: i64,
    pub used_by_id: i64,
    pub used_at: OffsetDateTime,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: OffsetDateTime,
}

impl InviteCodeUsage {
    pub fn to_view(&self) -> InviteCodeUsageView {
        InviteCodeUsageView {
            id: self.id,
            invite_code_id: self.invite_code_id,
            used_by_id: self.used_by_id,
            used_at: self.used_at,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            created_at: self.created_at,
            invite_code: None,
            used_by: None,
        }
    }
}

/// Best-effort provenance of a redemption request.
#[derive(Debug, Clone, Default)]
pub struct RedemptionOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RedemptionOrigin {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
        }
    }

    pub fn ip_or_unknown(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }

    pub fn user_agent_or_unknown(&self) -> &str {
        self.user_agent.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCodeUsageView {
    pub id: i64,
    pub invite_code_id: i64,
    pub used_by_id: i64,
    #[serde(with = "time::serde::timestamp")]
    pub used_at: OffsetDateTime,
    pub ip_address: String,
    pub user_agent: String,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<Box<InviteCodeView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<User>,
}
