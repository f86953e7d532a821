use crate::models::invite_code_usage::InviteCodeUsageView;
use crate::models::users::User;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use time::OffsetDateTime;
use validator::Validate;

pub const INVITE_CODE_BYTES: usize = 16;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum InviteCodeStatus {
    Active,
    /// Reached `max_uses`. Only a redemption can move a code here.
    Used,
    Disabled,
}

impl InviteCodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteCodeStatus::Active => "active",
            InviteCodeStatus::Used => "used",
            InviteCodeStatus::Disabled => "disabled",
        }
    }
}

/// Why a code cannot be redeemed right now.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Ineligibility {
    Exhausted,
    Disabled,
    Inactive,
}

#[derive(Debug, Clone, FromRow)]
pub struct InviteCode {
    pub id: i64,
    pub code: String,
    pub created_by_id: i64,
    pub status: InviteCodeStatus,
    pub max_uses: i64,
    pub used_count: i64,
    pub description: String,
    pub metadata: Option<Json<serde_json::Value>>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl InviteCode {
    pub fn is_exhausted(&self) -> bool {
        self.used_count >= self.max_uses
    }

    /// Exhaustion is reported before the status so a spent code always reads as exhausted.
    pub fn ineligibility(&self) -> Option<Ineligibility> {
        if self.is_exhausted() {
            return Some(Ineligibility::Exhausted);
        }
        match self.status {
            InviteCodeStatus::Active => None,
            InviteCodeStatus::Disabled => Some(Ineligibility::Disabled),
            InviteCodeStatus::Used => Some(Ineligibility::Inactive),
        }
    }

    pub fn to_view(&self) -> InviteCodeView {
        InviteCodeView {
            id: self.id,
            code: self.code.clone(),
            created_by_id: self.created_by_id,
            status: self.status,
            max_uses: self.max_uses,
            used_count: self.used_count,
            description: self.description.clone(),
            metadata: self.metadata.as_ref().map(|m| m.0.clone()),
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: None,
            usage_records: None,
        }
    }

    pub fn to_public_view(&self) -> PublicInviteCodeView {
        PublicInviteCodeView {
            code: self.code.clone(),
            status: self.status,
            max_uses: self.max_uses,
            used_count: self.used_count,
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewInviteCode {
    #[validate(range(min = 1, max = 100, message = "max_uses must be between 1 and 100"))]
    pub max_uses: i64,
    #[validate(length(max = 255, message = "description must be at most 255 characters"))]
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCodeView {
    pub id: i64,
    pub code: String,
    pub created_by_id: i64,
    pub status: InviteCodeStatus,
    pub max_uses: i64,
    pub used_count: i64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_records: Option<Vec<InviteCodeUsageView>>,
}

/// What an anonymous caller may learn about a code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicInviteCodeView {
    pub code: String,
    pub status: InviteCodeStatus,
    pub max_uses: i64,
    pub used_count: i64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InviteCodeStats {
    pub total_codes: i64,
    pub active_codes: i64,
    pub used_codes: i64,
    pub disabled_codes: i64,
    pub total_redemptions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(status: InviteCodeStatus, max_uses: i64, used_count: i64) -> InviteCode {
        InviteCode {
            id: 1,
            code: "0".repeat(32),
            created_by_id: 1,
            status,
            max_uses,
            used_count,
            description: String::new(),
            metadata: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
            deleted_at: None,
        }
    }

    #[test]
    fn exhaustion_wins_over_status() {
        let c = code(InviteCodeStatus::Disabled, 2, 2);
        assert_eq!(c.ineligibility(), Some(Ineligibility::Exhausted));
        let c = code(InviteCodeStatus::Used, 2, 2);
        assert_eq!(c.ineligibility(), Some(Ineligibility::Exhausted));
    }

    #[test]
    fn disabled_and_active_codes() {
        assert_eq!(
            code(InviteCodeStatus::Disabled, 2, 1).ineligibility(),
            Some(Ineligibility::Disabled)
        );
        assert_eq!(code(InviteCodeStatus::Active, 2, 1).ineligibility(), None);
    }

    #[test]
    fn new_invite_code_bounds() {
        let ok = NewInviteCode {
            max_uses: 100,
            description: "x".repeat(255),
            metadata: None,
        };
        assert!(ok.validate().is_ok());
        let too_many = NewInviteCode {
            max_uses: 101,
            ..ok.clone()
        };
        assert!(too_many.validate().is_err());
        let zero = NewInviteCode {
            max_uses: 0,
            ..ok.clone()
        };
        assert!(zero.validate().is_err());
        let long = NewInviteCode {
            description: "x".repeat(256),
            ..ok
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn public_view_hides_ownership() {
        let v = serde_json::to_value(code(InviteCodeStatus::Active, 3, 1).to_public_view()).unwrap();
        assert!(v.get("created_by_id").is_none());
        assert_eq!(v["status"], "active");
    }
}
