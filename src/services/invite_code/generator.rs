use crate::models::invite_code::INVITE_CODE_BYTES;
use crate::services::invite_code::{InviteCodeError, InviteCodeResult};
use crate::services::states::db::LinkDatabaseExecutor;

fn random_code() -> String {
    hex::encode(rand::random::<[u8; INVITE_CODE_BYTES]>())
}

/// Draws codes from the OS-seeded CSPRNG until one is unused, for a bounded number of tries.
#[derive(Debug, Clone, Copy)]
pub struct CodeGenerator {
    max_attempts: u32,
    source: fn() -> String,
}

impl CodeGenerator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            source: random_code,
        }
    }

    #[cfg(test)]
    pub fn with_source(max_attempts: u32, source: fn() -> String) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            source,
        }
    }

    /// Read-only: the code is checked against every stored row, soft-deleted ones included.
    pub async fn generate(&self, exec: &mut LinkDatabaseExecutor<'_>) -> InviteCodeResult<String> {
        for attempt in 1..=self.max_attempts {
            let code = (self.source)();
            if !exec.invite_code().code_exists(&code).await? {
                return Ok(code);
            }
            tracing::warn!(attempt, "Generated invite code collided with an existing one");
        }
        tracing::error!(
            attempts = self.max_attempts,
            "Gave up generating a unique invite code"
        );
        Err(InviteCodeError::GenerationExhausted(self.max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::states::db::testing::test_db;
    use ahash::AHashSet;

    #[test]
    fn codes_are_32_lowercase_hex_chars() {
        let code = random_code();
        assert_eq!(code.len(), 32);
        assert!(
            code.chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[tokio::test]
    async fn ten_thousand_generations_are_distinct() {
        let tdb = test_db().await;
        let generator = CodeGenerator::new(5);
        let codes = tdb
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let mut codes = AHashSet::with_capacity(10_000);
                for _ in 0..10_000 {
                    codes.insert(generator.generate(&mut exec).await?);
                }
                Ok::<_, InviteCodeError>(codes)
            })
            .await
            .unwrap();
        assert_eq!(codes.len(), 10_000);
    }

    fn constant_code() -> String {
        "0123456789abcdef0123456789abcdef".to_owned()
    }

    #[tokio::test]
    async fn collisions_stop_at_the_attempt_bound() {
        let tdb = test_db().await;
        let generator = CodeGenerator::with_source(5, constant_code);
        let res = tdb
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let code = generator.generate(&mut exec).await?;
                let created = exec
                    .invite_code()
                    .insert_invite_code(&code, 1, 1, "", None)
                    .await?;
                // Deleted codes still occupy their string.
                exec.invite_code().soft_delete_invite_code(created.id).await?;
                generator.generate(&mut exec).await
            })
            .await;
        assert!(matches!(res, Err(InviteCodeError::GenerationExhausted(5))));
    }
}
