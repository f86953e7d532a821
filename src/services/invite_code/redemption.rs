use crate::models::invite_code::InviteCode;
use crate::models::invite_code_usage::{InviteCodeUsage, RedemptionOrigin};
use crate::services::invite_code::{InviteCodeError, InviteCodeResult};
use crate::services::states::db::LinkDatabaseExecutor;
use std::time::Duration;

/// Takes one use of `code`.
///
/// The claim is the first statement the transaction runs, so concurrent redeemers queue on
/// SQLite's write lock instead of racing on a stale read. When nothing was claimed the
/// code is looked up again to report why.
pub async fn claim(exec: &mut LinkDatabaseExecutor<'_>, code: &str) -> InviteCodeResult<InviteCode> {
    if let Some(claimed) = exec.invite_code().claim_invite_code_slot(code).await? {
        return Ok(claimed);
    }
    let current = exec
        .invite_code()
        .get_invite_code_by_code(code)
        .await?
        .ok_or(InviteCodeError::NotFound)?;
    Err(current
        .ineligibility()
        .map(InviteCodeError::from)
        .unwrap_or(InviteCodeError::Conflict))
}

/// Claims a use and appends the matching ledger entry. Must run inside a transaction.
pub async fn redeem_in(
    exec: &mut LinkDatabaseExecutor<'_>,
    code: &str,
    user_id: i64,
    origin: &RedemptionOrigin,
) -> InviteCodeResult<(InviteCode, InviteCodeUsage)> {
    let claimed = claim(exec, code).await?;
    let usage = exec
        .invite_code_usage()
        .insert_usage(claimed.id, user_id, origin)
        .await?;
    Ok((claimed, usage))
}

/// Errors that may clear up when the same operation simply runs again.
pub trait ConflictAware {
    fn is_conflict(&self) -> bool;
}

/// Re-runs `op` while it fails with a conflict, at most `retries` extra times.
pub async fn retry_on_conflict<T, E, F, Fut>(retries: u32, backoff: Duration, mut op: F) -> Result<T, E>
where
    E: ConflictAware,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                tracing::debug!(attempt, "Lock contention on invite code, retrying");
                tokio::time::sleep(backoff * attempt).await;
            }
            other => return other,
        }
    }
}
