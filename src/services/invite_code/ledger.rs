use crate::models::invite_code::InviteCode;
use crate::models::invite_code_usage::{InviteCodeUsage, InviteCodeUsageView};
use crate::models::users::UserRow;
use crate::services::states::db::{DataBaseResult, LinkDatabaseExecutor};
use ahash::{AHashMap, AHashSet};

/// Which references of a ledger page get resolved into snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hydrate {
    pub users: bool,
    pub invite_codes: bool,
}

impl Hydrate {
    pub const ALL: Hydrate = Hydrate {
        users: true,
        invite_codes: true,
    };
    pub const USERS: Hydrate = Hydrate {
        users: true,
        invite_codes: false,
    };
}

fn distinct_ids(it: impl Iterator<Item = i64>) -> Vec<i64> {
    it.collect::<AHashSet<_>>().into_iter().collect()
}

/// Resolves the rows' user and code references with one `IN (...)` lookup per table.
///
/// References that no longer resolve stay `None` in the view.
pub async fn hydrate(
    exec: &mut LinkDatabaseExecutor<'_>,
    entries: Vec<InviteCodeUsage>,
    what: Hydrate,
) -> DataBaseResult<Vec<InviteCodeUsageView>> {
    let users: AHashMap<i64, UserRow> = if what.users {
        let ids = distinct_ids(entries.iter().map(|e| e.used_by_id));
        exec.users()
            .query_users_by_ids(&ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect()
    } else {
        AHashMap::new()
    };
    let codes: AHashMap<i64, InviteCode> = if what.invite_codes {
        let ids = distinct_ids(entries.iter().map(|e| e.invite_code_id));
        exec.invite_code()
            .get_invite_codes_by_ids(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect()
    } else {
        AHashMap::new()
    };
    Ok(entries
        .iter()
        .map(|e| {
            let mut view = e.to_view();
            view.used_by = users.get(&e.used_by_id).map(UserRow::to_public);
            view.invite_code = codes.get(&e.invite_code_id).map(|c| Box::new(c.to_view()));
            view
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invite_code_usage::RedemptionOrigin;
    use crate::models::users::{AuthProvider, NewUser, Role};
    use crate::services::states::db::testing::test_db;
    use crate::services::states::db::PageQueryBinder;

    fn new_user(n: usize) -> NewUser {
        NewUser {
            email: format!("u{n}@example.com"),
            username: format!("user{n}"),
            name: format!("User {n}"),
            avatar: String::new(),
            password_hash: None,
            provider: AuthProvider::Local,
            provider_id: None,
            role: Role::User,
            invite_code_id: None,
            invite_code_used: None,
        }
    }

    #[tokio::test]
    async fn hydrate_resolves_every_reference() {
        let tdb = test_db().await;
        let views = tdb
            .db
            .single(async |mut exec: LinkDatabaseExecutor<'_>| {
                let creator = exec.users().add_user(&new_user(0)).await?;
                let code = exec
                    .invite_code()
                    .insert_invite_code(&"a".repeat(32), creator, 5, "", None)
                    .await?;
                let origin = RedemptionOrigin::new(Some("10.0.0.1".into()), None);
                for n in 1..=3 {
                    let uid = exec.users().add_user(&new_user(n)).await?;
                    exec.invite_code_usage()
                        .insert_usage(code.id, uid, &origin)
                        .await?;
                }
                // One more by the creator and one pointing at a user that never existed.
                exec.invite_code_usage()
                    .insert_usage(code.id, creator, &origin)
                    .await?;
                exec.invite_code_usage()
                    .insert_usage(code.id, 9999, &origin)
                    .await?;
                let page = exec
                    .invite_code_usage()
                    .list_usages_by_code_page(code.id, PageQueryBinder::default())
                    .await?;
                assert_eq!(page.total, 5);
                hydrate(&mut exec, page.items, Hydrate::ALL).await
            })
            .await
            .unwrap();
        assert_eq!(views.len(), 5);
        assert!(views.iter().all(|v| v.invite_code.is_some()));
        assert_eq!(views.iter().filter(|v| v.used_by.is_none()).count(), 1);
        assert_eq!(views[0].ip_address, "10.0.0.1");
        assert_eq!(views[0].user_agent, "unknown");
    }
}
