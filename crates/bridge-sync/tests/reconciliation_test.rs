//! End-to-end reconciliation behaviour over the in-memory directory and account store

use bridge_accounts::MemoryAccounts;
use bridge_core::types::{LocalAccount, LocalGroup};
use bridge_core::{derive_local_id, EX_NOPERM, EX_TEMPFAIL};
use bridge_directory::MemoryDirectory;
use bridge_sync::{exit_code, GroupSyncEngine, ProvisionFlow, ProvisionOutcome};
use std::sync::Arc;

fn setup() -> (Arc<MemoryDirectory>, Arc<MemoryAccounts>) {
    let dir = Arc::new(MemoryDirectory::new());
    dir.add_user("alice", "AIDAALICE");
    dir.add_user("bob", "AIDABOB");
    dir.set_group("system-admins", "AGPAADMINS", &["alice", "bob"]);
    dir.set_group("system-deploy", "AGPADEPLOY", &["bob"]);
    dir.set_group("finance", "AGPAFINANCE", &["carol"]);
    (dir, Arc::new(MemoryAccounts::new()))
}

fn members(accounts: &MemoryAccounts, name: &str) -> Vec<String> {
    accounts.group(name).unwrap().members.into_iter().collect()
}

#[tokio::test]
async fn test_second_sync_changes_nothing() {
    let (dir, accounts) = setup();
    let engine = GroupSyncEngine::new(dir.clone(), accounts.clone());

    let first = engine.sync("system-").await.unwrap();
    assert_eq!(first.changed(), 2);
    let writes = accounts.mutations().len();

    let second = engine.sync("system-").await.unwrap();
    assert!(second.is_noop());
    assert_eq!(second.reconciled.len(), 2);
    assert_eq!(accounts.mutations().len(), writes);
}

#[tokio::test]
async fn test_sync_replaces_membership() {
    let (dir, accounts) = setup();
    accounts.insert_group(
        LocalGroup::new("system-admins", derive_local_id("AGPAADMINS"))
            .with_members(["alice", "eve"]),
    );

    let engine = GroupSyncEngine::new(dir.clone(), accounts.clone());
    let report = engine.sync("system-").await.unwrap();

    let admins = report
        .reconciled
        .iter()
        .find(|g| g.name == "system-admins")
        .unwrap();
    assert!(!admins.change.created);
    assert_eq!(admins.change.added, vec!["bob"]);
    assert_eq!(admins.change.removed, vec!["eve"]);
    assert_eq!(members(&accounts, "system-admins"), vec!["alice", "bob"]);

    // Directory drops alice; the next run removes her locally
    dir.set_group("system-admins", "AGPAADMINS", &["bob"]);
    engine.sync("system-").await.unwrap();
    assert_eq!(members(&accounts, "system-admins"), vec!["bob"]);
}

#[tokio::test]
async fn test_broken_group_does_not_block_others() {
    let (dir, accounts) = setup();
    dir.fail_members_of("system-admins");

    let engine = GroupSyncEngine::new(dir.clone(), accounts.clone());
    let report = engine.sync("system-").await.unwrap();

    assert_eq!(report.skipped, vec!["system-admins"]);
    assert!(accounts.group("system-admins").is_none());
    assert_eq!(members(&accounts, "system-deploy"), vec!["bob"]);
}

#[tokio::test]
async fn test_existing_account_touches_nothing() {
    let (dir, accounts) = setup();
    accounts.insert_user(LocalAccount {
        username: "alice".into(),
        uid: derive_local_id("AIDAALICE"),
        comment: String::new(),
    });

    let flow = ProvisionFlow::new(dir.clone(), accounts.clone(), "system-");
    let result = flow.run(Some("alice")).await;

    assert!(matches!(result, Ok(ProvisionOutcome::AlreadyProvisioned)));
    assert_eq!(exit_code(&result), EX_NOPERM);
    assert!(dir.calls().is_empty());
    assert!(accounts.mutations().is_empty());
}

#[tokio::test]
async fn test_new_user_created_even_when_group_sync_fails() {
    let (dir, accounts) = setup();
    accounts.fail_group_writes("system-admins");

    let flow = ProvisionFlow::new(dir.clone(), accounts.clone(), "system-");
    let result = flow.run(Some("bob")).await;
    assert_eq!(exit_code(&result), EX_TEMPFAIL);

    match result.unwrap() {
        ProvisionOutcome::Created { account, group_sync } => {
            assert_eq!(account.uid, derive_local_id("AIDABOB"));
            assert_eq!(group_sync.unwrap_err().code(), "AccountError");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(accounts.user("bob").is_some());
}

#[tokio::test]
async fn test_concurrent_attempts_create_once() {
    let (dir, accounts) = setup();
    let locks = tempfile::tempdir().unwrap();

    let first = ProvisionFlow::new(dir.clone(), accounts.clone(), "system-").with_lock_dir(locks.path());
    let second = ProvisionFlow::new(dir.clone(), accounts.clone(), "system-").with_lock_dir(locks.path());

    let (a, b) = tokio::join!(first.run(Some("alice")), second.run(Some("alice")));
    let mut codes = vec![exit_code(&a), exit_code(&b)];
    codes.sort();
    assert_eq!(codes, vec![EX_TEMPFAIL, EX_NOPERM]);

    let creations = accounts
        .mutations()
        .iter()
        .filter(|m| *m == "useradd(alice)")
        .count();
    assert_eq!(creations, 1);
}
