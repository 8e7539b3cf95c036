//! End-to-end user reconciliation against the in-memory directory.

mod common;

use common::{ad_user, config, ldap_user, Fixture, SID_PREFIX};
use dirsync_connector::entry::AttrValue;
use dirsync_engine::prelude::*;

#[tokio::test]
async fn creates_missing_dependent_account() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("Jeff Rod", "jeffr", 512));

    let report = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.decisions.len(), 1);
    let decision = &report.decisions[0];
    assert_eq!(decision.action, SyncAction::Create);
    assert_eq!(decision.identifier, "jeffr");
    assert_eq!(decision.changeset.get("gecos"), Some("Jeff Rod"));
    assert!(report.summary.success);
    assert_eq!(report.summary.applied, 1);

    let created = fixture
        .dependent
        .entry("uid=jeffr,ou=People,dc=example,dc=com")
        .expect("account should exist");
    assert_eq!(created.attr_str("gecos"), Some("Jeff Rod"));
    assert_eq!(created.attr_str("uidNumber"), Some("1000"));
    assert_eq!(created.attr_str("homeDirectory"), Some("/home/jeffr"));
    assert_eq!(
        created.attr_str("sambaSID"),
        Some(format!("{SID_PREFIX}1000").as_str())
    );
    assert!(created
        .attr_str("userPassword")
        .is_some_and(|p| p.starts_with("{CRYPT}$6$")));
    assert!(created.has_object_class("sambaSamAccount"));
}

#[tokio::test]
async fn unicode_divergent_names_compare_equal() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("Bøs Doe", "bosd", 512));
    fixture
        .dependent
        .seed(ldap_user("bosd", "Bos Doe", "/bin/bash", 1042));

    let report = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();

    // Folding is the only difference, so the changeset omits cn and gecos.
    assert!(report.decisions.is_empty());
    assert_eq!(report.summary.applied, 0);
    assert!(report.summary.success);
}

#[tokio::test]
async fn disabling_applies_mask_and_resets_credentials() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("John Doe", "johnd", 514));
    fixture
        .dependent
        .seed(ldap_user("johnd", "John Doe", "/bin/bash", 1042));

    let report = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].action, SyncAction::Disable);

    let entry = fixture
        .dependent
        .entry("uid=johnd,ou=People,dc=example,dc=com")
        .unwrap();
    assert_eq!(entry.attr_str("loginShell"), Some("/sbin/nologin"));
    assert!(entry
        .attr_str("userPassword")
        .is_some_and(|p| p.starts_with("{CRYPT}$6$")));
    assert_eq!(entry.attr_str("sambaNTPassword").map(str::len), Some(32));

    // The manifest never carries credential material.
    let records = fixture.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].after.get("userPassword"),
        Some(&AttrValue::from("***REDACTED***"))
    );
    assert_eq!(
        records[0].after.get("loginShell"),
        Some(&AttrValue::from("/sbin/nologin"))
    );
}

#[tokio::test]
async fn enabling_restores_mask_values() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("John Doe", "johnd", 512));
    fixture
        .dependent
        .seed(ldap_user("johnd", "John Doe", "/sbin/nologin", 1042));

    let report = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].action, SyncAction::Enable);
    let entry = fixture
        .dependent
        .entry("uid=johnd,ou=People,dc=example,dc=com")
        .unwrap();
    assert_eq!(entry.attr_str("loginShell"), Some("/bin/bash"));
}

#[tokio::test]
async fn applying_changes_is_idempotent() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("Jeff Rod", "jeffr", 512));
    fixture.primary.seed(ad_user("Bøs Doe", "bosd", 512));
    fixture
        .dependent
        .seed(ldap_user("bosd", "Old Name", "/bin/bash", 1042));

    let first = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();
    assert!(!first.decisions.is_empty());
    assert!(first.summary.success);

    // Re-diffing after applying every changeset yields nothing to do.
    let second = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();
    assert!(second.decisions.is_empty());
    assert_eq!(second.summary.applied, 0);
}

#[tokio::test]
async fn exception_none_excludes_account() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("Sync Account", "syncacct", 512));
    let mut config = config();
    config
        .exceptions
        .insert("syncacct".to_string(), "NONE".to_string());

    let report = fixture
        .user_orchestrator(config, SyncOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].action, SyncAction::SkipExcepted);
    assert_eq!(report.summary.skipped_policy, 1);
    assert_eq!(report.summary.applied, 0);
    assert!(fixture.dependent.is_empty());
}

#[tokio::test]
async fn exception_mapping_pairs_divergent_logins() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("John Doe", "jdoe2", 512));
    fixture
        .dependent
        .seed(ldap_user("johnd", "Old Name", "/bin/bash", 1042));
    let mut config = config();
    config
        .exceptions
        .insert("jdoe2".to_string(), "johnd".to_string());

    let report = fixture
        .user_orchestrator(config, SyncOptions::default())
        .run()
        .await
        .unwrap();

    // The primary account is reconciled against the dependent login, not
    // created under its own name.
    assert!(fixture
        .dependent
        .entry("uid=jdoe2,ou=People,dc=example,dc=com")
        .is_none());
    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].identifier, "johnd");
    let entry = fixture
        .dependent
        .entry("uid=johnd,ou=People,dc=example,dc=com")
        .unwrap();
    assert_eq!(entry.attr_str("gecos"), Some("John Doe"));
}

#[tokio::test]
async fn missing_samba_class_is_retrofitted() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("John Doe", "johnd", 512));
    let mut user = ldap_user("johnd", "John Doe", "/bin/bash", 1042);
    user.set_attr(
        "objectClass",
        vec!["top", "posixAccount", "shadowAccount"],
    );
    user.attributes.remove("sambaSID");
    fixture.dependent.seed(user);

    let report = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();

    assert!(report.summary.success);
    let entry = fixture
        .dependent
        .entry("uid=johnd,ou=People,dc=example,dc=com")
        .unwrap();
    assert!(entry.has_object_class("sambaSamAccount"));
    assert!(entry
        .attr_str("sambaSID")
        .is_some_and(|sid| sid.starts_with(SID_PREFIX)));
    assert_eq!(entry.attr_str("sambaNTPassword").map(str::len), Some(32));
}

#[tokio::test]
async fn unreachable_directory_aborts_before_any_mutation() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("Jeff Rod", "jeffr", 512));
    fixture.primary.set_unreachable(true);

    let err = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(fixture.dependent.is_empty());
    assert!(fixture.sink.records().is_empty());
    assert!(fixture.sink.summaries().is_empty());
}

#[tokio::test]
async fn dry_run_records_but_never_mutates() {
    let fixture = Fixture::new();
    fixture.primary.seed(ad_user("Jeff Rod", "jeffr", 512));
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };

    let report = fixture
        .user_orchestrator(config(), options)
        .run()
        .await
        .unwrap();

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].action, SyncAction::Create);
    assert_eq!(report.summary.applied, 0);
    assert!(fixture.dependent.is_empty());
    // Every downstream step still executed and was recorded.
    assert_eq!(fixture.sink.records().len(), 1);
    assert_eq!(fixture.sink.summaries().len(), 1);
}

#[tokio::test]
async fn bulk_creations_require_override() {
    let fixture = Fixture::new();
    for i in 0..40 {
        fixture
            .primary
            .seed(ad_user(&format!("User {i}"), &format!("user{i}"), 512));
    }
    // Size must be above the blind-update threshold and creations above the
    // additions threshold.
    let report = fixture
        .user_orchestrator(config(), SyncOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.summary.applied, 0);
    assert_eq!(report.summary.pending_additions, 40);
    assert!(fixture.dependent.is_empty());
    assert!(report
        .decisions
        .iter()
        .all(|d| d.action == SyncAction::SkipOverrideRequired));

    // With the override granted the same changes apply.
    let report = fixture
        .user_orchestrator(
            config(),
            SyncOptions {
                universal_override: true,
                ..SyncOptions::default()
            },
        )
        .run()
        .await
        .unwrap();
    assert_eq!(report.summary.applied, 40);
    assert_eq!(fixture.dependent.len(), 40);
}
