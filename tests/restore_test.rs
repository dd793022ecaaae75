// Integration tests for restores: chains, integrity checks, dry runs

mod common;

use backup_engine::adapters::{AlertSeverity, AlertType};
use backup_engine::model::JobKind;
use backup_engine::transform::EncryptionKey;
use backup_engine::{BackupError, BackupRequest, BackupStatus, RestoreRequest, RestoreStatus};
use common::{destination, harness, test_config, Harness};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;

/// A full backup followed by one incremental; returns (full id, incremental id)
async fn full_then_incremental(h: &Harness) -> (String, String) {
    h.data.set_payload(b"full-export");
    h.data.set_records(b"full-export", 1000);
    let full = h
        .engine
        .create_backup(BackupRequest::full("database", destination()))
        .await
        .unwrap()
        .backup
        .unwrap();

    h.data.set_payload(b"incremental-export");
    h.data.set_records(b"incremental-export", 200);
    let incremental = h
        .engine
        .create_backup(BackupRequest::incremental("database", destination()).with_parent(&full.id))
        .await
        .unwrap()
        .backup
        .unwrap();

    (full.id, incremental.id)
}

#[tokio::test]
async fn test_chain_restore_applies_every_member_in_order() {
    let h = harness(test_config());
    let (full_id, incremental_id) = full_then_incremental(&h).await;

    let result = h
        .engine
        .restore_backup(&incremental_id, RestoreRequest::new("staging"))
        .await
        .unwrap();

    assert_eq!(result.status, RestoreStatus::Completed);
    assert_eq!(result.restored_records, 1200);
    assert_eq!(result.chain, vec![full_id.clone(), incremental_id.clone()]);
    assert_eq!(h.storage.downloads.load(Ordering::SeqCst), 2);

    let imports = h.data.imports.lock().clone();
    let order: Vec<&str> = imports.iter().map(|i| i.backup_id.as_str()).collect();
    assert_eq!(order, vec![full_id.as_str(), incremental_id.as_str()]);
    assert_eq!(imports[0].data.as_ref(), b"full-export");
    assert_eq!(imports[1].data.as_ref(), b"incremental-export");
    assert!(imports.iter().all(|i| i.target == "staging" && !i.overwrite));

    h.engine.flush_events().await;
    let alerts = h.notifier.alerts.lock().clone();
    let restored: Vec<_> = alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::RestoreCompleted)
        .collect();
    assert_eq!(restored.len(), 1);
}

#[tokio::test]
async fn test_encrypted_backup_restores_original_bytes() {
    let h = harness(test_config().with_encryption_key(EncryptionKey::generate()));
    h.data.set_payload(b"customer rows 1..=42");

    let meta = h
        .engine
        .create_backup(
            BackupRequest::full("database", destination())
                .with_compression(true)
                .with_encryption(true),
        )
        .await
        .unwrap()
        .backup
        .unwrap();

    h.engine
        .restore_backup(&meta.id, RestoreRequest::new("staging").with_overwrite(true))
        .await
        .unwrap();

    let imports = h.data.imports.lock().clone();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].data.as_ref(), b"customer rows 1..=42");
    assert!(imports[0].overwrite);
}

#[tokio::test]
async fn test_storage_rejected_checksum_raises_critical_alert() {
    let h = harness(test_config());
    let meta = h
        .engine
        .create_backup(BackupRequest::full("database", destination()))
        .await
        .unwrap()
        .backup
        .unwrap();
    h.storage.set_verify_result(false);

    let err = h
        .engine
        .restore_backup(&meta.id, RestoreRequest::new("staging"))
        .await
        .unwrap_err();
    match err {
        BackupError::ChecksumMismatch { ref backup_id, .. } => assert_eq!(backup_id, &meta.id),
        other => panic!("expected checksum mismatch, got {}", other),
    }
    assert!(h.data.imports.lock().is_empty());

    h.engine.flush_events().await;
    let critical = h.notifier.with_severity(AlertSeverity::Critical);
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].alert_type, AlertType::ChecksumMismatch);
    assert!(!h
        .notifier
        .alerts
        .lock()
        .iter()
        .any(|a| a.alert_type == AlertType::RestoreFailed));

    let restores = h.engine.jobs(Some(JobKind::Restore));
    assert_eq!(restores.len(), 1);
    assert_eq!(restores[0].status, BackupStatus::Failed);
    assert!(h
        .engine
        .metrics_text()
        .contains("backup_engine_checksum_mismatches_total 1"));
}

#[tokio::test]
async fn test_corrupted_parent_blocks_whole_chain() {
    let h = harness(test_config());
    let (full_id, incremental_id) = full_then_incremental(&h).await;

    let full = h.engine.catalog().get(&full_id).await.unwrap();
    h.storage.corrupt(&full.destination);

    let err = h
        .engine
        .restore_backup(&incremental_id, RestoreRequest::new("staging"))
        .await
        .unwrap_err();
    match err {
        BackupError::ChecksumMismatch { ref backup_id, .. } => assert_eq!(backup_id, &full_id),
        other => panic!("expected checksum mismatch, got {}", other),
    }
    // Nothing is imported, not even the intact incremental
    assert!(h.data.imports.lock().is_empty());
}

#[tokio::test]
async fn test_tampering_without_verification_still_fails_decryption() {
    let h = harness(test_config().with_encryption_key(EncryptionKey::generate()));
    let meta = h
        .engine
        .create_backup(BackupRequest::full("database", destination()).with_encryption(true))
        .await
        .unwrap()
        .backup
        .unwrap();
    h.storage.corrupt(&meta.destination);

    let err = h
        .engine
        .restore_backup(&meta.id, RestoreRequest::new("staging").with_verify_checksum(false))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Encryption(_)));
    assert!(h.data.imports.lock().is_empty());

    h.engine.flush_events().await;
    let alerts = h.notifier.with_severity(AlertSeverity::Error);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::RestoreFailed);
}

#[tokio::test]
async fn test_dry_run_validates_without_importing() {
    let h = harness(test_config());
    h.data.estimated_records.store(500, Ordering::SeqCst);
    let meta = h
        .engine
        .create_backup(BackupRequest::full("database", destination()))
        .await
        .unwrap()
        .backup
        .unwrap();

    let result = h
        .engine
        .restore_backup(&meta.id, RestoreRequest::new("staging").with_dry_run(true))
        .await
        .unwrap();

    assert_eq!(result.status, RestoreStatus::DryRunSuccess);
    assert_eq!(result.estimated_records, 500);
    assert_eq!(result.restored_records, 0);
    assert_eq!(h.data.validations.load(Ordering::SeqCst), 1);
    assert!(h.data.imports.lock().is_empty());
}

#[tokio::test]
async fn test_incremental_only_skips_ancestors() {
    let h = harness(test_config());
    let (_, incremental_id) = full_then_incremental(&h).await;

    let result = h
        .engine
        .restore_backup(
            &incremental_id,
            RestoreRequest::new("staging").with_incremental_only(true),
        )
        .await
        .unwrap();

    assert_eq!(result.chain, vec![incremental_id]);
    assert_eq!(result.restored_records, 200);
    assert_eq!(h.storage.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_parent_fails_before_download() {
    let h = harness(test_config());
    let (full_id, incremental_id) = full_then_incremental(&h).await;
    h.engine.catalog().remove(&full_id).await.unwrap();

    let err = h
        .engine
        .restore_backup(&incremental_id, RestoreRequest::new("staging"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::ChainResolution(_)));
    assert_eq!(h.storage.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_backup_is_not_found() {
    let h = harness(test_config());

    let err = h
        .engine
        .restore_backup("backup-missing", RestoreRequest::new("staging"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));

    h.engine.flush_events().await;
    let alerts = h.notifier.alerts.lock().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::RestoreFailed);
}
