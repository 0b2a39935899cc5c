//! Tests for SQLite repository implementation.

use rusqlite::params;

use super::super::{contract, ClarificationWrite, CommitOutcome, ItemCommit, RepositoryError};
use super::{SqliteRepository, CURRENT_SCHEMA_VERSION};
use crate::workflow::repository::WorkflowRepository;
use taskpilot_core::{
    ArtifactBody, ReviewComment, ReviewStatus, ReviewVerdict, WorkItemStatus,
};

#[tokio::test]
async fn test_round_trips_items() {
    contract::round_trips_items(&SqliteRepository::new_in_memory().unwrap()).await;
}

#[tokio::test]
async fn test_commit_is_compare_and_swap() {
    contract::commit_is_compare_and_swap(&SqliteRepository::new_in_memory().unwrap()).await;
}

#[tokio::test]
async fn test_artifact_stage_must_match_stored_status() {
    contract::artifact_stage_must_match_stored_status(&SqliteRepository::new_in_memory().unwrap())
        .await;
}

#[tokio::test]
async fn test_clarification_resolves_only_once() {
    contract::clarification_resolves_only_once(&SqliteRepository::new_in_memory().unwrap()).await;
}

#[tokio::test]
async fn test_record_mirror_keeps_version() {
    contract::record_mirror_keeps_version(&SqliteRepository::new_in_memory().unwrap()).await;
}

#[tokio::test]
async fn test_stale_mirror_is_not_recorded() {
    contract::stale_mirror_is_not_recorded(&SqliteRepository::new_in_memory().unwrap()).await;
}

#[tokio::test]
async fn test_version_must_bump_by_one() {
    contract::version_must_bump_by_one(&SqliteRepository::new_in_memory().unwrap()).await;
}

#[tokio::test]
async fn test_commit_does_not_overwrite_mirrored_status() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let item = contract::item();
    repo.insert_item(&item).await.unwrap();
    repo.record_mirror(&item.id, WorkItemStatus::Backlog)
        .await
        .unwrap();

    // The caller's copy still has no mirrored status.
    let (next, transition) = contract::moved(&item, WorkItemStatus::ProductDesign, 1);
    assert_eq!(next.mirrored_status, None);
    repo.commit(ItemCommit::new(0, next).with_transition(Some(transition)))
        .await
        .unwrap();

    let stored = repo.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkItemStatus::ProductDesign);
    assert_eq!(stored.mirrored_status, Some(WorkItemStatus::Backlog));
    assert!(stored.needs_mirror());
}

#[tokio::test]
async fn test_review_artifact_round_trips() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let item = contract::item();
    repo.insert_item(&item).await.unwrap();
    let (reviewing, transition) = contract::moved(&item, WorkItemStatus::Review, 1);
    repo.commit(ItemCommit::new(0, reviewing.clone()).with_transition(Some(transition)))
        .await
        .unwrap();

    let mut artifact = contract::design_artifact(&reviewing);
    artifact.agent = taskpilot_core::AgentStage::PrReview;
    artifact.body = ArtifactBody::Review {
        verdict: ReviewVerdict::RequestChanges,
        summary: "Missing tests".to_string(),
        comments: vec![ReviewComment {
            path: Some("src/export.rs".to_string()),
            line: Some(12),
            body: "Handle empty rows".to_string(),
        }],
    };
    let mut reviewed = reviewing.clone();
    reviewed.version += 1;
    reviewed.review_status = Some(ReviewStatus::ChangesRequested);
    repo.commit(ItemCommit::new(1, reviewed).with_artifact(artifact.clone()))
        .await
        .unwrap();

    assert_eq!(repo.artifacts(&item.id).await.unwrap(), vec![artifact]);
}

#[tokio::test]
async fn test_failed_commit_writes_nothing() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let item = contract::item();
    repo.insert_item(&item).await.unwrap();

    // Transition is fine, but the artifact belongs to a different stage, so
    // the whole commit must roll back.
    let (next, transition) = contract::moved(&item, WorkItemStatus::ProductDesign, 1);
    let mut artifact = contract::design_artifact(&next);
    artifact.stage = WorkItemStatus::TechDesign;
    let result = repo
        .commit(
            ItemCommit::new(0, next)
                .with_transition(Some(transition))
                .with_artifact(artifact),
        )
        .await;
    assert!(matches!(result, Err(RepositoryError::Invariant(_))));

    assert_eq!(repo.get_item(&item.id).await.unwrap(), Some(item.clone()));
    assert!(repo.transitions(&item.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transition_sequence_must_be_contiguous() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let item = contract::item();
    repo.insert_item(&item).await.unwrap();
    let (next, transition) = contract::moved(&item, WorkItemStatus::ProductDesign, 3);
    let result = repo
        .commit(ItemCommit::new(0, next).with_transition(Some(transition)))
        .await;
    assert!(matches!(result, Err(RepositoryError::Invariant(_))));
}

#[tokio::test]
async fn test_resolve_of_unknown_clarification_conflicts() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let item = contract::item();
    repo.insert_item(&item).await.unwrap();
    let mut next = item.clone();
    next.version = 1;
    let outcome = repo
        .commit(
            ItemCommit::new(0, next)
                .with_clarification(ClarificationWrite::Resolve(contract::clarification(&item))),
        )
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Conflict);
    assert_eq!(repo.get_item(&item.id).await.unwrap().unwrap().version, 0);
}

// =========================================================================
// On-disk persistence tests
// =========================================================================

/// History written before a restart is still there afterwards.
#[tokio::test]
async fn test_on_disk_persistence_basic() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("taskpilot.db");
    let item = contract::item();
    let (next, transition) = contract::moved(&item, WorkItemStatus::ProductDesign, 1);

    {
        let repo = SqliteRepository::new(&db_path).unwrap();
        repo.insert_item(&item).await.unwrap();
        repo.commit(ItemCommit::new(0, next.clone()).with_transition(Some(transition.clone())))
            .await
            .unwrap();
    }

    {
        let repo = SqliteRepository::new(&db_path).unwrap();
        assert_eq!(repo.get_item(&item.id).await.unwrap(), Some(next));
        assert_eq!(repo.transitions(&item.id).await.unwrap(), vec![transition]);
    }
}

#[tokio::test]
async fn test_pending_clarifications_after_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("taskpilot.db");
    let item = contract::item();
    let pending = contract::clarification(&item);

    {
        let repo = SqliteRepository::new(&db_path).unwrap();
        repo.insert_item(&item).await.unwrap();
        let mut waiting = item.clone();
        waiting.version = 1;
        waiting.review_status = Some(ReviewStatus::WaitingForClarification);
        repo.commit(
            ItemCommit::new(0, waiting)
                .with_clarification(ClarificationWrite::Insert(pending.clone())),
        )
        .await
        .unwrap();
    }

    let repo = SqliteRepository::new(&db_path).unwrap();
    assert_eq!(repo.pending_clarifications().await.unwrap(), vec![pending]);
}

#[tokio::test]
async fn test_creates_parent_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("nested").join("state").join("taskpilot.db");
    assert!(!db_path.parent().unwrap().exists());

    let repo = SqliteRepository::new(&db_path).unwrap();
    repo.insert_item(&contract::item()).await.unwrap();

    assert!(db_path.exists());
}

#[tokio::test]
async fn test_schema_version_persisted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("taskpilot.db");
    {
        let _repo = SqliteRepository::new(&db_path).unwrap();
    }

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let version: i64 = conn
        .query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_newer_schema_version_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("taskpilot.db");
    {
        let _repo = SqliteRepository::new(&db_path).unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE schema_version SET version = ?1 WHERE id = 1",
            params![CURRENT_SCHEMA_VERSION + 1],
        )
        .unwrap();
    }

    assert!(matches!(
        SqliteRepository::new(&db_path),
        Err(RepositoryError::Storage { .. })
    ));
}

#[tokio::test]
async fn test_transition_log_is_append_only() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let item = contract::item();
    repo.insert_item(&item).await.unwrap();
    let (next, transition) = contract::moved(&item, WorkItemStatus::ProductDesign, 1);
    repo.commit(ItemCommit::new(0, next).with_transition(Some(transition)))
        .await
        .unwrap();

    let conn = repo.conn.lock().unwrap();
    assert!(conn
        .execute("UPDATE status_transitions SET to_status = 'done'", [])
        .is_err());
    assert!(conn.execute("DELETE FROM status_transitions", []).is_err());
}

#[tokio::test]
async fn test_corrupt_status_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("taskpilot.db");
    let item = contract::item();
    {
        let repo = SqliteRepository::new(&db_path).unwrap();
        repo.insert_item(&item).await.unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE work_items SET status = 'shipping' WHERE id = ?1",
            params![item.id.as_str()],
        )
        .unwrap();
    }

    let repo = SqliteRepository::new(&db_path).unwrap();
    assert!(matches!(
        repo.get_item(&item.id).await,
        Err(RepositoryError::Corruption { .. })
    ));
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("taskpilot.db");
    let _repo = SqliteRepository::new(&db_path).unwrap();

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal");
}

#[cfg(unix)]
#[tokio::test]
async fn test_state_dir_has_restrictive_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().unwrap();
    let state_dir = temp_dir.path().join("state");
    let db_path = state_dir.join("taskpilot.db");
    let _repo = SqliteRepository::new(&db_path).unwrap();

    let dir_mode = std::fs::metadata(&state_dir).unwrap().permissions().mode() & 0o777;
    assert_eq!(dir_mode, 0o700, "got {:o}", dir_mode);
    let file_mode = std::fs::metadata(&db_path).unwrap().permissions().mode() & 0o777;
    assert_eq!(file_mode, 0o600, "got {:o}", file_mode);
}
