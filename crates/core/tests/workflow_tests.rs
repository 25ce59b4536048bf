//! End-to-end pull request workflow: propose, command, apply, watermark.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{at, test_config, FakePlatform, StubOracle, AUTHOR, PR_NUMBER, REPO};
use conflictbot_core::db::Database;
use conflictbot_core::errors::{CoreError, WorkflowError};
use conflictbot_core::models::{ChangeStatus, PROPOSAL_MARKER};
use conflictbot_core::store::{MemoryResolutionStore, ResolutionStore};
use conflictbot_core::workflow::{CycleOutcome, PullRequestWorkflow};

fn conflicted_platform() -> Arc<FakePlatform> {
    let platform = Arc::new(FakePlatform::new());
    platform.set_file(
        "src/lib.rs",
        Some("fn a() {}\n"),
        Some("fn a() { ours }\n"),
        Some("fn a() { theirs }\n"),
    );
    platform.add_pr_file("src/lib.rs", ChangeStatus::Modified);
    platform
}

fn oracle() -> Arc<StubOracle> {
    let oracle = StubOracle::new();
    oracle.answer("src/lib.rs", "fn a() { merged }\n");
    Arc::new(oracle)
}

fn workflow(
    platform: &Arc<FakePlatform>,
    store: Arc<dyn ResolutionStore>,
) -> PullRequestWorkflow {
    PullRequestWorkflow::from_config(platform.clone(), store, oracle(), &test_config()).unwrap()
}

#[tokio::test]
async fn test_propose_stores_and_announces() {
    let platform = conflicted_platform();
    let store = Arc::new(MemoryResolutionStore::new());
    let workflow = workflow(&platform, store.clone());

    let proposed = workflow.propose(REPO, PR_NUMBER).await.unwrap();

    assert_eq!(proposed, 1);
    let rows = store.list_resolutions(REPO, PR_NUMBER).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].resolved_code, "fn a() { merged }\n");
    assert_eq!(rows[0].ours_content.as_deref(), Some("fn a() { ours }\n"));
    assert!(!rows[0].confirmed);

    let comments = platform.comment_bodies();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("`src/lib.rs`"));
    assert!(comments[0].contains(PROPOSAL_MARKER));
    assert_eq!(store.audit_entries()[0].action, "propose");
}

#[tokio::test]
async fn test_repropose_replaces_old_comment() {
    let platform = conflicted_platform();
    let store = Arc::new(MemoryResolutionStore::new());
    let workflow = workflow(&platform, store.clone());

    workflow.propose(REPO, PR_NUMBER).await.unwrap();
    let first = platform.comments()[0].id;
    workflow.propose(REPO, PR_NUMBER).await.unwrap();

    assert_eq!(platform.deleted_comments(), vec![first]);
    assert_eq!(platform.comments().len(), 1);
}

#[tokio::test]
async fn test_mergeable_pr_proposes_nothing() {
    let platform = conflicted_platform();
    platform.set_mergeable(Some(true));
    let store = Arc::new(MemoryResolutionStore::new());
    let workflow = workflow(&platform, store.clone());

    assert_eq!(workflow.propose(REPO, PR_NUMBER).await.unwrap(), 0);
    assert!(platform.comments().is_empty());
    assert!(store.list_resolutions(REPO, PR_NUMBER).unwrap().is_empty());
}

#[tokio::test]
async fn test_command_applies_and_advances_watermark() {
    let platform = conflicted_platform();
    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("state/conflictbot.db")).unwrap();
    db.initialize().unwrap();
    let store = Arc::new(db);
    let workflow = workflow(&platform, store.clone());

    workflow.propose(REPO, PR_NUMBER).await.unwrap();
    assert_eq!(
        workflow.process_commands(REPO, PR_NUMBER).await.unwrap(),
        CycleOutcome::NoCommand
    );

    platform.add_comment(AUTHOR, "apply all", at(5));
    let outcome = workflow.process_commands(REPO, PR_NUMBER).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Applied(ref c) if c.created_at == at(5)));
    assert_eq!(
        platform.content_at("feature", "src/lib.rs").as_deref(),
        Some("fn a() { merged }\n")
    );
    assert_eq!(store.get_watermark(REPO, PR_NUMBER).unwrap(), Some(at(5)));

    // The same command is not processed twice, and the watermark never
    // moves backwards.
    assert_eq!(
        workflow.process_commands(REPO, PR_NUMBER).await.unwrap(),
        CycleOutcome::NoCommand
    );
    assert!(!store.set_watermark(REPO, PR_NUMBER, at(1)).unwrap());
    assert_eq!(store.get_watermark(REPO, PR_NUMBER).unwrap(), Some(at(5)));

    let audit = store.list_audit_log(REPO, PR_NUMBER, 10).unwrap();
    assert!(audit.iter().any(|e| e.action == "apply_all" && e.success));
}

/// Bot comments other than the proposal itself.
fn bot_replies(platform: &FakePlatform) -> usize {
    platform
        .comments()
        .iter()
        .filter(|c| c.user != AUTHOR && !c.body.contains(PROPOSAL_MARKER))
        .count()
}

#[tokio::test]
async fn test_failed_command_waits_for_new_proposal() {
    let platform = conflicted_platform();
    platform.fail_update_branch("feature");
    let store = Arc::new(MemoryResolutionStore::new());
    let workflow = workflow(&platform, store.clone());

    workflow.propose(REPO, PR_NUMBER).await.unwrap();
    platform.add_comment(AUTHOR, "apply all", at(5));

    let first = workflow.process_commands(REPO, PR_NUMBER).await.unwrap();
    assert!(matches!(first, CycleOutcome::ApplyFailed(_)));
    assert_eq!(store.get_watermark(REPO, PR_NUMBER).unwrap(), None);
    let replies = bot_replies(&platform);
    assert!(replies > 0);

    // Later ticks hold the command back without commenting again.
    for _ in 0..2 {
        let again = workflow.process_commands(REPO, PR_NUMBER).await.unwrap();
        assert!(matches!(again, CycleOutcome::Deferred(ref c) if c.created_at == at(5)));
    }
    assert_eq!(bot_replies(&platform), replies);
    assert!(store
        .list_resolutions(REPO, PR_NUMBER)
        .unwrap()
        .iter()
        .all(|r| r.is_pending()));

    // A fresh proposal re-arms the same command.
    workflow.propose(REPO, PR_NUMBER).await.unwrap();
    let retried = workflow.process_commands(REPO, PR_NUMBER).await.unwrap();
    assert!(matches!(retried, CycleOutcome::ApplyFailed(_)));
}

#[tokio::test]
async fn test_newer_command_is_tried_after_failure() {
    let platform = conflicted_platform();
    platform.fail_update_branch("feature");
    let store = Arc::new(MemoryResolutionStore::new());
    let workflow = workflow(&platform, store.clone());

    workflow.propose(REPO, PR_NUMBER).await.unwrap();
    platform.add_comment(AUTHOR, "apply all", at(5));
    workflow.process_commands(REPO, PR_NUMBER).await.unwrap();

    platform.add_comment(AUTHOR, "apply all", at(9));
    let outcome = workflow.process_commands(REPO, PR_NUMBER).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::ApplyFailed(ref c) if c.created_at == at(9)));
}

#[tokio::test]
async fn test_repeat_command_with_nothing_pending_is_answered_once() {
    let platform = conflicted_platform();
    let store = Arc::new(MemoryResolutionStore::new());
    let workflow = workflow(&platform, store.clone());

    workflow.propose(REPO, PR_NUMBER).await.unwrap();
    platform.add_comment(AUTHOR, "apply all", at(5));
    workflow.process_commands(REPO, PR_NUMBER).await.unwrap();

    platform.add_comment(AUTHOR, "apply all", at(8));
    let outcome = workflow.process_commands(REPO, PR_NUMBER).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::NothingToApply(_)));
    // Only a landed apply moves the watermark.
    assert_eq!(store.get_watermark(REPO, PR_NUMBER).unwrap(), Some(at(5)));
    let replies = bot_replies(&platform);

    let again = workflow.process_commands(REPO, PR_NUMBER).await.unwrap();
    assert!(matches!(again, CycleOutcome::Deferred(ref c) if c.created_at == at(8)));
    assert_eq!(bot_replies(&platform), replies);
}

#[tokio::test]
async fn test_concurrent_cycles_for_same_pr_are_rejected() {
    let platform = conflicted_platform();
    let store = Arc::new(MemoryResolutionStore::new());
    let workflow = workflow(&platform, store.clone());
    let gate = platform.gate_comments();
    let (workflow_ref, gate) = (&workflow, &gate);

    let run = move || async move {
        let result = workflow_ref.process_commands(REPO, PR_NUMBER).await;
        if result.is_err() {
            gate.notify_one();
        }
        result
    };
    let (a, b) = tokio::join!(run(), run());

    let (ok, err) = if a.is_ok() { (a, b) } else { (b, a) };
    assert_eq!(ok.unwrap(), CycleOutcome::NoCommand);
    assert!(matches!(
        err,
        Err(CoreError::Workflow(WorkflowError::AlreadyRunning { pr_number: PR_NUMBER, .. }))
    ));
    assert!(!workflow.is_running(REPO, PR_NUMBER));
}

#[tokio::test]
async fn test_lease_excludes_other_process() {
    let platform = conflicted_platform();
    let dir = TempDir::new().unwrap();
    let watcher = workflow(&platform, Arc::new(Database::open_in(dir.path()).unwrap()));
    let one_shot = workflow(&platform, Arc::new(Database::open_in(dir.path()).unwrap()));
    let gate = platform.gate_comments();
    let (watcher_ref, one_shot_ref, gate_ref) = (&watcher, &one_shot, &gate);

    let cycle = async move { watcher_ref.process_commands(REPO, PR_NUMBER).await };
    let apply = async move {
        let result = one_shot_ref.apply(REPO, PR_NUMBER).await;
        gate_ref.notify_one();
        result
    };
    let (cycle, apply) = tokio::join!(cycle, apply);

    assert_eq!(cycle.unwrap(), CycleOutcome::NoCommand);
    assert!(matches!(
        apply,
        Err(CoreError::Workflow(WorkflowError::AlreadyRunning { pr_number: PR_NUMBER, .. }))
    ));
    assert!(!one_shot.is_running(REPO, PR_NUMBER));
}
