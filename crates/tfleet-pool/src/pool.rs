use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tfleet_domain::{DeploymentUnit, Phase, RunContext, UnitArtifacts, UnitOutcome};
use tfleet_executor::UnitExecutor;

/// Runs every unit to completion with bounded concurrency.
///
/// Width is `min(5, units.len(), ctx.worker_cap)` — never wider than the
/// batch itself, never wider than the operator's configured cap, and capped
/// at 5 regardless of either so one run can't monopolize the remote lock
/// service. Results are returned in the same order as `units` was given,
/// independent of completion order.
///
/// `cancel` is shared across every unit: a unit still waiting on a semaphore
/// permit when it fires is reported `aborted_before_start`; a unit already
/// running finishes its current step before checking it.
pub async fn run_pool(
    ctx: Arc<RunContext>,
    executor: Arc<UnitExecutor>,
    units: Vec<DeploymentUnit>,
    cancel: CancellationToken,
) -> Vec<UnitOutcome> {
    if units.is_empty() {
        return Vec::new();
    }

    let width = 5usize.min(units.len()).min(ctx.worker_cap.max(1));
    info!(width, total = units.len(), "starting worker pool");

    let semaphore = Arc::new(Semaphore::new(width));
    let mut slots: Vec<Option<UnitOutcome>> = (0..units.len()).map(|_| None).collect();
    let mut set = JoinSet::new();

    for (index, unit) in units.into_iter().enumerate() {
        let permit = semaphore.clone();
        let ctx = ctx.clone();
        let executor = executor.clone();
        let cancel = cancel.clone();
        let state_key = unit.state_key.clone();
        set.spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore never closed");
            let outcome = executor.execute(&ctx, unit, &cancel).await;
            (index, state_key, outcome)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, _state_key, outcome)) => slots[index] = Some(outcome),
            Err(e) => {
                let err = crate::error::PoolError::Join(e.to_string());
                warn!(error = %err, "worker task panicked; recording as aborted");
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.unwrap_or_else(|| panicked_outcome(i))
        })
        .collect()
}

fn panicked_outcome(index: usize) -> UnitOutcome {
    UnitOutcome {
        state_key: tfleet_domain::StateKey(format!("unknown/panicked-worker-{index}")),
        phase_reached: Phase::AbortedBeforeStart,
        artifacts: UnitArtifacts::default(),
        summary: "worker task panicked before producing an outcome".to_string(),
        raw: "worker task panicked before producing an outcome".to_string(),
        audit_degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::os::unix::fs::PermissionsExt;

    use tfleet_domain::{ServiceKind, StateKey, UnitMetadata};
    use tfleet_store::{AuditLogger, InMemoryStateStoreClient};

    fn fake_binary(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn passing_iac_script(dir: &std::path::Path) -> std::path::PathBuf {
        fake_binary(
            dir,
            "iac-ok.sh",
            r#"case "$1" in
  init) echo "Initialized"; exit 0;;
  plan) echo "Plan: 1 to add"; exit 0;;
  show) echo '{"resource_changes":[]}'; exit 0;;
  apply) echo "Apply complete"; exit 0;;
  *) exit 9;;
esac"#,
        )
    }

    fn passing_policy_script(dir: &std::path::Path) -> std::path::PathBuf {
        fake_binary(dir, "policy-ok.sh", "echo '{\"violations\":[]}' > policy-report.json; exit 0")
    }

    fn test_unit(project: &str) -> DeploymentUnit {
        let services = BTreeSet::from([ServiceKind::ObjectStore]);
        DeploymentUnit {
            source_path: format!("store/{project}/{project}.conf").into(),
            project: project.to_string(),
            account_name: "acc1".to_string(),
            region: "region-1".to_string(),
            state_key: StateKey::derive(&services, "acc1", "region-1", project),
            services,
            metadata: UnitMetadata::default(),
            resource_names: vec!["b1".into()],
            workspace_path: None,
        }
    }

    fn test_ctx(bin_dir: &std::path::Path, workspace_root: &std::path::Path, worker_cap: usize) -> RunContext {
        RunContext {
            action: tfleet_domain::Action::Plan,
            requester_id: "alice".to_string(),
            workspace_root: workspace_root.to_path_buf(),
            worker_cap,
            orchestrator_version: "0.1.0-test".to_string(),
            iac_binary: bin_dir.join("iac-ok.sh").to_str().unwrap().to_string(),
            policy_binary: bin_dir.join("policy-ok.sh").to_str().unwrap().to_string(),
            policy_dir: bin_dir.to_path_buf(),
            lock_ttl: std::time::Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_without_spawning() {
        let store = Arc::new(InMemoryStateStoreClient::new());
        let audit = Arc::new(AuditLogger::new(store.clone(), &[1u8; 32]));
        let executor = Arc::new(UnitExecutor::new(store, audit));
        let bin_dir = tempfile::tempdir().unwrap();
        let workspace_root = tempfile::tempdir().unwrap();
        let ctx = Arc::new(test_ctx(bin_dir.path(), workspace_root.path(), 5));

        let outcomes = run_pool(ctx, executor, Vec::new(), CancellationToken::new()).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn results_are_returned_in_submission_order() {
        let bin_dir = tempfile::tempdir().unwrap();
        let workspace_root = tempfile::tempdir().unwrap();
        passing_iac_script(bin_dir.path());
        passing_policy_script(bin_dir.path());

        let store = Arc::new(InMemoryStateStoreClient::new());
        let audit = Arc::new(AuditLogger::new(store.clone(), &[2u8; 32]));
        let executor = Arc::new(UnitExecutor::new(store, audit));
        let ctx = Arc::new(test_ctx(bin_dir.path(), workspace_root.path(), 5));

        let projects = ["proj-a", "proj-b", "proj-c", "proj-d"];
        let units: Vec<DeploymentUnit> = projects.iter().map(|p| test_unit(p)).collect();
        let expected_keys: Vec<String> = units.iter().map(|u| u.state_key.as_str().to_string()).collect();

        let outcomes = run_pool(ctx, executor, units, CancellationToken::new()).await;
        assert_eq!(outcomes.len(), projects.len());
        let actual_keys: Vec<String> = outcomes.iter().map(|o| o.state_key.as_str().to_string()).collect();
        assert_eq!(actual_keys, expected_keys);
        assert!(outcomes.iter().all(|o| o.phase_reached == Phase::Planned));
    }

    #[tokio::test]
    async fn worker_cap_and_batch_size_bound_the_pool_width() {
        // Width is min(5, units.len(), worker_cap); this just exercises a
        // batch wider than the configured cap and checks every unit still
        // completes — the cap must throttle, not drop, units.
        let bin_dir = tempfile::tempdir().unwrap();
        let workspace_root = tempfile::tempdir().unwrap();
        passing_iac_script(bin_dir.path());
        passing_policy_script(bin_dir.path());

        let store = Arc::new(InMemoryStateStoreClient::new());
        let audit = Arc::new(AuditLogger::new(store.clone(), &[4u8; 32]));
        let executor = Arc::new(UnitExecutor::new(store, audit));
        let ctx = Arc::new(test_ctx(bin_dir.path(), workspace_root.path(), 2));

        let units: Vec<DeploymentUnit> = (0..6).map(|i| test_unit(&format!("proj-{i}"))).collect();
        let outcomes = run_pool(ctx, executor, units, CancellationToken::new()).await;
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.phase_reached == Phase::Planned));
    }

    #[tokio::test]
    async fn cancelling_before_dispatch_aborts_pending_units() {
        // A cap of 1 keeps every unit but the first waiting on the semaphore;
        // cancelling immediately means none of them ever start a process.
        let bin_dir = tempfile::tempdir().unwrap();
        let workspace_root = tempfile::tempdir().unwrap();
        passing_iac_script(bin_dir.path());
        passing_policy_script(bin_dir.path());

        let store = Arc::new(InMemoryStateStoreClient::new());
        let audit = Arc::new(AuditLogger::new(store.clone(), &[5u8; 32]));
        let executor = Arc::new(UnitExecutor::new(store, audit));
        let ctx = Arc::new(test_ctx(bin_dir.path(), workspace_root.path(), 1));

        let units: Vec<DeploymentUnit> = (0..3).map(|i| test_unit(&format!("proj-{i}"))).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = run_pool(ctx, executor, units, cancel).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.phase_reached == Phase::AbortedBeforeStart));
    }
}
