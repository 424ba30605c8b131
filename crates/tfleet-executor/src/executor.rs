use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tfleet_domain::{
    Action, AuditRecord, AuditResult, DeploymentUnit, Phase, PolicyEngineReport, RunContext,
    UnitArtifacts, UnitOutcome,
};
use tfleet_store::{AuditLogger, LockHandle, StateStoreClient, StoreError};

use crate::error::ExecutorError;
use crate::process::{self, RunOutput};

const INIT_TIMEOUT: Duration = Duration::from_secs(120);
const PLAN_TIMEOUT: Duration = Duration::from_secs(600);
const APPLY_TIMEOUT: Duration = Duration::from_secs(1800);

/// Capped exponential backoff applied to a busy remote lock: 3 retries at
/// 5s/30s/120s before giving up with `lock_busy_final` (spec §7).
const LOCK_RETRY_DELAYS: [Duration; 3] = [Duration::from_secs(5), Duration::from_secs(30), Duration::from_secs(120)];

/// Drives one [`DeploymentUnit`] through init → plan → policy-validate →
/// [backup → apply → rollback] and returns its terminal [`UnitOutcome`].
///
/// Consumes an already-classified, already-gated unit — the Pre-Gate Validator
/// runs before a unit ever reaches the Worker Pool.
pub struct UnitExecutor {
    store: Arc<dyn StateStoreClient>,
    audit: Arc<AuditLogger>,
}

impl UnitExecutor {
    pub fn new(store: Arc<dyn StateStoreClient>, audit: Arc<AuditLogger>) -> Self {
        Self { store, audit }
    }

    /// Drives `unit` through its lifecycle, honoring `cancel`: a unit that
    /// hasn't started yet when `cancel` fires is reported `aborted_before_start`
    /// without touching the lock or workspace; a unit already in flight finishes
    /// its current external-process step (never killed) and skips the rest.
    pub async fn execute(&self, ctx: &RunContext, mut unit: DeploymentUnit, cancel: &CancellationToken) -> UnitOutcome {
        if cancel.is_cancelled() {
            return self
                .finish(
                    ctx,
                    unit,
                    Phase::AbortedBeforeStart,
                    UnitArtifacts::default(),
                    "run cancelled before this unit started\n".to_string(),
                    None,
                )
                .await;
        }

        let mut raw = String::new();
        let owner_id = format!("{}:{}", ctx.requester_id, unit.state_key.as_str());

        let lock = match self
            .acquire_lock_with_retry(&unit.state_key.lock_key(), &owner_id, ctx.lock_ttl)
            .await
        {
            Ok(handle) => handle,
            Err(StoreError::LockBusy { .. }) => {
                raw.push_str("failed to acquire remote lock after capped backoff retries\n");
                return self.finish(ctx, unit, Phase::LockBusyFinal, UnitArtifacts::default(), raw, None).await;
            }
            Err(e) => {
                raw.push_str(&format!("failed to acquire remote lock: {e}\n"));
                return self.finish(ctx, unit, Phase::AbortedBeforeStart, UnitArtifacts::default(), raw, None).await;
            }
        };

        let workspace = ctx.workspace_root.join(&unit.account_name).join(&unit.project);
        if let Err(e) = tokio::fs::create_dir_all(&workspace).await {
            raw.push_str(&format!(
                "{}\n",
                ExecutorError::Workspace { path: workspace.display().to_string(), source: e }
            ));
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::AbortedBeforeStart, UnitArtifacts::default(), raw, None).await;
        }
        unit.workspace_path = Some(workspace.clone());

        let mut artifacts = UnitArtifacts::default();

        // init
        let init = match process::run(&ctx.iac_binary, &["init", "-no-color"], &workspace, INIT_TIMEOUT, "init").await
        {
            Ok(out) => out,
            Err(e) => {
                raw.push_str(&format!("{e}\n"));
                let _ = self.store.release(lock).await;
                return self.finish(ctx, unit, Phase::TimeoutInit, artifacts, raw, None).await;
            }
        };
        append(&mut raw, "init", &init);
        if !init.succeeded() {
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::InitFailed, artifacts, raw, None).await;
        }
        if cancel.is_cancelled() {
            raw.push_str("run cancelled after init; skipping remaining steps\n");
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::AbortedBeforeStart, artifacts, raw, None).await;
        }

        // plan
        let plan_file = "tfplan";
        let plan = match process::run(
            &ctx.iac_binary,
            &["plan", "-no-color", &format!("-out={plan_file}")],
            &workspace,
            PLAN_TIMEOUT,
            "plan",
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                raw.push_str(&format!("{e}\n"));
                let _ = self.store.release(lock).await;
                return self.finish(ctx, unit, Phase::TimeoutPlan, artifacts, raw, None).await;
            }
        };
        append(&mut raw, "plan", &plan);
        if !plan.succeeded() {
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::PlanFailed, artifacts, raw, None).await;
        }

        let plan_json_path = workspace.join("plan.json");
        let show = match process::run(
            &ctx.iac_binary,
            &["show", "-json", "-no-color", plan_file],
            &workspace,
            PLAN_TIMEOUT,
            "show",
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                raw.push_str(&format!("{e}\n"));
                let _ = self.store.release(lock).await;
                return self.finish(ctx, unit, Phase::TimeoutPlan, artifacts, raw, None).await;
            }
        };
        append(&mut raw, "show", &show);
        if !show.succeeded() {
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::PlanFailed, artifacts, raw, None).await;
        }
        if let Err(e) = tokio::fs::write(&plan_json_path, &show.log).await {
            warn!(error = %e, "failed to persist plan.json artifact");
        } else {
            artifacts.plan_json = Some(plan_json_path.clone());
            artifacts.plan_text = Some(workspace.join(plan_file));
        }
        if cancel.is_cancelled() {
            raw.push_str("run cancelled after plan; skipping remaining steps\n");
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::AbortedBeforeStart, artifacts, raw, None).await;
        }

        // policy-validate: the engine is invoked positionally (`evaluate <plan-json>
        // <policy-dir>`) and writes its own report to a well-known path in its
        // working directory, the same convention `plan.json` already uses.
        let report_path = workspace.join("policy-report.json");
        let policy = match process::run(
            &ctx.policy_binary,
            &["evaluate", plan_json_path.to_str().unwrap_or("plan.json"), ctx.policy_dir.to_str().unwrap_or(".")],
            &workspace,
            PLAN_TIMEOUT,
            "policy",
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                raw.push_str(&format!("{e}\n"));
                let _ = self.store.release(lock).await;
                return self.finish(ctx, unit, Phase::PlanFailed, artifacts, raw, None).await;
            }
        };
        append(&mut raw, "policy evaluate", &policy);
        artifacts.policy_report = Some(report_path.clone());

        if !policy.succeeded() {
            // The engine's own exit code signals it could not complete an
            // evaluation at all (crash, bad invocation) — not a verdict. The
            // verdict itself only ever comes from the report's violation list.
            raw.push_str("policy engine exited non-zero before producing a usable verdict\n");
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::PlanFailed, artifacts, raw, None).await;
        }

        let policy_report = match read_policy_report(&report_path).await {
            Ok(r) => r,
            Err(e) => {
                raw.push_str(&format!("{e}\n"));
                let _ = self.store.release(lock).await;
                return self.finish(ctx, unit, Phase::PlanFailed, artifacts, raw, None).await;
            }
        };

        if policy_report.has_blocking_violation() {
            for v in policy_report.violations.iter().filter(|v| v.severity == tfleet_domain::ViolationSeverity::Critical) {
                raw.push_str(&format!("policy violation [{}] {}: {}\n", v.rule_id, v.resource_address, v.message));
            }
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::PolicyRejected, artifacts, raw, None).await;
        }
        if cancel.is_cancelled() {
            raw.push_str("run cancelled after policy-validate; skipping remaining steps\n");
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::AbortedBeforeStart, artifacts, raw, None).await;
        }

        if ctx.action == Action::Plan {
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, Phase::Planned, artifacts, raw, None).await;
        }

        // backup
        let now = Utc::now();
        let backup_key = unit.state_key.backup_key(now);
        let have_prior_state = match self.store.get(unit.state_key.as_str()).await {
            Ok(existing) => existing.is_some(),
            Err(e) => {
                raw.push_str(&format!("failed to read existing state before backup: {e}\n"));
                false
            }
        };
        if have_prior_state {
            if let Err(e) = self.store.copy(unit.state_key.as_str(), &backup_key, true).await {
                raw.push_str(&format!("failed to back up state object: {e}\n"));
                let _ = self.store.release(lock).await;
                return self.finish(ctx, unit, Phase::PlanFailed, artifacts, raw, None).await;
            }
        }

        // Cancellation past this point finds the unit already past backup —
        // rollback is still attempted even though apply itself is skipped,
        // so the state object is never left in an ambiguous position.
        if cancel.is_cancelled() {
            raw.push_str("run cancelled after backup; rolling back before aborting\n");
            let phase = self
                .rollback(&unit, have_prior_state, &backup_key, &mut raw)
                .await
                .unwrap_or(Phase::ApplyFailedRollbackFailed);
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, phase, artifacts, raw, Some(backup_key)).await;
        }

        // apply
        let apply = match process::run(
            &ctx.iac_binary,
            &["apply", "-no-color", "-auto-approve", plan_file],
            &workspace,
            APPLY_TIMEOUT,
            "apply",
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                raw.push_str(&format!("{e}\n"));
                let phase = self.rollback(&unit, have_prior_state, &backup_key, &mut raw).await;
                let _ = self.store.release(lock).await;
                return self
                    .finish(ctx, unit, phase.unwrap_or(Phase::TimeoutApply), artifacts, raw, Some(backup_key))
                    .await;
            }
        };
        append(&mut raw, "apply", &apply);

        if !apply.succeeded() {
            let phase = self
                .rollback(&unit, have_prior_state, &backup_key, &mut raw)
                .await
                .unwrap_or(Phase::ApplyFailedRollbackFailed);
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, phase, artifacts, raw, Some(backup_key)).await;
        }

        // commit: the new plan becomes the unit's current state record.
        if let Err(e) = self.store.put(unit.state_key.as_str(), &show.log.clone().into_bytes(), true).await {
            raw.push_str(&format!("apply succeeded but failed to commit new state: {e}\n"));
            let phase = self
                .rollback(&unit, have_prior_state, &backup_key, &mut raw)
                .await
                .unwrap_or(Phase::ApplyFailedRollbackFailed);
            let _ = self.store.release(lock).await;
            return self.finish(ctx, unit, phase, artifacts, raw, Some(backup_key)).await;
        }

        let _ = self.store.release(lock).await;
        self.finish(ctx, unit, Phase::Applied, artifacts, raw, Some(backup_key)).await
    }

    /// Acquire the remote lock, retrying a busy conflict with capped backoff
    /// (spec §7: 3 retries at 5s/30s/120s) before giving up. Any other store
    /// error is returned immediately without retrying.
    async fn acquire_lock_with_retry(
        &self,
        key: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<LockHandle, StoreError> {
        let mut attempt = 0usize;
        loop {
            match self.store.acquire_lock(key, owner_id, ttl).await {
                Ok(handle) => return Ok(handle),
                Err(StoreError::LockBusy { .. }) if attempt < LOCK_RETRY_DELAYS.len() => {
                    let delay = LOCK_RETRY_DELAYS[attempt];
                    warn!(key, attempt = attempt + 1, delay_secs = delay.as_secs(), "state lock busy, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Restore the pre-apply state object from its backup. Returns `None` if
    /// there was nothing to roll back to (first-ever apply for this key) — in
    /// that case the failure is still reported as `ApplyFailedRolledBack` by
    /// the caller, since no prior state was put at risk.
    async fn rollback(
        &self,
        unit: &DeploymentUnit,
        have_prior_state: bool,
        backup_key: &str,
        raw: &mut String,
    ) -> Option<Phase> {
        if !have_prior_state {
            return Some(Phase::ApplyFailedRolledBack);
        }
        match self.store.copy(backup_key, unit.state_key.as_str(), true).await {
            Ok(()) => {
                raw.push_str("rollback: restored prior state object from backup\n");
                Some(Phase::ApplyFailedRolledBack)
            }
            Err(e) => {
                raw.push_str(&format!("rollback failed: could not restore backup: {e}\n"));
                Some(Phase::ApplyFailedRollbackFailed)
            }
        }
    }

    async fn finish(
        &self,
        ctx: &RunContext,
        unit: DeploymentUnit,
        phase: Phase,
        artifacts: UnitArtifacts,
        raw: String,
        backup_key: Option<String>,
    ) -> UnitOutcome {
        info!(state_key = %unit.state_key, %phase, "unit reached terminal phase");
        let summary = tfleet_redact::redact(&raw);

        let record = AuditRecord {
            timestamp: Utc::now(),
            action: ctx.action,
            unit: unit.clone(),
            result: AuditResult { success: !phase.is_error(), output: raw.clone() },
            backup_key,
            orchestrator_version: ctx.orchestrator_version.clone(),
        };
        let audit_ok = self.audit.append(&record).await;

        // Only a rollback failure leaves the workspace in place for inspection.
        if phase != Phase::ApplyFailedRollbackFailed {
            if let Some(path) = &unit.workspace_path {
                if let Err(e) = tokio::fs::remove_dir_all(path).await {
                    warn!(error = %e, path = %path.display(), "failed to remove unit workspace");
                }
            }
        }

        UnitOutcome {
            state_key: unit.state_key,
            phase_reached: phase,
            artifacts,
            summary,
            raw,
            audit_degraded: !audit_ok,
        }
    }
}

/// Read and parse the policy engine's report artifact at `path`.
async fn read_policy_report(path: &Path) -> Result<PolicyEngineReport, ExecutorError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ExecutorError::PolicyReportParse(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents).map_err(|e| ExecutorError::PolicyReportParse(format!("{}: {e}", path.display())))
}

fn append(raw: &mut String, label: &str, out: &RunOutput) {
    raw.push_str(&format!("=== {label} (exit {}) ===\n", out.exit_code));
    raw.push_str(&out.log);
    if !out.log.ends_with('\n') {
        raw.push('\n');
    }
}
