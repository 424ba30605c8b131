use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── ServiceKind ────────────────────────────────────────────────────────────────

/// The fixed vocabulary of services a descriptor can declare.
///
/// Detected by presence of a top-level declaration key in the descriptor; see
/// `tfleet-descriptor` for the key→service mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    ObjectStore,
    Kms,
    Iam,
    ComputeFn,
    Rdbms,
    Queue,
    Topic,
}

impl ServiceKind {
    /// The canonical lowercase-kebab name used in state keys and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::ObjectStore => "object-store",
            ServiceKind::Kms => "kms",
            ServiceKind::Iam => "iam",
            ServiceKind::ComputeFn => "compute-fn",
            ServiceKind::Rdbms => "rdbms",
            ServiceKind::Queue => "queue",
            ServiceKind::Topic => "topic",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "object-store" => Ok(ServiceKind::ObjectStore),
            "kms" => Ok(ServiceKind::Kms),
            "iam" => Ok(ServiceKind::Iam),
            "compute-fn" => Ok(ServiceKind::ComputeFn),
            "rdbms" => Ok(ServiceKind::Rdbms),
            "queue" => Ok(ServiceKind::Queue),
            "topic" => Ok(ServiceKind::Topic),
            other => Err(DomainError::InvalidServiceName(other.to_string())),
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── StateKey ─────────────────────────────────────────────────────────────────

/// Canonical, stable address of a unit's remote state object.
///
/// `{service}/{account_name}/{region}/{project}/state` when the unit declares exactly
/// one service, otherwise `combined/{account_name}/{region}/{project}/state`. Pure
/// function of `(services, account_name, region, project)` — see spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey(pub String);

impl StateKey {
    pub fn derive(
        services: &BTreeSet<ServiceKind>,
        account_name: &str,
        region: &str,
        project: &str,
    ) -> Self {
        let head = if services.len() == 1 {
            services.iter().next().expect("len checked above").as_str().to_string()
        } else {
            "combined".to_string()
        };
        StateKey(format!("{head}/{account_name}/{region}/{project}/state"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Server-side copy destination for the pre-mutation backup of this state object.
    pub fn backup_key(&self, timestamp: DateTime<Utc>) -> String {
        format!("backups/{}.{}.backup", self.0, timestamp.format("%Y%m%d-%H%M%S"))
    }

    /// Sidecar lock object address.
    pub fn lock_key(&self) -> String {
        format!("{}.lock", self.0)
    }

    /// Parse a canonical state key back into its component parts.
    ///
    /// Round-trips with [`StateKey::derive`]: `(head, account, region, project)`, where
    /// `head` is either a single service name or the literal `"combined"`.
    pub fn parse(s: &str) -> Result<(String, String, String, String), DomainError> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [head, account, region, project, "state"] => Ok((
                head.to_string(),
                account.to_string(),
                region.to_string(),
                project.to_string(),
            )),
            _ => Err(DomainError::InvalidStateKey(s.to_string())),
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── UnitMetadata ───────────────────────────────────────────────────────────────

/// Descriptor-declared metadata consumed by the Pre-Gate Validator.
///
/// Fields are `None` when the descriptor omits the corresponding key; the Pre-Gate
/// rejects a unit whose policy-required fields are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UnitMetadata {
    pub application: Option<String>,
    pub team: Option<String>,
    pub cost_center: Option<String>,
    pub environment: Option<String>,
}

// ── DeploymentUnit ─────────────────────────────────────────────────────────────

/// One atomic IaC lifecycle: a single descriptor mapped to a single remote state object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    pub source_path: PathBuf,
    pub project: String,
    pub account_name: String,
    pub region: String,
    pub services: BTreeSet<ServiceKind>,
    pub state_key: StateKey,
    pub metadata: UnitMetadata,
    /// Resource names enumerated from top-level block assignments, for human-readable
    /// summaries only — not part of the state key derivation.
    pub resource_names: Vec<String>,
    /// Filesystem workspace directory. Populated by the Worker Pool just before
    /// execution; absent at classification time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub workspace_path: Option<PathBuf>,
}

// ── Policy rules document ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRule {
    #[serde(default)]
    pub allowed_teams: Vec<String>,
    #[serde(default)]
    pub allowed_environments: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRule {
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub authorized_cost_centers: Vec<String>,
    #[serde(default)]
    pub authorized_applications: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostCenterRule {
    #[serde(default)]
    pub authorized_teams: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

/// Static rules document loaded once per run and consulted by the Pre-Gate Validator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyRulesDocument {
    #[serde(default)]
    pub applications: HashMap<String, ApplicationRule>,
    #[serde(default)]
    pub teams: HashMap<String, TeamRule>,
    #[serde(default)]
    pub cost_centers: HashMap<String, CostCenterRule>,
}

// ── Policy engine report ───────────────────────────────────────────────────────

/// Severity of one policy-engine finding. A plan is rejected iff any
/// violation carries `Critical` — see spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// One finding from the external policy engine's evaluation of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub severity: ViolationSeverity,
    pub resource_address: String,
    pub message: String,
    pub rule_id: String,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

/// Parsed form of the policy engine's JSON report artifact.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyEngineReport {
    #[serde(default)]
    pub violations: Vec<PolicyViolation>,
}

impl PolicyEngineReport {
    /// A plan is rejected iff any violation has `severity = critical` — the
    /// engine's own exit code is not consulted for this decision.
    pub fn has_blocking_violation(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Critical)
    }
}

// ── GateViolation ──────────────────────────────────────────────────────────────

/// One failed Pre-Gate check. `code` is a stable machine-readable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateViolation {
    pub code: String,
    pub detail: String,
}

impl GateViolation {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { code: code.into(), detail: detail.into() }
    }
}

// ── Action ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Plan,
    Apply,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Plan => write!(f, "plan"),
            Action::Apply => write!(f, "apply"),
        }
    }
}

// ── Phase ──────────────────────────────────────────────────────────────────────

/// Terminal (or pre-execution) phase a unit reached. See spec §3/§4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Classified,
    Gated,
    InitFailed,
    PlanFailed,
    Planned,
    PolicyRejected,
    Applied,
    ApplyFailedRolledBack,
    ApplyFailedRollbackFailed,
    AbortedBeforeStart,
    /// The remote lock stayed busy through every capped-backoff retry; see
    /// `lock_busy` / `lock_busy_final` in spec §7.
    LockBusyFinal,
    TimeoutInit,
    TimeoutPlan,
    TimeoutApply,
}

impl Phase {
    /// Whether this terminal phase should contribute a non-zero process exit code.
    pub fn is_error(&self) -> bool {
        !matches!(self, Phase::Planned | Phase::Applied)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Classified => "classified",
            Phase::Gated => "gated",
            Phase::InitFailed => "init_failed",
            Phase::PlanFailed => "plan_failed",
            Phase::Planned => "planned",
            Phase::PolicyRejected => "policy_rejected",
            Phase::Applied => "applied",
            Phase::ApplyFailedRolledBack => "apply_failed_rolled_back",
            Phase::ApplyFailedRollbackFailed => "apply_failed_rollback_failed",
            Phase::AbortedBeforeStart => "aborted_before_start",
            Phase::LockBusyFinal => "lock_busy_final",
            Phase::TimeoutInit => "timeout_init",
            Phase::TimeoutPlan => "timeout_plan",
            Phase::TimeoutApply => "timeout_apply",
        };
        write!(f, "{s}")
    }
}

// ── UnitOutcome ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnitArtifacts {
    pub plan_json: Option<PathBuf>,
    pub plan_text: Option<PathBuf>,
    pub policy_report: Option<PathBuf>,
}

/// The return value of the Unit Executor for one deployment unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub state_key: StateKey,
    pub phase_reached: Phase,
    pub artifacts: UnitArtifacts,
    /// Redacted, reporter-safe summary.
    pub summary: String,
    /// Unredacted text for the audit log only. Never surfaced in the aggregate report.
    pub raw: String,
    pub audit_degraded: bool,
}

// ── AuditRecord ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub success: bool,
    /// Full, unredacted combined stdout+stderr of every child process invoked.
    pub output: String,
}

/// One per terminal outcome; unredacted, encrypted, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub unit: DeploymentUnit,
    pub result: AuditResult,
    pub backup_key: Option<String>,
    pub orchestrator_version: String,
}

// ── RunContext ─────────────────────────────────────────────────────────────────

/// Per-run configuration threaded explicitly through the Worker Pool and Unit
/// Executor, replacing any process-global mutable state (spec §9).
#[derive(Debug, Clone)]
pub struct RunContext {
    pub action: Action,
    pub requester_id: String,
    pub workspace_root: PathBuf,
    pub worker_cap: usize,
    pub orchestrator_version: String,
    /// IaC tool binary name, e.g. "terraform" or "tofu".
    pub iac_binary: String,
    /// Policy engine binary name.
    pub policy_binary: String,
    pub policy_dir: PathBuf,
    /// Remote lock TTL; must be `>= 1.2 * apply timeout` per the concurrency model.
    pub lock_ttl: std::time::Duration,
}
