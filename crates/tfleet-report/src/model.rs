use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tfleet_domain::{Action, GateViolation, Phase, StateKey, UnitArtifacts};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportHeader {
    pub generated_at: DateTime<Utc>,
    pub action: Action,
    pub requester_id: String,
    pub total_units: usize,
    pub dropped_units: usize,
    /// Count of executed units per terminal phase, keyed by `Phase`'s `Display` form.
    pub phase_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReportEntry {
    pub state_key: StateKey,
    pub project: String,
    pub account_name: String,
    pub region: String,
    pub phase_reached: Phase,
    pub artifacts: UnitArtifacts,
    /// Redacted summary; the unredacted `UnitOutcome::raw` never enters a report.
    pub summary: String,
    pub audit_degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedUnitEntry {
    pub source_path: String,
    pub project: String,
    pub violations: Vec<GateViolation>,
}

/// Two or more submitted descriptors that derive the same `state_key`. Any
/// non-empty list of these means the whole batch was rejected before a
/// single external process was invoked — see `Report::exit_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateKeyCollision {
    pub state_key: StateKey,
    pub source_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFooter {
    /// Human-readable pointer to where the unredacted audit trail for this
    /// run can be found; the report itself carries no unredacted content.
    pub audit_location: String,
    pub degraded_audit_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub header: ReportHeader,
    pub units: Vec<UnitReportEntry>,
    pub dropped: Vec<DroppedUnitEntry>,
    /// Non-empty only when the batch was rejected outright: `units` is then
    /// always empty, since nothing in the batch ever reached execution.
    pub collisions: Vec<StateKeyCollision>,
    pub footer: ReportFooter,
}

impl Report {
    /// Process exit code per the orchestrator's severity ordering.
    ///
    /// `3` (ambiguous batch) outranks `2` (some unit was dropped or reached
    /// an error phase) because it means *nothing* in the batch ran at all,
    /// not just that part of it failed. `4` is reserved for a batch where
    /// every unit reached a clean terminal phase but its audit record
    /// couldn't be durably appended — the deployment itself succeeded, but
    /// the trail of it did not, which still demands attention even though
    /// it outranks neither `2` nor `3`.
    pub fn exit_code(&self) -> i32 {
        if !self.collisions.is_empty() {
            return 3;
        }
        let degraded = self.units.iter().any(|u| u.phase_reached.is_error()) || !self.dropped.is_empty();
        if degraded {
            return 2;
        }
        if self.footer.degraded_audit_count > 0 {
            return 4;
        }
        0
    }
}
