use std::collections::BTreeMap;

use chrono::Utc;

use tfleet_domain::{GateViolation, RunContext, StateKey, UnitOutcome};

use crate::model::{DroppedUnitEntry, Report, ReportFooter, ReportHeader, StateKeyCollision, UnitReportEntry};

/// One descriptor that never reached the Worker Pool: either it failed
/// classification or the Pre-Gate Validator rejected it. `project` is
/// `"<unknown>"` for classification failures, since no project could be
/// derived.
pub struct Dropped {
    pub source_path: String,
    pub project: String,
    pub violations: Vec<GateViolation>,
}

/// Find every `state_key` claimed by more than one accepted unit. A non-empty
/// result means the caller must reject the whole batch before invoking a
/// single external process — see spec §8 "ambiguous batch".
pub fn find_collisions<'a>(
    units: impl IntoIterator<Item = (&'a StateKey, &'a str)>,
) -> Vec<StateKeyCollision> {
    let mut by_key: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();
    for (key, source_path) in units {
        by_key.entry(key.as_str().to_string()).or_default().push(source_path.to_string());
    }
    by_key
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(key, source_paths)| StateKeyCollision { state_key: StateKey(key), source_paths })
        .collect()
}

/// Assemble the final report from every executed unit's outcome plus every
/// unit the Pre-Gate Validator dropped before execution. Called once, after
/// the Worker Pool has drained.
///
/// `collisions` is non-empty only for an ambiguous batch, in which case
/// `outcomes` must be empty — nothing in the batch was executed.
pub fn build(
    ctx: &RunContext,
    outcomes: &[UnitOutcome],
    dropped: &[Dropped],
    collisions: &[StateKeyCollision],
    audit_location: String,
) -> Report {
    let mut phase_counts: BTreeMap<String, usize> = BTreeMap::new();
    for outcome in outcomes {
        *phase_counts.entry(outcome.phase_reached.to_string()).or_insert(0) += 1;
    }

    let units = outcomes
        .iter()
        .map(|o| {
            // `UnitOutcome` doesn't carry project/account/region directly; the
            // state key's canonical encoding is the only surviving record of
            // them by report time.
            let (_, account_name, region, project) =
                tfleet_domain::StateKey::parse(o.state_key.as_str()).unwrap_or_default();
            UnitReportEntry {
                state_key: o.state_key.clone(),
                project,
                account_name,
                region,
                phase_reached: o.phase_reached,
                artifacts: o.artifacts.clone(),
                summary: o.summary.clone(),
                audit_degraded: o.audit_degraded,
            }
        })
        .collect();

    let dropped_entries = dropped
        .iter()
        .map(|d| DroppedUnitEntry {
            source_path: d.source_path.clone(),
            project: d.project.clone(),
            violations: d.violations.clone(),
        })
        .collect();

    let degraded_audit_count = outcomes.iter().filter(|o| o.audit_degraded).count();

    Report {
        header: ReportHeader {
            generated_at: Utc::now(),
            action: ctx.action,
            requester_id: ctx.requester_id.clone(),
            total_units: outcomes.len() + dropped.len(),
            dropped_units: dropped.len(),
            phase_counts,
        },
        units,
        dropped: dropped_entries,
        collisions: collisions.to_vec(),
        footer: ReportFooter { audit_location, degraded_audit_count },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use tfleet_domain::{Action, GateViolation, Phase, ServiceKind, StateKey, UnitArtifacts};
    use std::collections::BTreeSet;

    fn ctx() -> RunContext {
        RunContext {
            action: Action::Apply,
            requester_id: "alice".to_string(),
            workspace_root: PathBuf::from("/tmp/workspaces"),
            worker_cap: 5,
            orchestrator_version: "0.1.0-test".to_string(),
            iac_binary: "terraform".to_string(),
            policy_binary: "policy-engine".to_string(),
            policy_dir: PathBuf::from("/etc/tfleet/policy"),
            lock_ttl: std::time::Duration::from_secs(2160),
        }
    }

    fn outcome(project: &str, phase: Phase) -> UnitOutcome {
        let services = BTreeSet::from([ServiceKind::ObjectStore]);
        UnitOutcome {
            state_key: StateKey::derive(&services, "acc1", "us-east-1", project),
            phase_reached: phase,
            artifacts: UnitArtifacts::default(),
            summary: "redacted summary".to_string(),
            raw: "unredacted raw".to_string(),
            audit_degraded: false,
        }
    }

    #[test]
    fn build_recovers_project_account_region_from_state_key() {
        let outcomes = vec![outcome("proj-a", Phase::Applied)];
        let report = build(&ctx(), &outcomes, &[], &[], "s3://bucket/prefix".to_string());
        assert_eq!(report.units.len(), 1);
        assert_eq!(report.units[0].project, "proj-a");
        assert_eq!(report.units[0].account_name, "acc1");
        assert_eq!(report.units[0].region, "us-east-1");
    }

    #[test]
    fn phase_counts_are_tallied_per_phase() {
        let outcomes = vec![
            outcome("proj-a", Phase::Applied),
            outcome("proj-b", Phase::Applied),
            outcome("proj-c", Phase::PolicyRejected),
        ];
        let report = build(&ctx(), &outcomes, &[], &[], "in-memory".to_string());
        assert_eq!(report.header.phase_counts.get("applied"), Some(&2));
        assert_eq!(report.header.phase_counts.get("policy_rejected"), Some(&1));
    }

    #[test]
    fn degraded_audit_count_reflects_flagged_outcomes() {
        let mut degraded = outcome("proj-a", Phase::Applied);
        degraded.audit_degraded = true;
        let outcomes = vec![degraded, outcome("proj-b", Phase::Applied)];
        let report = build(&ctx(), &outcomes, &[], &[], "in-memory".to_string());
        assert_eq!(report.footer.degraded_audit_count, 1);
    }

    #[test]
    fn exit_code_is_clean_when_nothing_dropped_or_errored() {
        let outcomes = vec![outcome("proj-a", Phase::Applied), outcome("proj-b", Phase::Planned)];
        let report = build(&ctx(), &outcomes, &[], &[], "in-memory".to_string());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn exit_code_is_2_when_units_were_dropped_but_none_executed_failed() {
        let outcomes = vec![outcome("proj-a", Phase::Applied)];
        let dropped = vec![Dropped {
            source_path: "store/proj-z/proj-z.conf".to_string(),
            project: "proj-z".to_string(),
            violations: vec![GateViolation::new("unknown_team", "team not registered")],
        }];
        let report = build(&ctx(), &outcomes, &dropped, &[], "in-memory".to_string());
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn exit_code_is_2_when_an_executed_unit_errors_even_if_others_also_dropped() {
        let outcomes = vec![outcome("proj-a", Phase::Applied), outcome("proj-b", Phase::ApplyFailedRolledBack)];
        let dropped = vec![Dropped {
            source_path: "store/proj-z/proj-z.conf".to_string(),
            project: "proj-z".to_string(),
            violations: vec![GateViolation::new("unknown_team", "team not registered")],
        }];
        let report = build(&ctx(), &outcomes, &dropped, &[], "in-memory".to_string());
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn exit_code_is_4_when_clean_but_audit_degraded() {
        let mut degraded = outcome("proj-a", Phase::Applied);
        degraded.audit_degraded = true;
        let outcomes = vec![degraded, outcome("proj-b", Phase::Planned)];
        let report = build(&ctx(), &outcomes, &[], &[], "in-memory".to_string());
        assert_eq!(report.exit_code(), 4);
    }

    #[test]
    fn degraded_audit_does_not_outrank_an_executed_unit_error() {
        let mut degraded = outcome("proj-a", Phase::Applied);
        degraded.audit_degraded = true;
        let outcomes = vec![degraded, outcome("proj-b", Phase::ApplyFailedRolledBack)];
        let report = build(&ctx(), &outcomes, &[], &[], "in-memory".to_string());
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn ambiguous_batch_outranks_everything_else() {
        let outcomes = vec![outcome("proj-a", Phase::ApplyFailedRollbackFailed)];
        let dropped = vec![Dropped {
            source_path: "store/proj-z/proj-z.conf".to_string(),
            project: "proj-z".to_string(),
            violations: vec![GateViolation::new("unknown_team", "team not registered")],
        }];
        let collisions = vec![StateKeyCollision {
            state_key: StateKey::derive(&BTreeSet::from([ServiceKind::Kms]), "acc1", "us-east-1", "proj-dup"),
            source_paths: vec!["store/proj-dup/a.conf".to_string(), "store/proj-dup/b.conf".to_string()],
        }];
        let report = build(&ctx(), &outcomes, &dropped, &collisions, "in-memory".to_string());
        assert_eq!(report.exit_code(), 3);
    }

    #[test]
    fn render_text_of_ambiguous_batch_names_the_colliding_paths() {
        let collisions = vec![StateKeyCollision {
            state_key: StateKey::derive(&BTreeSet::from([ServiceKind::Kms]), "acc1", "us-east-1", "proj-dup"),
            source_paths: vec!["store/proj-dup/a.conf".to_string(), "store/proj-dup/b.conf".to_string()],
        }];
        let report = build(&ctx(), &[], &[], &collisions, "n/a".to_string());
        let text = crate::render::render_text(&report);
        assert!(text.contains("AMBIGUOUS BATCH"));
        assert!(text.contains("store/proj-dup/a.conf"));
        assert!(text.contains("store/proj-dup/b.conf"));
    }

    #[test]
    fn find_collisions_flags_only_keys_claimed_more_than_once() {
        let key_a = StateKey::derive(&BTreeSet::from([ServiceKind::ObjectStore]), "acc1", "r1", "proj-a");
        let key_b = StateKey::derive(&BTreeSet::from([ServiceKind::ObjectStore]), "acc1", "r1", "proj-b");
        let units = vec![
            (&key_a, "store/proj-a/x.conf"),
            (&key_a, "store/proj-a/y.conf"),
            (&key_b, "store/proj-b/z.conf"),
        ];
        let collisions = find_collisions(units);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].state_key, key_a);
        assert_eq!(collisions[0].source_paths.len(), 2);
    }

    #[test]
    fn total_units_counts_both_executed_and_dropped() {
        let outcomes = vec![outcome("proj-a", Phase::Applied)];
        let dropped = vec![Dropped {
            source_path: "store/proj-z/proj-z.conf".to_string(),
            project: "proj-z".to_string(),
            violations: vec![GateViolation::new("unknown_team", "team not registered")],
        }];
        let report = build(&ctx(), &outcomes, &dropped, &[], "in-memory".to_string());
        assert_eq!(report.header.total_units, 2);
        assert_eq!(report.header.dropped_units, 1);
    }

    #[test]
    fn render_text_includes_phase_and_dropped_violation_codes() {
        let outcomes = vec![outcome("proj-a", Phase::Applied)];
        let dropped = vec![Dropped {
            source_path: "store/proj-z/proj-z.conf".to_string(),
            project: "proj-z".to_string(),
            violations: vec![GateViolation::new("unknown_team", "team not registered")],
        }];
        let report = build(&ctx(), &outcomes, &dropped, &[], "in-memory".to_string());
        let text = crate::render::render_text(&report);
        assert!(text.contains("applied"));
        assert!(text.contains("unknown_team"));
        assert!(text.contains("proj-z"));
    }

    #[test]
    fn render_json_round_trips_through_serde() {
        let outcomes = vec![outcome("proj-a", Phase::Applied)];
        let report = build(&ctx(), &outcomes, &[], &[], "in-memory".to_string());
        let json = crate::render::render_json(&report).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.units.len(), 1);
        assert_eq!(parsed.header.total_units, 1);
    }
}
