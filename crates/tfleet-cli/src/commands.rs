use std::io::{self, Read as IoRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tfleet_domain::{Action, DeploymentUnit, RunContext};
use tfleet_executor::UnitExecutor;
use tfleet_pool::run_pool;
use tfleet_report::Dropped;
use tfleet_store::{InMemoryStateStoreClient, S3StateStoreClient, S3StateStoreConfig, StateStoreClient};

use crate::cli::{ReportFormat, RunArgs};

/// Run the full orchestration procedure for one invocation (`plan` or
/// `apply`) and return the process exit code implied by the resulting
/// report.
pub async fn run(action: Action, args: RunArgs) -> Result<i32> {
    let rules = tfleet_policy::load_rules(&args.rules)
        .with_context(|| format!("failed to load policy rules from {}", args.rules.display()))?;

    let changed = read_changed_files(&args.changed_files)
        .with_context(|| format!("failed to read changed-files list from {}", args.changed_files.display()))?;

    let mut accepted: Vec<DeploymentUnit> = Vec::new();
    let mut dropped: Vec<Dropped> = Vec::new();

    for path in &changed {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                dropped.push(Dropped {
                    source_path: path.display().to_string(),
                    project: "<unknown>".to_string(),
                    violations: vec![tfleet_domain::GateViolation::new(
                        "unreadable_descriptor",
                        format!("failed to read {}: {e}", path.display()),
                    )],
                });
                continue;
            }
        };

        match tfleet_descriptor::classify(path, &contents) {
            Ok(unit) => {
                let violations = tfleet_policy::gate(&unit, &rules, &args.requester);
                if violations.is_empty() {
                    accepted.push(unit);
                } else {
                    dropped.push(Dropped {
                        source_path: unit.source_path.display().to_string(),
                        project: unit.project.clone(),
                        violations,
                    });
                }
            }
            Err(e) => {
                dropped.push(Dropped {
                    source_path: path.display().to_string(),
                    project: "<unknown>".to_string(),
                    violations: vec![tfleet_domain::GateViolation::new(e.kind(), e.to_string())],
                });
            }
        }
    }

    info!(accepted = accepted.len(), dropped = dropped.len(), "classification and pre-gate complete");

    let ctx = RunContext {
        action,
        requester_id: args.requester.clone(),
        workspace_root: args.workspace_root.clone(),
        worker_cap: args.worker_cap,
        orchestrator_version: env!("CARGO_PKG_VERSION").to_string(),
        iac_binary: args.iac_binary.clone(),
        policy_binary: args.policy_binary.clone(),
        policy_dir: args.policy_dir.clone(),
        lock_ttl: std::time::Duration::from_secs(2160), // 1.2 * apply timeout (1800s)
    };

    let collisions = tfleet_report::find_collisions(accepted.iter().map(|u| {
        (&u.state_key, u.source_path.to_str().unwrap_or_default())
    }));

    if !collisions.is_empty() {
        warn!(
            count = collisions.len(),
            "ambiguous batch: multiple descriptors claim the same state key; rejecting before any execution"
        );
        let report = tfleet_report::build(&ctx, &[], &dropped, &collisions, "n/a (batch rejected before execution)".to_string());
        return render_and_exit(&report, &args);
    }

    let key = read_audit_key(&args.audit_key_file)
        .with_context(|| format!("failed to read audit key from {}", args.audit_key_file.display()))?;

    let (store, audit_location): (Arc<dyn StateStoreClient>, String) = match &args.state_bucket {
        Some(bucket) => {
            let config = S3StateStoreConfig {
                bucket: bucket.clone(),
                region: Some(args.state_region.clone()),
                prefix: Some(args.state_prefix.clone()),
                endpoint: None,
                force_path_style: false,
                server_side_encryption: true,
                kms_key_id: None,
            };
            let store = S3StateStoreClient::new(config)
                .await
                .context("failed to initialize S3 state store")?;
            (Arc::new(store), format!("s3://{bucket}/{}", args.state_prefix))
        }
        None => {
            warn!("no --state-bucket given; using an in-memory state store that does not survive this process");
            (Arc::new(InMemoryStateStoreClient::new()), "in-memory (ephemeral)".to_string())
        }
    };

    let audit = Arc::new(tfleet_store::AuditLogger::new(store.clone(), &key));
    let executor = Arc::new(UnitExecutor::new(store, audit));
    let ctx = Arc::new(ctx);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received interrupt; cancelling units not yet started and rolling back in-flight applies");
            ctrl_c_cancel.cancel();
        }
    });

    let outcomes = run_pool(ctx.clone(), executor, accepted, cancel).await;

    let report = tfleet_report::build(&ctx, &outcomes, &dropped, &[], audit_location);
    render_and_exit(&report, &args)
}

fn render_and_exit(report: &tfleet_report::Report, args: &RunArgs) -> Result<i32> {
    let rendered = match args.report_format {
        ReportFormat::Text => tfleet_report::render_text(report),
        ReportFormat::Json => tfleet_report::render_json(report).context("failed to render JSON report")?,
    };

    match &args.report_out {
        Some(path) => std::fs::write(path, rendered).with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{rendered}"),
    }

    Ok(report.exit_code())
}

fn read_changed_files(path: &Path) -> Result<Vec<PathBuf>> {
    let contents = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("failed to read changed-files list from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

fn read_audit_key(path: &Path) -> Result<[u8; 32]> {
    let bytes = std::fs::read(path)?;
    if bytes.len() != 32 {
        anyhow::bail!("audit key file must contain exactly 32 bytes, got {}", bytes.len());
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
