use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;
use tfleet_domain::{DeploymentUnit, ServiceKind, StateKey, UnitMetadata};

use crate::raw::{parse, RawValue};

#[derive(Debug, Clone, Error)]
pub enum ClassificationError {
    #[error("missing_project: '{0}' has no parent directory to derive a project name from")]
    MissingProject(String),

    #[error("missing_metadata: '{path}' is missing required field '{field}'")]
    MissingMetadata { path: String, field: &'static str },

    #[error("no_service_detected: no recognized service declaration key present in '{0}'")]
    NoServiceDetected(String),
}

impl ClassificationError {
    /// Stable machine-readable kind, per the error taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassificationError::MissingProject(_) => "missing_project",
            ClassificationError::MissingMetadata { .. } => "missing_metadata",
            ClassificationError::NoServiceDetected(_) => "no_service_detected",
        }
    }
}

/// Declaration key → service mapping, per the fixed vocabulary.
const SERVICE_KEYS: &[(&str, ServiceKind)] = &[
    ("object_store_buckets", ServiceKind::ObjectStore),
    ("kms_keys", ServiceKind::Kms),
    ("iam_roles", ServiceKind::Iam),
    ("iam_policies", ServiceKind::Iam),
    ("iam_users", ServiceKind::Iam),
    ("fn_definitions", ServiceKind::ComputeFn),
    ("queues", ServiceKind::Queue),
    ("topics", ServiceKind::Topic),
];

pub fn classify(path: &Path, contents: &str) -> Result<DeploymentUnit, ClassificationError> {
    let project = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ClassificationError::MissingProject(path.display().to_string()))?;

    let raw = parse(contents);

    let account_name = raw
        .get_str("account_name")
        .ok_or_else(|| ClassificationError::MissingMetadata {
            path: path.display().to_string(),
            field: "account_name",
        })?
        .to_string();

    let region = raw
        .get_str("region")
        .or_else(|| raw.get_list_single("region"))
        .ok_or_else(|| ClassificationError::MissingMetadata {
            path: path.display().to_string(),
            field: "region",
        })?
        .to_string();

    let mut services = BTreeSet::new();
    let mut resource_names = Vec::new();
    for (key, kind) in SERVICE_KEYS {
        if let Some(names) = raw.get_block_names(key) {
            services.insert(*kind);
            resource_names.extend(names.iter().cloned());
        }
    }
    if services.is_empty() {
        return Err(ClassificationError::NoServiceDetected(path.display().to_string()));
    }
    resource_names.sort();
    resource_names.dedup();

    let state_key = StateKey::derive(&services, &account_name, &region, &project);

    let metadata = UnitMetadata {
        application: raw.get_str("application").map(String::from),
        team: raw.get_str("team").map(String::from),
        cost_center: raw.get_str("cost_center").map(String::from),
        environment: raw.get_str("environment").map(String::from),
    };

    Ok(DeploymentUnit {
        source_path: path.to_path_buf(),
        project,
        account_name,
        region,
        services,
        state_key,
        metadata,
        resource_names,
        workspace_path: None,
    })
}
