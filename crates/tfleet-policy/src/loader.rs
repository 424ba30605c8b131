use std::path::Path;

use tfleet_domain::PolicyRulesDocument;

use crate::error::PolicyError;

/// Load the static rules document consulted by the Pre-Gate Validator. Loaded
/// once per run; hot reload is not required.
pub fn load_rules(path: &Path) -> Result<PolicyRulesDocument, PolicyError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PolicyError::Io(path.display().to_string(), e.to_string()))?;
    toml::from_str(&raw).map_err(|e| PolicyError::Parse(path.display().to_string(), e.to_string()))
}
