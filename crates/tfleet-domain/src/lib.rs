pub mod error;
pub mod types;

pub use error::DomainError;
pub use types::{
    Action, AuditRecord, AuditResult, CostCenterRule, DeploymentUnit, GateViolation,
    Phase, PolicyEngineReport, PolicyRulesDocument, PolicyViolation, RunContext, ServiceKind,
    StateKey, TeamRule, UnitArtifacts, UnitMetadata, UnitOutcome, ApplicationRule,
    ViolationSeverity,
};
