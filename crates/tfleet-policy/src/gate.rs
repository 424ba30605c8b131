use tfleet_domain::{DeploymentUnit, GateViolation, PolicyRulesDocument};

/// Evaluate every check against `unit` unconditionally, collecting all
/// violations rather than short-circuiting on the first — the caller always
/// receives the complete list.
pub fn gate(unit: &DeploymentUnit, rules: &PolicyRulesDocument, requester_id: &str) -> Vec<GateViolation> {
    let mut violations = Vec::new();

    let app_name = unit.metadata.application.as_deref();
    let application = app_name.and_then(|name| rules.applications.get(name));

    match application {
        Some(app) if app.active => {}
        Some(_) => violations.push(GateViolation::new(
            "application_inactive",
            format!("application '{}' is not active", app_name.unwrap_or("")),
        )),
        None => violations.push(GateViolation::new(
            "application_unknown",
            format!("application '{}' is not known to the rules document", app_name.unwrap_or("<missing>")),
        )),
    }

    if let Some(app) = application {
        match unit.metadata.environment.as_deref() {
            Some(env) if app.allowed_environments.iter().any(|e| e == env) => {}
            Some(env) => violations.push(GateViolation::new(
                "application_environment_not_allowed",
                format!("environment '{}' is not allowed for application '{}'", env, app_name.unwrap_or("")),
            )),
            None => violations.push(GateViolation::new(
                "application_environment_not_allowed",
                "unit has no environment metadata".to_string(),
            )),
        }
    }

    let team_name = unit.metadata.team.as_deref();
    let team = team_name.and_then(|name| rules.teams.get(name));
    if team.is_none() {
        violations.push(GateViolation::new(
            "team_unknown",
            format!("team '{}' is not known to the rules document", team_name.unwrap_or("<missing>")),
        ));
    }

    if let Some(team) = team {
        if !team.members.iter().any(|m| m == requester_id) {
            violations.push(GateViolation::new(
                "requester_not_team_member",
                format!("requester '{}' is not a member of team '{}'", requester_id, team_name.unwrap_or("")),
            ));
        }
    }

    if let (Some(app), Some(team_name)) = (application, team_name) {
        if !app.allowed_teams.iter().any(|t| t == team_name) {
            violations.push(GateViolation::new(
                "team_not_authorized_for_application",
                format!("team '{}' is not authorized for application '{}'", team_name, app_name.unwrap_or("")),
            ));
        }
    }

    let cc_name = unit.metadata.cost_center.as_deref();
    let cost_center = cc_name.and_then(|name| rules.cost_centers.get(name));
    match cost_center {
        Some(cc) if cc.active => {}
        Some(_) => violations.push(GateViolation::new(
            "cost_center_inactive",
            format!("cost center '{}' is not active", cc_name.unwrap_or("")),
        )),
        None => violations.push(GateViolation::new(
            "cost_center_unknown",
            format!("cost center '{}' is not known to the rules document", cc_name.unwrap_or("<missing>")),
        )),
    }

    if let (Some(cc), Some(team_name)) = (cost_center, team_name) {
        if !cc.authorized_teams.iter().any(|t| t == team_name) {
            violations.push(GateViolation::new(
                "team_not_authorized_for_cost_center",
                format!("team '{}' is not authorized for cost center '{}'", team_name, cc_name.unwrap_or("")),
            ));
        }
    }

    violations
}
