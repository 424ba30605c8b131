use crate::model::Report;

/// Human-readable rendering for terminal/log consumption.
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "tfleet {} run by {} — {} units ({} dropped)\n",
        report.header.action, report.header.requester_id, report.header.total_units, report.header.dropped_units,
    ));
    for (phase, count) in &report.header.phase_counts {
        out.push_str(&format!("  {phase}: {count}\n"));
    }

    if !report.collisions.is_empty() {
        out.push_str("\nAMBIGUOUS BATCH — rejected before any external process ran:\n");
        for c in &report.collisions {
            out.push_str(&format!("  {} claimed by:\n", c.state_key));
            for p in &c.source_paths {
                out.push_str(&format!("    - {p}\n"));
            }
        }
        return out;
    }

    if !report.dropped.is_empty() {
        out.push_str("\ndropped by pre-gate:\n");
        for d in &report.dropped {
            out.push_str(&format!("  {} ({})\n", d.project, d.source_path));
            for v in &d.violations {
                out.push_str(&format!("    - [{}] {}\n", v.code, v.detail));
            }
        }
    }

    out.push_str("\nunits:\n");
    for u in &report.units {
        let degraded = if u.audit_degraded { " (audit degraded)" } else { "" };
        out.push_str(&format!(
            "  {} [{}/{}/{}] -> {}{}\n",
            u.state_key, u.account_name, u.region, u.project, u.phase_reached, degraded,
        ));
        out.push_str(&format!("    {}\n", u.summary.replace('\n', "\n    ")));
    }

    out.push_str(&format!("\naudit trail: {}\n", report.footer.audit_location));
    if report.footer.degraded_audit_count > 0 {
        out.push_str(&format!(
            "warning: {} unit(s) have a degraded (unwritten) audit record\n",
            report.footer.degraded_audit_count
        ));
    }

    out
}

pub fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}
