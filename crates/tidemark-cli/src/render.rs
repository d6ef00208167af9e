//! Text rendering of run and status reports.

use comfy_table::{Cell, Table};
use tidemark_core::{LockState, RunReport, StatusReport, Version};

fn show(version: Option<Version>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Summary of a run: one row per migration, followed by warnings.
pub fn run_report(report: &RunReport) -> String {
    let mut out = String::new();
    let verb = if report.dry_run { "would run" } else { "ran" };

    if report.is_noop() {
        out.push_str(&format!(
            "{}: nothing to do (at {})\n",
            report.store,
            show(report.from_version)
        ));
    } else if report.dry_run {
        let mut table = Table::new();
        table.set_header(vec!["Version", "Direction"]);
        for version in &report.planned {
            table.add_row(vec![Cell::new(version), Cell::new(report.direction)]);
        }
        out.push_str(&format!("{table}\n"));
    } else {
        let mut table = Table::new();
        table.set_header(vec!["Version", "Name", "Direction", "Time (ms)"]);
        for step in &report.steps {
            table.add_row(vec![
                Cell::new(step.version),
                Cell::new(&step.name),
                Cell::new(step.direction),
                Cell::new(step.elapsed_ms),
            ]);
        }
        out.push_str(&format!("{table}\n"));
    }

    if !report.is_noop() {
        out.push_str(&format!(
            "{}: {} {} migration(s), {} -> {}\n",
            report.store,
            verb,
            report.planned.len(),
            show(report.from_version),
            show(report.to_version)
        ));
    }
    for warning in &report.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out
}

/// Status table with applied rows first, then pending versions.
pub fn status_report(status: &StatusReport) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Version", "Name", "State", "Applied at"]);
    for m in &status.applied {
        let state = match m.checksum_matches {
            Some(false) => "applied (changed)",
            _ => "applied",
        };
        table.add_row(vec![
            Cell::new(m.version),
            Cell::new(&m.name),
            Cell::new(state),
            Cell::new(m.applied_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    for version in &status.pending {
        table.add_row(vec![
            Cell::new(version),
            Cell::new(""),
            Cell::new("pending"),
            Cell::new(""),
        ]);
    }

    let lock = match &status.lock {
        LockState::Free => "free".to_string(),
        LockState::Held {
            holder, expires_at, ..
        } => format!("held by {holder} until {expires_at}"),
        LockState::Expired { holder, expired_at } => {
            format!("expired ({holder}, lapsed {expired_at})")
        }
    };

    format!(
        "store:   {}\ncurrent: {}\nlatest:  {}\nlock:    {}\n{}\n",
        status.store,
        show(status.current_version),
        show(status.latest_version),
        lock,
        table
    )
}
