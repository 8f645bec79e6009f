//! Shared rendering for pass reports and work items.

use crate::runner::{Blocker, PassReport};
use crate::state::{RunSummary, WorkItem, WorkItemState};
use crate::ui::{format_duration, FlowTheme, UserInterface};

/// One-line tally: `12 items: 3 pending, 2 in flight, 6 succeeded, 1 failed`.
pub fn summary_line(summary: &RunSummary) -> String {
    let mut parts = Vec::new();
    for (count, label) in [
        (summary.pending, "pending"),
        (summary.in_flight(), "in flight"),
        (summary.succeeded, "succeeded"),
        (summary.failed, "failed"),
        (summary.indeterminate, "indeterminate"),
    ] {
        if count > 0 {
            parts.push(format!("{} {}", count, label));
        }
    }
    if parts.is_empty() {
        format!("{} items", summary.total)
    } else {
        format!("{} items: {}", summary.total, parts.join(", "))
    }
}

/// Runtime of an item, if it has started and finished.
pub fn item_runtime(item: &WorkItem) -> Option<String> {
    let started = item.started_at.or(item.submitted_at)?;
    let finished = item.finished_at?;
    (finished - started).to_std().ok().map(format_duration)
}

/// Hint for resolving a blocker.
pub fn retry_hint(pair: &str, blocker: &Blocker) -> String {
    let mut parts = pair.splitn(2, '/');
    let subject = parts.next().unwrap_or_default();
    let session = parts.next().unwrap_or_default();
    format!(
        "bidsflow retry --subject {} --session {} --step {}",
        subject, session, blocker.step
    )
}

/// Print a pass report for humans.
pub fn show_pass(ui: &mut dyn UserInterface, theme: &FlowTheme, report: &PassReport) {
    let title = match (&report.run_id, report.dry_run) {
        (Some(id), true) => format!("Pass {} via {} (dry run)", id, report.scheduler),
        (Some(id), false) => format!("Pass {} via {}", id, report.scheduler),
        (None, _) => format!("Pass via {}", report.scheduler),
    };
    ui.show_header(&title);

    if ui.output_mode().shows_detail() {
        for t in &report.transitions {
            let mut line = format!(
                "{}: {} → {}",
                t.id,
                theme.format_state(t.from),
                theme.format_state(t.to)
            );
            if let Some(reason) = t.reason {
                line.push_str(&format!(" ({})", reason));
            }
            if let Some(detail) = &t.detail {
                line.push_str(&format!(" {}", theme.format_hint(detail)));
            }
            ui.message(&line);
        }
        for s in &report.submitted {
            ui.message(&format!("{} → job {} ({})", s.id, s.job, s.script.display()));
        }
    }

    if report.materialized > 0 {
        ui.message(&format!("Materialized {} new work item(s)", report.materialized));
    }
    for id in &report.retried {
        ui.message(&format!("Automatic retry: {}", id));
    }
    if !report.submitted.is_empty() {
        let verb = if report.dry_run { "Would submit" } else { "Submitted" };
        ui.success(&format!("{} {} job(s)", verb, report.submitted.len()));
    }
    if !report.deferred.is_empty() {
        ui.message(&format!(
            "Deferred {} ready item(s) by step concurrency caps",
            report.deferred.len()
        ));
    }
    ui.message(&summary_line(&report.summary));

    for warning in &report.warnings {
        ui.warning(warning);
    }
    for (pair, blockers) in &report.blockers {
        for blocker in blockers {
            ui.warning(&format!("{} blocked: {}", pair, blocker.summary()));
        }
    }
    let retryable = report.blockers.iter().find_map(|(pair, blockers)| {
        blockers
            .iter()
            .find(|b| b.state != WorkItemState::Pending)
            .map(|b| (pair, b))
    });
    if let Some((pair, blocker)) = retryable {
        ui.show_hint(&format!("After fixing the cause: {}", retry_hint(pair, blocker)));
    }
}
