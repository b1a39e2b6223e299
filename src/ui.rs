//! Terminal output for the operator commands: process tables, history
//! listings and a spinner for one-shot worker runs.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::audit::{DecisionRecord, EventRecord};
use crate::state_machine::{ProcessState, StageStatus};
use crate::worker::BatchReport;

pub struct Console {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
    bold: Style,
}

impl Default for Console {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            bold: Style::new().bold(),
        }
    }
}

impl Console {
    fn status_style(&self, status: StageStatus) -> &Style {
        match status {
            StageStatus::Completed => &self.green,
            StageStatus::Escalated => &self.red,
            StageStatus::Blocked => &self.yellow,
            StageStatus::Pending | StageStatus::InProgress => &self.dim,
        }
    }

    pub fn started(&self, process: &ProcessState) {
        println!(
            "  {} Marathon {} started for {}/{}",
            self.green.apply_to("✓"),
            process.id,
            process.job_id,
            process.application_id
        );
        if let Some(at) = process.next_scheduled_action {
            println!("    first step due {}", at.to_rfc3339());
        }
    }

    pub fn resumed(&self, process: &ProcessState) {
        println!(
            "  {} Marathon {} back on the schedule at {}",
            self.green.apply_to("↻"),
            process.id,
            process.current_stage
        );
    }

    pub fn process_table(&self, title: &str, processes: &[ProcessState]) {
        println!("{}", self.bold.apply_to(format!("─── {title} ({}) ───", processes.len())));
        if processes.is_empty() {
            println!("  {}", self.dim.apply_to("none"));
            return;
        }
        for p in processes {
            println!(
                "  {} {}",
                self.status_style(p.stage_status)
                    .apply_to(format!("{:<11}", p.stage_status.as_str())),
                process_row(p)
            );
            if let Some(reason) = p.escalation_reason.as_deref().or(p.blocked_reason.as_deref()) {
                println!("      {}", self.dim.apply_to(reason));
            }
        }
    }

    pub fn history(&self, decisions: &[DecisionRecord], events: &[EventRecord]) {
        println!("{}", self.bold.apply_to("─── Decisions ───"));
        for d in decisions {
            println!("  {}", decision_row(d));
            for c in &d.corrections {
                println!(
                    "      {} {} → {}",
                    self.yellow.apply_to("correction:"),
                    c.original_belief,
                    c.correction
                );
            }
        }
        println!("{}", self.bold.apply_to("─── Events ───"));
        for e in events {
            println!(
                "  {} {} {}",
                self.dim.apply_to(e.created_at.to_rfc3339()),
                e.event_type,
                e.event_data
            );
        }
    }

    pub fn batch_report(&self, report: &BatchReport) {
        let failed = if report.failed > 0 { &self.red } else { &self.dim };
        println!(
            "  {} picked {} | advanced {} completed {} rejected {} escalated {} held {} blocked {} skipped {} | {} | recovered {}",
            self.green.apply_to("✓"),
            report.picked,
            report.advanced,
            report.completed,
            report.rejected,
            report.escalated,
            report.held,
            report.blocked,
            report.skipped,
            failed.apply_to(format!("failed {}", report.failed)),
            report.recovered,
        );
    }
}

/// Spinner shown while a one-shot batch runs.
pub struct BatchProgress {
    pb: ProgressBar,
}

impl BatchProgress {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish(self) {
        self.pb.finish_and_clear();
    }
}

fn process_row(p: &ProcessState) -> String {
    let next = p
        .next_scheduled_action
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {}/{} stage={} confidence={:.2} corrections={} next={}",
        p.id, p.job_id, p.application_id, p.current_stage, p.decision_confidence, p.correction_count, next
    )
}

fn decision_row(d: &DecisionRecord) -> String {
    let mut row = format!(
        "{} {} {} ({:.2})",
        d.created_at.format("%Y-%m-%d %H:%M"),
        d.stage,
        d.applied_decision,
        d.confidence
    );
    if d.was_adjusted() {
        row.push_str(&format!(" [reported {}]", d.reported_decision));
    }
    if d.fallback {
        row.push_str(" [fallback]");
    }
    row.push_str(": ");
    row.push_str(&d.reasoning);
    row
}
