// Rich terminal output for playdash

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use super::errors::{suggest_fix, DashError};
use super::events::{DashEvent, Level};
use super::transcript::highlight;
use crate::api::{HostInfo, JobStatus, PlaybookInfo};
use crate::baseline::{mask, HostConfig};
use crate::executor::{DispatchReport, SubmissionState};
use crate::jobs::{AggregateView, CancelReport, MasterJob};

fn status_label(status: JobStatus) -> ColoredString {
    match status {
        JobStatus::Completed => "COMPLETED".green().bold(),
        JobStatus::Failed | JobStatus::NotFound => "FAILED".red().bold(),
        JobStatus::Cancelled => "CANCELLED".yellow().bold(),
        JobStatus::Running | JobStatus::Unknown => "RUNNING".cyan().bold(),
    }
}

/// Every job ended but not all of them completed, e.g. one was cancelled
fn view_label(view: &AggregateView) -> ColoredString {
    if view.settled && view.status == JobStatus::Running {
        "ENDED".yellow().bold()
    } else {
        status_label(view.status)
    }
}

/// Terminal output manager
pub struct TerminalOutput {
    verbose: bool,
    quiet: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // Respect NO_COLOR environment variable (https://no-color.org/)
        // Also disable colors if not a TTY
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            verbose,
            quiet,
            is_tty,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn rule_width(&self) -> usize {
        if !self.is_tty {
            return 60;
        }
        let (_, cols) = console::Term::stdout().size();
        usize::from(cols).clamp(20, 80)
    }

    /// Host inventory with baseline readiness
    pub fn print_hosts(
        &self,
        hosts: &BTreeMap<String, HostInfo>,
        is_configured: impl Fn(&str) -> bool,
    ) {
        if hosts.is_empty() {
            println!("{}", "No hosts in inventory".dimmed());
            return;
        }

        println!(
            "{:<20} {:<8} {:<28} {:<16} {:<16} {}",
            "HOST".bold(),
            "VALID".bold(),
            "SYSTEM".bold(),
            "PUBLIC IP".bold(),
            "PRIVATE IP".bold(),
            "BASELINE".bold()
        );
        for (name, info) in hosts {
            let valid = if info.valid {
                "yes".green()
            } else {
                "no".red()
            };
            let baseline = if is_configured(name) {
                "configured".green()
            } else {
                "missing".yellow()
            };
            let facts = &info.facts;
            println!(
                "{:<20} {:<8} {:<28} {:<16} {:<16} {}",
                name.white().bold(),
                valid,
                facts.system.as_deref().unwrap_or("-"),
                facts.public_ip.as_deref().unwrap_or("-"),
                facts.private_ip.as_deref().unwrap_or("-"),
                baseline
            );
        }
    }

    /// Playbook listing; baseline playbooks are flagged
    pub fn print_playbooks(
        &self,
        playbooks: &[PlaybookInfo],
        is_baseline: impl Fn(&PlaybookInfo) -> bool,
    ) {
        if playbooks.is_empty() {
            println!("{}", "No playbooks match the current filter".dimmed());
            return;
        }

        for playbook in playbooks {
            let flag = if is_baseline(playbook) {
                " [baseline]".magenta().bold().to_string()
            } else {
                String::new()
            };
            println!(
                "{}{} {}",
                playbook.name.cyan().bold(),
                flag,
                format!("({})", playbook.category).dimmed()
            );
            println!("    {}", playbook.path.dimmed());
            if self.verbose && !playbook.description.is_empty() {
                println!("    {}", playbook.description);
            }
        }
    }

    /// Saved baseline configurations, passwords masked
    pub fn print_configs(&self, configs: &[(String, HostConfig)], min_password_length: usize) {
        if configs.is_empty() {
            println!("{}", "No baseline configurations saved".dimmed());
            return;
        }

        for (host, config) in configs {
            let state = if config.is_complete(min_password_length) {
                "complete".green()
            } else {
                "incomplete".yellow()
            };
            println!(
                "{:<20} {:<20} {} {} {} {}",
                host.white().bold(),
                config.hostname,
                mask(&config.primary_password).dimmed(),
                mask(&config.secondary_password).dimmed(),
                state,
                config.saved_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
            );
        }
    }

    pub fn print_dispatch_report(&self, report: &DispatchReport) {
        if self.quiet && report.failed() == 0 {
            return;
        }

        println!();
        println!(
            "{} {} ({})",
            "DISPATCH".green().bold(),
            report.playbook.label().cyan(),
            report.strategy.dimmed()
        );
        println!("{}", "─".repeat(self.rule_width()).dimmed());

        for submission in &report.submissions {
            let hosts = submission.hosts.join(", ");
            match &submission.state {
                SubmissionState::Submitted { job_id } => {
                    println!(
                        "  {} {} {}",
                        "SUBMITTED".green(),
                        "=>".dimmed(),
                        hosts.white().bold()
                    );
                    println!("      job {}", job_id);
                }
                SubmissionState::Failed { error } => {
                    println!(
                        "  {} {} {}",
                        "FAILED".red().bold(),
                        "=>".dimmed(),
                        hosts.white().bold()
                    );
                    println!("      {}", error.red());
                }
                SubmissionState::Pending | SubmissionState::Submitting => {
                    println!("  {} {} {}", "PENDING".cyan(), "=>".dimmed(), hosts);
                }
            }
        }

        if let Some(master) = &report.master_job_id {
            println!();
            println!("{} {}", "Follow with:".dimmed(), format!("playdash watch {}", master).bold());
        }
    }

    /// One consolidated snapshot: status line followed by the transcript
    pub fn print_view(&self, view: &AggregateView) {
        self.print_view_header(view);
        if !self.quiet {
            println!("{}", highlight(&view.merged_text));
        }
    }

    pub fn print_view_header(&self, view: &AggregateView) {
        println!(
            "{} {} {}% {}",
            view_label(view),
            view.master_job_id.white().bold(),
            view.progress,
            view.playbook
                .as_deref()
                .map(|p| format!("({})", p))
                .unwrap_or_default()
                .dimmed()
        );
        if !view.unresolved.is_empty() {
            println!(
                "  {} {}",
                "Waiting for jobs:".dimmed(),
                view.unresolved.join(", ")
            );
        }
    }

    /// Tracked master jobs, newest first
    pub fn print_masters(&self, masters: &[MasterJob]) {
        if masters.is_empty() {
            println!("{}", "No jobs dispatched in this session".dimmed());
            return;
        }

        for master in masters {
            let kind = if master.logical { "sequential" } else { "group" };
            println!(
                "{} {} {} {}",
                master.master_job_id.white().bold(),
                master.playbook.cyan(),
                format!("[{}]", kind).dimmed(),
                master.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
            println!("    {}", master.hosts.join(", "));
        }
    }

    pub fn print_cancel_report(&self, master_job_id: &str, report: &CancelReport) {
        println!(
            "{} {}: {} cancelled, {} failed",
            "CANCEL".yellow().bold(),
            master_job_id,
            report.cancelled.len(),
            report.failed.len()
        );
        for (job_id, error) in &report.failed {
            println!("  {} {}: {}", "FAILED".red().bold(), job_id, error);
        }
    }

    /// One-line notification on stderr
    pub fn print_event(&self, event: &DashEvent) {
        let level = event.level();
        if self.quiet && matches!(level, Level::Info | Level::Success) {
            return;
        }
        if !self.verbose && matches!(event, DashEvent::SubmissionStarted { .. }) {
            return;
        }

        let tag = match level {
            Level::Info => "info".cyan(),
            Level::Success => "ok".green(),
            Level::Warning => "warn".yellow().bold(),
            Level::Error => "error".red().bold(),
        };
        eprintln!("{} {}", format!("[{}]", tag).dimmed(), event.message());
    }

    pub fn print_error(&self, error: &DashError) {
        eprint!("{}", error);
        if let Some(fix) = suggest_fix(error) {
            eprintln!();
            eprintln!("{}: {}", "Hint".yellow().bold(), fix);
        }
    }

    /// Progress bar for watching a master job
    pub fn create_watch_progress(&self, master_job_id: &str) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(100);
        let style = if self.is_tty {
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} {prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ")
        } else {
            ProgressStyle::default_bar()
                .template("{prefix} {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
        };

        pb.set_style(style);
        pb.set_prefix(master_job_id.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Move the bar to a new snapshot
    pub fn update_watch_progress(&self, pb: &ProgressBar, view: &AggregateView) {
        pb.set_position(u64::from(view.progress));
        let label = view_label(view).to_string();
        pb.set_message(console::strip_ansi_codes(&label).to_lowercase());
    }
}
