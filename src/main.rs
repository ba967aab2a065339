// playdash CLI - dashboard for an Ansible execution backend

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use playdash::api::HostInfo;
use playdash::baseline::generate_password;
use playdash::executor::PlaybookRef;
use playdash::inventory::{os_target, OS_TARGETS};
use playdash::output::{create_event_channel, DashError, TerminalOutput};
use playdash::settings::Settings;
use playdash::AppState;

#[derive(Parser)]
#[command(
    name = "playdash",
    about = "Dashboard for an Ansible execution backend",
    version,
    disable_colored_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to ./playdash.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides settings and PLAYDASH_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// List hosts known to the backend
    Hosts {
        /// Ignore the session copy and refetch
        #[arg(long)]
        refresh: bool,
    },

    /// List playbooks, filtered by OS and category
    Playbooks {
        /// OS key, e.g. ubuntu_22 ("all" clears the filter)
        #[arg(long)]
        os: Option<String>,

        /// Category, e.g. baseline ("all" clears the filter)
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        refresh: bool,
    },

    /// Save baseline credentials for one or more hosts
    Configure {
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Hostname to provision (single host only)
        #[arg(long)]
        hostname: Option<String>,

        #[arg(long)]
        primary_password: Option<String>,

        #[arg(long)]
        secondary_password: Option<String>,

        /// Generate both passwords instead of prompting
        #[arg(short, long, conflicts_with_all = ["primary_password", "secondary_password"])]
        generate: bool,
    },

    /// Show saved baseline configurations
    Configs,

    /// Dispatch playbooks to hosts
    Run {
        /// Playbook name or path (repeatable)
        #[arg(short, long = "playbook", required = true)]
        playbooks: Vec<String>,

        /// Target hosts, comma-separated or repeated
        #[arg(short = 'H', long, alias = "host", value_delimiter = ',')]
        hosts: Vec<String>,

        /// Target every host in the inventory
        #[arg(long, conflicts_with = "hosts")]
        all_hosts: bool,

        /// Follow the dispatched jobs until they finish
        #[arg(short, long)]
        watch: bool,

        /// Site24x7 device key for monitoring agent playbooks
        #[arg(long)]
        device_key: Option<String>,

        /// Predefined antivirus script for antivirus playbooks
        #[arg(long, conflicts_with = "antivirus_script_file")]
        antivirus_script: Option<String>,

        /// Local antivirus script sent inline instead of a predefined one
        #[arg(long)]
        antivirus_script_file: Option<PathBuf>,
    },

    /// Show the consolidated state of a job
    Status { job_id: String },

    /// Follow a job until every host has finished
    Watch { job_id: String },

    /// Cancel a job and every job it groups
    Cancel { job_id: String },

    /// List jobs dispatched in this session
    Jobs,

    /// Generate a random password
    Password {
        #[arg(short, long)]
        length: Option<usize>,
    },

    /// Manage session state
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Forget cached listings, filters and tracked jobs
    Reset,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let output = Arc::new(TerminalOutput::new(cli.verbose, cli.quiet));

    if let Err(e) = run(cli, output.clone()).await {
        match e.downcast_ref::<DashError>() {
            Some(err) => output.print_error(err),
            None => eprintln!("{} {:#}", "error:".red().bold(), e),
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "playdash=debug"
    } else if quiet {
        "playdash=error"
    } else {
        "playdash=warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, output: Arc<TerminalOutput>) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        settings.api_url = url;
        settings.validate()?;
    }
    if let Commands::Run {
        device_key,
        antivirus_script,
        antivirus_script_file,
        ..
    } = &cli.command
    {
        apply_agent_flags(&mut settings, device_key, antivirus_script, antivirus_script_file);
    }

    let (events, mut rx) = create_event_channel();
    let printer = {
        let output = output.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                output.print_event(&event);
            }
        })
    };

    let state = AppState::open(settings, events)?;
    let result = execute(cli.command, &state, &output).await;

    // Closing the last emitter lets the printer drain and stop
    drop(state);
    let _ = printer.await;

    result
}

fn apply_agent_flags(
    settings: &mut Settings,
    device_key: &Option<String>,
    antivirus_script: &Option<String>,
    antivirus_script_file: &Option<PathBuf>,
) {
    let agents = &mut settings.agents;
    if let Some(key) = device_key {
        agents.site24x7_device_key = key.clone();
    }
    if let Some(script) = antivirus_script {
        agents.antivirus_script = script.clone();
        agents.antivirus_custom_script = None;
    }
    if let Some(path) = antivirus_script_file {
        agents.antivirus_custom_script = Some(path.clone());
    }
}

async fn execute(command: Commands, state: &AppState, output: &TerminalOutput) -> Result<()> {
    match command {
        Commands::Hosts { refresh } => {
            let hosts = state.catalog.hosts(refresh).await?;
            output.print_hosts(&hosts, |h| state.configs.is_complete(h));
        }

        Commands::Playbooks {
            os,
            category,
            refresh,
        } => {
            let mut filter = state.catalog.last_filter();
            if let Some(os) = os {
                filter.os = if os == "all" {
                    None
                } else if os_target(&os).is_some() {
                    Some(os)
                } else {
                    let known: Vec<&str> = OS_TARGETS.iter().map(|t| t.key).collect();
                    bail!("unknown OS '{}', expected one of: {}", os, known.join(", "));
                };
            }
            if let Some(category) = category {
                filter.category = category;
            }

            let playbooks = state.catalog.playbooks(&filter, refresh).await?;
            output.print_playbooks(&playbooks, |p| {
                state.dispatcher.is_baseline(&PlaybookRef::from(p))
            });
        }

        Commands::Configure {
            hosts,
            hostname,
            primary_password,
            secondary_password,
            generate,
        } => {
            let (primary, secondary) = if generate {
                let length = state.settings.generated_password_length;
                let pair = (generate_password(length), generate_password(length));
                println!("{} {}", "Primary password:".dimmed(), pair.0);
                println!("{} {}", "Secondary password:".dimmed(), pair.1);
                pair
            } else {
                let primary = match primary_password {
                    Some(p) => p,
                    None => prompt_password("Primary password: ")?,
                };
                let secondary = match secondary_password {
                    Some(p) => p,
                    None => prompt_password("Secondary password: ")?,
                };
                (primary, secondary)
            };
            configure(state, output, &hosts, hostname, &primary, &secondary).await?
        }

        Commands::Configs => {
            output.print_configs(&state.configs.entries(), state.configs.min_password_length());
        }

        Commands::Run {
            playbooks,
            hosts,
            all_hosts,
            watch,
            ..
        } => {
            let hosts = if all_hosts {
                state.catalog.hosts(false).await?.into_keys().collect()
            } else {
                hosts
            };

            state.selection.set_available_hosts(hosts);
            state.selection.set_available_playbooks(playbooks);
            state.selection.select_all_hosts(true);
            state.selection.select_all_playbooks(true);

            let reports = state
                .dispatcher
                .dispatch_selected(&state.selection, &state.catalog)
                .await?;
            for report in &reports {
                output.print_dispatch_report(report);
            }

            if watch {
                for master in reports.iter().filter_map(|r| r.master_job_id.as_deref()) {
                    watch_job(state, output, master).await?;
                }
            }
        }

        Commands::Status { job_id } => {
            let view = state.aggregator.aggregate(&job_id).await;
            output.print_view(&view);
        }

        Commands::Watch { job_id } => watch_job(state, output, &job_id).await?,

        Commands::Cancel { job_id } => {
            state.poller.stop(&job_id);
            let report = state.aggregator.cancel(&job_id).await;
            output.print_cancel_report(&job_id, &report);
            if !report.is_complete() {
                bail!("{} job(s) could not be cancelled", report.failed.len());
            }
        }

        Commands::Jobs => output.print_masters(&state.tracker.masters()),

        Commands::Password { length } => {
            let length = length.unwrap_or(state.settings.generated_password_length);
            println!("{}", generate_password(length));
        }

        Commands::Session {
            action: SessionAction::Reset,
        } => {
            state.reset_session()?;
            if !output.is_quiet() {
                println!("{}", "Session state cleared".green());
            }
        }
    }

    Ok(())
}

async fn configure(
    state: &AppState,
    output: &TerminalOutput,
    hosts: &[String],
    hostname: Option<String>,
    primary: &str,
    secondary: &str,
) -> Result<()> {
    if hostname.is_some() && hosts.len() > 1 {
        bail!("--hostname applies to a single host; omit it to number hosts automatically");
    }

    // Facts only improve the suggested hostname; an unreachable backend is not fatal
    let inventory: BTreeMap<String, HostInfo> = match state.catalog.hosts(false).await {
        Ok(hosts) => hosts,
        Err(e) => {
            warn!(error = %e.summary(), "host facts unavailable, numbering hostnames");
            BTreeMap::new()
        }
    };

    let results = state.configs.save_many(hosts, primary, secondary, |host| {
        if let Some(name) = &hostname {
            return name.clone();
        }
        if let Some(existing) = state.configs.get(host) {
            return existing.hostname;
        }
        let current = inventory
            .get(host)
            .and_then(|info| info.facts.hostname.clone())
            .unwrap_or_else(|| host.to_string());
        state.hostnames.hostname_for(&current)
    });

    let mut rejected = 0;
    for (host, result) in &results {
        match result {
            Ok(()) => {
                if !output.is_quiet() {
                    println!("{} {}", "saved".green(), host.white().bold());
                }
            }
            Err(e) => {
                rejected += 1;
                eprintln!("{} {}: {}", "rejected".red().bold(), host, e.summary());
            }
        }
    }

    if rejected > 0 {
        bail!("{} of {} configuration(s) rejected", rejected, results.len());
    }
    Ok(())
}

/// Follow a master job until it settles or Ctrl-C, then print the transcript
async fn watch_job(state: &AppState, output: &TerminalOutput, job_id: &str) -> Result<()> {
    let mut rx = state.poller.watch(job_id);
    let pb = output.create_watch_progress(job_id);
    let mut last = None;

    loop {
        tokio::select! {
            view = rx.recv() => match view {
                Some(view) => {
                    output.update_watch_progress(&pb, &view);
                    last = Some(view);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                state.poller.stop(job_id);
                break;
            }
        }
    }
    pb.finish_and_clear();

    let view = last.context("no status received before the watch ended")?;
    output.print_view(&view);

    if view.settled && view.status.is_failure() {
        bail!("job {} finished with status {}", job_id, view.status);
    }
    Ok(())
}

fn prompt_password(prompt: &str) -> Result<String> {
    // Print prompt to stderr so it appears even with redirected stdout
    eprint!("{}", prompt.cyan());
    io::stderr().flush().ok();

    let password = rpassword::read_password().context("Failed to read password")?;
    let password = password.trim().to_string();

    if password.is_empty() {
        bail!("password cannot be empty");
    }
    Ok(password)
}
