use crate::detach::{Detacher, ForkDetacher, InlineDetacher};
use crate::hook_input::HookInput;
use crate::logger;
use crate::monitor::{Monitor, MonitorOptions, MonitorOutcome, MonitorRequest};
use crate::prelude::*;
use crate::process_table::{ProcessTable, ProcfsTable};
use crate::settings::SettingsSources;
use clap::Parser;
use libc::pid_t;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sandbox-monitor")]
#[command(about = "Remove the empty placeholder files left behind by sandboxed commands")]
#[command(version)]
pub struct Cli {
    /// Log file, defaults to `sandbox-monitor.log` next to the executable
    #[arg(long, env = "SANDBOX_MONITOR_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// How long to look for the sandboxed process before giving up
    #[arg(long, value_name = "DURATION", default_value = "5s", value_parser = humantime::parse_duration)]
    pub find_timeout: Duration,

    /// Delay between two checks of whether the sandboxed process exited
    #[arg(long, value_name = "DURATION", default_value = "100ms", value_parser = humantime::parse_duration)]
    pub exit_poll_interval: Duration,

    /// Process whose children are scanned, defaults to our own parent
    #[arg(long)]
    pub parent_pid: Option<pid_t>,

    /// Project directory holding project level settings
    #[arg(long, env = "CLAUDE_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Stay attached to the caller, for debugging
    #[arg(long)]
    pub foreground: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    let Ok(hook_input) = HookInput::from_reader(io::stdin().lock()) else {
        return Ok(());
    };

    let sources = SettingsSources::from_env(cli.project_dir.as_deref());
    let monitor = Monitor::new(
        ProcfsTable::default(),
        MonitorOptions {
            find_timeout: cli.find_timeout,
            exit_poll_interval: cli.exit_poll_interval,
        },
    );

    let log_file = cli.log_file.unwrap_or_else(logger::default_log_path);
    let install_logger = || {
        // Nowhere left to report a failure once detached
        let _ = logger::init_file_logger(&log_file);
    };

    let detacher: Box<dyn Detacher> = if cli.foreground {
        Box::new(InlineDetacher)
    } else {
        Box::new(ForkDetacher)
    };

    monitor_invocation(
        &hook_input,
        &sources,
        &monitor,
        cli.parent_pid,
        detacher.as_ref(),
        install_logger,
    )?;

    Ok(())
}

/// Decide whether this invocation needs monitoring, and if so hand it over to a detached monitor
///
/// Every early exit happens before touching the process table, except the parent lookup itself.
pub fn monitor_invocation<T: ProcessTable, D: Detacher + ?Sized>(
    hook_input: &HookInput,
    sources: &SettingsSources,
    monitor: &Monitor<T>,
    parent_pid: Option<pid_t>,
    detacher: &D,
    on_detached: impl FnOnce(),
) -> Result<Option<MonitorOutcome>> {
    if !sources.is_sandbox_enabled() {
        return Ok(None);
    }

    let command = hook_input.command();
    if command.is_empty() {
        return Ok(None);
    }

    let parent_pid =
        parent_pid.or_else(|| monitor.table().parent_of(std::process::id() as pid_t));
    let Some(request) = MonitorRequest::new(parent_pid, command) else {
        return Ok(None);
    };

    monitor.run_detached(request, detacher, on_detached)
}
