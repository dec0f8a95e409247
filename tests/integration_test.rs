use anyhow::Context;
use libc::pid_t;
use sandbox_monitor::detach::{Detacher, ForkDetacher};
use sandbox_monitor::monitor::{Monitor, MonitorOptions, MonitorOutcome, MonitorRequest};
use sandbox_monitor::process_table::{ProcessTable, ProcfsTable};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Spawn `sh -c <script> <command line>`, whose arguments have the same shape as a captured
/// sandbox wrapper, and reap it in the background once it exits.
fn spawn_wrapper(script: &str, command_line: &str) -> anyhow::Result<pid_t> {
    let mut child = Command::new("sh")
        .args(["-c", script, command_line])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn wrapper")?;
    let pid = child.id() as pid_t;

    // A zombie still has a /proc entry, reap it so the monitor sees the exit
    thread::spawn(move || {
        let _ = child.wait();
    });

    Ok(pid)
}

// ============================================================================
// INTEGRATION TESTS - LIVE PROCESS TABLE
// ============================================================================

#[test_log::test]
fn test_cleans_up_after_live_wrapper() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let placeholder = dir.path().join("placeholder");
    let written = dir.path().join("written");
    fs::write(&placeholder, b"")?;
    fs::write(&written, b"")?;

    let own_pid = std::process::id() as pid_t;
    let fragment = format!("echo {}", dir.path().display());
    let mut sandbox = vec!["bwrap".to_string()];
    for masked in [&placeholder, &written] {
        sandbox.extend([
            "--ro-bind".to_string(),
            "/dev/null".to_string(),
            masked.display().to_string(),
        ]);
    }
    sandbox.extend(["--".to_string(), "zsh".to_string(), "-c".to_string()]);
    sandbox.push(format!("eval '{fragment}'"));
    let command_line = shell_words::join(sandbox);

    let monitor = Monitor::new(
        ProcfsTable::default(),
        MonitorOptions {
            find_timeout: Duration::from_secs(5),
            exit_poll_interval: Duration::from_millis(10),
        },
    );
    let request = MonitorRequest::new(Some(own_pid), fragment).unwrap();
    let snapshot = monitor.snapshot(request);

    let pid = spawn_wrapper("sleep 0.3; true", &command_line)?;
    // The sandboxed command writes to one of the masked paths while it runs
    OpenOptions::new()
        .append(true)
        .open(&written)?
        .write_all(b"output")?;

    let outcome = monitor.track(&snapshot);

    assert_eq!(
        outcome,
        MonitorOutcome::Cleaned {
            pid,
            removed: 1,
            tracked: 2
        }
    );
    assert!(!placeholder.exists());
    assert!(written.exists());
    assert!(!monitor.table().is_alive(pid));

    Ok(())
}

#[test_log::test]
fn test_live_child_without_match_times_out() -> anyhow::Result<()> {
    let own_pid = std::process::id() as pid_t;
    let monitor = Monitor::new(
        ProcfsTable::default(),
        MonitorOptions {
            find_timeout: Duration::from_millis(100),
            exit_poll_interval: Duration::from_millis(10),
        },
    );
    let request =
        MonitorRequest::new(Some(own_pid), "a command nobody runs 7f3a9c").unwrap();
    let snapshot = monitor.snapshot(request);

    spawn_wrapper("sleep 0.3", "bwrap -- true")?;

    assert_eq!(monitor.track(&snapshot), MonitorOutcome::ChildNotFound);
    Ok(())
}

// ============================================================================
// INTEGRATION TESTS - DETACHING
// ============================================================================

/// What the detached instance reports about itself
#[derive(Debug)]
struct DetachedReport {
    pid: pid_t,
    sid: pid_t,
    ppid: pid_t,
    std_streams: Vec<String>,
}

impl DetachedReport {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let pid = fields.next()?.parse().ok()?;
        let sid = fields.next()?.parse().ok()?;
        let ppid = fields.next()?.parse().ok()?;
        let std_streams = fields.map(str::to_string).collect();
        Some(Self {
            pid,
            sid,
            ppid,
            std_streams,
        })
    }
}

fn read_reports(path: &Path) -> Option<Vec<DetachedReport>> {
    let content = fs::read_to_string(path).ok()?;
    content.lines().map(DetachedReport::parse).collect()
}

fn std_stream_target(fd: i32) -> String {
    fs::read_link(format!("/proc/self/fd/{fd}"))
        .map(|target| target.display().to_string())
        .unwrap_or_else(|_| "unreadable".to_string())
}

#[test]
fn test_only_the_detached_instance_continues() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let report = dir.path().join("report");
    let test_pid = std::process::id() as pid_t;

    if ForkDetacher.detach()? {
        // Detached instance: report who we are, then leave without running any test teardown
        let line = unsafe {
            format!(
                "{} {} {} {} {} {}\n",
                libc::getpid(),
                libc::getsid(0),
                libc::getppid(),
                std_stream_target(0),
                std_stream_target(1),
                std_stream_target(2),
            )
        };
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&report) {
            let _ = file.write_all(line.as_bytes());
        }
        unsafe { libc::_exit(0) };
    }

    assert!(wait_for(Duration::from_secs(5), || report.exists()));
    // Leave time for any other instance that would wrongly continue
    thread::sleep(Duration::from_millis(200));

    let reports = read_reports(&report).context("Malformed report")?;
    assert_eq!(reports.len(), 1, "exactly one instance must continue");

    let detached = &reports[0];
    assert_ne!(detached.pid, test_pid);
    assert_eq!(detached.sid, detached.pid, "the detached instance leads its own session");
    assert_ne!(detached.ppid, test_pid);
    assert_eq!(
        detached.std_streams,
        vec!["/dev/null", "/dev/null", "/dev/null"],
        "standard streams of the detached instance must point to the null device"
    );

    Ok(())
}
