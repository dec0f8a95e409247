//! Read-only accessors over the live process table.
//!
//! Every accessor degrades to an empty or absent result instead of returning an error: in a
//! process tree that changes under our feet, "the process raced away" and "there is no data"
//! are handled the same way by every caller.

use libc::pid_t;
use procfs::process::Process;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

#[cfg(test)]
pub(crate) mod fake;

const DEFAULT_PROC_ROOT: &str = "/proc";

pub trait ProcessTable {
    /// Immediate parent of `pid`, or `None` if the process is gone or its record is malformed
    fn parent_of(&self, pid: pid_t) -> Option<pid_t>;

    /// Current direct children of `pid`. Empty on any read failure.
    fn children_of(&self, pid: pid_t) -> HashSet<pid_t>;

    /// Invocation arguments of `pid`, decoded lossily. Empty if unreadable.
    fn arguments_of(&self, pid: pid_t) -> Vec<String>;

    /// Whether `pid` still has an entry in the table. Safe to call on reaped ids.
    fn is_alive(&self, pid: pid_t) -> bool;
}

impl<T: ProcessTable + ?Sized> ProcessTable for &T {
    fn parent_of(&self, pid: pid_t) -> Option<pid_t> {
        (**self).parent_of(pid)
    }

    fn children_of(&self, pid: pid_t) -> HashSet<pid_t> {
        (**self).children_of(pid)
    }

    fn arguments_of(&self, pid: pid_t) -> Vec<String> {
        (**self).arguments_of(pid)
    }

    fn is_alive(&self, pid: pid_t) -> bool {
        (**self).is_alive(pid)
    }
}

/// [`ProcessTable`] backed by a procfs mount
#[derive(Debug, Clone)]
pub struct ProcfsTable {
    root: PathBuf,
}

impl Default for ProcfsTable {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcfsTable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn process_dir(&self, pid: pid_t) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

impl ProcessTable for ProcfsTable {
    fn parent_of(&self, pid: pid_t) -> Option<pid_t> {
        let process = Process::new_with_root(self.process_dir(pid)).ok()?;
        process.stat().ok().map(|stat| stat.ppid)
    }

    fn children_of(&self, pid: pid_t) -> HashSet<pid_t> {
        // Children are listed per thread, the one that forked them
        let Ok(tasks) = fs::read_dir(self.process_dir(pid).join("task")) else {
            return HashSet::new();
        };

        tasks
            .flatten()
            .filter_map(|task| fs::read_to_string(task.path().join("children")).ok())
            .filter_map(|content| parse_children(&content))
            .flatten()
            .collect()
    }

    fn arguments_of(&self, pid: pid_t) -> Vec<String> {
        fs::read(self.process_dir(pid).join("cmdline"))
            .map(|raw| parse_cmdline(&raw))
            .unwrap_or_default()
    }

    fn is_alive(&self, pid: pid_t) -> bool {
        self.process_dir(pid).exists()
    }
}

/// Parse the whitespace separated content of `/proc/<pid>/task/<tid>/children`
///
/// A single malformed entry invalidates the whole listing.
fn parse_children(content: &str) -> Option<HashSet<pid_t>> {
    content
        .split_whitespace()
        .map(|pid| pid.parse::<pid_t>().ok())
        .collect()
}

/// Split a NUL separated cmdline, dropping empty segments
fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|byte| *byte == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}
