//! Follows one sandboxed command from the moment it is spawned until its placeholders are gone.
//!
//! The flow is: snapshot the children the parent already has, detach from the caller, find the
//! new child running our command, extract its placeholders, wait for it to exit, then remove the
//! placeholders that are still empty.

use crate::artifacts;
use crate::detach::Detacher;
use crate::matcher::{self, DEFAULT_FIND_TIMEOUT};
use crate::prelude::*;
use crate::process_table::ProcessTable;
use libc::pid_t;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

pub const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// How long to look for the sandboxed child before giving up
    pub find_timeout: Duration,
    /// Delay between two liveness checks of the sandboxed child
    pub exit_poll_interval: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            find_timeout: DEFAULT_FIND_TIMEOUT,
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
        }
    }
}

/// A validated request to monitor `command` among the children of `parent_pid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRequest {
    parent_pid: pid_t,
    command: String,
}

impl MonitorRequest {
    /// `None` when there is nothing sensible to monitor: no command, or no parent other than init
    pub fn new(parent_pid: Option<pid_t>, command: impl Into<String>) -> Option<Self> {
        let command = command.into();
        if command.is_empty() {
            return None;
        }

        match parent_pid {
            Some(parent_pid) if parent_pid > 1 => Some(Self {
                parent_pid,
                command,
            }),
            _ => None,
        }
    }

    pub fn parent_pid(&self) -> pid_t {
        self.parent_pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// The request along with the children its parent had before the sandboxed command was spawned
#[derive(Debug, Clone)]
pub struct Snapshot {
    request: MonitorRequest,
    existing_children: HashSet<pid_t>,
}

impl Snapshot {
    pub fn existing_children(&self) -> &HashSet<pid_t> {
        &self.existing_children
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// No new child ran the command before the deadline
    ChildNotFound,
    /// The child was found but did not mask any path
    NothingToTrack { pid: pid_t },
    /// The child exited and its placeholders were cleaned up
    Cleaned {
        pid: pid_t,
        removed: usize,
        tracked: usize,
    },
}

pub struct Monitor<T> {
    table: T,
    options: MonitorOptions,
}

impl<T: ProcessTable> Monitor<T> {
    pub fn new(table: T, options: MonitorOptions) -> Self {
        Self { table, options }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn snapshot(&self, request: MonitorRequest) -> Snapshot {
        let existing_children = self.table.children_of(request.parent_pid);
        debug!(
            "snapshot: {} existing children of {}",
            existing_children.len(),
            request.parent_pid
        );

        Snapshot {
            request,
            existing_children,
        }
    }

    /// Find the sandboxed child, wait for it to exit and remove its placeholders
    pub fn track(&self, snapshot: &Snapshot) -> MonitorOutcome {
        let request = &snapshot.request;
        info!(
            "monitor: parent_pid={} command={:?}",
            request.parent_pid, request.command
        );

        let Some(matched) = matcher::find_child(
            &self.table,
            request.parent_pid,
            &request.command,
            &snapshot.existing_children,
            self.options.find_timeout,
        ) else {
            warn!("timeout: sandbox child not found");
            return MonitorOutcome::ChildNotFound;
        };
        info!("found sandbox pid={}", matched.pid);

        let artifacts = artifacts::extract(&matched.arguments);
        if artifacts.is_empty() {
            info!("no artifacts to track");
            return MonitorOutcome::NothingToTrack { pid: matched.pid };
        }
        info!("tracking {} artifacts", artifacts.len());
        for artifact in &artifacts {
            debug!("artifact: {}", artifact.display());
        }

        self.wait_for_exit(matched.pid);
        info!("sandbox {} exited", matched.pid);

        let removed = artifacts::cleanup(&artifacts);
        info!("cleanup: removed {}/{} artifacts", removed, artifacts.len());

        MonitorOutcome::Cleaned {
            pid: matched.pid,
            removed,
            tracked: artifacts.len(),
        }
    }

    /// Block until `pid` leaves the process table, however long that takes
    fn wait_for_exit(&self, pid: pid_t) {
        while self.table.is_alive(pid) {
            thread::sleep(self.options.exit_poll_interval);
        }
    }

    /// Snapshot, detach, then track in the detached instance only
    ///
    /// `on_detached` runs in the detached instance before tracking starts. Returns `None` in the
    /// invoking instance, and when tracking crashed.
    pub fn run_detached<D: Detacher + ?Sized>(
        &self,
        request: MonitorRequest,
        detacher: &D,
        on_detached: impl FnOnce(),
    ) -> Result<Option<MonitorOutcome>> {
        let snapshot = self.snapshot(request);

        if !detacher.detach()? {
            return Ok(None);
        }
        on_detached();

        match panic::catch_unwind(AssertUnwindSafe(|| self.track(&snapshot))) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(payload) => {
                error!("crash: {}", panic_message(payload.as_ref()));
                Ok(None)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
