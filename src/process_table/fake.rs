use super::ProcessTable;
use libc::pid_t;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct FakeProcess {
    parent: pid_t,
    arguments: Vec<String>,
    /// Number of scans of the parent's children before this process shows up
    appears_after: usize,
    /// Number of liveness polls answered `true` before the process exits, `None` for never
    alive_for: Option<usize>,
    liveness_polls: usize,
    exited: bool,
}

#[derive(Default)]
struct Inner {
    processes: HashMap<pid_t, FakeProcess>,
    scans: HashMap<pid_t, usize>,
    reads: usize,
}

/// Scripted in-memory process table
#[derive(Default)]
pub(crate) struct FakeProcessTable {
    inner: Mutex<Inner>,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a process visible from the first scan, alive forever
    pub fn with_process(self, pid: pid_t, parent: pid_t, arguments: &[&str]) -> Self {
        self.with_scripted_process(pid, parent, arguments, 0, None)
    }

    pub fn with_scripted_process(
        self,
        pid: pid_t,
        parent: pid_t,
        arguments: &[&str],
        appears_after: usize,
        alive_for: Option<usize>,
    ) -> Self {
        self.inner.lock().unwrap().processes.insert(
            pid,
            FakeProcess {
                parent,
                arguments: arguments.iter().map(|arg| arg.to_string()).collect(),
                appears_after,
                alive_for,
                liveness_polls: 0,
                exited: false,
            },
        );
        self
    }

    /// Total number of reads served, across all operations
    pub fn reads(&self) -> usize {
        self.inner.lock().unwrap().reads
    }

    pub fn liveness_polls(&self, pid: pid_t) -> usize {
        self.inner
            .lock()
            .unwrap()
            .processes
            .get(&pid)
            .map_or(0, |process| process.liveness_polls)
    }
}

impl ProcessTable for FakeProcessTable {
    fn parent_of(&self, pid: pid_t) -> Option<pid_t> {
        let mut inner = self.inner.lock().unwrap();
        inner.reads += 1;
        inner
            .processes
            .get(&pid)
            .filter(|process| !process.exited)
            .map(|process| process.parent)
    }

    fn children_of(&self, pid: pid_t) -> HashSet<pid_t> {
        let mut inner = self.inner.lock().unwrap();
        inner.reads += 1;
        let scans = {
            let scans = inner.scans.entry(pid).or_default();
            *scans += 1;
            *scans
        };

        inner
            .processes
            .iter()
            .filter(|(_, process)| {
                process.parent == pid && !process.exited && scans > process.appears_after
            })
            .map(|(child, _)| *child)
            .collect()
    }

    fn arguments_of(&self, pid: pid_t) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.reads += 1;
        inner
            .processes
            .get(&pid)
            .filter(|process| !process.exited)
            .map(|process| process.arguments.clone())
            .unwrap_or_default()
    }

    fn is_alive(&self, pid: pid_t) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.reads += 1;
        let Some(process) = inner.processes.get_mut(&pid) else {
            return false;
        };
        if process.exited {
            return false;
        }

        process.liveness_polls += 1;
        match process.alive_for {
            Some(alive_for) if process.liveness_polls > alive_for => {
                process.exited = true;
                false
            }
            _ => true,
        }
    }
}
