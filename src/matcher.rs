use crate::process_table::ProcessTable;
use itertools::Itertools;
use libc::pid_t;
use std::collections::HashSet;
use std::time::{Duration, Instant};

pub const DEFAULT_FIND_TIMEOUT: Duration = Duration::from_secs(5);

/// A child process whose arguments contained the searched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedProcess {
    pub pid: pid_t,
    pub arguments: Vec<String>,
}

/// Scan the children of `root_pid` that are not in `excluded` until one of them has `fragment`
/// somewhere in its space-joined arguments, or `timeout` elapses.
///
/// The scan does not sleep between iterations: the process we are looking for can live for less
/// than 20ms, and any pause risks missing it entirely.
pub fn find_child<T: ProcessTable>(
    table: &T,
    root_pid: pid_t,
    fragment: &str,
    excluded: &HashSet<pid_t>,
    timeout: Duration,
) -> Option<MatchedProcess> {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        let candidates = table
            .children_of(root_pid)
            .into_iter()
            .filter(|pid| !excluded.contains(pid))
            .sorted_unstable();

        for pid in candidates {
            let arguments = table.arguments_of(pid);
            // Mid-exec or already gone
            if arguments.is_empty() {
                continue;
            }

            if arguments.iter().join(" ").contains(fragment) {
                return Some(MatchedProcess { pid, arguments });
            }
        }
    }

    None
}
