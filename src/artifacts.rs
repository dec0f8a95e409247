//! Placeholder files left behind by `/dev/null` bind mounts.
//!
//! When a sandboxed command masks a path that does not exist yet with `--ro-bind /dev/null
//! <path>`, the namespace tool first creates an empty file at `<path>` to have a mount point.
//! Once the sandbox is gone, those empty files are leftovers.

use crate::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

const BIND_FLAG: &str = "--ro-bind";
const NULL_DEVICE: &str = "/dev/null";

/// Extract the placeholder paths from the arguments of a captured sandbox wrapper
///
/// The wrapper has the shape `[shell, "-c", "-l", "<sandbox command line>"]`, the sandbox command
/// line being a single argument. Anything else yields no artifact.
pub fn extract(arguments: &[String]) -> Vec<PathBuf> {
    let Some(command_line) = arguments.get(3) else {
        return vec![];
    };

    let tokens = match shell_words::split(command_line) {
        Ok(tokens) => tokens,
        Err(e) => {
            debug!("Failed to split sandbox command line: {e}");
            return vec![];
        }
    };

    let mut artifacts = vec![];
    let mut i = 0;
    while i + 2 < tokens.len() {
        if tokens[i] == BIND_FLAG && tokens[i + 1] == NULL_DEVICE {
            artifacts.push(PathBuf::from(&tokens[i + 2]));
            i += 3;
        } else {
            i += 1;
        }
    }

    artifacts
}

/// Remove the artifacts that are still empty regular files, returning how many were removed
///
/// Symlinks are not followed. Anything that cannot be inspected or removed is left alone.
pub fn cleanup(artifacts: &[PathBuf]) -> usize {
    artifacts
        .iter()
        .filter(|artifact| remove_if_placeholder(artifact))
        .count()
}

fn remove_if_placeholder(path: &Path) -> bool {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("Skipping {}: {e}", path.display());
            return false;
        }
    };

    if !metadata.file_type().is_file() || metadata.len() != 0 {
        debug!("Keeping {}: no longer an empty placeholder", path.display());
        return false;
    }

    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to remove {}: {e}", path.display());
            false
        }
    }
}
