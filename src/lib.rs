//! Cleans up the empty placeholder files a sandbox leaves behind when it masks missing paths
//! with `/dev/null` bind mounts.

mod prelude;

pub mod app;
pub mod artifacts;
pub mod detach;
pub mod hook_input;
pub mod logger;
pub mod matcher;
pub mod monitor;
pub mod process_table;
pub mod settings;
