use crate::prelude::*;
use serde::Deserialize;
use std::io::Read;

/// Record handed to the hook on stdin, only the fields we use
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub tool_input: ToolInput,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub command: Option<String>,
}

impl HookInput {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        serde_json::from_reader(reader).context("Failed to parse hook input")
    }

    /// The sandboxed command, empty when absent
    pub fn command(&self) -> &str {
        self.tool_input.command.as_deref().unwrap_or_default()
    }
}
