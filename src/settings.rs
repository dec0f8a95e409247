use crate::prelude::*;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_DIR: &str = ".claude";
const SETTINGS_FILENAMES: &[&str] = &["settings.json", "settings.local.json"];

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    sandbox: Option<SandboxSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct SandboxSettings {
    /// `None` when the key is absent, `Some(Value::Null)` when it is set to `null`
    #[serde(default, deserialize_with = "deserialize_present")]
    enabled: Option<Value>,
}

fn deserialize_present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Loose truthiness of a settings value: `null`, `false`, zero and empty values are off
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(enabled) => *enabled,
        Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
        Value::String(string) => !string.is_empty(),
        Value::Array(values) => !values.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

/// Ordered settings files deciding whether the sandbox, and thus the monitor, is enabled
///
/// Later files override earlier ones: user settings first, then project settings, the local
/// variant of each coming after the shared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSources {
    paths: Vec<PathBuf>,
}

impl SettingsSources {
    pub fn new(home: Option<&Path>, project_dir: Option<&Path>) -> Self {
        let paths = [home, project_dir]
            .into_iter()
            .flatten()
            .filter(|dir| !dir.as_os_str().is_empty())
            .flat_map(|dir| {
                SETTINGS_FILENAMES
                    .iter()
                    .map(move |filename| dir.join(SETTINGS_DIR).join(filename))
            })
            .collect();

        Self { paths }
    }

    /// Sources rooted at `$HOME` and the given project directory
    pub fn from_env(project_dir: Option<&Path>) -> Self {
        let home = env::var_os("HOME").map(PathBuf::from);
        Self::new(home.as_deref(), project_dir)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Merge `sandbox.enabled` over every source. Defaults to disabled.
    pub fn is_sandbox_enabled(&self) -> bool {
        self.paths
            .iter()
            .filter_map(|path| match read_sandbox_enabled(path) {
                Ok(enabled) => enabled,
                Err(e) => {
                    debug!("Ignoring settings at {}: {e:#}", path.display());
                    None
                }
            })
            .last()
            .unwrap_or(false)
    }
}

fn read_sandbox_enabled(path: &Path) -> Result<Option<bool>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => bail!("Failed to read settings: {e}"),
    };

    let settings: SettingsFile =
        serde_json::from_slice(&content).context("Failed to parse settings")?;

    Ok(settings
        .sandbox
        .and_then(|sandbox| sandbox.enabled)
        .map(|enabled| is_truthy(&enabled)))
}
