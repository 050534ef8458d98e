//! Discovered tools.
//!
//! A discovered tool is a JSON manifest in the tool directory:
//! `{ "name": "...", "description"?, "parameters"?, "command": "..." }`.
//! The command runs through the shell sandbox with the validated input
//! serialized to stdin; stdout is parsed as JSON when possible.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use drost_domain::config::ShellToolConfig;

use crate::builtin::shell::run_command;
use crate::registry::ToolDiagnostic;
use crate::schema::is_schema_shaped;
use crate::{Tool, ToolContext, ToolError, ToolResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    pub command: String,
}

/// Load every `*.json` manifest in `dir`. Each entry is either a
/// parsed manifest or a diagnostic explaining why it was skipped.
pub fn load_manifests(
    dir: &Path,
) -> Vec<std::result::Result<(PathBuf, ToolManifest), ToolDiagnostic>> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "tool directory unreadable");
            return out;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    paths.sort();

    for path in paths {
        let raw = match std::fs::read_to_string(&path) {
            Ok(r) => r,
            Err(e) => {
                out.push(Err(ToolDiagnostic {
                    code: "import_error",
                    name: None,
                    source: Some(path),
                    message: format!("unreadable manifest: {e}"),
                }));
                continue;
            }
        };

        // Parse loosely first so shape problems are distinguishable
        // from unparsable files.
        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                out.push(Err(ToolDiagnostic {
                    code: "import_error",
                    name: None,
                    source: Some(path),
                    message: format!("unparsable manifest: {e}"),
                }));
                continue;
            }
        };

        match shape_check(&value) {
            Err(message) => {
                out.push(Err(ToolDiagnostic {
                    code: "invalid_shape",
                    name: value
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    source: Some(path),
                    message,
                }));
            }
            Ok(()) => match serde_json::from_value::<ToolManifest>(value) {
                Ok(manifest) => out.push(Ok((path, manifest))),
                Err(e) => out.push(Err(ToolDiagnostic {
                    code: "invalid_shape",
                    name: None,
                    source: Some(path),
                    message: e.to_string(),
                })),
            },
        }
    }
    out
}

fn shape_check(value: &Value) -> std::result::Result<(), String> {
    let name_ok = value
        .get("name")
        .and_then(Value::as_str)
        .map(|n| !n.is_empty())
        .unwrap_or(false);
    if !name_ok {
        return Err("manifest is missing a non-empty 'name'".into());
    }
    let command_ok = value
        .get("command")
        .and_then(Value::as_str)
        .map(|c| !c.is_empty())
        .unwrap_or(false);
    if !command_ok {
        return Err("manifest is missing a non-empty 'command'".into());
    }
    if let Some(params) = value.get("parameters") {
        if !is_schema_shaped(params) {
            return Err("'parameters' must be a JSON-Schema object".into());
        }
    }
    Ok(())
}

/// A manifest-backed tool executed through the shell sandbox.
pub struct DiscoveredTool {
    manifest: ToolManifest,
    shell: ShellToolConfig,
}

impl DiscoveredTool {
    pub fn new(manifest: ToolManifest, shell: ShellToolConfig) -> Self {
        Self { manifest, shell }
    }
}

#[async_trait::async_trait]
impl Tool for DiscoveredTool {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn parameters(&self) -> Option<Value> {
        self.manifest.parameters.clone()
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let stdin = serde_json::to_string(&input)
            .map_err(|e| ToolError::execution(format!("cannot serialize input: {e}")))?;

        let output = run_command(
            &self.shell,
            &self.manifest.command,
            None,
            &ctx.workspace_dir,
            Some(&stdin),
        )
        .await
        .map_err(ToolError::execution)?;

        if output.exit_code != Some(0) {
            return Err(ToolError::execution(format!(
                "'{}' exited with {:?}: {}",
                self.manifest.name, output.exit_code, output.stderr
            )));
        }

        // Structured output when the command prints JSON.
        match serde_json::from_str::<Value>(output.stdout.trim()) {
            Ok(v) => Ok(v),
            Err(_) => Ok(serde_json::json!({ "output": output.stdout })),
        }
    }
}
