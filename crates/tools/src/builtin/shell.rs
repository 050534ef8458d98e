//! The shell tool.
//!
//! Runs a command through `sh -c` with a hard timeout, a bounded output
//! buffer, and allow/deny command-prefix lists. Always returns
//! `{ok, exitCode, stdout, stderr}`; a non-zero exit is a result, not
//! an error.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use drost_domain::config::ShellToolConfig;

use crate::sandbox::resolve_path;
use crate::{Tool, ToolContext, ToolError, ToolResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw runner (shared with discovered tools and the code tool)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Spawn `sh -c <command>` in `cwd` (default: the workspace), feed
/// optional stdin, and wait up to the configured timeout. The child is
/// killed when the timeout fires.
pub async fn run_command(
    cfg: &ShellToolConfig,
    command: &str,
    cwd: Option<&Path>,
    workspace_dir: &Path,
    stdin: Option<&str>,
) -> std::result::Result<CommandOutput, String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd.unwrap_or(workspace_dir))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| format!("failed to spawn: {e}"))?;

    if let Some(data) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            let data = data.to_owned();
            // Writer runs concurrently with the wait below; a command
            // that never reads stdin must not deadlock us.
            tokio::spawn(async move {
                let _ = pipe.write_all(data.as_bytes()).await;
                let _ = pipe.shutdown().await;
            });
        }
    }

    let timeout = Duration::from_millis(cfg.timeout_ms);
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let (stdout, out_trunc) = cap_bytes(&output.stdout, cfg.max_buffer_bytes);
            let (stderr, err_trunc) = cap_bytes(&output.stderr, cfg.max_buffer_bytes);
            Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout,
                stderr,
                timed_out: false,
                truncated: out_trunc || err_trunc,
            })
        }
        Ok(Err(e)) => Err(format!("wait failed: {e}")),
        Err(_) => Ok(CommandOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("command timed out after {}ms", cfg.timeout_ms),
            timed_out: true,
            truncated: false,
        }),
    }
}

fn cap_bytes(bytes: &[u8], max: usize) -> (String, bool) {
    let truncated = bytes.len() > max;
    let slice = if truncated { &bytes[..max] } else { bytes };
    (String::from_utf8_lossy(slice).into_owned(), truncated)
}

/// Check a command against the deny list (first) and allow list. An
/// empty allow list permits everything not denied.
pub fn check_policy(cfg: &ShellToolConfig, command: &str) -> std::result::Result<(), String> {
    let trimmed = command.trim_start();
    for prefix in &cfg.deny {
        if trimmed.starts_with(prefix.as_str()) {
            return Err(format!("command denied by policy (prefix '{prefix}')"));
        }
    }
    if !cfg.allow.is_empty()
        && !cfg
            .allow
            .iter()
            .any(|prefix| trimmed.starts_with(prefix.as_str()))
    {
        return Err("command is not on the allow list".into());
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ShellRequest {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

pub struct ShellTool {
    cfg: ShellToolConfig,
}

impl ShellTool {
    pub fn new(cfg: ShellToolConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a command through a POSIX shell inside the workspace"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": { "type": "string" },
                "cwd": { "type": "string" }
            }
        }))
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let req: ShellRequest = serde_json::from_value(input)
            .map_err(|e| ToolError::execution(format!("bad shell input: {e}")))?;

        check_policy(&self.cfg, &req.command).map_err(ToolError::execution)?;

        let cwd = match &req.cwd {
            Some(raw) => Some(
                resolve_path(&ctx.workspace_dir, raw).map_err(ToolError::execution)?,
            ),
            None => None,
        };

        let output = run_command(
            &self.cfg,
            &req.command,
            cwd.as_deref(),
            &ctx.workspace_dir,
            None,
        )
        .await
        .map_err(ToolError::execution)?;

        Ok(json!({
            "ok": output.exit_code == Some(0),
            "exitCode": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "timedOut": output.timed_out,
            "truncated": output.truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(ws: &TempDir) -> ToolContext {
        ToolContext {
            workspace_dir: ws.path().to_path_buf(),
            mutable_roots: vec![ws.path().to_path_buf()],
            session_id: "s".into(),
            provider_id: "p".into(),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let ws = TempDir::new().unwrap();
        let tool = ShellTool::new(ShellToolConfig::default());
        let out = tool
            .execute(json!({"command": "exit 3"}), &ctx(&ws))
            .await
            .unwrap();
        assert_eq!(out["ok"], false);
        assert_eq!(out["exitCode"], 3);
    }

    #[tokio::test]
    async fn stdout_captured() {
        let ws = TempDir::new().unwrap();
        let tool = ShellTool::new(ShellToolConfig::default());
        let out = tool
            .execute(json!({"command": "printf hello"}), &ctx(&ws))
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(out["stdout"], "hello");
    }

    #[tokio::test]
    async fn deny_prefix_blocks() {
        let ws = TempDir::new().unwrap();
        let cfg = ShellToolConfig {
            deny: vec!["rm ".into()],
            ..Default::default()
        };
        let tool = ShellTool::new(cfg);
        let err = tool
            .execute(json!({"command": "rm -rf /"}), &ctx(&ws))
            .await
            .unwrap_err();
        assert_eq!(err.code, "execution_error");
        assert!(err.message.contains("denied"));
    }

    #[tokio::test]
    async fn allow_list_restricts() {
        let ws = TempDir::new().unwrap();
        let cfg = ShellToolConfig {
            allow: vec!["echo".into(), "printf".into()],
            ..Default::default()
        };
        let tool = ShellTool::new(cfg);
        assert!(tool
            .execute(json!({"command": "echo hi"}), &ctx(&ws))
            .await
            .is_ok());
        assert!(tool
            .execute(json!({"command": "curl example.com"}), &ctx(&ws))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let ws = TempDir::new().unwrap();
        let cfg = ShellToolConfig {
            timeout_ms: 100,
            ..Default::default()
        };
        let tool = ShellTool::new(cfg);
        let out = tool
            .execute(json!({"command": "sleep 5"}), &ctx(&ws))
            .await
            .unwrap();
        assert_eq!(out["ok"], false);
        assert_eq!(out["timedOut"], true);
    }

    #[tokio::test]
    async fn cwd_must_stay_in_workspace() {
        let ws = TempDir::new().unwrap();
        let tool = ShellTool::new(ShellToolConfig::default());
        let err = tool
            .execute(json!({"command": "pwd", "cwd": "/"}), &ctx(&ws))
            .await
            .unwrap_err();
        assert!(err.message.contains("outside the workspace"));
    }

    #[tokio::test]
    async fn output_is_capped() {
        let ws = TempDir::new().unwrap();
        let cfg = ShellToolConfig {
            max_buffer_bytes: 16,
            ..Default::default()
        };
        let tool = ShellTool::new(cfg);
        let out = tool
            .execute(json!({"command": "yes x | head -c 1000"}), &ctx(&ws))
            .await
            .unwrap();
        assert_eq!(out["truncated"], true);
        assert_eq!(out["stdout"].as_str().unwrap().len(), 16);
    }
}
