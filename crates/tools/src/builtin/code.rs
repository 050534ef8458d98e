//! Code tools: search / read_context / status / diff / patch.
//!
//! These shell out to ripgrep (falling back to grep) and git inside the
//! workspace. `patch` verifies the expected git HEAD before applying
//! and supports a dry run.

use serde::Deserialize;
use serde_json::{json, Value};

use drost_domain::config::ShellToolConfig;

use crate::builtin::shell::run_command;
use crate::sandbox::resolve_path;
use crate::{Tool, ToolContext, ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum CodeRequest {
    Search {
        pattern: String,
        #[serde(default)]
        path: Option<String>,
        #[serde(default = "d_max_results", rename = "maxResults")]
        max_results: usize,
    },
    ReadContext {
        path: String,
        line: usize,
        #[serde(default = "d_context")]
        context: usize,
    },
    Status {},
    Diff {
        #[serde(default)]
        paths: Vec<String>,
    },
    Patch {
        patch: String,
        #[serde(default, rename = "expectedBase")]
        expected_base: Option<ExpectedBase>,
        #[serde(default, rename = "dryRun")]
        dry_run: bool,
    },
}

#[derive(Debug, Deserialize)]
struct ExpectedBase {
    git_head: String,
}

fn d_max_results() -> usize {
    100
}
fn d_context() -> usize {
    10
}

pub struct CodeTool {
    shell: ShellToolConfig,
}

impl CodeTool {
    pub fn new(shell: ShellToolConfig) -> Self {
        Self { shell }
    }
}

#[async_trait::async_trait]
impl Tool for CodeTool {
    fn name(&self) -> &str {
        "code"
    }

    fn description(&self) -> &str {
        "Search code, read context, and inspect or patch the git worktree"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["op"],
            "properties": {
                "op": {
                    "type": "string",
                    "enum": ["search", "read_context", "status", "diff", "patch"]
                },
                "pattern": { "type": "string" },
                "path": { "type": "string" },
                "maxResults": { "type": "integer" },
                "line": { "type": "integer" },
                "context": { "type": "integer" },
                "paths": { "type": "array", "items": { "type": "string" } },
                "patch": { "type": "string" },
                "expectedBase": { "type": "object" },
                "dryRun": { "type": "boolean" }
            }
        }))
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let req: CodeRequest = serde_json::from_value(input)
            .map_err(|e| ToolError::execution(format!("bad code input: {e}")))?;

        match req {
            CodeRequest::Search {
                pattern,
                path,
                max_results,
            } => self.search(ctx, &pattern, path.as_deref(), max_results).await,
            CodeRequest::ReadContext {
                path,
                line,
                context,
            } => read_context(ctx, &path, line, context).await,
            CodeRequest::Status {} => self.git(ctx, "git status --porcelain").await,
            CodeRequest::Diff { paths } => {
                let mut cmd = "git diff".to_owned();
                for p in &paths {
                    cmd.push_str(&format!(" -- {}", shell_quote(p)));
                }
                self.git(ctx, &cmd).await
            }
            CodeRequest::Patch {
                patch,
                expected_base,
                dry_run,
            } => self.patch(ctx, &patch, expected_base, dry_run).await,
        }
    }
}

impl CodeTool {
    async fn search(
        &self,
        ctx: &ToolContext,
        pattern: &str,
        path: Option<&str>,
        max_results: usize,
    ) -> ToolResult {
        let scope = path.unwrap_or(".");
        // Keep the path inside the workspace before handing it to rg.
        resolve_path(&ctx.workspace_dir, scope).map_err(ToolError::execution)?;

        let quoted = shell_quote(pattern);
        let scoped = shell_quote(scope);
        let command = format!(
            "rg --line-number --no-heading --max-count {max_results} {quoted} {scoped} \
             2>/dev/null || grep -rn {quoted} {scoped}"
        );
        let output = run_command(&self.shell, &command, None, &ctx.workspace_dir, None)
            .await
            .map_err(ToolError::execution)?;

        let matches: Vec<&str> = output
            .stdout
            .lines()
            .take(max_results)
            .collect();
        Ok(json!({
            "pattern": pattern,
            "matches": matches,
            "truncated": output.stdout.lines().count() > max_results || output.truncated,
        }))
    }

    async fn git(&self, ctx: &ToolContext, command: &str) -> ToolResult {
        let output = run_command(&self.shell, command, None, &ctx.workspace_dir, None)
            .await
            .map_err(ToolError::execution)?;
        if output.exit_code != Some(0) {
            return Err(ToolError::execution(format!(
                "'{command}' failed: {}",
                output.stderr
            )));
        }
        Ok(json!({ "output": output.stdout }))
    }

    async fn patch(
        &self,
        ctx: &ToolContext,
        patch: &str,
        expected_base: Option<ExpectedBase>,
        dry_run: bool,
    ) -> ToolResult {
        if let Some(base) = expected_base {
            let head = run_command(
                &self.shell,
                "git rev-parse HEAD",
                None,
                &ctx.workspace_dir,
                None,
            )
            .await
            .map_err(ToolError::execution)?;
            let current = head.stdout.trim();
            if current != base.git_head {
                return Err(ToolError::execution(format!(
                    "base mismatch: HEAD is {current}, expected {}",
                    base.git_head
                )));
            }
        }

        let apply = if dry_run {
            "git apply --check"
        } else {
            "git apply"
        };
        let output = run_command(&self.shell, apply, None, &ctx.workspace_dir, Some(patch))
            .await
            .map_err(ToolError::execution)?;

        if output.exit_code != Some(0) {
            return Err(ToolError::execution(format!(
                "patch {} failed: {}",
                if dry_run { "check" } else { "apply" },
                output.stderr
            )));
        }
        Ok(json!({ "applied": !dry_run, "dryRun": dry_run }))
    }
}

async fn read_context(ctx: &ToolContext, path: &str, line: usize, context: usize) -> ToolResult {
    let resolved = resolve_path(&ctx.workspace_dir, path).map_err(ToolError::execution)?;
    let content = tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|e| ToolError::execution(format!("failed to read '{path}': {e}")))?;

    let lines: Vec<&str> = content.lines().collect();
    let line = line.max(1);
    let start = line.saturating_sub(context + 1);
    let end = (line + context).min(lines.len());
    let window: Vec<String> = lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{:>5} {}", start + i + 1, l))
        .collect();

    Ok(json!({
        "path": path,
        "line": line,
        "context": window.join("\n"),
    }))
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
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
    async fn search_finds_matches() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("a.txt"), "alpha\nneedle here\nomega\n").unwrap();
        let tool = CodeTool::new(ShellToolConfig::default());

        let out = tool
            .execute(json!({"op": "search", "pattern": "needle"}), &ctx(&ws))
            .await
            .unwrap();
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].as_str().unwrap().contains("needle"));
    }

    #[tokio::test]
    async fn read_context_windows_around_line() {
        let ws = TempDir::new().unwrap();
        let body: String = (1..=20).map(|i| format!("line{i}\n")).collect();
        std::fs::write(ws.path().join("f.txt"), body).unwrap();
        let tool = CodeTool::new(ShellToolConfig::default());

        let out = tool
            .execute(
                json!({"op": "read_context", "path": "f.txt", "line": 10, "context": 2}),
                &ctx(&ws),
            )
            .await
            .unwrap();
        let window = out["context"].as_str().unwrap();
        assert!(window.contains("line8"));
        assert!(window.contains("line12"));
        assert!(!window.contains("line13"));
    }

    #[tokio::test]
    async fn patch_base_mismatch_rejected() {
        let ws = TempDir::new().unwrap();
        // Init a repo so rev-parse works.
        let shell = ShellToolConfig::default();
        run_command(
            &shell,
            "git init -q && git -c user.email=t@t -c user.name=t commit -q --allow-empty -m init",
            None,
            ws.path(),
            None,
        )
        .await
        .unwrap();

        let tool = CodeTool::new(shell);
        let err = tool
            .execute(
                json!({
                    "op": "patch",
                    "patch": "",
                    "expectedBase": {"git_head": "0000000000000000000000000000000000000000"}
                }),
                &ctx(&ws),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("base mismatch"));
    }
}
