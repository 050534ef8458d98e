//! The tool registry: built-ins plus discovered manifest tools.
//!
//! Collision rules: a discovered tool shadowed by a built-in is skipped
//! with a `name_collision` diagnostic; two discovered tools with the
//! same name skip the second (`duplicate_custom_name`); manifests with
//! a bad shape or unreadable file are skipped (`invalid_shape`,
//! `import_error`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use drost_domain::config::ShellToolConfig;

use crate::discovery;
use crate::schema::validate_input;
use crate::{Tool, ToolContext, ToolDescriptor, ToolError, ToolResult};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDiagnostic {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub message: String,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    builtin_count: usize,
    custom_count: usize,
    diagnostics: Vec<ToolDiagnostic>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in tool. Built-ins are wired by code, so a
    /// duplicate is a programming error and the first wins.
    pub fn register_builtin(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "duplicate built-in registration ignored");
            return;
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        self.builtin_count += 1;
    }

    /// Scan a directory for discovered-tool manifests (`*.json`),
    /// applying the collision rules.
    pub fn load_directory(&mut self, dir: &Path, shell: &ShellToolConfig) {
        let loaded = discovery::load_manifests(dir);
        for item in loaded {
            match item {
                Err(diag) => self.diagnostics.push(diag),
                Ok((source, manifest)) => {
                    let name = manifest.name.clone();
                    if let Some(existing) = self.tools.get(&name) {
                        let code = if self.order[..self.builtin_count].contains(&name) {
                            "name_collision"
                        } else {
                            "duplicate_custom_name"
                        };
                        let _ = existing;
                        self.diagnostics.push(ToolDiagnostic {
                            code,
                            name: Some(name.clone()),
                            source: Some(source),
                            message: format!("tool '{name}' already registered; skipped"),
                        });
                        continue;
                    }
                    let tool: Arc<dyn Tool> =
                        Arc::new(discovery::DiscoveredTool::new(manifest, shell.clone()));
                    self.order.push(name.clone());
                    self.tools.insert(name, tool);
                    self.custom_count += 1;
                }
            }
        }
        tracing::info!(
            builtin = self.builtin_count,
            custom = self.custom_count,
            skipped = self.diagnostics.len(),
            "tool registry loaded"
        );
    }

    pub fn builtin_count(&self) -> usize {
        self.builtin_count
    }

    pub fn custom_count(&self) -> usize {
        self.custom_count
    }

    pub fn diagnostics(&self) -> &[ToolDiagnostic] {
        &self.diagnostics
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDescriptor {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// The execution pipeline: validate (when a schema is declared),
    /// then execute inside the sandbox context.
    pub async fn invoke(&self, name: &str, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return Err(ToolError::not_found(name));
        };

        if let Some(schema) = tool.parameters() {
            let issues = validate_input(&schema, &input);
            if !issues.is_empty() {
                return Err(ToolError::validation(
                    format!("invalid input for '{name}'"),
                    issues,
                ));
            }
        }

        tool.execute(input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct FakeTool {
        name: &'static str,
    }

    #[async_trait::async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            self.name
        }
        fn parameters(&self) -> Option<Value> {
            Some(json!({"type": "object", "required": ["x"], "properties": {"x": {"type": "integer"}}}))
        }
        async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
            Ok(json!({"doubled": input["x"].as_i64().unwrap_or(0) * 2}))
        }
    }

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext {
            workspace_dir: dir.path().to_path_buf(),
            mutable_roots: vec![dir.path().to_path_buf()],
            session_id: "s1".into(),
            provider_id: "p1".into(),
        }
    }

    #[tokio::test]
    async fn invoke_unknown_is_tool_not_found() {
        let registry = ToolRegistry::new();
        let dir = TempDir::new().unwrap();
        let err = registry.invoke("ghost", json!({}), &ctx(&dir)).await.unwrap_err();
        assert_eq!(err.code, "tool_not_found");
    }

    #[tokio::test]
    async fn invoke_validates_before_execute() {
        let mut registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(FakeTool { name: "double" }));
        let dir = TempDir::new().unwrap();

        let err = registry
            .invoke("double", json!({}), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.code, "validation_error");
        assert_eq!(err.issues[0].path, "$.x");

        let out = registry
            .invoke("double", json!({"x": 21}), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(out["doubled"], 42);
    }

    #[test]
    fn discovered_collision_with_builtin_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("double.json"),
            json!({"name": "double", "command": "echo hi"}).to_string(),
        )
        .unwrap();

        let mut registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(FakeTool { name: "double" }));
        registry.load_directory(dir.path(), &ShellToolConfig::default());

        assert_eq!(registry.custom_count(), 0);
        assert!(registry
            .diagnostics()
            .iter()
            .any(|d| d.code == "name_collision"));
    }

    #[test]
    fn duplicate_discovered_names_skip_second() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            json!({"name": "twin", "command": "echo a"}).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            json!({"name": "twin", "command": "echo b"}).to_string(),
        )
        .unwrap();

        let mut registry = ToolRegistry::new();
        registry.load_directory(dir.path(), &ShellToolConfig::default());

        assert_eq!(registry.custom_count(), 1);
        assert!(registry
            .diagnostics()
            .iter()
            .any(|d| d.code == "duplicate_custom_name"));
    }

    #[test]
    fn invalid_manifests_are_diagnosed() {
        let dir = TempDir::new().unwrap();
        // Missing `command`.
        std::fs::write(
            dir.path().join("shapeless.json"),
            json!({"name": "shapeless"}).to_string(),
        )
        .unwrap();
        // Unparsable.
        std::fs::write(dir.path().join("broken.json"), "{oops").unwrap();

        let mut registry = ToolRegistry::new();
        registry.load_directory(dir.path(), &ShellToolConfig::default());

        assert_eq!(registry.custom_count(), 0);
        let codes: Vec<&str> = registry.diagnostics().iter().map(|d| d.code).collect();
        assert!(codes.contains(&"invalid_shape"));
        assert!(codes.contains(&"import_error"));
    }
}
