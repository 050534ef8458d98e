//! Tool registry and sandboxed execution for the drost gateway.
//!
//! The registry is the union of built-in tools and tools discovered
//! from a manifest directory. Execution runs through a fixed pipeline:
//! schema validation, then the tool body inside the workspace sandbox.
//! Path arguments resolve relative to the workspace and mutating
//! operations must land inside a mutable root.

pub mod builtin;
pub mod discovery;
pub mod registry;
pub mod sandbox;
pub mod schema;

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

pub use registry::{ToolDiagnostic, ToolRegistry};

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace_dir: PathBuf,
    /// Canonicalized roots where mutating operations are allowed.
    pub mutable_roots: Vec<PathBuf>,
    pub session_id: String,
    pub provider_id: String,
}

/// A structured validation failure for one input path.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A tool failure with a stable code.
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,
}

impl ToolError {
    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self {
            code: "validation_error".into(),
            message: message.into(),
            issues,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            code: "execution_error".into(),
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self {
            code: "tool_not_found".into(),
            message: format!("no tool named '{name}'"),
            issues: Vec::new(),
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

pub type ToolResult = std::result::Result<Value, ToolError>;

/// A callable tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema for the tool's input, when the tool declares one.
    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// What the provider adapters see: name + description + schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}
