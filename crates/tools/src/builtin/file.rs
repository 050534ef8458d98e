//! The file tool: read / write / list / edit, path-scoped to the
//! workspace. Writes and edits additionally require a mutable root.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::sandbox::{ensure_mutable, resolve_path};
use crate::{Tool, ToolContext, ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum FileRequest {
    Read {
        path: String,
        #[serde(default)]
        offset: Option<usize>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Write {
        path: String,
        content: String,
    },
    List {
        #[serde(default = "default_dot")]
        path: String,
        #[serde(default)]
        recursive: bool,
        #[serde(default, rename = "includeHidden")]
        include_hidden: bool,
        #[serde(default = "d_max_entries", rename = "maxEntries")]
        max_entries: usize,
    },
    Edit {
        path: String,
        find: String,
        replace: String,
    },
}

fn default_dot() -> String {
    ".".into()
}
fn d_max_entries() -> usize {
    500
}

pub struct FileTool;

#[async_trait::async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Read, write, list, and edit files inside the workspace"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["op"],
            "properties": {
                "op": { "type": "string", "enum": ["read", "write", "list", "edit"] },
                "path": { "type": "string" },
                "content": { "type": "string" },
                "offset": { "type": "integer" },
                "limit": { "type": "integer" },
                "recursive": { "type": "boolean" },
                "includeHidden": { "type": "boolean" },
                "maxEntries": { "type": "integer" },
                "find": { "type": "string" },
                "replace": { "type": "string" }
            }
        }))
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let req: FileRequest = serde_json::from_value(input)
            .map_err(|e| ToolError::execution(format!("bad file input: {e}")))?;

        match req {
            FileRequest::Read {
                path,
                offset,
                limit,
            } => read(ctx, &path, offset, limit).await,
            FileRequest::Write { path, content } => write(ctx, &path, &content).await,
            FileRequest::List {
                path,
                recursive,
                include_hidden,
                max_entries,
            } => list(ctx, &path, recursive, include_hidden, max_entries).await,
            FileRequest::Edit {
                path,
                find,
                replace,
            } => edit(ctx, &path, &find, &replace).await,
        }
    }
}

async fn read(
    ctx: &ToolContext,
    path: &str,
    offset: Option<usize>,
    limit: Option<usize>,
) -> ToolResult {
    let resolved = resolve_path(&ctx.workspace_dir, path).map_err(ToolError::execution)?;
    let content = fs::read_to_string(&resolved)
        .await
        .map_err(|e| ToolError::execution(format!("failed to read '{path}': {e}")))?;

    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let offset = offset.unwrap_or(0);
    let limit = limit.unwrap_or(total.saturating_sub(offset));
    let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

    Ok(json!({
        "path": path,
        "content": selected.join("\n"),
        "totalLines": total,
        "offset": offset,
        "linesReturned": selected.len(),
    }))
}

async fn write(ctx: &ToolContext, path: &str, content: &str) -> ToolResult {
    let resolved = resolve_path(&ctx.workspace_dir, path).map_err(ToolError::execution)?;
    ensure_mutable(&resolved, &ctx.mutable_roots).map_err(ToolError::execution)?;

    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::execution(format!("failed to create parent: {e}")))?;
    }

    // Atomic write: uniquely-named temp sibling, sync, rename.
    let tmp = resolved.with_file_name(format!(
        ".{}.{}.tmp",
        resolved
            .file_name()
            .unwrap_or_default()
            .to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    ));
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| ToolError::execution(format!("failed to create temp file: {e}")))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| ToolError::execution(format!("failed to write: {e}")))?;
    file.sync_data()
        .await
        .map_err(|e| ToolError::execution(format!("failed to sync: {e}")))?;
    fs::rename(&tmp, &resolved)
        .await
        .map_err(|e| ToolError::execution(format!("failed to rename into place: {e}")))?;

    Ok(json!({
        "path": path,
        "bytesWritten": content.len(),
    }))
}

async fn list(
    ctx: &ToolContext,
    path: &str,
    recursive: bool,
    include_hidden: bool,
    max_entries: usize,
) -> ToolResult {
    let resolved = resolve_path(&ctx.workspace_dir, path).map_err(ToolError::execution)?;

    let mut entries = Vec::new();
    let mut truncated = false;
    let mut stack: Vec<PathBuf> = vec![resolved.clone()];

    while let Some(dir) = stack.pop() {
        let mut read_dir = fs::read_dir(&dir)
            .await
            .map_err(|e| ToolError::execution(format!("failed to list '{path}': {e}")))?;
        let mut children = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| ToolError::execution(format!("failed to read entry: {e}")))?
        {
            children.push(entry);
        }
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            if entries.len() >= max_entries {
                truncated = true;
                break;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| ToolError::execution(format!("failed to stat '{name}': {e}")))?;
            let rel = entry
                .path()
                .strip_prefix(&resolved)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(&name));

            if meta.is_dir() {
                entries.push(json!({
                    "path": rel.to_string_lossy(),
                    "type": "dir",
                }));
                if recursive {
                    stack.push(entry.path());
                }
            } else {
                entries.push(json!({
                    "path": rel.to_string_lossy(),
                    "type": "file",
                    "size": meta.len(),
                }));
            }
        }
        if truncated {
            break;
        }
    }

    Ok(json!({
        "path": path,
        "entries": entries,
        "truncated": truncated,
    }))
}

async fn edit(ctx: &ToolContext, path: &str, find: &str, replace: &str) -> ToolResult {
    if find.is_empty() {
        return Err(ToolError::execution("'find' must not be empty"));
    }
    let resolved = resolve_path(&ctx.workspace_dir, path).map_err(ToolError::execution)?;
    ensure_mutable(&resolved, &ctx.mutable_roots).map_err(ToolError::execution)?;

    let content = fs::read_to_string(&resolved)
        .await
        .map_err(|e| ToolError::execution(format!("failed to read '{path}': {e}")))?;

    let replaced_count = content.matches(find).count();
    if replaced_count > 0 {
        let updated = content.replace(find, replace);
        fs::write(&resolved, updated)
            .await
            .map_err(|e| ToolError::execution(format!("failed to write '{path}': {e}")))?;
    }

    Ok(json!({
        "path": path,
        "replacedCount": replaced_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(ws: &TempDir) -> ToolContext {
        ToolContext {
            workspace_dir: ws.path().to_path_buf(),
            mutable_roots: vec![ws.path().canonicalize().unwrap()],
            session_id: "s".into(),
            provider_id: "p".into(),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let ws = TempDir::new().unwrap();
        let tool = FileTool;

        tool.execute(
            json!({"op": "write", "path": "notes.txt", "content": "line1\nline2\n"}),
            &ctx(&ws),
        )
        .await
        .unwrap();

        let out = tool
            .execute(json!({"op": "read", "path": "notes.txt"}), &ctx(&ws))
            .await
            .unwrap();
        assert_eq!(out["content"], "line1\nline2");
        assert_eq!(out["totalLines"], 2);
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("f.txt"), "a\nb\nc\nd\n").unwrap();
        let out = FileTool
            .execute(
                json!({"op": "read", "path": "f.txt", "offset": 1, "limit": 2}),
                &ctx(&ws),
            )
            .await
            .unwrap();
        assert_eq!(out["content"], "b\nc");
        assert_eq!(out["linesReturned"], 2);
    }

    #[tokio::test]
    async fn list_respects_hidden_and_max_entries() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("a.txt"), "a").unwrap();
        std::fs::write(ws.path().join("b.txt"), "b").unwrap();
        std::fs::write(ws.path().join(".hidden"), "h").unwrap();

        let out = FileTool
            .execute(json!({"op": "list", "path": "."}), &ctx(&ws))
            .await
            .unwrap();
        let entries = out["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(out["truncated"], false);

        let capped = FileTool
            .execute(
                json!({"op": "list", "path": ".", "includeHidden": true, "maxEntries": 1}),
                &ctx(&ws),
            )
            .await
            .unwrap();
        assert_eq!(capped["entries"].as_array().unwrap().len(), 1);
        assert_eq!(capped["truncated"], true);
    }

    #[tokio::test]
    async fn list_recursive_descends() {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();
        std::fs::write(ws.path().join("sub/inner.txt"), "x").unwrap();

        let out = FileTool
            .execute(
                json!({"op": "list", "path": ".", "recursive": true}),
                &ctx(&ws),
            )
            .await
            .unwrap();
        let paths: Vec<&str> = out["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();
        assert!(paths.contains(&"sub"));
        assert!(paths.contains(&"sub/inner.txt"));
    }

    #[tokio::test]
    async fn edit_reports_replaced_count() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("f.txt"), "foo bar foo").unwrap();
        let out = FileTool
            .execute(
                json!({"op": "edit", "path": "f.txt", "find": "foo", "replace": "baz"}),
                &ctx(&ws),
            )
            .await
            .unwrap();
        assert_eq!(out["replacedCount"], 2);
        assert_eq!(
            std::fs::read_to_string(ws.path().join("f.txt")).unwrap(),
            "baz bar baz"
        );
    }

    #[tokio::test]
    async fn write_outside_mutable_root_rejected() {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir(ws.path().join("out")).unwrap();
        let restricted = ToolContext {
            workspace_dir: ws.path().to_path_buf(),
            mutable_roots: vec![ws.path().canonicalize().unwrap().join("out")],
            session_id: "s".into(),
            provider_id: "p".into(),
        };
        let err = FileTool
            .execute(
                json!({"op": "write", "path": "top.txt", "content": "x"}),
                &restricted,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("mutable roots"));
    }
}
