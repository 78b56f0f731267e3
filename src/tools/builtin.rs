//! Built-in tools handled in-process.
//!
//! Two groups are always available so the fact and multi-step tiers work
//! without any external plugin subsystem:
//! - `clock.current_time`, `clock.current_date`
//! - `filesystem.list_dir`, `filesystem.read_file`, `filesystem.search_files`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use serde_json::{json, Value};

use super::errors::ToolError;
use super::registry::{ToolCapability, ToolCatalog, ToolDescriptor};
use crate::agent_core::tokens::truncate_utf8;
use crate::config::expand_tilde;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Files larger than this are returned truncated by `filesystem.read_file`.
const MAX_READ_CHARS: usize = 8_000;

/// Maximum directory depth walked by `filesystem.search_files`.
const MAX_SEARCH_DEPTH: usize = 4;

/// Default cap on search results.
const DEFAULT_MAX_RESULTS: usize = 50;

// ─── Registration ────────────────────────────────────────────────────────────

/// Register every built-in tool into `catalog`, in a stable order.
pub fn register_builtin_tools(catalog: &mut ToolCatalog) -> Result<(), ToolError> {
    catalog.register(ToolDescriptor::new(
        "clock.current_time",
        "Get the current local time of day.",
        json!({ "type": "object", "properties": {} }),
        Arc::new(CurrentTime),
    ))?;
    catalog.register(ToolDescriptor::new(
        "clock.current_date",
        "Get today's date and day of the week.",
        json!({ "type": "object", "properties": {} }),
        Arc::new(CurrentDate),
    ))?;
    catalog.register(ToolDescriptor::new(
        "filesystem.list_dir",
        "List files and directories at the given path. Returns name, type \
         (file/dir), size, and modification date for each entry. Use ~/path \
         for home-relative paths.",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path to list, e.g. ~/Desktop" }
            },
            "required": ["path"]
        }),
        Arc::new(ListDir),
    ))?;
    catalog.register(ToolDescriptor::new(
        "filesystem.read_file",
        "Read the text contents of a file at the given path. Only works for text files.",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read, e.g. ~/Desktop/notes.txt" }
            },
            "required": ["path"]
        }),
        Arc::new(ReadFile),
    ))?;
    catalog.register(ToolDescriptor::new(
        "filesystem.search_files",
        "Search for files under a directory whose name contains a pattern \
         and/or has a given extension (e.g. txt, pdf).",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to search, e.g. ~/Desktop" },
                "pattern": { "type": "string", "description": "Case-insensitive name substring" },
                "extension": { "type": "string", "description": "File extension without the dot" },
                "max_results": { "type": "integer" }
            },
            "required": ["path"]
        }),
        Arc::new(SearchFiles),
    ))?;
    Ok(())
}

// ─── Clock ───────────────────────────────────────────────────────────────────

struct CurrentTime;

#[async_trait]
impl ToolCapability for CurrentTime {
    async fn invoke(&self, _arguments: Value) -> Result<Value, ToolError> {
        let now = Local::now();
        Ok(json!({
            "text": format!("It's {}.", now.format("%-I:%M %p")),
            "time": now.format("%H:%M:%S").to_string(),
            "timezone": now.format("%:z").to_string(),
        }))
    }
}

struct CurrentDate;

#[async_trait]
impl ToolCapability for CurrentDate {
    async fn invoke(&self, _arguments: Value) -> Result<Value, ToolError> {
        let now = Local::now();
        Ok(json!({
            "text": format!("Today is {}.", now.format("%A, %B %-d, %Y")),
            "date": now.format("%Y-%m-%d").to_string(),
            "weekday": now.format("%A").to_string(),
        }))
    }
}

// ─── Filesystem ──────────────────────────────────────────────────────────────

/// A single file/directory entry.
#[derive(Debug, Clone, Serialize)]
struct FileEntry {
    name: String,
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: u64,
    modified: String,
}

fn resolve_path(raw: &str) -> PathBuf {
    PathBuf::from(expand_tilde(raw))
}

fn required_str<'a>(tool: &str, arguments: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::invalid(tool, format!("'{field}' must be a string")))
}

/// Hidden by the Unix dot-prefix convention.
fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

struct ListDir;

#[async_trait]
impl ToolCapability for ListDir {
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        const TOOL: &str = "filesystem.list_dir";
        let raw = required_str(TOOL, &arguments, "path")?;
        let dir_path = resolve_path(raw);

        if !dir_path.is_dir() {
            return Err(ToolError::failed(TOOL, format!("not a directory: {raw}")));
        }

        let mut read_dir = tokio::fs::read_dir(&dir_path)
            .await
            .map_err(|e| ToolError::failed(TOOL, format!("failed to read directory: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| ToolError::failed(TOOL, format!("failed to read entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_hidden(&name) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let entry_type = if metadata.is_dir() { "dir" } else { "file" };
            let modified = metadata
                .modified()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            entries.push(FileEntry {
                name,
                entry_type,
                size: metadata.len(),
                modified,
            });
        }

        // Directories first, then files, both alphabetically.
        entries.sort_by(|a, b| {
            (b.entry_type == "dir")
                .cmp(&(a.entry_type == "dir"))
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        Ok(json!({
            "path": dir_path.display().to_string(),
            "count": entries.len(),
            "entries": entries,
        }))
    }
}

struct ReadFile;

#[async_trait]
impl ToolCapability for ReadFile {
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        const TOOL: &str = "filesystem.read_file";
        let raw = required_str(TOOL, &arguments, "path")?;
        let path = resolve_path(raw);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::failed(TOOL, format!("error reading {raw}: {e}")))?;

        let total_chars = content.len();
        let truncated = total_chars > MAX_READ_CHARS;
        let content = if truncated {
            truncate_utf8(&content, MAX_READ_CHARS).to_string()
        } else {
            content
        };

        Ok(json!({
            "path": path.display().to_string(),
            "content": content,
            "truncated": truncated,
            "total_chars": total_chars,
        }))
    }
}

struct SearchFiles;

#[async_trait]
impl ToolCapability for SearchFiles {
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        const TOOL: &str = "filesystem.search_files";
        let root = resolve_path(required_str(TOOL, &arguments, "path")?);
        if !root.is_dir() {
            return Err(ToolError::failed(
                TOOL,
                format!("not a directory: {}", root.display()),
            ));
        }

        let pattern = arguments
            .get("pattern")
            .and_then(|v| v.as_str())
            .map(str::to_lowercase);
        let extension = arguments
            .get("extension")
            .and_then(|v| v.as_str())
            .map(|e| e.trim_start_matches('.').to_lowercase());
        let max_results = arguments
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let search_root = root.clone();
        let (matches, truncated) = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let truncated = walk(
                &search_root,
                0,
                pattern.as_deref(),
                extension.as_deref(),
                max_results,
                &mut matches,
            );
            (matches, truncated)
        })
        .await
        .map_err(|e| ToolError::failed(TOOL, format!("search task failed: {e}")))?;

        Ok(json!({
            "path": root.display().to_string(),
            "matches": matches,
            "truncated": truncated,
        }))
    }
}

/// Depth-limited walk collecting matching file paths. Returns `true` when the
/// result cap was hit.
fn walk(
    dir: &Path,
    depth: usize,
    pattern: Option<&str>,
    extension: Option<&str>,
    max_results: usize,
    out: &mut Vec<String>,
) -> bool {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return false;
    };
    let mut entries: Vec<_> = read_dir.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            if depth + 1 < MAX_SEARCH_DEPTH
                && walk(&path, depth + 1, pattern, extension, max_results, out)
            {
                return true;
            }
            continue;
        }

        let lower = name.to_lowercase();
        let name_ok = pattern.map(|p| lower.contains(p)).unwrap_or(true);
        let ext_ok = extension
            .map(|ext| {
                path.extension()
                    .map(|e| e.to_string_lossy().to_lowercase() == ext)
                    .unwrap_or(false)
            })
            .unwrap_or(true);

        if name_ok && ext_ok {
            if out.len() >= max_results {
                return true;
            }
            out.push(path.display().to_string());
        }
    }
    false
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        register_builtin_tools(&mut catalog).unwrap();
        catalog
    }

    #[test]
    fn test_registers_all_builtins_in_order() {
        assert_eq!(
            catalog().tool_names(),
            vec![
                "clock.current_time",
                "clock.current_date",
                "filesystem.list_dir",
                "filesystem.read_file",
                "filesystem.search_files",
            ]
        );
    }

    #[tokio::test]
    async fn test_current_time_has_clock_text() {
        let out = catalog().invoke("clock.current_time", json!({})).await.unwrap();
        let time = out["time"].as_str().unwrap();
        assert_eq!(time.len(), 8);
        assert_eq!(time.matches(':').count(), 2);
        assert!(out["text"].as_str().unwrap().starts_with("It's "));
    }

    #[tokio::test]
    async fn test_list_dir_dirs_first_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join(".secret"), "x").unwrap();
        std::fs::create_dir(dir.path().join("zeta")).unwrap();

        let out = catalog()
            .invoke(
                "filesystem.list_dir",
                json!({ "path": dir.path().to_string_lossy() }),
            )
            .await
            .unwrap();
        let entries = out["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "zeta");
        assert_eq!(entries[0]["type"], "dir");
        assert_eq!(entries[1]["name"], "b.txt");
    }

    #[tokio::test]
    async fn test_list_dir_missing_directory_fails() {
        let err = catalog()
            .invoke("filesystem.list_dir", json!({ "path": "/definitely/not/here" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_read_file_truncates_large_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "a".repeat(MAX_READ_CHARS + 100)).unwrap();

        let out = catalog()
            .invoke("filesystem.read_file", json!({ "path": path.to_string_lossy() }))
            .await
            .unwrap();
        assert_eq!(out["truncated"], true);
        assert_eq!(out["content"].as_str().unwrap().len(), MAX_READ_CHARS);
    }

    #[tokio::test]
    async fn test_read_file_requires_path() {
        let err = catalog()
            .invoke("filesystem.read_file", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_search_files_by_extension_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "n").unwrap();
        std::fs::write(dir.path().join("photo.jpg"), "p").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("todo.TXT"), "t").unwrap();

        let out = catalog()
            .invoke(
                "filesystem.search_files",
                json!({ "path": dir.path().to_string_lossy(), "extension": "txt" }),
            )
            .await
            .unwrap();
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn test_search_files_respects_max_results() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("report-{i}.md")), "r").unwrap();
        }
        let out = catalog()
            .invoke(
                "filesystem.search_files",
                json!({ "path": dir.path().to_string_lossy(), "pattern": "REPORT", "max_results": 3 }),
            )
            .await
            .unwrap();
        assert_eq!(out["matches"].as_array().unwrap().len(), 3);
        assert_eq!(out["truncated"], true);
    }
}
