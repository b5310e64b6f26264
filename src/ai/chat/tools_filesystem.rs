//! Filesystem tools
//!
//! Every path argument goes through the [`SecurityGuard`] first; nothing
//! here touches the disk with an unvalidated path.

use super::tools::{decode_args, Tool, ToolContext, ToolError};
use crate::security::SecurityGuard;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// Cap on matches reported by `search_files`
const MAX_SEARCH_RESULTS: usize = 100;

/// The five filesystem tools, sharing one guard
pub fn filesystem_tools(guard: Arc<SecurityGuard>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadFileTool::new(Arc::clone(&guard))),
        Arc::new(WriteFileTool::new(Arc::clone(&guard))),
        Arc::new(ListDirectoryTool::new(Arc::clone(&guard))),
        Arc::new(SearchFilesTool::new(Arc::clone(&guard))),
        Arc::new(CreateDirectoryTool::new(guard)),
    ]
}

fn io_error(action: &str, e: std::io::Error) -> ToolError {
    ToolError::Io(format!("failed to {}: {}", action, e))
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

pub struct ReadFileTool {
    guard: Arc<SecurityGuard>,
}

impl ReadFileTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: PathArgs = decode_args(args)?;
        let path = self.guard.validate_read(&args.path).await?;
        ctx.check_cancelled()?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_error("read file", e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

pub struct WriteFileTool {
    guard: Arc<SecurityGuard>,
}

impl WriteFileTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: WriteArgs = decode_args(args)?;
        let path = self
            .guard
            .validate_write(&args.path, args.content.len() as u64)
            .await?;
        ctx.check_cancelled()?;

        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| io_error("write file", e))?;

        debug!(path = %path.display(), bytes = args.content.len(), "Wrote file");
        Ok(format!(
            "Successfully wrote {} bytes to {}",
            args.content.len(),
            args.path
        ))
    }
}

pub struct ListDirectoryTool {
    guard: Arc<SecurityGuard>,
}

impl ListDirectoryTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the contents of a directory"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the directory to list"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: PathArgs = decode_args(args)?;
        let dir = self.guard.validate_path(&args.path)?;

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error("read directory", e))?;

        // (name, is_dir, size)
        let mut entries: Vec<(String, bool, u64)> = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error("read directory", e))?
        {
            ctx.check_cancelled()?;
            if self.guard.is_denied(&entry.path()) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            entries.push((
                entry.file_name().to_string_lossy().into_owned(),
                metadata.is_dir(),
                metadata.len(),
            ));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = format!("Contents of {}:\n", args.path);
        for (name, is_dir, size) in entries {
            if is_dir {
                let _ = writeln!(out, "[DIR]  {}/", name);
            } else {
                let _ = writeln!(out, "[FILE] {} ({} bytes)", name, size);
            }
        }
        Ok(out)
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    path: String,
    pattern: String,
}

pub struct SearchFilesTool {
    guard: Arc<SecurityGuard>,
}

impl SearchFilesTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for files matching a pattern"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory to search in"
                },
                "pattern": {
                    "type": "string",
                    "description": "The file name pattern to search for (supports wildcards like *.txt)"
                }
            },
            "required": ["path", "pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: SearchArgs = decode_args(args)?;
        let dir = self.guard.validate_path(&args.path)?;
        let matcher = glob_to_regex(&args.pattern)?;

        let guard = Arc::clone(&self.guard);
        let cancel = ctx.cancel.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let root = guard.root().to_path_buf();
            let mut found = Vec::new();

            let walker = WalkDir::new(&dir)
                .into_iter()
                .filter_entry(|e| !guard.is_denied(e.path()))
                .filter_map(|e| e.ok());

            for entry in walker {
                if cancel.is_cancelled() {
                    return Err(ToolError::Cancelled);
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if matcher.is_match(&name) {
                    found.push(display_path(entry.path(), &root));
                    if found.len() >= MAX_SEARCH_RESULTS {
                        break;
                    }
                }
            }
            Ok(found)
        })
        .await
        .map_err(|e| ToolError::Failed(format!("search task failed: {}", e)))??;

        if matches.is_empty() {
            return Ok(format!(
                "No files matching pattern '{}' found in {}",
                args.pattern, args.path
            ));
        }

        let mut out = format!(
            "Found {} files matching pattern '{}':\n",
            matches.len(),
            args.pattern
        );
        for path in &matches {
            let _ = writeln!(out, "- {}", path);
        }
        if matches.len() >= MAX_SEARCH_RESULTS {
            let _ = writeln!(out, "(results truncated at {})", MAX_SEARCH_RESULTS);
        }
        Ok(out)
    }
}

pub struct CreateDirectoryTool {
    guard: Arc<SecurityGuard>,
}

impl CreateDirectoryTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a new directory"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path of the directory to create"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: PathArgs = decode_args(args)?;
        let dir = self.guard.validate_path(&args.path)?;
        ctx.check_cancelled()?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create directory", e))?;
        Ok(format!("Successfully created directory: {}", args.path))
    }
}

/// Path relative to the sandbox root when possible
fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Convert a file name glob (`*`, `?`, `[...]`) to an anchored regex
fn glob_to_regex(glob: &str) -> Result<Regex, ToolError> {
    let mut regex = String::from("^");
    let mut in_class = false;

    for c in glob.chars() {
        match c {
            '*' if !in_class => regex.push_str("[^/]*"),
            '?' if !in_class => regex.push_str("[^/]"),
            '[' if !in_class => {
                in_class = true;
                regex.push('[');
            }
            '!' if in_class && regex.ends_with('[') => regex.push('^'),
            ']' if in_class => {
                in_class = false;
                regex.push(']');
            }
            '\\' if in_class => regex.push_str("\\\\"),
            c if in_class => regex.push(c),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }

    if in_class {
        return Err(ToolError::InvalidArguments(format!(
            "invalid pattern '{}': unclosed '['",
            glob
        )));
    }

    regex.push('$');
    Regex::new(&regex)
        .map_err(|e| ToolError::InvalidArguments(format!("invalid pattern '{}': {}", glob, e)))
}
