//! Local Tools
//!
//! File and shell tools rooted at the REPL's working directory. Paths given
//! by the model are resolved against the root and may not leave it.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use repl_core::{AgentError, ParameterSchema, Result, Tool, ToolCall, ToolOutput, ToolRegistry, ToolSchema};
use serde_json::json;
use tokio::process::Command;

/// Longest tool output handed back to the model, in characters
const MAX_OUTPUT_CHARS: usize = 20_000;

/// Working directory shared by the local tools
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = std::fs::canonicalize(&root)
            .map_err(|e| AgentError::Config(format!("workdir {} is not usable: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied path, refusing anything outside the root
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path.trim());
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize(&joined);

        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(AgentError::ToolValidation(format!("{path} is outside the working directory")))
        }
    }

    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map_or_else(|_| path.display().to_string(), |p| p.display().to_string())
    }
}

/// Lexical normalization; `..` never climbs above the root component
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn truncate(mut text: String) -> String {
    if let Some((cut, _)) = text.char_indices().nth(MAX_OUTPUT_CHARS) {
        text.truncate(cut);
        text.push_str("\n... [output truncated]");
    }
    text
}

/// Register every local tool on `registry`
pub fn register_local_tools(registry: &ToolRegistry, workspace: &Workspace) {
    let workspace = Arc::new(workspace.clone());
    registry.register(ReadFileTool(Arc::clone(&workspace)));
    registry.register(WriteFileTool(Arc::clone(&workspace)));
    registry.register(ListDirectoryTool(Arc::clone(&workspace)));
    registry.register(RunCommandTool(workspace));
}

/// Read a text file
pub struct ReadFileTool(Arc<Workspace>);

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "read_file",
            "Read a UTF-8 text file from the working directory.",
            vec![ParameterSchema::required("file_path", "string", "Path relative to the working directory")],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        let path = self.0.resolve(call.require_str("file_path")?)?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(ToolOutput::text(truncate(content)))
    }
}

/// Create or overwrite a file
pub struct WriteFileTool(Arc<Workspace>);

#[async_trait]
impl Tool for WriteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "write_file",
            "Write text to a file in the working directory, creating parent directories as needed.",
            vec![
                ParameterSchema::required("file_path", "string", "Path relative to the working directory"),
                ParameterSchema::required("content", "string", "Full file contents"),
            ],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        let path = self.0.resolve(call.require_str("file_path")?)?;
        let content = call.require_str("content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        Ok(ToolOutput::text(format!("Wrote {} bytes to {}", content.len(), self.0.display(&path)))
            .with_data(json!({"bytes": content.len()})))
    }
}

/// List a directory
pub struct ListDirectoryTool(Arc<Workspace>);

#[async_trait]
impl Tool for ListDirectoryTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "list_directory",
            "List the entries of a directory in the working directory. Directories end with '/'.",
            vec![ParameterSchema::optional("path", "string", "Directory path").with_default(json!("."))],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        let path = self.0.resolve(call.str_arg("path").unwrap_or("."))?;
        let mut reader = tokio::fs::read_dir(&path).await?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(ToolOutput::text(format!("{} is empty", self.0.display(&path))));
        }
        Ok(ToolOutput::text(entries.join("\n")))
    }
}

/// Run a shell command in the working directory
pub struct RunCommandTool(Arc<Workspace>);

#[async_trait]
impl Tool for RunCommandTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "run_command",
            "Run a shell command in the working directory and return its exit code, stdout and stderr.",
            vec![ParameterSchema::required("command", "string", "Command line passed to `sh -c`")],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        let command = call.require_str("command")?;
        tracing::debug!(command, "Running shell command");

        // The loop's tool timeout drops this future; the child dies with it
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.0.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code();

        let mut text = format!("exit code: {}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()));
        if !stdout.is_empty() {
            text.push_str(&format!("\nstdout:\n{stdout}"));
        }
        if !stderr.is_empty() {
            text.push_str(&format!("\nstderr:\n{stderr}"));
        }

        let result = ToolOutput::text(truncate(text)).with_data(json!({"exit_code": code}));
        if output.status.success() {
            Ok(result)
        } else {
            Ok(ToolOutput { is_error: true, ..result })
        }
    }
}
