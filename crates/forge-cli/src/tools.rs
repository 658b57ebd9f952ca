use async_trait::async_trait;
use forge_scheduler::{
    ConfirmationDetails, OutputSink, Tool, ToolError, ToolInvocation, ToolKind, ToolOutput,
    ToolRegistry, optional_string_argument, optional_u64_argument, required_string_argument,
};
use serde_json::{Value, json};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Registry of the demo tools, all confined to `root`.
pub fn local_registry(root: &Path) -> ToolRegistry {
    let root = Arc::new(root.to_path_buf());
    let mut registry = ToolRegistry::default();
    for kind in [
        LocalToolKind::ReadFile,
        LocalToolKind::ListDir,
        LocalToolKind::WriteFile,
        LocalToolKind::DeleteFile,
        LocalToolKind::Shell,
    ] {
        registry.register(Arc::new(LocalTool {
            kind,
            root: root.clone(),
        }));
    }
    registry
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LocalToolKind {
    ReadFile,
    ListDir,
    WriteFile,
    DeleteFile,
    Shell,
}

impl LocalToolKind {
    fn name(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::ListDir => "list_dir",
            Self::WriteFile => "write_file",
            Self::DeleteFile => "delete_file",
            Self::Shell => "shell",
        }
    }

    fn tool_kind(self) -> ToolKind {
        match self {
            Self::ReadFile | Self::ListDir => ToolKind::Read,
            Self::WriteFile => ToolKind::Edit,
            Self::DeleteFile => ToolKind::Delete,
            Self::Shell => ToolKind::Execute,
        }
    }
}

struct LocalTool {
    kind: LocalToolKind,
    root: Arc<PathBuf>,
}

impl Tool for LocalTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        match self.kind {
            LocalToolKind::ReadFile => "Read a text file, optionally a window of lines.",
            LocalToolKind::ListDir => "List the entries of a directory.",
            LocalToolKind::WriteFile => "Create or overwrite a text file.",
            LocalToolKind::DeleteFile => "Delete a file.",
            LocalToolKind::Shell => "Run a shell command in the workspace root.",
        }
    }

    fn parameters(&self) -> Value {
        match self.kind {
            LocalToolKind::ReadFile => json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer"},
                    "limit": {"type": "integer"}
                },
                "required": ["path"],
                "additionalProperties": false
            }),
            LocalToolKind::ListDir => json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "additionalProperties": false
            }),
            LocalToolKind::WriteFile => json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"],
                "additionalProperties": false
            }),
            LocalToolKind::DeleteFile => json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
                "additionalProperties": false
            }),
            LocalToolKind::Shell => json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"],
                "additionalProperties": false
            }),
        }
    }

    fn kind(&self) -> ToolKind {
        self.kind.tool_kind()
    }

    fn build(&self, arguments: Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let target = match self.kind {
            LocalToolKind::Shell => {
                let command = required_string_argument(&arguments, "command")?;
                if command.trim().is_empty() {
                    return Err(ToolError::Validation("command must not be empty".to_string()));
                }
                self.root.as_ref().clone()
            }
            LocalToolKind::ListDir => {
                let path = optional_string_argument(&arguments, "path")?;
                resolve_in_root(&self.root, path.as_deref().unwrap_or("."))?
            }
            _ => resolve_in_root(&self.root, &required_string_argument(&arguments, "path")?)?,
        };
        Ok(Box::new(LocalInvocation {
            kind: self.kind,
            arguments,
            target,
        }))
    }
}

struct LocalInvocation {
    kind: LocalToolKind,
    arguments: Value,
    target: PathBuf,
}

impl LocalInvocation {
    fn display_path(&self) -> String {
        self.arguments
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string()
    }

    async fn read_file(&self) -> Result<ToolOutput, ToolError> {
        let content = read_text(&self.target).await?;
        let offset = optional_u64_argument(&self.arguments, "offset")?.unwrap_or(0) as usize;
        let limit = optional_u64_argument(&self.arguments, "limit")?;
        if offset == 0 && limit.is_none() {
            return Ok(ToolOutput::text(content));
        }
        let lines = content.lines().skip(offset);
        let window: Vec<&str> = match limit {
            Some(limit) => lines.take(limit as usize).collect(),
            None => lines.collect(),
        };
        Ok(ToolOutput::text(window.join("\n")))
    }

    async fn list_dir(&self) -> Result<ToolOutput, ToolError> {
        let mut reader = tokio::fs::read_dir(&self.target).await.map_err(|err| {
            ToolError::Execution(format!("list '{}' failed: {err}", self.display_path()))
        })?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| ToolError::Execution(err.to_string()))?
        {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(ToolOutput::text(entries.join("\n")))
    }

    async fn write_file(&self) -> Result<ToolOutput, ToolError> {
        let content = required_string_argument(&self.arguments, "content")?;
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ToolError::Execution(format!("create dir failed: {err}")))?;
        }
        tokio::fs::write(&self.target, content.as_bytes())
            .await
            .map_err(|err| {
                ToolError::Execution(format!("write '{}' failed: {err}", self.display_path()))
            })?;
        Ok(ToolOutput::text(format!(
            "wrote {} bytes to {}",
            content.len(),
            self.display_path()
        )))
    }

    async fn delete_file(&self) -> Result<ToolOutput, ToolError> {
        tokio::fs::remove_file(&self.target).await.map_err(|err| {
            ToolError::Execution(format!("delete '{}' failed: {err}", self.display_path()))
        })?;
        Ok(ToolOutput::text(format!("deleted {}", self.display_path())))
    }

    async fn shell(
        &self,
        cancel: CancellationToken,
        output: OutputSink,
    ) -> Result<ToolOutput, ToolError> {
        let command = required_string_argument(&self.arguments, "command")?;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ToolError::Execution(format!("spawn failed: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Execution("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::Execution("stderr not captured".to_string()))?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut transcript = String::new();
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ToolError::Cancelled),
                line = stdout.next_line(), if stdout_open => match line.map_err(io_error)? {
                    Some(line) => emit_line(&output, &mut transcript, &line),
                    None => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line.map_err(io_error)? {
                    Some(line) => emit_line(&output, &mut transcript, &format!("[stderr] {line}")),
                    None => stderr_open = false,
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
            status = child.wait() => status.map_err(io_error)?,
        };
        if !status.success() {
            return Err(ToolError::Execution(format!(
                "command exited with {status}\n{transcript}"
            )));
        }
        Ok(ToolOutput::text(transcript))
    }
}

#[async_trait]
impl ToolInvocation for LocalInvocation {
    fn tool_name(&self) -> &str {
        self.kind.name()
    }

    fn kind(&self) -> ToolKind {
        self.kind.tool_kind()
    }

    fn arguments(&self) -> &Value {
        &self.arguments
    }

    fn description(&self) -> String {
        match self.kind {
            LocalToolKind::ReadFile => format!("Read {}", self.display_path()),
            LocalToolKind::ListDir => format!("List {}", self.display_path()),
            LocalToolKind::WriteFile => format!("Write {}", self.display_path()),
            LocalToolKind::DeleteFile => format!("Delete {}", self.display_path()),
            LocalToolKind::Shell => format!(
                "Run `{}`",
                self.arguments
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
            ),
        }
    }

    async fn should_confirm(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Option<ConfirmationDetails>, ToolError> {
        match self.kind {
            LocalToolKind::ReadFile | LocalToolKind::ListDir => Ok(None),
            LocalToolKind::WriteFile => {
                let original = match tokio::fs::read_to_string(&self.target).await {
                    Ok(original) => original,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(err) => return Err(ToolError::Execution(err.to_string())),
                };
                let proposed = required_string_argument(&self.arguments, "content")?;
                Ok(Some(ConfirmationDetails::edit(
                    format!("Write {}", self.display_path()),
                    self.display_path(),
                    original,
                    proposed,
                )))
            }
            LocalToolKind::DeleteFile => Ok(Some(ConfirmationDetails::info(
                "Delete file",
                format!("Delete {}?", self.display_path()),
            ))),
            LocalToolKind::Shell => Ok(Some(ConfirmationDetails::exec(
                "Run shell command",
                required_string_argument(&self.arguments, "command")?,
            ))),
        }
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        output: OutputSink,
    ) -> Result<ToolOutput, ToolError> {
        match self.kind {
            LocalToolKind::ReadFile => self.read_file().await,
            LocalToolKind::ListDir => self.list_dir().await,
            LocalToolKind::WriteFile => self.write_file().await,
            LocalToolKind::DeleteFile => self.delete_file().await,
            LocalToolKind::Shell => self.shell(cancel, output).await,
        }
    }

    fn apply_modified_content(&self, edited: &str) -> Option<Value> {
        if self.kind != LocalToolKind::WriteFile {
            return None;
        }
        let mut arguments = self.arguments.clone();
        arguments["content"] = Value::String(edited.to_string());
        Some(arguments)
    }
}

fn emit_line(output: &OutputSink, transcript: &mut String, line: &str) {
    let fragment = format!("{line}\n");
    output.push(&fragment);
    transcript.push_str(&fragment);
}

fn io_error(err: std::io::Error) -> ToolError {
    ToolError::Execution(err.to_string())
}

async fn read_text(path: &Path) -> Result<String, ToolError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| ToolError::Execution(format!("read '{}' failed: {err}", path.display())))
}

/// Joins `relative` onto `root`, refusing absolute paths and `..` segments.
fn resolve_in_root(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(relative);
    let escapes = candidate.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ToolError::Validation(format!(
            "path '{relative}' must stay inside the workspace root"
        )));
    }
    Ok(root.join(candidate))
}
