#![allow(dead_code)]

use async_trait::async_trait;
use forge_scheduler::{
    ConfirmationBus, ConfirmationDetails, ConfirmationHandler, OutputSink, Scheduler,
    SchedulerConfig, SchedulerObserver, Tool, ToolError, ToolInvocation, ToolKind, ToolOutput,
    ToolRegistry, optional_u64_argument, required_string_argument,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory file table shared by the fixture tools.
#[derive(Clone, Default)]
pub struct MemoryFs {
    files: Arc<Mutex<BTreeMap<String, String>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MemoryFs {
    pub fn with_files<I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let fs = Self::default();
        for (path, content) in files {
            fs.write(path, content);
        }
        fs
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.files.lock().expect("files mutex").get(path).cloned()
    }

    pub fn write(&self, path: &str, content: &str) {
        self.files
            .lock()
            .expect("files mutex")
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.files.lock().expect("files mutex").remove(path)
    }

    fn record(&self, entry: String) {
        self.executed.lock().expect("executed mutex").push(entry);
    }

    /// `tool:argument` for every executed call, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed mutex").clone()
    }
}

pub fn registry(fs: &MemoryFs) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::default();
    registry.register(Arc::new(FixtureTool::new("read_file", ToolKind::Read, fs)));
    registry.register(Arc::new(FixtureTool::new("delete_file", ToolKind::Delete, fs)));
    registry.register(Arc::new(FixtureTool::new("edit_file", ToolKind::Edit, fs)));
    registry.register(Arc::new(FixtureTool::new("shell", ToolKind::Execute, fs)));
    registry.register(Arc::new(FixtureTool::new("sleep", ToolKind::Other, fs)));
    registry.register(Arc::new(FixtureTool::new("stream", ToolKind::Other, fs)));
    registry.register(Arc::new(FixtureTool::new("explode", ToolKind::Other, fs)));
    Arc::new(registry)
}

pub fn interactive_config() -> SchedulerConfig {
    SchedulerConfig {
        interactive: true,
        ..SchedulerConfig::default()
    }
}

/// Interactive scheduler whose confirmations are answered by `handler`.
pub fn interactive_scheduler(
    fs: &MemoryFs,
    handler: Arc<dyn ConfirmationHandler>,
    observer: Arc<dyn SchedulerObserver>,
) -> Scheduler {
    let (bus, inbox) = ConfirmationBus::channel();
    inbox.spawn(handler);
    Scheduler::builder(registry(fs))
        .config(interactive_config())
        .confirmation_bus(bus)
        .observer(observer)
        .build()
        .expect("scheduler should build")
}

pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

struct FixtureTool {
    name: &'static str,
    kind: ToolKind,
    fs: MemoryFs,
}

impl FixtureTool {
    fn new(name: &'static str, kind: ToolKind, fs: &MemoryFs) -> Self {
        Self {
            name,
            kind,
            fs: fs.clone(),
        }
    }
}

impl Tool for FixtureTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "fixture tool"
    }

    fn parameters(&self) -> Value {
        match self.name {
            "read_file" | "delete_file" => json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
                "additionalProperties": false
            }),
            "edit_file" => json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"],
                "additionalProperties": false
            }),
            "shell" => json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"]
            }),
            "sleep" => json!({
                "type": "object",
                "properties": {"millis": {"type": "integer"}, "text": {"type": "string"}},
                "required": ["millis"]
            }),
            "explode" => json!({
                "type": "object",
                "properties": {"stage": {"type": "string"}},
                "required": ["stage"]
            }),
            _ => json!({
                "type": "object",
                "properties": {"lines": {"type": "array"}, "hang": {"type": "boolean"}},
                "required": ["lines"]
            }),
        }
    }

    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn build(&self, arguments: Value) -> Result<Box<dyn ToolInvocation>, ToolError> {
        if self.name == "edit_file" && required_string_argument(&arguments, "path")?.is_empty() {
            return Err(ToolError::Validation("path must not be empty".to_string()));
        }
        if self.name == "explode" && required_string_argument(&arguments, "stage")? == "build" {
            panic!("explode while building");
        }
        Ok(Box::new(FixtureInvocation {
            name: self.name,
            kind: self.kind,
            arguments,
            fs: self.fs.clone(),
        }))
    }
}

struct FixtureInvocation {
    name: &'static str,
    kind: ToolKind,
    arguments: Value,
    fs: MemoryFs,
}

impl FixtureInvocation {
    fn string(&self, key: &str) -> Result<String, ToolError> {
        required_string_argument(&self.arguments, key)
    }
}

#[async_trait]
impl ToolInvocation for FixtureInvocation {
    fn tool_name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn arguments(&self) -> &Value {
        &self.arguments
    }

    fn description(&self) -> String {
        match self.name {
            "shell" => format!("run `{}`", self.string("command").unwrap_or_default()),
            "sleep" | "stream" | "explode" => self.name.to_string(),
            _ => format!("{} {}", self.name, self.string("path").unwrap_or_default()),
        }
    }

    async fn should_confirm(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Option<ConfirmationDetails>, ToolError> {
        match self.name {
            "delete_file" => {
                let path = self.string("path")?;
                Ok(Some(ConfirmationDetails::info(
                    "Delete file",
                    format!("Delete {path}?"),
                )))
            }
            "edit_file" => {
                let path = self.string("path")?;
                let original = self.fs.read(&path).unwrap_or_default();
                let proposed = self.string("content")?;
                Ok(Some(ConfirmationDetails::edit(
                    format!("Edit {path}"),
                    path,
                    original,
                    proposed,
                )))
            }
            "shell" => Ok(Some(ConfirmationDetails::exec(
                "Run shell command",
                self.string("command")?,
            ))),
            "explode" if self.string("stage")? == "confirm" => {
                panic!("explode while checking confirmation")
            }
            _ => Ok(None),
        }
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        output: OutputSink,
    ) -> Result<ToolOutput, ToolError> {
        match self.name {
            "read_file" => {
                let path = self.string("path")?;
                self.fs.record(format!("read_file:{path}"));
                self.fs
                    .read(&path)
                    .map(ToolOutput::text)
                    .ok_or_else(|| ToolError::Execution(format!("file not found: {path}")))
            }
            "delete_file" => {
                let path = self.string("path")?;
                self.fs.record(format!("delete_file:{path}"));
                self.fs
                    .remove(&path)
                    .map(|_| ToolOutput::text(format!("deleted {path}")))
                    .ok_or_else(|| ToolError::Execution(format!("file not found: {path}")))
            }
            "edit_file" => {
                let path = self.string("path")?;
                let content = self.string("content")?;
                self.fs.record(format!("edit_file:{path}"));
                self.fs.write(&path, &content);
                Ok(ToolOutput::text(format!("wrote {path}")))
            }
            "shell" => {
                let command = self.string("command")?;
                self.fs.record(format!("shell:{command}"));
                if command.starts_with("false") {
                    return Err(ToolError::Execution("command exited with status 1".to_string()));
                }
                Ok(ToolOutput::text(format!("ran {command}")))
            }
            "sleep" => {
                let millis = optional_u64_argument(&self.arguments, "millis")?.unwrap_or_default();
                tokio::time::sleep(Duration::from_millis(millis)).await;
                let text = self.arguments["text"].as_str().unwrap_or("done").to_string();
                self.fs.record(format!("sleep:{text}"));
                Ok(ToolOutput::text(text))
            }
            "explode" => {
                let stage = self.string("stage")?;
                if stage == "execute" {
                    output.push("about to fail");
                    panic!("explode while executing");
                }
                Ok(ToolOutput::text(format!("survived {stage}")))
            }
            _ => {
                for line in self.arguments["lines"].as_array().into_iter().flatten() {
                    output.push(line.as_str().unwrap_or_default());
                }
                if self.arguments["hang"].as_bool().unwrap_or(false) {
                    cancel.cancelled().await;
                    return Err(ToolError::Cancelled);
                }
                Ok(ToolOutput::text("streamed"))
            }
        }
    }

    fn apply_modified_content(&self, edited: &str) -> Option<Value> {
        if self.name != "edit_file" {
            return None;
        }
        Some(json!({
            "path": self.arguments["path"].clone(),
            "content": edited,
        }))
    }
}
