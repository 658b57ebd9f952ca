mod editor;
mod tools;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use editor::ExternalDiffEditor;
use forge_scheduler::{
    ApprovalMode, ChannelObserver, CompletedToolCall, ConfirmationBus,
    ConfirmationHandler, ConsoleConfirmationHandler, NonInteractivePolicy, NoopObserver,
    Scheduler, SchedulerConfig, SchedulerEvent, SchedulerObserver, ToolCallRequest,
    ToolCallSnapshot, ToolCallStatus, scheduler_event_channel,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const APPROVAL_MODE_ENV: &str = "FORGE_APPROVAL_MODE";

#[derive(Parser, Debug)]
#[command(name = "forge-cli")]
#[command(about = "In-process CLI host for the Forge tool scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    Tools(ToolsArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long)]
    batch_file: Option<PathBuf>,
    #[arg(long)]
    batch_json: Option<String>,
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    approval_mode: Option<String>,
    #[arg(long)]
    allowlist: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ConfirmMode::Auto)]
    confirm: ConfirmMode,
    #[arg(long = "no-stream-events", action = ArgAction::SetTrue)]
    no_stream_events: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    event_json: bool,
}

#[derive(clap::Args, Debug)]
struct ToolsArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ConfirmMode {
    Auto,
    Console,
    Reject,
    Accept,
}

/// One entry of a batch file. Missing call ids are generated.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    #[serde(default)]
    call_id: Option<String>,
    tool_name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    raw_arguments: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Tools(args) => tools_command(args),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

/// Diagnostics go to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

async fn run_command(args: RunArgs) -> Result<ExitCode, String> {
    let requests = load_batch(args.batch_file.as_deref(), args.batch_json.as_deref())?;
    let config = build_config(&args)?;
    let root = args
        .root
        .canonicalize()
        .map_err(|e| format!("invalid root '{}': {e}", args.root.display()))?;

    let (observer, event_task) = event_stream(!args.no_stream_events, args.event_json);
    let mut builder = Scheduler::builder(Arc::new(tools::local_registry(&root)))
        .config(config.clone())
        .observer(observer);
    if config.interactive {
        let (bus, inbox) = ConfirmationBus::channel();
        let handler: Arc<dyn ConfirmationHandler> = Arc::new(ConsoleConfirmationHandler::new());
        inbox.spawn(handler);
        builder = builder
            .confirmation_bus(bus)
            .editor(Arc::new(ExternalDiffEditor));
    }
    let scheduler = builder.build().map_err(|e| e.to_string())?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted; cancelling tool calls");
                cancel.cancel();
            }
        }
    });

    let completed = scheduler
        .run(requests, cancel)
        .await
        .map_err(|e| e.to_string())?;
    interrupt.abort();
    drop(scheduler);

    if let Some(task) = event_task {
        task.await.map_err(|e| e.to_string())?;
    }

    print_summary(&completed);
    Ok(exit_code_for(&completed))
}

fn tools_command(args: ToolsArgs) -> Result<ExitCode, String> {
    let definitions = tools::local_registry(&args.root).definitions();
    if args.json {
        let json = serde_json::to_string_pretty(&definitions).map_err(|e| e.to_string())?;
        println!("{json}");
    } else {
        for definition in definitions {
            println!("{}: {}", definition.name, definition.description);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn load_batch(
    batch_file: Option<&Path>,
    batch_json: Option<&str>,
) -> Result<Vec<ToolCallRequest>, String> {
    let raw = match (batch_file, batch_json) {
        (Some(_), Some(_)) => {
            return Err("provide only one of --batch-file or --batch-json".to_string());
        }
        (None, None) => return Err("one of --batch-file or --batch-json is required".to_string()),
        (Some(path), None) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed reading batch file '{}': {e}", path.display()))?,
        (None, Some(raw)) => raw.to_string(),
    };
    let entries: Vec<BatchEntry> =
        serde_json::from_str(&raw).map_err(|e| format!("invalid batch: {e}"))?;
    Ok(entries
        .into_iter()
        .map(|entry| ToolCallRequest {
            call_id: entry
                .call_id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
            tool_name: entry.tool_name,
            arguments: entry.arguments,
            raw_arguments: entry.raw_arguments,
        })
        .collect())
}

/// Settings file, then `FORGE_APPROVAL_MODE`, then flags.
fn build_config(args: &RunArgs) -> Result<SchedulerConfig, String> {
    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => SchedulerConfig::default(),
    };
    if let Ok(raw) = std::env::var(APPROVAL_MODE_ENV) {
        config.approval_mode = raw
            .parse::<ApprovalMode>()
            .map_err(|e| format!("{APPROVAL_MODE_ENV}: {e}"))?;
    }
    if let Some(raw) = &args.approval_mode {
        config.approval_mode = raw.parse::<ApprovalMode>()?;
    }
    if let Some(path) = &args.allowlist {
        config.allowlist_path = Some(path.clone());
    }
    match args.confirm {
        ConfirmMode::Auto => config.interactive = config.interactive || is_interactive_terminal(),
        ConfirmMode::Console => config.interactive = true,
        ConfirmMode::Reject => {
            config.interactive = false;
            config.non_interactive_policy = NonInteractivePolicy::Reject;
        }
        ConfirmMode::Accept => {
            config.interactive = false;
            config.non_interactive_policy = NonInteractivePolicy::AutoAccept;
        }
    }
    Ok(config)
}

fn event_stream(
    stream_events: bool,
    event_json: bool,
) -> (Arc<dyn SchedulerObserver>, Option<tokio::task::JoinHandle<()>>) {
    if !stream_events {
        return (Arc::new(NoopObserver), None);
    }

    let (observer, mut rx): (ChannelObserver, _) = scheduler_event_channel();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event_json {
                println!("{}", event_json_line(&event));
            } else {
                print_event_text(&event);
            }
        }
    });
    (Arc::new(observer), Some(task))
}

fn event_json_line(event: &SchedulerEvent) -> Value {
    match event {
        SchedulerEvent::Output { call_id, fragment } => {
            json!({"event": "output", "call_id": call_id, "fragment": fragment})
        }
        SchedulerEvent::Snapshot(calls) => json!({"event": "snapshot", "calls": calls}),
        SchedulerEvent::BatchComplete(calls) => json!({"event": "batch_complete", "calls": calls}),
    }
}

fn print_event_text(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::Output { call_id, fragment } => {
            eprint!("[{call_id}] {fragment}");
        }
        SchedulerEvent::Snapshot(calls) => {
            println!("[event] {}", snapshot_line(calls));
        }
        SchedulerEvent::BatchComplete(calls) => {
            println!("[event] batch complete ({} calls)", calls.len());
        }
    }
}

fn snapshot_line(calls: &[ToolCallSnapshot]) -> String {
    calls
        .iter()
        .map(|call| format!("{}={}", call.request.call_id, status_label(call.status)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_summary(completed: &[CompletedToolCall]) {
    for call in completed {
        println!(
            "{} {} {}",
            call.request.call_id,
            call.request.tool_name,
            status_label(call.status)
        );
        let content = match &call.response.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        for line in content.lines() {
            println!("  {line}");
        }
    }
}

fn status_label(status: ToolCallStatus) -> &'static str {
    match status {
        ToolCallStatus::Validating => "validating",
        ToolCallStatus::Scheduled => "scheduled",
        ToolCallStatus::AwaitingConfirmation => "awaiting_confirmation",
        ToolCallStatus::Executing => "executing",
        ToolCallStatus::Success => "success",
        ToolCallStatus::Error => "error",
        ToolCallStatus::Cancelled => "cancelled",
    }
}

fn exit_code_for(completed: &[CompletedToolCall]) -> ExitCode {
    if completed
        .iter()
        .all(|call| call.status == ToolCallStatus::Success)
    {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}
