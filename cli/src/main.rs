//! steward: run agents, trigger tasks, and serve the scheduler from a TOML
//! configuration.
//!
//! Tool calls are dry-run: each approved call is printed and echoed back as
//! its own result. Approvals are asked for on the terminal unless
//! `--auto-approve` is given.
//!
//! Usage:
//!   steward --config steward.toml run --agent file-organizer --goal "tidy ~/Downloads"
//!   steward --config steward.toml trigger --task nightly-tidy
//!   steward --config steward.toml health
//!   steward --config steward.toml models --backend ollama
//!   steward --config steward.toml serve

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use steward_contracts::{
    config::EngineConfig,
    error::StewardResult,
    job::{JobResult, JobStatus},
};
use steward_core::traits::{ToolExecutor, ToolOutcome};
use steward_engine::Engine;
use steward_policy::{approval_channel, inbox::DEFAULT_INBOX_CAPACITY, ApprovalInbox, Redactor, StaticDecisionSource};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Agent orchestration with human approval for risky tool calls.
#[derive(Parser)]
#[command(name = "steward", version, about = "Agent orchestration & approval engine")]
struct Cli {
    /// Engine configuration file.
    #[arg(long, short, default_value = "steward.toml")]
    config: PathBuf,

    /// Approve every tool call without asking.
    #[arg(long)]
    auto_approve: bool,

    /// Append approval decisions to this JSONL journal.
    #[arg(long)]
    audit_journal: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one agent against one goal.
    Run {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        goal: String,
        /// Extra context handed to the planner.
        #[arg(long)]
        context: Option<String>,
    },
    /// Fire a configured automation task now.
    Trigger {
        #[arg(long)]
        task: String,
    },
    /// Probe every configured backend.
    Health,
    /// List the models a backend offers.
    Models {
        #[arg(long)]
        backend: String,
    },
    /// Run the scheduler until Ctrl-C.
    Serve,
}

// ── Dry-run tools ─────────────────────────────────────────────────────────────

struct DryRunTools;

#[async_trait]
impl ToolExecutor for DryRunTools {
    async fn execute(&self, tool: &str, params: &Value) -> StewardResult<ToolOutcome> {
        println!("  [dry-run] {} {}", tool, params);
        Ok(ToolOutcome::ok(json!({ "dry_run": true, "tool": tool, "params": params })))
    }
}

// ── Terminal approvals ────────────────────────────────────────────────────────

/// Answer approvals from stdin on a dedicated OS thread, so a waiting human
/// never blocks the runtime. Requests are shown redacted.
fn spawn_terminal_approver(mut inbox: ApprovalInbox, redactor: Redactor) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        while let Some(pending) = inbox.blocking_recv() {
            let req = redactor.redact_request(pending.request());
            println!();
            println!("Approval required ({} risk, {})", req.risk_level, req.tool_type);
            println!("  tool:    {}", req.tool_name);
            println!("  params:  {}", req.params);
            println!("  impact:  {}", req.impact);
            println!("  source:  {}", req.source);
            print!("Approve? [y]es once / [a]lways / [N]o (timeout {}s): ", req.timeout_secs);
            let _ = io::stdout().flush();

            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                pending.reject("terminal", "could not read answer");
                continue;
            }
            let delivered = match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => pending.approve_once("terminal"),
                "a" | "always" => pending.approve_always("terminal"),
                _ => pending.reject("terminal", "rejected at terminal"),
            };
            if !delivered {
                println!("  (too late: the request already timed out)");
            }
        }
    });
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("steward error: {}", e);
            std::process::exit(2);
        }
    }
}

/// Returns false when the command completed but reported a failure.
async fn run(cli: Cli) -> StewardResult<bool> {
    let config = EngineConfig::from_file(&cli.config)?;
    let redactor = Redactor::from_config(&config.security.redact);

    let mut builder = Engine::builder(config).tool_executor(Arc::new(DryRunTools));
    if cli.auto_approve {
        builder = builder.decision_source(Arc::new(StaticDecisionSource::approve_all("cli --auto-approve")));
    } else {
        let (source, inbox) = approval_channel(DEFAULT_INBOX_CAPACITY);
        spawn_terminal_approver(inbox, redactor);
        builder = builder.decision_source(Arc::new(source));
    }
    if let Some(path) = &cli.audit_journal {
        builder = builder.audit_journal(path);
    }
    let engine = builder.build()?;

    match cli.command {
        Command::Run { agent, goal, context } => {
            let result = engine.run_agent(&agent, &goal, context.as_deref()).await?;
            Ok(print_job(&result))
        }
        Command::Trigger { task } => {
            let result = engine.trigger_task_manually(&task).await?;
            Ok(print_job(&result))
        }
        Command::Health => {
            let health = engine.check_health().await;
            for (name, ok) in &health {
                println!("{:<16} {}", name, if *ok { "healthy" } else { "unreachable" });
            }
            Ok(health.values().any(|ok| *ok))
        }
        Command::Models { backend } => {
            for model in engine.list_models(&backend).await? {
                println!("{}", model);
            }
            Ok(true)
        }
        Command::Serve => {
            let spawned = engine.start_scheduler()?;
            println!("scheduler running {} task(s); Ctrl-C to stop", spawned);
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("could not listen for Ctrl-C: {}", e);
            }
            info!("shutting down");
            engine.shutdown().await;
            Ok(true)
        }
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_job(result: &JobResult) -> bool {
    println!();
    println!("job {}  {}", result.job_id, result.status.as_str());
    for step in &result.steps {
        let approval = step
            .approval
            .map(|d| format!(" [{:?}]", d).to_lowercase())
            .unwrap_or_default();
        println!("  {:>2}. {:<24} {}{}", step.step_index, step.name, step.status.as_str(), approval);
        if let Some(err) = &step.error {
            println!("      error: {}", err);
        }
    }
    if let Some(summary) = &result.summary {
        println!();
        println!("{}", summary);
    }
    if let Some(err) = &result.error {
        println!();
        println!("error: {}", err);
    }
    result.status == JobStatus::Success
}
