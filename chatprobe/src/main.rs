//! chatprobe - end-to-end probe for a chat completion service
//!
//! Sends one message the way the web UI does, waits for the reply, and
//! checks the stored chat would render it without a stuck spinner.
//!
//! Settings are layered, later sources winning:
//! - Config: $XDG_CONFIG_HOME/chatprobe/config.toml (~/.config/chatprobe/config.toml)
//! - Env file: ./.env, or the path given with --env-file
//! - Process environment: BASE, TOKEN, MODEL, CHECK_CONTINUABLE, PUBLISH_ARTIFACTS, ARTIFACTS_DIR
//! - Command line flags
//!
//! Logs go to $XDG_STATE_HOME/chatprobe/chatprobe.log (~/.local/state/chatprobe/chatprobe.log).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chatprobe_core::{ChatClient, Config, Workflow, WorkflowReport};
use clap::{ArgAction, Parser};

#[derive(Parser)]
#[command(name = "chatprobe")]
#[command(about = "Probe a chat service end to end and verify the UI state")]
#[command(version)]
struct Args {
    /// Message to send (default: from config)
    message: Option<String>,

    /// Env file with BASE, TOKEN and MODEL (default: ./.env if present)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/chatprobe/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip publishing generated files to a knowledge collection
    #[arg(long)]
    no_artifacts: bool,

    /// Append a follow-up message after verification
    #[arg(long)]
    check_continuable: bool,

    /// Readiness poll attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds between readiness polls
    #[arg(long)]
    interval: Option<u64>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Applies command line overrides on top of the layered config
    fn apply(&self, config: &mut Config) {
        if self.no_artifacts {
            config.artifacts.enabled = false;
        }
        if self.check_continuable {
            config.workflow.check_continuable = true;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.polling.max_attempts = max_attempts;
        }
        if let Some(interval) = self.interval {
            config.polling.interval_secs = interval;
        }
        match self.verbose {
            0 => {}
            1 => config.logging.level = "debug".to_string(),
            _ => config.logging.level = "trace".to_string(),
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = Config::resolve(args.config.as_deref(), args.env_file.as_deref())
        .context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let _log_guard =
        chatprobe_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("chatprobe starting");

    let message = args
        .message
        .clone()
        .unwrap_or_else(|| config.workflow.default_message.clone());

    let client = ChatClient::new(&config.server).context("failed to create HTTP client")?;
    let workflow = Workflow::new(&client, &config).context("failed to set up workflow")?;

    println!("Configuration:");
    println!("  BASE: {}", client.base_url());
    println!("  MODEL: {}", config.server.model.as_deref().unwrap_or(""));
    println!("  SESSION: {}", workflow.session_id());
    println!("  Message: {}", message);
    println!(
        "  Artifacts: {}",
        if config.artifacts.enabled {
            config.artifacts.dir().display().to_string()
        } else {
            "disabled".to_string()
        }
    );
    println!();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let report = runtime.block_on(workflow.run(&message));

    print_summary(&report, &client);

    if !report.success {
        return Ok(ExitCode::FAILURE);
    }

    let output = result_file_name(chrono::Local::now());
    write_report(&report, Path::new(&output))?;
    println!("Full test results saved to: {}", output);
    Ok(ExitCode::SUCCESS)
}

fn print_summary(report: &WorkflowReport, client: &ChatClient) {
    println!();
    if !report.success {
        println!(
            "TEST FAILED: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
        if let Some(chat_id) = &report.chat_id {
            println!("Chat left on server: {}", client.chat_url(chat_id));
        }
        return;
    }

    println!("TEST PASSED - assistant reply is visible");
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    println!();
    println!("Assistant response:");
    println!();
    println!("{}", report.assistant_response.as_deref().unwrap_or(""));
    println!();

    if let Some(chat_id) = &report.chat_id {
        println!("Access your chat here:");
        println!("  {}", client.chat_url(chat_id));
    }
    if let Some(knowledge_id) = &report.knowledge_id {
        println!(
            "Knowledge collection: {} ({} file(s))",
            knowledge_id,
            report.attached_file_ids.len()
        );
    }
    if let Some(continuable) = report.continuable {
        println!("Continuable: {}", if continuable { "yes" } else { "no" });
    }
    println!();
}

/// `test_result_YYYYmmdd_HHMMSS.json`
fn result_file_name<Tz>(now: chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("test_result_{}.json", now.format("%Y%m%d_%H%M%S"))
}

fn write_report(report: &WorkflowReport, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
