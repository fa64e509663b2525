//! compass-handler: hook entry point for the COMPASS methodology.
//!
//! ## Subcommands
//!
//! - `handle` (default): read one hook event from stdin, write one JSON object
//! - `status`: liveness signals, token ledger and the status text as JSON;
//!   a completion report is shown once and then removed
//! - `cleanup`: remove session state if every liveness signal is stale
//! - `report`: human-readable token report for the current session

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;

use compass_hooks::handler::resolve_project_root;
use compass_hooks::logging::init_tracing;
use compass_hooks::{handle_event_at, load_config, read_event, Compass, PolicyContext, TokenReport};

#[derive(Parser)]
#[command(name = "compass-handler")]
#[command(about = "COMPASS methodology hook handler")]
#[command(version)]
struct Cli {
    /// Project root; defaults to the event cwd, then CLAUDE_PROJECT_DIR
    #[arg(long, global = true, value_name = "DIR")]
    project_dir: Option<PathBuf>,

    /// Exit with status 2 (reason on stderr) when a tool call is denied
    #[arg(long, global = true)]
    exit_code_on_deny: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a hook event (reads JSON from stdin)
    Handle,
    /// Print session liveness and the token ledger as JSON
    Status,
    /// Clear session state if the session is stale
    Cleanup,
    /// Print the token usage report
    Report,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command.as_ref().unwrap_or(&Commands::Handle) {
        Commands::Handle => run_handle(&cli),
        Commands::Status => run_status(&cli),
        Commands::Cleanup => run_cleanup(&cli),
        Commands::Report => run_report(&cli),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "compass-handler failed");
            eprintln!("compass-handler: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn open_compass(cli: &Cli, input_cwd: Option<&str>) -> Compass {
    let root = resolve_project_root(cli.project_dir.as_deref(), input_cwd);
    let config = load_config(&root);
    Compass::open(root, config)
}

fn run_handle(cli: &Cli) -> Result<i32> {
    // The input limit is configurable per project, but the event's cwd is
    // only known after reading it.
    let provisional_root = resolve_project_root(cli.project_dir.as_deref(), None);
    let max_input_bytes = load_config(&provisional_root).max_input_bytes;

    let input = match read_event(io::stdin().lock(), max_input_bytes) {
        Ok(input) => input,
        Err(e) if e.is_input_error() => {
            eprintln!("compass-handler: {}", e);
            return Ok(1);
        }
        Err(e) => return Err(e).context("Failed to read hook input"),
    };

    let compass = open_compass(cli, input.cwd.as_deref()).with_session_id(input.session_id.clone());
    let ctx = PolicyContext::from_env(compass.config.max_validation_depth);
    let output = handle_event_at(&compass, &input, &ctx, Utc::now());

    let json = output.to_json().context("Failed to serialize hook output")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json).context("Failed to write hook output")?;
    stdout.flush().context("Failed to flush hook output")?;

    if output.is_deny() && (cli.exit_code_on_deny || compass.config.deny_exit_code) {
        if let Some(reason) = &output.permission_decision_reason {
            eprintln!("{}", reason);
        }
        return Ok(2);
    }
    Ok(0)
}

fn run_status(cli: &Cli) -> Result<i32> {
    let compass = open_compass(cli, None);
    let now = Utc::now();
    let signals = compass.oracle.active_signals_at(now);
    let summary = serde_json::json!({
        "project_root": compass.project_root().display().to_string(),
        "active": !signals.is_empty(),
        "signals": signals,
        "session": compass.oracle.read_record(),
        "ledger": compass.ledger.read(),
        "announcement": compass.status.take_announcement(),
    });
    let text = serde_json::to_string_pretty(&summary).context("Failed to serialize status")?;
    println!("{}", text);
    Ok(0)
}

fn run_cleanup(cli: &Cli) -> Result<i32> {
    let compass = open_compass(cli, None);
    let cleaned = compass.oracle.cleanup_if_stale();
    println!("{}", serde_json::json!({ "cleaned": cleaned }));
    Ok(0)
}

fn run_report(cli: &Cli) -> Result<i32> {
    let compass = open_compass(cli, None);
    match compass.ledger.read() {
        Some(ledger) => print!("{}", TokenReport::new(&ledger)),
        None => println!("No token usage recorded for this session."),
    }
    Ok(0)
}
