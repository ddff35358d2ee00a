//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use artifact_warden::core::config::Config;
use artifact_warden::ledger::{LedgerEntry, MutationLedger, Verdict};
use artifact_warden::orchestrator::{LedgerStatus, Orchestrator};
use artifact_warden::policy::Policy;
use artifact_warden::sanitize::MutationAction;

/// Artifact Warden — compliance scanner and sanitizer for build artifacts.
#[derive(Debug, Parser)]
#[command(
    name = "warden",
    author,
    version,
    about = "Artifact Warden - build artifact compliance",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan a tree, sanitize eligible violations, and record the verdict.
    Run(RunArgs),
    /// Show recorded runs for a scan root.
    History(HistoryArgs),
    /// Replay the ledger hash chain and report its integrity.
    VerifyLedger,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Root of the artifact tree to scan.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Policy document to apply (built-in static-export policy if omitted).
    #[arg(long, value_name = "PATH")]
    policy: Option<PathBuf>,
    /// Report what would change without touching any file or the ledger.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Scan root whose history to show.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Maximum number of entries to show, most recent last.
    #[arg(long, default_value_t = 10, value_name = "N")]
    limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI. Exit code 2 is reserved for a
    /// contaminated verdict and never produced by an error.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Json(_) | Self::Io(_) => 3,
        }
    }
}

/// Dispatch CLI commands. Returns the process exit code: 0 for success or a
/// clean/sanitized run, 2 when the verdict is contaminated.
pub fn run(cli: &Cli) -> Result<i32, CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_compliance(cli, args),
        Command::History(args) => run_history(cli, args),
        Command::VerifyLedger => run_verify(cli),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

fn load_policy(path: Option<&PathBuf>) -> Result<Policy, CliError> {
    match path {
        Some(path) => Policy::load(path).map_err(|e| CliError::User(e.to_string())),
        None => Ok(Policy::static_export()),
    }
}

fn run_compliance(cli: &Cli, args: &RunArgs) -> Result<i32, CliError> {
    let mut config = load_config(cli)?;
    if args.dry_run {
        config.sanitizer.dry_run = true;
    }
    let policy = load_policy(args.policy.as_ref())?;

    let mut orchestrator = Orchestrator::new(&policy, config);
    let outcome = orchestrator
        .run(&args.root)
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let report = &outcome.report;

    match output_mode(cli) {
        OutputMode::Human => {
            let verdict = match report.verdict {
                Verdict::Clean => "CLEAN".green().bold(),
                Verdict::Sanitized => "SANITIZED".yellow().bold(),
                Verdict::Contaminated => "CONTAMINATED".red().bold(),
            };
            println!("Verdict: {verdict}");
            println!("  Root:       {}", report.scan_root.display());
            println!("  Scanned:    {} files", report.files_scanned);
            println!("  Violations: {}", report.violations.len());
            for v in &report.violations {
                println!(
                    "    [{}] {} {} ({})",
                    v.severity,
                    v.kind,
                    v.path.display(),
                    v.detail
                );
            }
            let sanitized = report
                .mutations
                .iter()
                .filter(|m| m.action == MutationAction::Sanitized)
                .count();
            let failed = report
                .mutations
                .iter()
                .filter(|m| m.action == MutationAction::Error)
                .count();
            if !report.mutations.is_empty() {
                println!("  Sanitized:  {sanitized} files ({failed} failed)");
            }
            for advisory in &report.advisories {
                println!(
                    "  Missing markers in {}: {}",
                    advisory.path.display(),
                    advisory.missing.join(", ")
                );
            }
            match &outcome.ledger_status {
                LedgerStatus::Recorded { seq } => println!("  Ledger:     entry #{seq}"),
                LedgerStatus::Skipped => println!("  Ledger:     skipped (dry-run)"),
                LedgerStatus::Failed { details } => {
                    eprintln!("  Ledger:     {} ({details})", "WRITE FAILED".red());
                }
            }
            if let Some(c) = &outcome.contradiction {
                println!(
                    "  {}: verdict {} at entry #{} regressed to contaminated",
                    "CONTRADICTION".red().bold(),
                    c.prior_verdict,
                    c.prior_seq
                );
            }
        }
        OutputMode::Json => {
            let mut payload = serde_json::to_value(report)?;
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("command".to_string(), json!("run"));
                obj.insert(
                    "contradiction".to_string(),
                    serde_json::to_value(&outcome.contradiction)?,
                );
                let ledger = match &outcome.ledger_status {
                    LedgerStatus::Recorded { seq } => json!({"recorded": true, "seq": seq}),
                    LedgerStatus::Skipped => json!({"recorded": false, "reason": "dry_run"}),
                    LedgerStatus::Failed { details } => {
                        json!({"recorded": false, "reason": details})
                    }
                };
                obj.insert("ledger".to_string(), ledger);
            }
            write_json_line(&payload)?;
        }
    }

    Ok(match report.verdict {
        Verdict::Clean | Verdict::Sanitized => 0,
        Verdict::Contaminated => 2,
    })
}

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<i32, CliError> {
    let config = load_config(cli)?;
    let ledger = MutationLedger::new(config.ledger.path);
    let mut entries = ledger
        .history(&args.root)
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    if entries.len() > args.limit {
        entries.drain(..entries.len() - args.limit);
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if entries.is_empty() {
                println!("No recorded runs for {}.", args.root.display());
            } else {
                for entry in &entries {
                    print_history_line(entry);
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "history",
                "scan_root": args.root.to_string_lossy(),
                "entries": serde_json::to_value(&entries)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(0)
}

fn print_history_line(entry: &LedgerEntry) {
    let verdict = match entry.report.verdict {
        Verdict::Clean => "clean".green(),
        Verdict::Sanitized => "sanitized".yellow(),
        Verdict::Contaminated => "contaminated".red(),
    };
    println!(
        "#{:<4} {}  {:<12}  {} violations, {} mutations",
        entry.seq,
        entry.report.timestamp.format("%Y-%m-%d %H:%M:%S"),
        verdict,
        entry.report.violations.len(),
        entry.report.mutations.len()
    );
}

fn run_verify(cli: &Cli) -> Result<i32, CliError> {
    let config = load_config(cli)?;
    let ledger = MutationLedger::new(config.ledger.path.clone());

    match ledger.verify() {
        Ok(count) => {
            match output_mode(cli) {
                OutputMode::Human => {
                    println!(
                        "{}: {count} entries verified in {}",
                        "OK".green().bold(),
                        config.ledger.path.display()
                    );
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "verify-ledger",
                        "ok": true,
                        "entries": count,
                        "path": config.ledger.path.to_string_lossy(),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(0)
        }
        Err(e) => {
            if output_mode(cli) == OutputMode::Json {
                let payload = json!({
                    "command": "verify-ledger",
                    "ok": false,
                    "error_code": e.code(),
                    "error": e.to_string(),
                });
                write_json_line(&payload)?;
            }
            Err(CliError::Runtime(format!("ledger verification failed: {e}")))
        }
    }
}

fn output_mode(cli: &Cli) -> OutputMode {
    if cli.json || !io::stdout().is_terminal() {
        OutputMode::Json
    } else {
        OutputMode::Human
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    stdout.write_all(b"\n")?;
    Ok(())
}
