use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use dividend_token::{
    replay::{read_log, replay, LogEntry, ReplayReport},
    TokenConfig,
};

#[derive(Parser)]
#[command(name = "divtoken", version, about = "Replay and inspect dividend token operation logs")]
struct Cli {
    /// Log every bookkeeping step
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Token configuration (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a log and print a summary
    Replay {
        log: PathBuf,
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay a log and compare its state root
    Verify {
        log: PathBuf,
        #[arg(long)]
        root: String,
    },
    /// Replay a log and list current holders
    Holders { log: PathBuf },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<TokenConfig> {
    match path {
        Some(path) => TokenConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(TokenConfig::default()),
    }
}

fn load_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let file = File::open(path).with_context(|| format!("opening log {}", path.display()))?;
    read_log(BufReader::new(file)).with_context(|| format!("reading log {}", path.display()))
}

fn run_replay(config: TokenConfig, log: &Path) -> Result<ReplayReport> {
    let entries = load_entries(log)?;
    info!(entries = entries.len(), log = %log.display(), "replaying");
    let report = replay(config, &entries)?;
    Ok(report)
}

fn replay_cmd(config: TokenConfig, log: &Path, json: bool) -> Result<()> {
    let report = run_replay(config, log)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    let snap = &report.snapshot;
    println!("{} ({})", snap.name, snap.symbol);
    println!("  applied:            {}", report.applied);
    println!("  rejected:           {}", report.rejected.len());
    for rejection in &report.rejected {
        println!("    #{}: {}", rejection.seq, rejection.error);
    }
    println!("  total supply:       {}", snap.total_supply);
    println!("  holders:            {}", snap.holders.len());
    println!("  native reserve:     {}", snap.native_reserve);
    println!("  distributed:        {}", snap.total_distributed);
    println!("  withdrawn:          {}", snap.total_withdrawn);
    println!("  state root:         {}", snap.state_root);
    Ok(())
}

fn verify_cmd(config: TokenConfig, log: &Path, expected: &str) -> Result<()> {
    let report = run_replay(config, log)?;
    let expected = expected.trim().trim_start_matches("0x").to_lowercase();
    if report.snapshot.state_root != expected {
        bail!(
            "state root mismatch: expected {expected}, replay produced {}",
            report.snapshot.state_root
        );
    }
    println!("OK {}", report.snapshot.state_root);
    Ok(())
}

fn holders_cmd(config: TokenConfig, log: &Path) -> Result<()> {
    let entries = load_entries(log)?;
    let mut replayer = dividend_token::replay::Replayer::new(config)?;
    replayer.run(&entries)?;
    let token = replayer.token();
    token
        .verify_invariants()
        .context("replayed state violates token invariants")?;
    for (position, holder) in token.holders().iter().enumerate() {
        println!(
            "{position:>4} {holder} balance={} withdrawable={}",
            token.balance_of(holder),
            token.withdrawable_dividend_of(holder)?
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Replay { log, json } => replay_cmd(config, &log, json),
        Command::Verify { log, root } => verify_cmd(config, &log, &root),
        Command::Holders { log } => holders_cmd(config, &log),
    }
}
