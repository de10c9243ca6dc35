use crate::engine::TestEngine;
use crate::model::{RunConfig, RunResult, TestEvent, MAX_PASSES};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !v.is_finite() || v <= 1.0 {
        return Err(format!("threshold must be a finite number above 1.0 (got {s})"));
    }
    Ok(v)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "netspeed",
    version,
    about = "Averaged, spike-filtered speed tests using speedtest or speedtest-cli"
)]
pub struct Cli {
    /// Number of measured passes
    #[arg(long, env = "NETSPEED_PASSES", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=MAX_PASSES as i64))]
    pub passes: u32,

    /// Run one extra discarded pass first to let the connection settle
    #[arg(long, env = "NETSPEED_WARMUP")]
    pub warmup: bool,

    /// Keep download spikes instead of filtering them against the median
    #[arg(long, env = "NETSPEED_NO_FILTER")]
    pub no_filter: bool,

    /// Spike cutoff as a multiple of the median download
    #[arg(long, env = "NETSPEED_THRESHOLD", default_value = "2.2", value_parser = parse_threshold)]
    pub threshold: f64,

    /// Only use the native `speedtest` CLI; fail if it is not installed
    #[arg(long, env = "NETSPEED_FORCE_CLI")]
    pub force_cli: bool,

    /// Pause between consecutive backend calls
    #[arg(long, env = "NETSPEED_COOLDOWN", default_value = "0s")]
    pub cooldown: humantime::Duration,

    /// Print JSON result and exit
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Print the raw per-pass samples after the summary
    #[arg(long)]
    pub show_raw: bool,

    /// Export results as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Export results as CSV
    #[arg(long)]
    pub export_csv: Option<std::path::PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, env = "NETSPEED_AUTO_SAVE", default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Show the N most recent saved runs and exit
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if let Some(n) = args.history {
        return show_history(n, args.json);
    }

    if args.json {
        return run_json(args).await;
    }

    run_text(args).await
}

/// Generate a random identifier for a run.
fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        run_id: gen_run_id(),
        passes: args.passes,
        warmup: args.warmup,
        filter: !args.no_filter,
        threshold_factor: args.threshold,
        force_cli: args.force_cli,
        cooldown: Duration::from(args.cooldown),
    }
}

async fn run_json(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    // JSON mode has no per-pass output; events are dropped.
    let (evt_tx, _) = mpsc::unbounded_channel::<TestEvent>();
    let result = TestEngine::new(cfg).run(evt_tx).await?;

    handle_exports(&args, &result)?;

    if let Some(tx) = out_tx.as_ref() {
        let out = serde_json::to_string_pretty(&result)?;
        let _ = tx.send(OutputLine::Stdout(out));
    }

    if args.auto_save {
        if args.silent {
            crate::storage::save_run(&result).context("failed to save run results")?;
        } else if let Some(tx) = out_tx.as_ref() {
            if let Ok(p) = crate::storage::save_run(&result) {
                let _ = tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
            }
        }
    }

    drop(out_tx);
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }
    Ok(())
}

async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<TestEvent>();

    let engine = TestEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(evt_tx).await });

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            TestEvent::ProviderSelected { kind } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Using {kind}")));
            }
            TestEvent::PassStarted { label } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Running {label}…")));
            }
            TestEvent::PassCompleted { label, sample } => {
                let _ = out_tx.send(OutputLine::Stdout(crate::text_summary::pass_line(
                    label, &sample,
                )));
            }
            TestEvent::PassFailed { label, message } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("{label} failed: {message}")));
            }
            TestEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
        }
    }

    let result = match handle.await.context("test engine task failed")? {
        Ok(r) => r,
        Err(e) => {
            // Flush progress lines before the error reaches main.
            drop(out_tx);
            let _ = out_handle.await;
            return Err(e);
        }
    };

    handle_exports(&args, &result)?;
    let summary = crate::text_summary::build_text_summary(&result, args.show_raw);
    let _ = out_tx.send(OutputLine::Stdout(String::new()));
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    if args.auto_save {
        if let Ok(p) = crate::storage::save_run(&result) {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

fn show_history(limit: usize, json: bool) -> Result<()> {
    let runs = crate::storage::load_recent(limit).context("failed to load history")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No saved runs.");
        return Ok(());
    }
    for r in &runs {
        println!("{}", history_line(r));
    }
    Ok(())
}

fn history_line(r: &RunResult) -> String {
    format!(
        "{}  down {:>8.2} Mbps  up {:>8.2} Mbps  ping {:>6.1} ms  {} pass(es)  {}{}",
        r.timestamp_utc,
        r.avg_download_mbps,
        r.avg_upload_mbps,
        r.avg_ping_ms,
        r.passes_used,
        r.source,
        if r.is_suspicious() { "  [check]" } else { "" }
    )
}

/// Handle export operations (JSON and CSV) for both text and JSON modes.
fn handle_exports(args: &Cli, result: &RunResult) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, result)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        crate::storage::export_csv(p, result)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("netspeed").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let cli = parse(&[]).unwrap();
        let cfg = build_config(&cli);
        assert_eq!(cfg.passes, 3);
        assert!(!cfg.warmup);
        assert!(cfg.filter);
        assert_eq!(cfg.threshold_factor, 2.2);
        assert_eq!(cfg.cooldown, Duration::ZERO);
        assert!(!cfg.run_id.is_empty());
    }

    #[test]
    fn passes_bounded() {
        assert!(parse(&["--passes", "0"]).is_err());
        assert!(parse(&["--passes", "6"]).is_err());
        assert_eq!(parse(&["--passes", "5"]).unwrap().passes, 5);
    }

    #[test]
    fn threshold_must_exceed_one() {
        assert!(parse(&["--threshold", "1.0"]).is_err());
        assert!(parse(&["--threshold", "abc"]).is_err());
        assert_eq!(parse(&["--threshold", "3"]).unwrap().threshold, 3.0);
    }

    #[test]
    fn flags_map_to_config() {
        let cli = parse(&["--warmup", "--no-filter", "--force-cli", "--cooldown", "2s"]).unwrap();
        let cfg = build_config(&cli);
        assert!(cfg.warmup);
        assert!(!cfg.filter);
        assert!(cfg.force_cli);
        assert_eq!(cfg.cooldown, Duration::from_secs(2));
        assert_eq!(cfg.total_runs(), 4);
    }

    #[tokio::test]
    async fn silent_requires_json() {
        let cli = parse(&["--silent"]).unwrap();
        let err = run(cli).await.unwrap_err();
        assert!(err.to_string().contains("--silent can only be used with --json"));
    }
}
