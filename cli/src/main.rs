//! substreams-sink: run a Substreams sink under supervision.
//!
//! # Commands
//! ```
//! substreams-sink run --replay <signals.jsonl|-> [options]
//! ```
//!
//! # Exit codes
//! - `0`   stream completed (stop block reached or clean close)
//! - `1`   stream fault (inactivity, stream error, fatal error)
//! - `2`   configuration or authorization error
//! - `130` interrupted by a signal

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use substreams_sink_core::config::{parse_bool, resolve, ProcessEnv, RunOptions};
use substreams_sink_core::error::SinkError;
use substreams_sink_core::watchdog::Completion;
use substreams_sink_observability::{init_tracing, LogConfig};
use substreams_sink_runtime::{ReplayFactory, ReplaySource, Supervisor};

mod shutdown;

const EXIT_FAULT: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "substreams-sink",
    about = "Substreams sink runner: resumable, observable block streaming",
    long_about = "
Runs a Substreams sink: restores the last cursor, streams signals, persists
new cursors in order, exposes Prometheus metrics and exits when the stream
stalls so a process manager can restart it.

ENVIRONMENT VARIABLES (flags take precedence):
  SUBSTREAMS_ENDPOINT                 Substreams endpoint
  MANIFEST, SUBSTREAMS_MANIFEST       Package manifest
  MODULE_NAME, OUTPUT_MODULE          Output module
  SUBSTREAMS_API_KEY, SUBSTREAMS_API_TOKEN
  SUBSTREAMS_API_TOKEN_ENVVAR         Name of the variable holding the credential
  CURSOR_PATH, CURSOR_FILE            Cursor file or http(s):// URL (default: cursor.lock)
  CURSOR_AUTH                         user:password for the HTTP cursor backend
  INACTIVITY_SECONDS                  Inactivity timeout, 0 disables (default: 60)
  METRICS_DISABLED, HOSTNAME, PORT, METRICS_LABELS
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream until completion, fault or interruption
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Newline-delimited JSON signal recording to stream ("-" for stdin)
    #[arg(long)]
    replay: String,

    /// Delay between replayed signals, in milliseconds
    #[arg(long)]
    replay_interval_ms: Option<u64>,

    /// Substreams endpoint (host:port)
    #[arg(short = 'e', long)]
    substreams_endpoint: Option<String>,

    /// Package manifest (local path or URL)
    #[arg(long)]
    manifest: Option<String>,

    /// Output module name
    #[arg(long)]
    module_name: Option<String>,

    /// API key or JWT
    #[arg(long)]
    substreams_api_key: Option<String>,

    /// Name of the environment variable holding the API key or JWT
    #[arg(long)]
    api_token_envvar: Option<String>,

    /// Start block; -1 starts at the module's initial block
    #[arg(short = 's', long, allow_hyphen_values = true)]
    start_block: Option<i64>,

    /// Exclusive stop block; 0 streams forever
    #[arg(short = 't', long)]
    stop_block: Option<u64>,

    /// Module parameters, `module=value` (repeatable)
    #[arg(short = 'p', long)]
    params: Vec<String>,

    /// Cursor file path or http(s):// key/value URL
    #[arg(long)]
    cursor_path: Option<String>,

    /// Basic-Auth credential for the HTTP cursor backend (`user:password`)
    #[arg(long)]
    cursor_auth: Option<String>,

    #[arg(long, value_parser = parse_bool, num_args = 0..=1, default_missing_value = "true")]
    production_mode: Option<bool>,

    #[arg(long, value_parser = parse_bool, num_args = 0..=1, default_missing_value = "true")]
    final_blocks_only: Option<bool>,

    /// Connect without TLS
    #[arg(long, value_parser = parse_bool, num_args = 0..=1, default_missing_value = "true")]
    plaintext: Option<bool>,

    /// Extra request headers, `Key: Value` or `key=value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Seconds without stream activity before exiting; 0 disables
    #[arg(long)]
    inactivity_seconds: Option<u64>,

    /// Milliseconds to wait before connecting
    #[arg(long)]
    delay_before_start: Option<u64>,

    #[arg(long, value_parser = parse_bool, num_args = 0..=1, default_missing_value = "true")]
    metrics_disabled: Option<bool>,

    /// Metrics listen host
    #[arg(long)]
    hostname: Option<String>,

    /// Metrics listen port
    #[arg(long)]
    port: Option<u16>,

    /// Static labels for every metric, `key=value` (repeatable)
    #[arg(long)]
    metrics_labels: Vec<String>,
}

impl RunArgs {
    fn options(&self, verbose: bool) -> RunOptions {
        RunOptions {
            substreams_endpoint: self.substreams_endpoint.clone(),
            manifest: self.manifest.clone(),
            module_name: self.module_name.clone(),
            substreams_api_key: self.substreams_api_key.clone(),
            api_token_envvar: self.api_token_envvar.clone(),
            start_block: self.start_block,
            stop_block: self.stop_block,
            params: self.params.clone(),
            cursor_path: self.cursor_path.clone(),
            cursor_auth: self.cursor_auth.clone(),
            production_mode: self.production_mode,
            final_blocks_only: self.final_blocks_only,
            plaintext: self.plaintext,
            headers: self.headers.clone(),
            inactivity_seconds: self.inactivity_seconds,
            delay_before_start: self.delay_before_start,
            metrics_disabled: self.metrics_disabled,
            hostname: self.hostname.clone(),
            port: self.port,
            metrics_labels: self.metrics_labels.clone(),
            verbose: verbose.then_some(true),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: cannot start runtime: {e}");
            return ExitCode::from(EXIT_FAULT);
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FAULT)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => cmd_run(&args, cli.verbose, cli.json_logs).await,
    }
}

async fn cmd_run(args: &RunArgs, verbose: bool, json_logs: bool) -> Result<ExitCode> {
    let resolved = resolve(&args.options(verbose), &ProcessEnv);
    let verbose = resolved.as_ref().map(|c| c.verbose).unwrap_or(verbose);
    init_tracing(&LogConfig::for_sink(verbose, json_logs));

    let config = match resolved {
        Ok(config) => config,
        Err(e) => return Ok(ExitCode::from(exit_code(Err(e)))),
    };

    let mut factory = ReplayFactory::new(ReplaySource::parse(&args.replay));
    if let Some(ms) = args.replay_interval_ms {
        factory = factory.with_pace(Duration::from_millis(ms));
    }

    let supervisor = match Supervisor::from_config(config, Arc::new(factory)) {
        Ok(s) => s,
        Err(e) => return Ok(ExitCode::from(exit_code(Err(e)))),
    };

    if supervisor.config().metrics.enabled {
        let addr = supervisor.config().metrics_address();
        let reader = supervisor.metrics();
        tokio::spawn(async move {
            if let Err(e) = substreams_sink_observability::serve(&addr, reader)
                .await
                .with_context(|| format!("metrics endpoint on {addr}"))
            {
                tracing::error!(error = %format!("{e:#}"), "metrics endpoint stopped");
            }
        });
    }

    tokio::select! {
        outcome = supervisor.run() => Ok(ExitCode::from(exit_code(outcome))),
        signal = shutdown::wait_for_shutdown_signal() => {
            signal.context("cannot install signal handlers")?;
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

/// Map a run outcome to the process exit code.
fn exit_code(outcome: Result<Completion, SinkError>) -> u8 {
    match outcome {
        Ok(_) => 0,
        Err(e) if e.is_startup() => {
            tracing::error!(error = %e, "invalid configuration");
            EXIT_CONFIG
        }
        Err(e) => {
            tracing::error!(error = %e, restartable = e.is_restartable(), "sink fault");
            EXIT_FAULT
        }
    }
}
