use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use replink::config::{expand_tilde, Config};
use replink::transport::{ChunkedUpload, ProcessTransport};
use replink::{Device, HashStrategy, IgnoreSpec, KeepSpec, Registry, SyncReport, Value};

/// Drive a remote REPL interpreter: sync files, evaluate expressions
#[derive(Parser, Debug)]
#[command(name = "replink", version)]
struct Cli {
    /// Config file (default: ./replink.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Command whose stdin/stdout speak the raw REPL, e.g. "replink-serial /dev/ttyUSB0"
    #[arg(long, env = "REPLINK_COMMAND", global = true)]
    command: Option<String>,

    /// More logging (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Mirror a local file or directory onto the device
    Sync {
        local: PathBuf,

        /// Remote directory
        #[arg(default_value = "/")]
        remote: String,

        /// Remote paths (relative to REMOTE) never deleted
        #[arg(long)]
        keep: Vec<String>,

        /// Delete everything not synced, even boot.py at the root
        #[arg(long, conflicts_with = "keep")]
        no_keep: bool,

        /// Glob patterns to skip locally
        #[arg(long)]
        ignore: Vec<String>,

        /// Device-side hash implementation
        #[arg(long, value_parser = parse_hash)]
        hash: Option<HashStrategy>,

        /// Report changes without touching the device
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate an expression and print its value
    Eval {
        expr: String,

        #[arg(long)]
        json: bool,
    },

    /// Run statements
    Exec { code: String },
}

fn parse_hash(s: &str) -> std::result::Result<HashStrategy, String> {
    s.parse().map_err(|e: replink::Error| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    let command: Vec<String> = match &cli.command {
        Some(line) => line.split_whitespace().map(str::to_string).collect(),
        None => config.transport.command.clone(),
    };
    if command.is_empty() {
        bail!("no transport command; pass --command or set [transport] command in replink.toml");
    }

    let transport = ProcessTransport::from_command_line(&command)
        .with_context(|| format!("starting transport `{}`", command.join(" ")))?;
    let mut device = Device::connect(ChunkedUpload::new(transport), Registry::new())
        .context("connecting to device")?;

    match cli.action {
        Action::Sync {
            local,
            remote,
            keep,
            no_keep,
            ignore,
            hash,
            dry_run,
            json,
        } => {
            let mut options = config.sync_options().dry_run(dry_run);
            if no_keep {
                options = options.keep(KeepSpec::Flag(false));
            } else if !keep.is_empty() {
                options = options.keep(KeepSpec::Many(keep));
            }
            if !ignore.is_empty() {
                options = options.ignore(IgnoreSpec::Many(ignore));
            }

            let mut device = device.with_hash_strategy(hash.unwrap_or(config.sync.hash));
            let local = expand_tilde(&local);
            let report = device
                .sync(&local, &remote, &options)
                .with_context(|| format!("syncing {} to {}", local.display(), remote))?;
            device.close().context("closing device")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Action::Eval { expr, json } => {
            let value = device.eval(&expr).context("evaluating expression")?;
            device.close().context("closing device")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&to_json(&value))?);
            } else {
                println!("{}", value);
            }
        }
        Action::Exec { code } => {
            let value = device.exec(&code).context("executing code")?;
            device.close().context("closing device")?;
            if let Some(value) = value {
                println!("{}", value);
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &SyncReport) {
    let (upload_verb, delete_verb) = if report.dry_run {
        ("would upload", "would delete")
    } else {
        ("uploaded", "deleted")
    };
    for path in &report.uploaded {
        println!("  {} {}", upload_verb.green(), path);
    }
    for path in &report.deleted {
        println!("  {} {}", delete_verb.red(), path);
    }

    let summary = format!(
        "{} uploaded, {} unchanged, {} deleted",
        report.uploaded.len(),
        report.skipped.len(),
        report.deleted.len()
    );
    if report.is_noop() {
        println!("{} {}", "Up to date:".bold(), summary.dimmed());
    } else if report.dry_run {
        println!("{} {}", "Dry run:".yellow().bold(), summary);
    } else {
        println!("{} {}", "Synced:".green().bold(), summary);
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::Array(b.iter().map(|x| Json::from(*x)).collect()),
        Value::List(items) | Value::Tuple(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Dict(pairs) => Json::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    let key = k.as_str().map_or_else(|| k.encode(), str::to_string);
                    (key, to_json(v))
                })
                .collect(),
        ),
    }
}
