//! Switchyard CLI - build-time companion to the runtime
//!
//! `scan` extracts the queue/schedule layout from an application's source,
//! `env` lists the environment keys a deployment must wire, and `classify`
//! shows how a captured payload would be routed.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchyard_core::application::naming::{env_key, physical_name, suffixes};
use switchyard_core::application::{classify, DEFAULT_ENV_PREFIX};
use switchyard_core::domain::{InboundEvent, Layout, ResourceKind};
use switchyard_scanner::{scan_report, ScanReport};
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Switchyard build-time tooling", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover queue and schedule registrations in a package
    Scan {
        /// Package directory (the one containing src/)
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Table)]
        format: Format,

        /// Write the layout JSON to this file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Fail if any registration could not be resolved
        #[arg(long)]
        strict: bool,
    },

    /// List the environment keys a deployment must set
    Env {
        /// Package directory (the one containing src/)
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Environment key prefix
        #[arg(long, env = "SWITCHYARD_ENV_PREFIX", default_value = DEFAULT_ENV_PREFIX)]
        prefix: String,
    },

    /// Show how a captured invocation payload would be classified
    Classify {
        /// JSON payload file, or `-` for stdin
        payload: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Table,
}

#[derive(Tabled)]
struct LayoutRow {
    kind: &'static str,
    logical_name: String,
    interval: String,
}

#[derive(Tabled)]
struct EnvRow {
    kind: &'static str,
    logical_name: String,
    env_key: String,
    suggested_physical_name: String,
}

#[derive(Tabled)]
struct OmissionRow {
    kind: &'static str,
    location: String,
    reason: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            dir,
            format,
            out,
            strict,
        } => {
            let report = run_scan(&dir)?;

            if let Some(out) = &out {
                let json = serde_json::to_string_pretty(&report.layout)?;
                std::fs::write(out, json + "\n")
                    .with_context(|| format!("Failed to write {}", out.display()))?;
            }

            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&report.layout)?),
                Format::Table => print_layout(&report.layout),
            }

            if !report.omitted.is_empty() {
                eprintln!();
                eprintln!(
                    "{}",
                    format!(
                        "⚠ {} registration(s) omitted: names and intervals must be constants",
                        report.omitted.len()
                    )
                    .yellow()
                    .bold()
                );
                eprintln!("{}", Table::new(omission_rows(&report)));
                if strict {
                    bail!("{} registration(s) could not be resolved", report.omitted.len());
                }
            }

            if let Some(out) = out {
                eprintln!("{}", format!("✓ Layout written to {}", out.display()).green().bold());
            }
        }

        Commands::Env { dir, prefix } => {
            let report = run_scan(&dir)?;
            let rows = env_rows(&prefix, &report.layout);

            if rows.is_empty() {
                println!("{}", "No queues or schedules registered".yellow());
            } else {
                println!("{}", "Environment wiring".cyan().bold());
                println!();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Classify { payload } => {
            let raw = read_payload(&payload)?;
            match classify(&raw) {
                InboundEvent::HttpRequest(request) => {
                    println!("{}", "HTTP request".green().bold());
                    println!("  version: {:?}", request.version);
                    println!("  method:  {}", request.method);
                    println!("  path:    {}", request.path);
                    if !request.raw_query.is_empty() {
                        println!("  query:   {}", request.raw_query);
                    }
                }
                InboundEvent::QueueBatch(batch) => {
                    println!("{}", "Queue batch".green().bold());
                    println!("  queue:    {}", batch.queue_name());
                    println!("  messages: {}", batch.len());
                    for id in batch.message_ids() {
                        println!("    - {id}");
                    }
                }
                InboundEvent::ScheduleTick(tick) => {
                    println!("{}", "Schedule tick".green().bold());
                    println!("  rule: {}", tick.rule_name().unwrap_or("<none>"));
                    println!("  time: {}", tick.time.to_rfc3339());
                }
                InboundEvent::Unrecognized { reason } => {
                    println!("{}", "Unrecognized".red().bold());
                    bail!("Payload would fail with UnclassifiedEventError: {reason}");
                }
            }
        }
    }

    Ok(())
}

fn run_scan(dir: &Path) -> Result<ScanReport> {
    scan_report(dir).with_context(|| format!("Scan of {} failed", dir.display()))
}

fn read_payload(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read payload from stdin")?;
        Ok(buf)
    } else {
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn print_layout(layout: &Layout) {
    if layout.is_empty() {
        println!("{}", "No queues or schedules registered".yellow());
        return;
    }

    println!(
        "{}",
        format!(
            "✓ {} queue(s), {} schedule(s)",
            layout.queues().len(),
            layout.schedules().len()
        )
        .green()
        .bold()
    );
    println!();
    println!("{}", Table::new(layout_rows(layout)));
}

fn layout_rows(layout: &Layout) -> Vec<LayoutRow> {
    let queues = layout.queues().iter().map(|q| LayoutRow {
        kind: ResourceKind::Queue.as_str(),
        logical_name: q.logical_name.clone(),
        interval: "-".to_string(),
    });
    let schedules = layout.schedules().iter().map(|s| LayoutRow {
        kind: ResourceKind::Schedule.as_str(),
        logical_name: s.logical_name.clone(),
        interval: format_interval(s.interval),
    });
    queues.chain(schedules).collect()
}

fn env_rows(prefix: &str, layout: &Layout) -> Vec<EnvRow> {
    let mut rows = Vec::new();
    for kind in [ResourceKind::Queue, ResourceKind::Schedule] {
        for logical in layout.names(kind) {
            for suffix in suffixes(kind) {
                rows.push(EnvRow {
                    kind: kind.as_str(),
                    logical_name: logical.to_string(),
                    env_key: env_key(prefix, kind, logical, *suffix),
                    suggested_physical_name: physical_name(prefix, kind, logical),
                });
            }
        }
    }
    rows
}

fn omission_rows(report: &ScanReport) -> Vec<OmissionRow> {
    report
        .omitted
        .iter()
        .map(|o| OmissionRow {
            kind: o.kind.as_str(),
            location: format!("{}:{}", o.file.display(), o.line),
            reason: o.reason.clone(),
        })
        .collect()
}

/// Largest whole unit: `1h`, `15m`, `30s`, `250ms`
fn format_interval(interval: Duration) -> String {
    let ms = interval.as_millis();
    if ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}
