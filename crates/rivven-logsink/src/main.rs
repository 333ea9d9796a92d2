//! logsink - stream log lines from stdin into a database table
//!
//! Reads one event per line and writes them through a configured
//! `LogSink`. Lines are plain text messages, or JSON objects with `--json`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use rivven_logsink::config::LogSinkConfig;
use rivven_logsink::postgres::PgConnectionFactory;
use rivven_logsink::{Level, LogEvent, LogSink, Value};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logsink")]
#[command(about = "Buffered batch writer for log events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read events from stdin and write them to the database
    Run {
        /// Sink configuration file (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Parse each line as a JSON object
        #[arg(long)]
        json: bool,

        /// Level for plain text lines
        #[arg(short, long, default_value = "INFO")]
        level: String,

        /// Target for plain text lines
        #[arg(short, long, default_value = "stdin")]
        target: String,
    },

    /// Validate a configuration file and resolve its connection string
    Check {
        /// Sink configuration file (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            json,
            level,
            target,
        } => {
            let level = Level::from_str(&level).map_err(anyhow::Error::msg)?;
            let sink = load_sink(&config)?;
            let result = pump(&sink, json, level, &target).await;
            sink.shutdown().await.context("final flush failed")?;

            let stats = sink.stats();
            eprintln!(
                "{} events written, {} dropped, {} batches",
                stats.events_written, stats.events_dropped, stats.batches_written
            );
            result
        }
        Commands::Check { config } => {
            let sink = load_sink(&config)?;
            println!("Configuration OK");
            println!("  Connection string: {}", sink.connection_context());
            println!("  Command: {:?}", sink.options().command_kind);
            println!("  Parameters: {}", sink.options().columns.len());
            println!("  Buffer size: {}", sink.options().buffer_size);
            sink.shutdown().await?;
            Ok(())
        }
    }
}

fn load_sink(path: &PathBuf) -> anyhow::Result<LogSink> {
    let config = LogSinkConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let sink = config
        .into_builder()?
        .build(Arc::new(PgConnectionFactory))
        .context("failed to activate sink")?;
    Ok(sink)
}

async fn pump(sink: &LogSink, json: bool, level: Level, target: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, flushing remaining events");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = if json {
            match parse_json_event(&line, level, target) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed line");
                    continue;
                }
            }
        } else {
            LogEvent::new(level, target, line)
        };

        sink.submit(event).await?;
    }
}

/// `level`, `target`, `message` and `timestamp` map to the event; every
/// other key becomes a field.
fn parse_json_event(line: &str, level: Level, target: &str) -> anyhow::Result<LogEvent> {
    let serde_json::Value::Object(map) = serde_json::from_str(line)? else {
        anyhow::bail!("expected a JSON object");
    };

    let mut event = LogEvent::new(level, target, "");
    for (key, value) in map {
        let text = value.as_str().map(str::to_string);
        match (key.as_str(), text) {
            ("level", Some(s)) => event.level = Level::from_str(&s).map_err(anyhow::Error::msg)?,
            ("target", Some(s)) => event.target = s,
            ("message", Some(s)) => event.message = s,
            ("timestamp", Some(s)) => {
                event.timestamp = chrono::DateTime::parse_from_rfc3339(&s)?.to_utc();
            }
            _ => {
                event.fields.insert(key.clone(), json_to_value(value));
            }
        }
    }
    Ok(event)
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map(Value::Float64).unwrap_or(Value::Null),
        },
        other => Value::Json(other),
    }
}
