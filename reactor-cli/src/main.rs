//! A line-oriented demo driver for `reactor-core`.
//!
//! Every non-empty, non-comment line of the script (or stdin) is parsed as
//! a JSON value, falling back to a bare string if it doesn't parse, and
//! delivered as the payload of an `"input"` event to a small built-in
//! reactor via [`App::step`]. The reactor collects payloads until it sees
//! the string `"quit"`, then terminates with the collected array.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use futures::FutureExt;
use reactor_core::driver::{App, AppState};
use reactor_core::{Body, Config, FailureInfo, SourceKey, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-oriented demo driver for reactor-core")]
struct Cli {
    /// Script file of newline-separated JSON payloads; reads stdin if omitted.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Watchdog bound on activations drained within one propagation chain.
    #[arg(long, default_value_t = 100_000)]
    max_activations: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config {
        max_activations_per_chain: Some(cli.max_activations),
    };
    let mut app = App::start_with_config(accumulate_until_quit(), config);

    let lines: Box<dyn Iterator<Item = std::io::Result<String>>> = match &cli.script {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening script {}", path.display()))?;
            Box::new(std::io::BufReader::new(file).lines())
        }
        None => Box::new(std::io::stdin().lock().lines()),
    };

    for line in lines {
        let line = line.context("reading input line")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if app.state() == AppState::Terminated {
            tracing::warn!(%line, "reactor already terminated, ignoring remaining input");
            break;
        }
        let payload = parse_payload(line);
        tracing::debug!(%payload, "delivering input");
        app.step("input", payload)?;
    }

    match app.result()? {
        Some(value) => println!("{value}"),
        None => tracing::warn!("reactor did not terminate before input ran out"),
    }

    Ok(())
}

fn parse_payload(line: &str) -> Value {
    serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
}

/// Collect `"input"` payloads into an array until one of them is the
/// string `"quit"`.
fn accumulate_until_quit() -> Body {
    Box::new(|k| {
        async move {
            let mut collected = Vec::new();
            loop {
                let value = k
                    .await_cond(SourceKey::Event("input".into()), None)
                    .await
                    .map_err(|e| FailureInfo::new(e.to_string()))?;
                if value == Value::String("quit".to_string()) {
                    return Ok(Value::Array(collected));
                }
                collected.push(value);
            }
        }
        .boxed_local()
    })
}
