// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use clap::Parser;
use logship::tailer::{StreamTailer, TailEndpoint, TailerConfig, TailerHandle};
use logship::Config;
use std::env;
use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Print the lines of a Scribe stream as they arrive.
#[derive(Debug, Parser)]
#[command(name = "logship-tail", version)]
struct Args {
    /// Stream to tail
    stream: String,

    /// Tailing host; defaults to a configured tail service or the resolved tail host
    #[arg(long)]
    host: Option<String>,

    /// Tailing port, used with --host
    #[arg(long)]
    port: Option<u16>,

    /// Only print the last N lines, then exit
    #[arg(short = 'n', long)]
    lines: Option<u64>,

    /// Connect and read timeout in seconds, 0 blocks
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Exit when the server closes the stream instead of reconnecting
    #[arg(long)]
    no_reconnect: bool,

    /// Seconds between reconnect attempts
    #[arg(long, default_value_t = 2)]
    reconnect_delay: u64,

    /// Extra handshake option, may be repeated
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_protocol_opt)]
    protocol_opts: Vec<(String, String)>,
}

impl Args {
    fn tailer_config(&self) -> TailerConfig {
        let mut config = TailerConfig::new(self.stream.as_str());
        config.lines = self.lines;
        config.timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        config.automatic_recovery = !self.no_reconnect;
        config.reconnect_delay = Duration::from_secs(self.reconnect_delay);
        config.protocol_opts = self.protocol_opts.clone();
        config
    }

    fn endpoint(&self, settings: &Config) -> Option<TailEndpoint> {
        self.host.as_ref().map(|host| {
            TailEndpoint::new(
                host.as_str(),
                self.port.unwrap_or(settings.default_scribe_tail_port),
            )
        })
    }
}

fn parse_protocol_opt(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {value:?}"))
}

fn init_logging() -> anyhow::Result<()> {
    let log_level = env::var("LOGSHIP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(log_level).context("could not parse log level")?)
        .with_writer(io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    Ok(())
}

/// Copies lines to `out` until the stream ends or the tailer is stopped.
/// Returns how many lines were written.
fn copy_lines<W: Write>(tailer: &mut StreamTailer, out: &mut W) -> anyhow::Result<u64> {
    let handle = tailer.handle();
    let mut written = 0;
    for line in tailer.lines()? {
        let line = line?;
        match out.write_all(&line).and_then(|()| out.flush()) {
            Ok(()) => written += 1,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("Output closed, stopping");
                handle.stop();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(written)
}

async fn tail<W: Write + Send + 'static>(
    mut tailer: StreamTailer,
    mut out: W,
) -> anyhow::Result<u64> {
    tokio::task::spawn_blocking(move || copy_lines(&mut tailer, &mut out)).await?
}

async fn stop_on_signal(handle: TailerHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    debug!("Shutdown requested");
    handle.stop();
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;

    let settings = Config::from_env().context("invalid logship configuration")?;
    let tailer = StreamTailer::from_config(args.tailer_config(), args.endpoint(&settings), &settings)?;
    info!("Tailing {} from {}", args.stream, tailer.endpoint());

    tokio::spawn(stop_on_signal(tailer.handle()));
    let written = tail(tailer, io::stdout()).await?;
    debug!("Wrote {written} lines");
    Ok(())
}
