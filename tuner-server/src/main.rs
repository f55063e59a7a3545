//! # tuner-server
//!
//! Exposes the guitar tuner over stdin/stdout: one JSON request per input
//! line, one JSON response per output line. Logs go to stderr so they never
//! interleave with responses.
//!
//! ## Architecture
//! - **Reader (main thread)**: parses stdin lines and hands each to its own
//!   request thread, so a `stop_tuning` can cancel a pending `get_pitch`
//! - **Request threads**: run one command against the shared [`Dispatcher`]
//! - **Writer thread**: drains a crossbeam channel of responses to stdout

mod dispatch;
mod protocol;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tuner_core::{CpalBackend, SyntheticBackend, TunerConfig, TuningSession};

use dispatch::Dispatcher;
use protocol::Response;

#[derive(Parser, Debug)]
#[command(
    name = "tuner-server",
    about = "Guitar tuner that answers JSON-line requests on stdin"
)]
struct Cli {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Feed sessions a sine tone at this frequency instead of the microphone
    #[arg(long, value_name = "HZ")]
    simulate: Option<f64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = TunerConfig::load_or_default(cli.config.as_deref())?;
    let session = match cli.simulate {
        Some(hz) => {
            info!(frequency = hz, "simulating audio input");
            TuningSession::new(SyntheticBackend::new(Some(hz)), config)
        }
        None => TuningSession::new(CpalBackend, config),
    };
    let settings = &session.config().session;
    info!(
        dwell_ms = settings.dwell_ms,
        default_timeout_ms = settings.default_timeout_ms,
        "session timing"
    );
    let dispatcher = Arc::new(Dispatcher::new(session));

    let (response_tx, response_rx) = crossbeam_channel::unbounded::<Response>();
    let writer = thread::Builder::new()
        .name("tuner-writer".into())
        .spawn(move || write_responses(response_rx))
        .context("spawning response writer")?;

    info!("tuner-server ready");
    let mut requests: Vec<JoinHandle<()>> = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line.context("reading request")?;
        if line.trim().is_empty() {
            continue;
        }
        requests.retain(|handle| !handle.is_finished());
        requests.push(spawn_request(&dispatcher, &response_tx, line)?);
    }

    // End of input: release the microphone, which also wakes pending waits.
    debug!(pending = requests.len(), "input closed, shutting down");
    if dispatcher.session().is_active() {
        if let Err(e) = dispatcher.session().stop() {
            warn!(error = %e, "stopping session on shutdown");
        }
    }
    for handle in requests {
        if handle.join().is_err() {
            error!("request thread panicked");
        }
    }
    drop(response_tx);

    match writer.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("response writer panicked"),
    }
}

fn spawn_request(
    dispatcher: &Arc<Dispatcher>,
    responses: &Sender<Response>,
    line: String,
) -> Result<JoinHandle<()>> {
    let dispatcher = dispatcher.clone();
    let responses = responses.clone();
    thread::Builder::new()
        .name("tuner-request".into())
        .spawn(move || {
            let response = dispatcher.handle_line(&line);
            let _ = responses.send(response);
        })
        .context("spawning request thread")
}

fn write_responses(responses: Receiver<Response>) -> Result<()> {
    let stdout = io::stdout();
    for response in responses {
        let line = serde_json::to_string(&response).context("encoding response")?;
        let mut out = stdout.lock();
        writeln!(out, "{line}").context("writing response")?;
        out.flush().context("flushing response")?;
    }
    Ok(())
}
