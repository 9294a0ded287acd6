//! Shared plumbing of the `check`, `in` and `out` binaries: JSON request on
//! stdin, JSON response on stdout, logs and errors on stderr.

pub mod cli;
pub mod commands;

use std::future::Future;
use std::io::{Read, Write};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries only the response.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

pub fn read_request<T: DeserializeOwned>(mut input: impl Read) -> Result<T> {
    let mut raw = String::new();
    input.read_to_string(&mut raw).context("failed to read request from stdin")?;
    serde_json::from_str(&raw).context("invalid request JSON")
}

pub fn write_response<T: Serialize>(mut output: impl Write, response: &T) -> Result<()> {
    serde_json::to_writer(&mut output, response).context("failed to write response")?;
    writeln!(output).context("failed to write response")?;
    output.flush().context("failed to write response")
}

/// Run a command, abandoning it on SIGINT/SIGTERM after its child
/// processes are killed and its scratch state is released.
pub async fn supervised(command: impl Future<Output = Result<()>>) -> Result<()> {
    tfres_terraform::supervise(command)
        .await
        .unwrap_or_else(|| Err(anyhow!("interrupted by termination signal")))
}

/// Exit status for a finished command; errors are printed as one
/// `error:` block on stderr.
pub fn finish(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
