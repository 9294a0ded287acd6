use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tfres_domain::{CheckRequest, InRequest, OutRequest};
use tfres_engine::{run_check, run_in, run_out, Services};
use tracing::debug;

use crate::{read_request, write_response};

// ── Check ─────────────────────────────────────────────────────────────────────

pub async fn check(input: impl Read, output: impl Write, services: &dyn Services) -> Result<()> {
    let req: CheckRequest = read_request(input)?;
    let versions = run_check(&req, services).await?;
    debug!(count = versions.len(), "check finished");
    write_response(output, &versions)
}

// ── In ────────────────────────────────────────────────────────────────────────

pub async fn fetch(input: impl Read, output: impl Write, output_dir: &Path, services: &dyn Services) -> Result<()> {
    let req: InRequest = read_request(input)?;
    let resp = run_in(&req, output_dir, services).await?;
    write_response(output, &resp)
}

// ── Out ───────────────────────────────────────────────────────────────────────

pub async fn out(input: impl Read, output: impl Write, sources_dir: &Path, services: &dyn Services) -> Result<()> {
    let req: OutRequest = read_request(input)?;
    std::env::set_current_dir(sources_dir)
        .with_context(|| format!("failed to enter sources directory {}", sources_dir.display()))?;
    let resp = run_out(&req, services).await?;
    write_response(output, &resp)
}
