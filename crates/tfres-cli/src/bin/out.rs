use std::process::ExitCode;

use clap::Parser;
use tfres_cli::cli::OutArgs;
use tfres_cli::{commands, finish, init_tracing, supervised};
use tfres_engine::LiveServices;

#[tokio::main]
async fn main() -> ExitCode {
    let args = OutArgs::parse();
    init_tracing();

    let services = LiveServices::new();
    finish(supervised(commands::out(std::io::stdin(), std::io::stdout(), &args.sources_dir, &services)).await)
}
