use std::process::ExitCode;

use clap::Parser;
use tfres_cli::cli::InArgs;
use tfres_cli::{commands, finish, init_tracing, supervised};
use tfres_engine::LiveServices;

#[tokio::main]
async fn main() -> ExitCode {
    let args = InArgs::parse();
    init_tracing();

    let services = LiveServices::new();
    finish(supervised(commands::fetch(std::io::stdin(), std::io::stdout(), &args.output_dir, &services)).await)
}
