use std::process::ExitCode;

use clap::Parser;
use tfres_cli::cli::CheckArgs;
use tfres_cli::{commands, finish, init_tracing, supervised};
use tfres_engine::LiveServices;

#[tokio::main]
async fn main() -> ExitCode {
    let _args = CheckArgs::parse();
    init_tracing();

    let services = LiveServices::new();
    finish(supervised(commands::check(std::io::stdin(), std::io::stdout(), &services)).await)
}
