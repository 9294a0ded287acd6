use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "check", about = "Report new versions of a terraform env", version)]
pub struct CheckArgs {}

#[derive(Debug, Parser)]
#[command(name = "in", about = "Fetch the outputs of a terraform env", version)]
pub struct InArgs {
    /// Directory receiving `name`, `metadata` and the optional state and plan files.
    pub output_dir: PathBuf,
}

#[derive(Debug, Parser)]
#[command(name = "out", about = "Apply, plan or destroy a terraform env", version)]
pub struct OutArgs {
    /// Sources directory; relative paths in the request resolve against it.
    pub sources_dir: PathBuf,
}
