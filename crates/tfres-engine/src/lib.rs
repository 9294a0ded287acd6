//! The `check`, `in` and `out` operations over a terraform-managed env.

pub mod agent;
pub mod check;
pub mod error;
pub mod fetch;
pub mod logger;
pub mod namer;
pub mod out;
pub mod services;
pub mod strategy;
pub mod workdir;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::SshAgent;
pub use check::run_check;
pub use error::EngineError;
pub use fetch::run_in;
pub use logger::Logger;
pub use namer::{resolve_env_name, EnvRegistry, NameGenerator, RandomNames, RANDOM_NAME_ATTEMPTS};
pub use out::run_out;
pub use services::{LiveServices, Services};
pub use strategy::{Outcome, Strategy};
