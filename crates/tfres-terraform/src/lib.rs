pub mod client;
pub mod error;
pub mod files;
pub mod model;
pub mod outputs;
pub mod process;
pub mod provisioner;
pub mod vars;

pub use client::Client;
pub use error::TerraformError;
pub use model::{Model, BACKEND_OVERRIDE_FILE, PIPELINE_VARS};
pub use outputs::{OutputValue, Outputs};
pub use process::{registered_groups, supervise, Captured, Echo, GroupGuard};
pub use provisioner::{plan_workspace_name, Provisioner, StateVersion};
