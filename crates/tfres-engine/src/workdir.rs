use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tfres_domain::{BackendSettings, TerraformConfig};
use tfres_terraform::Model;

use crate::error::EngineError;

const BARE_MODULE_DIR: &str = "module";
const BARE_MODULE_MAIN: &str = "terraform {}\n";

/// Per-request scratch directory, removed on drop.
pub struct Workdir {
    dir: TempDir,
}

impl Workdir {
    pub fn new() -> Result<Workdir, EngineError> {
        let dir = tempfile::Builder::new()
            .prefix("tfres-")
            .tempdir()
            .map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
        Ok(Workdir { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A model over an empty module, for commands that only touch
    /// workspaces and state (check, outputs).
    pub fn bare_model(
        &self,
        terraform: &TerraformConfig,
        backend: Option<BackendSettings>,
    ) -> Result<Model, EngineError> {
        let module = self.path().join(BARE_MODULE_DIR);
        std::fs::create_dir_all(&module).map_err(|e| EngineError::io(&module, e))?;
        let main = module.join("main.tf");
        std::fs::write(&main, BARE_MODULE_MAIN).map_err(|e| EngineError::io(&main, e))?;

        Ok(Model {
            source: module,
            backend,
            env: terraform.env.clone(),
            plugin_dir: terraform.plugin_dir.as_deref().filter(|p| !p.is_empty()).map(PathBuf::from),
            state_path: self.path().join("terraform.tfstate"),
            plan_path: self.path().join("plan"),
            scratch: self.path().to_path_buf(),
            ..Model::default()
        })
    }
}
