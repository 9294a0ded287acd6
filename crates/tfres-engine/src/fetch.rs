use std::path::Path;

use tfres_domain::{Action, BackendSettings, InRequest, Regime, Response, StorageConfig, StorageMode};
use tfres_terraform::{plan_workspace_name, Model, Outputs, Provisioner};
use tracing::info;

use crate::error::EngineError;
use crate::services::Services;
use crate::strategy::metadata;
use crate::workdir::Workdir;

pub const NAME_FILE: &str = "name";
pub const METADATA_FILE: &str = "metadata";
pub const STATE_FILE: &str = "terraform.tfstate";
pub const JSON_PLAN_FILE: &str = "plan.json";

/// What was read for a non-plan version.
struct Fetched {
    outputs: Outputs,
    terraform_version: String,
    state: Option<Vec<u8>>,
}

/// Materialize the env named by the request's version into `output_dir`.
pub async fn run_in(req: &InRequest, output_dir: &Path, services: &dyn Services) -> Result<Response, EngineError> {
    let version = req.version()?.clone();
    let mode = req.source.validate()?;
    let env_name = version.env_name.clone();
    info!(env_name = %env_name, "in");

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| EngineError::io(output_dir, e))?;
    write(&output_dir.join(NAME_FILE), env_name.as_bytes()).await?;

    if req.params.action == Some(Action::Destroy) {
        info!("action is destroy, skipping outputs");
        return Ok(Response { version, metadata: Vec::new() });
    }
    if version.is_plan() {
        if req.params.output_json_planfile {
            fetch_json_plan(req, &mode, &env_name, output_dir, services).await?;
        }
        return Ok(Response { version, metadata: Vec::new() });
    }

    let workdir = Workdir::new()?;
    let fetched = match &mode {
        StorageMode::Backend(backend) => fetch_backend(req, backend, &workdir, &env_name, services).await?,
        StorageMode::Legacy(legacy) => fetch_legacy(req, legacy, &workdir, &env_name, services).await?,
        StorageMode::Migrating { backend, legacy } => {
            let from_legacy = version.regime() == Some(Regime::Legacy)
                && services
                    .artifact_store(legacy)?
                    .state_file(&env_name, workdir.path().join(STATE_FILE))
                    .exists()
                    .await?;
            if from_legacy {
                fetch_legacy(req, legacy, &workdir, &env_name, services).await?
            } else {
                fetch_backend(req, backend, &workdir, &env_name, services).await?
            }
        }
    };

    let raw = serde_json::to_vec(&fetched.outputs.raw())
        .map_err(|e| EngineError::Request(format!("failed to encode outputs: {}", e)))?;
    write(&output_dir.join(METADATA_FILE), &raw).await?;
    if let Some(state) = &fetched.state {
        write(&output_dir.join(STATE_FILE), state).await?;
    }

    Ok(Response {
        version,
        metadata: metadata(&fetched.outputs, &fetched.terraform_version),
    })
}

async fn write(path: &Path, body: &[u8]) -> Result<(), EngineError> {
    tokio::fs::write(path, body).await.map_err(|e| EngineError::io(path, e))
}

fn output_module(req: &InRequest) -> Option<&str> {
    req.params.output_module.as_deref().filter(|m| !m.trim().is_empty())
}

async fn fetch_backend(
    req: &InRequest,
    backend: &BackendSettings,
    workdir: &Workdir,
    env_name: &str,
    services: &dyn Services,
) -> Result<Fetched, EngineError> {
    let model = workdir.bare_model(&req.source.terraform, Some(backend.clone()))?;
    let p = services.provisioner(model);
    p.init_with_backend().await?;
    if !p.workspace_exists(env_name).await? {
        return Err(EngineError::NotFound { what: "workspace", env_name: env_name.to_string() });
    }
    p.workspace_select(env_name).await?;

    let outputs = p.outputs(output_module(req)).await?;
    let state = if req.params.output_statefile {
        Some(p.state_pull().await?)
    } else {
        None
    };
    Ok(Fetched { outputs, terraform_version: p.version().await?, state })
}

async fn fetch_legacy(
    req: &InRequest,
    legacy: &StorageConfig,
    workdir: &Workdir,
    env_name: &str,
    services: &dyn Services,
) -> Result<Fetched, EngineError> {
    if output_module(req).is_some() {
        return Err(EngineError::Request(
            "`output_module` requires `terraform.backend_type`, it is not supported with `storage`".into(),
        ));
    }
    let model = workdir.bare_model(&req.source.terraform, None)?;
    let state = services
        .artifact_store(legacy)?
        .state_file(env_name, model.state_path.clone());
    if !state.exists().await? {
        return Err(EngineError::NotFound { what: "state file", env_name: env_name.to_string() });
    }
    state.download().await?;

    let p = services.provisioner(model);
    let outputs = p.outputs(None).await?;
    let state = if req.params.output_statefile {
        Some(p.state_pull().await?)
    } else {
        None
    };
    Ok(Fetched { outputs, terraform_version: p.version().await?, state })
}

/// Restore the plan workspace of `env_name` and write `show -json` of it.
async fn fetch_json_plan(
    req: &InRequest,
    mode: &StorageMode,
    env_name: &str,
    output_dir: &Path,
    services: &dyn Services,
) -> Result<(), EngineError> {
    let Some(backend) = mode.backend() else {
        return Err(EngineError::Request(
            "`output_json_planfile` requires `terraform.backend_type`".into(),
        ));
    };
    let workdir = Workdir::new()?;
    let model = if req.source.terraform.source.as_deref().is_some_and(|s| !s.trim().is_empty()) {
        Model::from_config(&req.source.terraform, workdir.path())?
    } else {
        workdir.bare_model(&req.source.terraform, Some(backend.clone()))?
    };
    let p = services.provisioner(model);
    p.init_with_backend().await?;

    let plan_workspace = plan_workspace_name(env_name);
    if !p.workspace_exists(&plan_workspace).await? {
        return Err(EngineError::NotFound { what: "plan", env_name: env_name.to_string() });
    }
    p.get_plan_from_backend(&plan_workspace).await?;
    let json = p.json_plan().await?;
    write(&output_dir.join(JSON_PLAN_FILE), &json).await?;
    info!(env_name, "wrote json plan");
    Ok(())
}
