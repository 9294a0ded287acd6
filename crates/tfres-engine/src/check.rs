use tfres_domain::{BackendSettings, CheckRequest, Regime, StorageMode, Version};
use tfres_storage::{env_name_from_key, ArtifactKind, ArtifactStore};
use tfres_terraform::Provisioner;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::namer::slug;
use crate::services::Services;
use crate::workdir::Workdir;

/// Versions newer than the request's, oldest first.
pub async fn run_check(req: &CheckRequest, services: &dyn Services) -> Result<Vec<Version>, EngineError> {
    let mode = req.source.validate()?;
    let prior = req.prior_version();
    let env_name = req.source.env_name().map(slug);
    let env_name = env_name.as_deref();
    info!(env_name = env_name.unwrap_or(""), prior = ?prior, "check");

    let versions = match &mode {
        StorageMode::Backend(backend) => {
            let workdir = Workdir::new()?;
            let p = backend_provisioner(req, backend, &workdir, services).await?;
            check_backend(p.as_ref(), env_name, prior).await?
        }
        StorageMode::Legacy(config) => {
            check_legacy(&services.artifact_store(config)?, env_name, prior).await?
        }
        StorageMode::Migrating { backend, legacy } => {
            let workdir = Workdir::new()?;
            let p = backend_provisioner(req, backend, &workdir, services).await?;
            let store = services.artifact_store(legacy)?;
            check_migrating(p.as_ref(), &store, env_name, prior).await?
        }
    };
    debug!(count = versions.len(), "check done");
    Ok(versions)
}

async fn backend_provisioner(
    req: &CheckRequest,
    backend: &BackendSettings,
    workdir: &Workdir,
    services: &dyn Services,
) -> Result<std::sync::Arc<dyn Provisioner>, EngineError> {
    let model = workdir.bare_model(&req.source.terraform, Some(backend.clone()))?;
    let p = services.provisioner(model);
    p.init_with_backend().await?;
    Ok(p)
}

fn newer(current: Version, prior: Option<&Version>) -> Vec<Version> {
    match prior {
        Some(prior) if !current.is_newer_than(prior) => Vec::new(),
        _ => vec![current],
    }
}

/// With `env_name`, the env's workspace version when newer than `prior`.
/// Without one, only the workspace named by `prior` is reported.
pub async fn check_backend(
    p: &dyn Provisioner,
    env_name: Option<&str>,
    prior: Option<&Version>,
) -> Result<Vec<Version>, EngineError> {
    let workspaces = p.workspace_list().await?;
    let known = |name: &str| workspaces.iter().any(|w| w == name);

    match (env_name, prior) {
        (Some(env), _) => {
            if !known(env) {
                return Ok(Vec::new());
            }
            let state = p.current_state_version(env).await?;
            Ok(newer(Version::backend(env, state.serial, state.lineage), prior))
        }
        (None, Some(prior)) if known(prior.env_name.as_str()) => {
            let state = p.current_state_version(&prior.env_name).await?;
            Ok(vec![Version::backend(prior.env_name.clone(), state.serial, state.lineage)])
        }
        (None, _) => Ok(Vec::new()),
    }
}

/// Latest canonical state object (tainted siblings never match).
pub async fn check_legacy(
    store: &ArtifactStore,
    env_name: Option<&str>,
    prior: Option<&Version>,
) -> Result<Vec<Version>, EngineError> {
    let pattern = match env_name {
        Some(env) => ArtifactKind::State.env_pattern(store.prefix(), env)?,
        None => ArtifactKind::State.pattern()?,
    };
    let Some(latest) = store.latest_version(&pattern).await? else {
        return Ok(Vec::new());
    };
    let Some(env) = env_name_from_key(&latest.key, ArtifactKind::State) else {
        return Ok(Vec::new());
    };
    let current = Version::legacy(env, latest.last_modified);

    match prior {
        Some(prior) => Ok(newer(current, Some(prior))),
        None if env_name.is_some() => Ok(vec![current]),
        None => Ok(Vec::new()),
    }
}

/// The regime that produced `prior` is asked first. A legacy prior with
/// nothing newer in legacy storage falls through to the backend, where a
/// migrated env shows up as a new version.
pub async fn check_migrating(
    p: &dyn Provisioner,
    store: &ArtifactStore,
    env_name: Option<&str>,
    prior: Option<&Version>,
) -> Result<Vec<Version>, EngineError> {
    match prior.and_then(Version::regime) {
        Some(Regime::Backend) => check_backend(p, env_name, prior).await,
        Some(Regime::Legacy) => {
            let legacy = check_legacy(store, env_name, prior).await?;
            if !legacy.is_empty() {
                return Ok(legacy);
            }
            check_backend(p, env_name, prior).await
        }
        None => {
            let backend = check_backend(p, env_name, prior).await?;
            if !backend.is_empty() {
                return Ok(backend);
            }
            check_legacy(store, env_name, prior).await
        }
    }
}
