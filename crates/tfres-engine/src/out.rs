use tfres_domain::{Action, OutRequest, Response};
use tfres_terraform::Model;
use tracing::info;

use crate::agent::SshAgent;
use crate::error::EngineError;
use crate::namer::resolve_env_name;
use crate::services::Services;
use crate::strategy::Strategy;
use crate::workdir::Workdir;

/// Create, update, plan or destroy the env named by the request.
///
/// `params.terraform` is laid over `source.terraform` first; the merged
/// block decides the storage regime and the action.
pub async fn run_out(req: &OutRequest, services: &dyn Services) -> Result<Response, EngineError> {
    let terraform = req.merged_terraform();
    let mode = req.source.storage_mode(&terraform)?;
    let workdir = Workdir::new()?;

    let mut model = Model::from_config(&terraform, workdir.path())?.with_pipeline_vars(|k| services.host_var(k));
    let _agent = match model.private_key.clone() {
        Some(key) => {
            let agent = SshAgent::start(workdir.path(), &key).await?;
            model = model.with_env("SSH_AUTH_SOCK", agent.socket().display().to_string());
            Some(agent)
        }
        None => None,
    };
    let (destroy, plan_only) = (req.params.action == Some(Action::Destroy), model.plan_only);

    let strategy = Strategy::new(&mode, services.provisioner(model), services)?;
    strategy.setup().await?;
    let env_name = resolve_env_name(&req.params, &req.source, &strategy, services.names()).await?;
    info!(env_name = %env_name, destroy, plan_only, "out");

    let outcome = if destroy {
        strategy.destroy(&env_name).await?
    } else if plan_only {
        strategy.plan(&env_name).await?
    } else {
        strategy.apply(&env_name).await?
    };

    Ok(Response { metadata: outcome.metadata(), version: outcome.version })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tfres_domain::{OutParams, Source, TerraformConfig, Version};

    use super::*;
    use crate::namer::NameGenerator;
    use crate::testing::*;

    fn request(source: Source, env_name: &str, terraform: TerraformConfig) -> OutRequest {
        OutRequest {
            source,
            params: OutParams { env_name: Some(env_name.into()), terraform, ..OutParams::default() },
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> TerraformConfig {
        TerraformConfig {
            vars: pairs.iter().map(|(k, v)| (k.to_string(), json!(v))).collect(),
            ..TerraformConfig::default()
        }
    }

    fn field<'a>(resp: &'a Response, name: &str) -> Option<&'a str> {
        resp.metadata.iter().find(|f| f.name == name).map(|f| f.value.as_str())
    }

    async fn stored_state(services: &FakeServices, key: &str) -> FakeState {
        let body = services.storage.contents(key).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    // ── legacy ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn legacy_first_apply_uploads_state() {
        let services = FakeServices::new();
        let req = request(legacy_source(), "env", vars(&[("bucket", "my-bucket")]));

        let resp = run_out(&req, &services).await.unwrap();

        assert_eq!(resp.version.env_name, "env");
        assert!(resp.version.last_modified.is_some());
        assert_eq!(services.storage.keys().await, vec![state_key("env")]);
        assert_eq!(stored_state(&services, &state_key("env")).await.serial, 1);
        assert_eq!(field(&resp, "bucket"), Some("my-bucket"));
        assert_eq!(field(&resp, "password"), Some("<sensitive>"));
        assert_eq!(field(&resp, "terraform_version"), Some(FAKE_TERRAFORM_VERSION));
    }

    #[tokio::test]
    async fn legacy_failed_apply_leaves_only_tainted_state() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("env"), FakeState::new(1, "l").to_bytes(), chrono::Utc::now()).await;
        services.cloud.fail_apply(true);

        let err = run_out(&request(legacy_source(), "env", vars(&[])), &services).await.unwrap_err();

        assert!(err.to_string().contains(APPLY_ERROR), "{}", err);
        let tainted = format!("{}.tainted", state_key("env"));
        assert_eq!(services.storage.keys().await, vec![tainted.clone()]);
        assert_eq!(stored_state(&services, &tainted).await.serial, 2);
    }

    #[tokio::test]
    async fn legacy_apply_promotes_tainted_state() {
        let services = FakeServices::new();
        let tainted = format!("{}.tainted", state_key("env"));
        services.storage.put_at(&tainted, FakeState::new(2, "l").to_bytes(), chrono::Utc::now()).await;

        run_out(&request(legacy_source(), "env", vars(&[])), &services).await.unwrap();

        assert_eq!(services.storage.keys().await, vec![state_key("env")]);
        assert_eq!(stored_state(&services, &state_key("env")).await.serial, 3);
    }

    #[tokio::test]
    async fn delete_on_failure_tears_down_and_reports_apply_error() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("env"), FakeState::new(1, "l").to_bytes(), chrono::Utc::now()).await;
        services.cloud.fail_apply(true);
        let terraform = TerraformConfig { delete_on_failure: Some(true), ..TerraformConfig::default() };

        let err = run_out(&request(legacy_source(), "env", terraform), &services).await.unwrap_err();

        assert!(matches!(err, EngineError::Terraform(_)), "{:?}", err);
        assert!(err.to_string().contains(APPLY_ERROR));
        assert!(services.storage.keys().await.is_empty());
        assert!(services.cloud.calls().contains(&"destroy".to_string()));
    }

    #[tokio::test]
    async fn failed_recovery_reports_both_errors() {
        let services = FakeServices::new();
        services.cloud.fail_apply(true);
        services.cloud.fail_destroy(true);
        let terraform = TerraformConfig { delete_on_failure: Some(true), ..TerraformConfig::default() };

        let err = run_out(&request(legacy_source(), "env", terraform), &services).await.unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, EngineError::RecoveryFailed { .. }));
        assert!(message.contains(APPLY_ERROR), "{}", message);
        assert!(message.contains(DESTROY_ERROR), "{}", message);
        assert_eq!(services.storage.keys().await, vec![format!("{}.tainted", state_key("env"))]);
    }

    #[tokio::test]
    async fn legacy_plan_then_apply_uses_saved_plan() {
        let services = FakeServices::new();
        let plan = TerraformConfig { plan_only: Some(true), ..vars(&[("bucket", "b")]) };
        let resp = run_out(&request(legacy_source(), "env", plan), &services).await.unwrap();
        assert!(resp.version.is_plan());
        assert_eq!(services.storage.keys().await, vec!["envs/env.plan".to_string()]);

        let run = TerraformConfig { plan_run: Some(true), ..TerraformConfig::default() };
        let resp = run_out(&request(legacy_source(), "env", run), &services).await.unwrap();
        assert!(!resp.version.is_plan());
        assert_eq!(field(&resp, "planned"), Some("true"));
        assert_eq!(services.storage.keys().await, vec![state_key("env")]);
    }

    #[tokio::test]
    async fn plan_run_without_plan_fails() {
        let services = FakeServices::new();
        let run = TerraformConfig { plan_run: Some(true), ..TerraformConfig::default() };
        let err = run_out(&request(legacy_source(), "env", run), &services).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { what: "plan", .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn legacy_destroy_is_idempotent() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("env"), FakeState::new(1, "l").to_bytes(), chrono::Utc::now()).await;
        let mut req = request(legacy_source(), "env", vars(&[]));
        req.params.action = Some(Action::Destroy);

        let resp = run_out(&req, &services).await.unwrap();
        assert_eq!(resp.version.env_name, "env");
        assert!(services.storage.keys().await.is_empty());
        assert_eq!(field(&resp, "terraform_version"), Some(FAKE_TERRAFORM_VERSION));

        run_out(&req, &services).await.unwrap();
        assert_eq!(services.cloud.calls().iter().filter(|c| *c == "destroy").count(), 1);
    }

    #[tokio::test]
    async fn legacy_destroy_of_tainted_only_state() {
        let services = FakeServices::new();
        let tainted = format!("{}.tainted", state_key("env"));
        services.storage.put_at(&tainted, FakeState::new(2, "l").to_bytes(), chrono::Utc::now()).await;
        let mut req = request(legacy_source(), "env", vars(&[]));
        req.params.action = Some(Action::Destroy);

        let resp = run_out(&req, &services).await.unwrap();

        assert_eq!(resp.version.env_name, "env");
        assert!(services.storage.keys().await.is_empty());
        assert!(services.cloud.calls().iter().any(|c| c == "destroy"));
    }

    // ── backend ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn backend_apply_bumps_serial() {
        let services = FakeServices::new();
        services.cloud.seed("env", FakeState::new(4, LINEAGE));

        let resp = run_out(&request(backend_source(), "env", vars(&[("bucket", "b")])), &services)
            .await
            .unwrap();

        assert_eq!(resp.version, Version::backend("env", 5, LINEAGE));
        assert_eq!(field(&resp, "bucket"), Some("b"));
        assert_eq!(services.cloud.calls()[0], "init backend");
        assert!(services.storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn backend_plan_then_apply_consumes_plan_workspace() {
        let services = FakeServices::new();
        let plan = TerraformConfig { plan_only: Some(true), ..vars(&[("bucket", "b")]) };
        let resp = run_out(&request(backend_source(), "env", plan), &services).await.unwrap();
        assert_eq!(resp.version, Version::plan("env", "fake-checksum"));
        assert!(services.cloud.workspace("env-plan").is_some());

        let run = TerraformConfig { plan_run: Some(true), ..TerraformConfig::default() };
        let resp = run_out(&request(backend_source(), "env", run), &services).await.unwrap();

        assert_eq!(resp.version, Version::backend("env", 1, "fake-lineage"));
        assert_eq!(field(&resp, "planned"), Some("true"));
        let applied = services.cloud.lock().applied_vars.clone();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].is_empty());
        assert_eq!(services.cloud.workspace_names(), vec!["env"]);
    }

    #[tokio::test]
    async fn backend_destroy_removes_workspaces() {
        let services = FakeServices::new();
        services.cloud.seed("env", FakeState::new(4, LINEAGE));
        services.cloud.seed("env-plan", FakeState::default());
        services.cloud.seed("other", FakeState::new(1, LINEAGE));
        let mut req = request(backend_source(), "env", vars(&[]));
        req.params.action = Some(Action::Destroy);

        let resp = run_out(&req, &services).await.unwrap();

        assert_eq!(resp.version, Version::bare("env"));
        assert_eq!(services.cloud.workspace_names(), vec!["other"]);
    }

    #[tokio::test]
    async fn backend_delete_on_failure_drops_workspace() {
        let services = FakeServices::new();
        services.cloud.fail_apply(true);
        let terraform = TerraformConfig { delete_on_failure: Some(true), ..TerraformConfig::default() };

        let err = run_out(&request(backend_source(), "env", terraform), &services).await.unwrap_err();

        assert!(err.to_string().contains(APPLY_ERROR));
        assert!(services.cloud.workspace_names().is_empty());
    }

    #[tokio::test]
    async fn backend_failed_apply_keeps_workspace() {
        let services = FakeServices::new();
        services.cloud.fail_apply(true);

        run_out(&request(backend_source(), "env", vars(&[])), &services).await.unwrap_err();

        assert_eq!(services.cloud.workspace("env").map(|s| s.serial), Some(1));
    }

    // ── migration ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn migration_moves_legacy_state_into_workspace() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("mig-env"), FakeState::new(3, "l").to_bytes(), chrono::Utc::now()).await;

        let resp = run_out(&request(migrating_source(), "mig-env", vars(&[])), &services).await.unwrap();

        assert_eq!(services.storage.keys().await, vec!["envs/mig-env.tfstate.migrated".to_string()]);
        assert_eq!(resp.version, Version::backend("mig-env", 4, "l"));
        assert_eq!(services.cloud.workspace("mig-env").map(|s| s.serial), Some(4));
    }

    #[tokio::test]
    async fn migration_of_tainted_only_state() {
        let services = FakeServices::new();
        let tainted = format!("{}.tainted", state_key("mig-env"));
        services.storage.put_at(&tainted, FakeState::new(2, "l").to_bytes(), chrono::Utc::now()).await;

        let resp = run_out(&request(migrating_source(), "mig-env", vars(&[])), &services).await.unwrap();

        assert_eq!(services.storage.keys().await, vec!["envs/mig-env.tfstate.migrated".to_string()]);
        assert_eq!(resp.version, Version::backend("mig-env", 3, "l"));
        assert_eq!(services.cloud.workspace_names(), vec!["mig-env"]);
    }

    #[tokio::test]
    async fn migrating_destroy_keeps_only_migrated_copy() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("mig-env"), FakeState::new(3, "l").to_bytes(), chrono::Utc::now()).await;
        let mut req = request(migrating_source(), "mig-env", vars(&[]));
        req.params.action = Some(Action::Destroy);

        let resp = run_out(&req, &services).await.unwrap();

        assert_eq!(resp.version, Version::bare("mig-env"));
        assert_eq!(services.storage.keys().await, vec!["envs/mig-env.tfstate.migrated".to_string()]);
        assert!(services.cloud.workspace_names().is_empty());
        assert!(services.cloud.calls().iter().any(|c| c == "destroy"));
    }

    #[tokio::test]
    async fn migrating_plan_saves_plan_workspace() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("mig-env"), FakeState::new(3, "l").to_bytes(), chrono::Utc::now()).await;
        let plan = TerraformConfig { plan_only: Some(true), ..vars(&[]) };

        let resp = run_out(&request(migrating_source(), "mig-env", plan), &services).await.unwrap();

        assert_eq!(resp.version, Version::plan("mig-env", "fake-checksum"));
        assert_eq!(services.storage.keys().await, vec!["envs/mig-env.tfstate.migrated".to_string()]);
        assert_eq!(services.cloud.workspace_names(), vec!["mig-env", "mig-env-plan"]);
        assert_eq!(services.cloud.workspace("mig-env").map(|s| s.serial), Some(3));
    }

    #[tokio::test]
    async fn migration_survives_lagging_uploads_across_runs() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("mig-env"), FakeState::new(3, "l").to_bytes(), chrono::Utc::now()).await;
        services.storage.lag_uploads().await;
        let req = request(migrating_source(), "mig-env", vars(&[]));

        run_out(&req, &services).await.unwrap();
        let resp = run_out(&req, &services).await.unwrap();

        assert_eq!(services.storage.keys().await, vec!["envs/mig-env.tfstate.migrated".to_string()]);
        assert_eq!(resp.version, Version::backend("mig-env", 5, "l"));
    }

    #[tokio::test]
    async fn interrupted_migration_is_resumed() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("mig-env"), FakeState::new(3, LINEAGE).to_bytes(), chrono::Utc::now()).await;
        services.cloud.seed("mig-env", FakeState::new(3, LINEAGE));

        let resp = run_out(&request(migrating_source(), "mig-env", vars(&[])), &services).await.unwrap();

        assert_eq!(services.storage.keys().await, vec!["envs/mig-env.tfstate.migrated".to_string()]);
        assert_eq!(resp.version, Version::backend("mig-env", 4, LINEAGE));
    }

    #[tokio::test]
    async fn migration_refuses_existing_workspace() {
        let services = FakeServices::new();
        services.storage.put_at(&state_key("mig-env"), FakeState::new(3, "l").to_bytes(), chrono::Utc::now()).await;
        services.cloud.seed("mig-env", FakeState::new(1, LINEAGE));

        let err = run_out(&request(migrating_source(), "mig-env", vars(&[])), &services).await.unwrap_err();

        assert!(matches!(err, EngineError::MigrationConflict { .. }), "{:?}", err);
        assert_eq!(services.storage.keys().await, vec![state_key("mig-env")]);
    }

    // ── naming and model ──────────────────────────────────────────────────────

    struct Always(&'static str);

    impl NameGenerator for Always {
        fn generate(&self) -> String {
            self.0.to_string()
        }
    }

    #[tokio::test]
    async fn random_name_gives_up_when_always_taken() {
        let mut services = FakeServices::new();
        services.names = Box::new(Always("taken-name"));
        services.cloud.seed("taken-name", FakeState::new(1, LINEAGE));
        let req = OutRequest {
            source: backend_source(),
            params: OutParams { generate_random_name: true, ..OutParams::default() },
        };

        let err = run_out(&req, &services).await.unwrap_err();
        assert!(matches!(err, EngineError::NameExhausted { attempts: 10 }), "{:?}", err);
    }

    #[tokio::test]
    async fn random_name_is_used_for_new_env() {
        let mut services = FakeServices::new();
        services.names = Box::new(Always("fresh-name"));
        let req = OutRequest {
            source: legacy_source(),
            params: OutParams { generate_random_name: true, ..OutParams::default() },
        };
        let resp = run_out(&req, &services).await.unwrap();
        assert_eq!(resp.version.env_name, "fresh-name");
    }

    #[tokio::test]
    async fn pipeline_vars_reach_the_provisioner() {
        let mut services = FakeServices::new();
        services.host.insert("BUILD_ID".into(), "42".into());
        services.host.insert("BUILD_TEAM_NAME".into(), "main".into());
        let terraform = vars(&[("build_team_name", "override")]);

        run_out(&request(legacy_source(), "env", terraform), &services).await.unwrap();

        let model = &services.models()[0];
        assert_eq!(model.env.get("TF_VAR_build_id").map(String::as_str), Some("42"));
        assert!(!model.env.contains_key("TF_VAR_build_team_name"));
    }

    #[tokio::test]
    async fn params_terraform_overrides_source() {
        let services = FakeServices::new();
        let mut source = legacy_source();
        source.terraform.vars.insert("bucket".into(), json!("from-source"));
        source.terraform.vars.insert("region".into(), json!("us-east-1"));

        let resp = run_out(&request(source, "env", vars(&[("bucket", "from-params")])), &services)
            .await
            .unwrap();

        assert_eq!(field(&resp, "bucket"), Some("from-params"));
        assert_eq!(field(&resp, "region"), Some("us-east-1"));
    }

    #[tokio::test]
    async fn missing_env_name_is_rejected() {
        let services = FakeServices::new();
        let req = OutRequest { source: legacy_source(), params: OutParams::default() };
        let err = run_out(&req, &services).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingEnvName));
    }

    #[tokio::test]
    async fn backend_with_storage_is_rejected() {
        let services = FakeServices::new();
        let terraform = TerraformConfig { backend_type: Some("s3".into()), ..TerraformConfig::default() };
        let err = run_out(&request(legacy_source(), "env", terraform), &services).await.unwrap_err();
        assert!(err.to_string().contains("cannot specify both"), "{}", err);
        assert!(services.cloud.calls().is_empty());
    }
}
