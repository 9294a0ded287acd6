use async_trait::async_trait;
use rand::seq::SliceRandom;
use tfres_domain::{OutParams, Source};
use tracing::{debug, info};

use crate::error::EngineError;

/// Random names tried before giving up on a collision-free one.
pub const RANDOM_NAME_ATTEMPTS: u32 = 10;

pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Anything that can tell whether an env name is already taken.
#[async_trait]
pub trait EnvRegistry: Send + Sync {
    async fn env_exists(&self, env_name: &str) -> Result<bool, EngineError>;
}

// ── Random names ──────────────────────────────────────────────────────────────

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "dapper", "eager", "fancy", "gentle", "happy", "icy", "jolly",
    "keen", "lively", "mellow", "nimble", "odd", "plucky", "quiet", "rapid", "sunny", "tidy",
    "upbeat", "vivid", "witty", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "aardvark", "badger", "cheetah", "dolphin", "egret", "falcon", "gecko", "heron", "ibis",
    "jaguar", "koala", "lemur", "marmot", "narwhal", "otter", "panda", "quokka", "raven",
    "salmon", "tapir", "urchin", "vulture", "walrus", "yak", "zebra",
];

/// `adjective-noun` pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNames;

impl NameGenerator for RandomNames {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("happy");
        let noun = NOUNS.choose(&mut rng).copied().unwrap_or("otter");
        format!("{}-{}", adjective, noun)
    }
}

// ── Env name resolution ───────────────────────────────────────────────────────

/// Trimmed, with interior spaces replaced by `-`.
pub fn slug(raw: &str) -> String {
    raw.trim().replace(' ', "-")
}

/// Pick the env name of an `out` request.
///
/// The first non-empty of `params.env_name_file`, `params.generate_random_name`,
/// `params.env_name` and `source.env_name` wins.
pub async fn resolve_env_name(
    params: &OutParams,
    source: &Source,
    registry: &dyn EnvRegistry,
    names: &dyn NameGenerator,
) -> Result<String, EngineError> {
    if let Some(file) = params.env_name_file.as_deref().filter(|f| !f.trim().is_empty()) {
        let content = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| EngineError::io(file, e))?;
        let name = slug(&content);
        if !name.is_empty() {
            debug!(env_name = %name, file, "env name read from file");
            return Ok(name);
        }
    }

    if params.generate_random_name {
        return random_env_name(registry, names).await;
    }

    params
        .env_name
        .as_deref()
        .map(slug)
        .filter(|n| !n.is_empty())
        .or_else(|| source.env_name().map(slug))
        .filter(|n| !n.is_empty())
        .ok_or(EngineError::MissingEnvName)
}

async fn random_env_name(registry: &dyn EnvRegistry, names: &dyn NameGenerator) -> Result<String, EngineError> {
    for attempt in 1..=RANDOM_NAME_ATTEMPTS {
        let name = slug(&names.generate());
        if name.is_empty() {
            continue;
        }
        if !registry.env_exists(&name).await? {
            info!(env_name = %name, attempt, "generated env name");
            return Ok(name);
        }
        debug!(env_name = %name, attempt, "generated env name already taken");
    }
    Err(EngineError::NameExhausted { attempts: RANDOM_NAME_ATTEMPTS })
}
