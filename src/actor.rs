//! Actor identity.
//!
//! Resolution order:
//! 1) CLI --actor (explicit)
//! 2) CRMBOARD_ACTOR environment variable
//! 3) Persisted value in `<data-dir>/.crmboard/actor`
//! 4) Config default (actor.default) or "unknown"

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::StaticIdentity;

pub const ACTOR_ENV: &str = "CRMBOARD_ACTOR";
const ACTOR_DIR: &str = ".crmboard";
const ACTOR_FILENAME: &str = "actor";

/// Resolve the current actor using CLI, environment, persisted value, and config.
pub fn resolve_actor(data_dir: Option<&Path>, cli_actor: Option<&str>) -> Result<StaticIdentity> {
    if let Some(actor) = non_empty(cli_actor) {
        return Ok(StaticIdentity(actor.to_string()));
    }

    if let Ok(env_actor) = std::env::var(ACTOR_ENV) {
        if let Some(actor) = non_empty(Some(env_actor.as_str())) {
            return Ok(StaticIdentity(actor.to_string()));
        }
    }

    if let Some(dir) = data_dir {
        if let Some(actor) = load_persisted_actor(dir)? {
            return Ok(StaticIdentity(actor));
        }
        return Ok(StaticIdentity(Config::load_from_dir(dir).actor.default));
    }

    Ok(StaticIdentity("unknown".to_string()))
}

/// Persist the actor id for later runs.
pub fn persist_actor(data_dir: &Path, actor: &str) -> Result<()> {
    let actor = non_empty(Some(actor))
        .ok_or_else(|| Error::InvalidArgument("actor id cannot be empty".to_string()))?;
    std::fs::create_dir_all(data_dir.join(ACTOR_DIR))?;
    std::fs::write(actor_path(data_dir), format!("{actor}\n"))?;
    Ok(())
}

pub fn load_persisted_actor(data_dir: &Path) -> Result<Option<String>> {
    let path = actor_path(data_dir);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(non_empty(Some(raw.as_str())).map(str::to_string))
}

fn actor_path(data_dir: &Path) -> PathBuf {
    data_dir.join(ACTOR_DIR).join(ACTOR_FILENAME)
}

fn non_empty(input: Option<&str>) -> Option<&str> {
    input.map(str::trim).filter(|value| !value.is_empty())
}
