//! crmboard init command implementation
//!
//! Writes a default `.crmboard.toml` into the data directory.

use std::path::PathBuf;

use crate::config::{Config, CONFIG_FILE};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

use super::Context;

#[derive(serde::Serialize)]
struct InitReport {
    data_dir: PathBuf,
    config: PathBuf,
    created: bool,
}

pub fn run(ctx: &Context, force: bool) -> Result<()> {
    std::fs::create_dir_all(&ctx.data_dir)?;
    let path = ctx.data_dir.join(CONFIG_FILE);
    let created = force || !path.exists();
    if created {
        let mut config = Config::default();
        config.actor.default = ctx.actor.clone();
        config.save(&path)?;
    }

    let report = InitReport {
        data_dir: ctx.data_dir.clone(),
        config: path.clone(),
        created,
    };

    let header = if created {
        "crmboard init: wrote config".to_string()
    } else {
        "crmboard init: nothing to do".to_string()
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("data dir", ctx.data_dir.display().to_string());
    human.push_summary("config", path.display().to_string());
    if !created {
        human.push_warning("config already exists; pass --force to overwrite".to_string());
    }
    human.push_next_step("crmboard actor set <user-id>");
    human.push_next_step("crmboard board");

    emit_success(ctx.output, "init", &report, Some(&human))
}
