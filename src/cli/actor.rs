//! crmboard actor command implementation
//!
//! Provides actor identity helpers (set/show).

use std::path::PathBuf;

use crate::actor;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

use super::Context;

#[derive(serde::Serialize)]
struct ActorSetReport {
    actor: String,
    path: PathBuf,
}

#[derive(serde::Serialize)]
struct ActorShowReport {
    actor: String,
}

pub fn run_set(ctx: &Context, name: &str) -> Result<()> {
    actor::persist_actor(&ctx.data_dir, name)?;
    let actor_name = actor::resolve_actor(Some(ctx.data_dir.as_path()), Some(name))?.0;
    let actor_path = ctx.data_dir.join(".crmboard").join("actor");

    let report = ActorSetReport {
        actor: actor_name.clone(),
        path: actor_path.clone(),
    };

    let mut human = HumanOutput::new(format!("crmboard actor set: {actor_name}"));
    human.push_summary("actor", actor_name);
    human.push_summary("path", actor_path.display().to_string());
    human.push_next_step("crmboard board");

    emit_success(ctx.output, "actor set", &report, Some(&human))
}

pub fn run_show(ctx: &Context) -> Result<()> {
    let actor_name = ctx.actor.clone();
    let report = ActorShowReport {
        actor: actor_name.clone(),
    };

    let header = if actor_name == "unknown" {
        "crmboard actor: not set".to_string()
    } else {
        format!("crmboard actor: {actor_name}")
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("actor", actor_name.clone());

    if actor_name == "unknown" {
        human.push_warning("actor not set; the board will be empty".to_string());
        human.push_next_step("crmboard actor set <user-id>");
    }

    emit_success(ctx.output, "actor show", &report, Some(&human))
}
