use std::io::Write;

use anyhow::Result;
use chaos_inject_engine::handler::action::Executor;
use chaos_inject_engine::Engine;
use tracing::debug;

use crate::cmd::admin::{Detail, ListFilter};
use crate::cmd::command_line::Command;
use crate::cmd::storm::StormTarget;
use crate::config::Config;

pub mod admin;
pub mod command_line;
pub mod storm;

/// Run one administrative command against the persisted rule store, saving it back when the
/// command changed it.
pub fn execute<O: Write, E: Write>(
    command: Command,
    config: Config,
    out: &mut O,
    err: &mut E,
) -> Result<()> {
    let engine = Engine::load(config.engine, &config.store, Executor::default())?;
    let store = &engine.store;

    let changed = match command {
        Command::CreateResponse { verb, route, args } => {
            let rule = admin::create_response(store, engine.routes(), &verb, &route, &args, err)?;
            writeln!(out, "Created rule: {}", rule)?;
            true
        }
        Command::CreateAccess {
            verb,
            value,
            attribute,
            args,
        } => {
            let rule = admin::create_access(store, &verb, &attribute, &value, &args)?;
            writeln!(out, "Created rule: {}", rule)?;
            true
        }
        Command::List {
            verb,
            kinds,
            more,
            excess,
        } => {
            admin::list(store, &ListFilter { verb, kinds }, Detail { more, excess }, out, err)?;
            false
        }
        Command::Dump {
            kind,
            id,
            more,
            excess,
        } => {
            admin::dump_rule(store, kind, id, Detail { more, excess }, out, err)?;
            false
        }
        Command::Enable { kind, id } => {
            writeln!(out, "Enabled rule {}", admin::set_enabled(store, kind, id, true)?)?;
            true
        }
        Command::Disable { kind, id } => {
            writeln!(out, "Disabled rule {}", admin::set_enabled(store, kind, id, false)?)?;
            true
        }
        Command::Delete { kind, id } => {
            writeln!(out, "Deleted rule {}", admin::delete(store, kind, id)?)?;
            true
        }
        Command::Storm { end: true, .. } => {
            storm::storm_end(store, out)?;
            true
        }
        Command::Storm {
            users,
            groups,
            probability,
            ..
        } => {
            let target = StormTarget::new(users, groups)?;
            storm::storm_start(store, &target, probability, out)?;
            true
        }
    };

    if changed {
        store.save(&config.store)?;
    } else {
        debug!("rule store {} unchanged", config.store.display());
    }
    Ok(())
}
