use std::path::Path;

use serde_json::json;

use crate::error::Result;
use crate::output::{self, Format};
use crate::store::repo::Repo;

fn report(
    kind: &str,
    target: &str,
    agent: &str,
    active: bool,
    changed: bool,
    format: Format,
) -> Result<()> {
    output::print_report(
        &json!({
            "kind": kind,
            "target": target,
            "agent": agent,
            "active": active,
            "changed": changed,
        }),
        format,
    )
}

pub fn subscribe(
    repo_root: &Path,
    reference: &str,
    agent: &str,
    active: bool,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let thread = repo.resolve_thread(reference)?.id;
    let changed = repo.set_subscription(&thread, agent, active)?;
    report("subscription", &thread, agent, active, changed, format)
}

pub fn fave(repo_root: &Path, id: &str, agent: &str, active: bool, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.get_message_by_prefix(id)?.id;
    let changed = repo.set_favorite(&id, agent, active)?;
    report("favorite", &id, agent, active, changed, format)
}

pub fn pin(repo_root: &Path, id: &str, agent: &str, active: bool, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.get_message_by_prefix(id)?.id;
    let changed = repo.set_pin(&id, agent, active)?;
    report("pin", &id, agent, active, changed, format)
}
