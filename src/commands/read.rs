use std::path::Path;

use serde_json::json;

use crate::error::Result;
use crate::output::{self, Format};
use crate::store::repo::Repo;

/// Move `agent`'s watermark in `home` to message `id`.
pub fn mark(repo_root: &Path, home: &str, id: &str, agent: &str, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let home = repo.resolve_home(home)?;
    let id = repo.get_message_by_prefix(id)?.id;
    let mark = repo.mark_read(agent, &home, &id)?;
    output::print_report(&mark, format)
}

pub fn unread(repo_root: &Path, home: &str, agent: &str, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let home = repo.resolve_home(home)?;
    let count = repo.unread(agent, &home)?;
    output::print_report(
        &json!({ "agent": agent, "home": home, "unread": count }),
        format,
    )
}
