use std::path::Path;

use crate::error::Result;
use crate::model::ROOM;
use crate::output::{self, Format};
use crate::store::prune::{Policy, PruneOptions};
use crate::store::repo::Repo;

#[allow(clippy::too_many_arguments)]
pub fn run(
    repo_root: &Path,
    home: Option<String>,
    keep: Option<usize>,
    all: bool,
    label: Option<String>,
    dry_run: bool,
    force: bool,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let scope = match home {
        Some(home) => repo.resolve_home(&home)?,
        None => ROOM.to_string(),
    };
    let policy = Policy::from_options(keep, all, label.as_deref(), repo.config.default_keep)?;
    let report = repo.prune(&scope, &policy, PruneOptions { force, dry_run })?;
    if format != Format::Json && !dry_run {
        eprintln!(
            "Pruned {} message(s) from {}, kept {}",
            report.discarded, report.scope, report.kept
        );
    }
    output::print_report(&report, format)
}
