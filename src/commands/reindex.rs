use std::path::Path;

use crate::error::Result;
use crate::output::{self, Format};
use crate::store::repo::Repo;

pub fn run(repo_root: &Path, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let report = repo.rebuild()?;
    eprintln!(
        "Reindexed {} records ({} messages, {} threads)",
        report.records, report.messages, report.threads
    );
    output::print_report(&report, format)
}
