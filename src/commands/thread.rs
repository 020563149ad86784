use std::path::Path;

use crate::error::Result;
use crate::output::{self, Format};
use crate::store::repo::Repo;

fn print(repo: &Repo, thread: &crate::model::Thread, format: Format) -> Result<()> {
    let path = repo.thread_path(&thread.id)?;
    output::print_thread(thread, &path, format)
}

pub fn create(
    repo_root: &Path,
    name: &str,
    parent: Option<String>,
    anchor: Option<String>,
    created_by: &str,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let parent = parent
        .map(|p| repo.resolve_thread(&p).map(|t| t.id))
        .transpose()?;
    let anchor = anchor
        .map(|a| repo.get_message_by_prefix(&a).map(|m| m.id))
        .transpose()?;
    let thread = repo.create_thread(name, parent.as_deref(), anchor.as_deref(), created_by)?;
    print(&repo, &thread, format)
}

pub fn sub(
    repo_root: &Path,
    anchor: &str,
    name: &str,
    created_by: &str,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let anchor = repo.get_message_by_prefix(anchor)?.id;
    let thread = repo.create_subthread(&anchor, name, created_by)?;
    print(&repo, &thread, format)
}

pub fn rename(repo_root: &Path, reference: &str, name: &str, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.resolve_thread(reference)?.id;
    let thread = repo.rename_thread(&id, name)?;
    print(&repo, &thread, format)
}

pub fn archive(repo_root: &Path, reference: &str, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.resolve_thread(reference)?.id;
    let thread = repo.archive_thread(&id)?;
    print(&repo, &thread, format)
}

pub fn reopen(repo_root: &Path, reference: &str, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.resolve_thread(reference)?.id;
    let thread = repo.reopen_thread(&id)?;
    print(&repo, &thread, format)
}

/// Move a thread under `to`, or to the root when `to` is `None`.
pub fn reparent(
    repo_root: &Path,
    reference: &str,
    to: Option<String>,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.resolve_thread(reference)?.id;
    let to = to.map(|t| repo.resolve_thread(&t).map(|t| t.id)).transpose()?;
    let thread = repo.reparent_thread(&id, to.as_deref())?;
    print(&repo, &thread, format)
}

pub fn list(repo_root: &Path, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let threads = repo.index.list_threads()?;
    match format {
        Format::Json => output::print_json(&threads),
        _ => {
            for thread in &threads {
                print(&repo, thread, format)?;
            }
            Ok(())
        }
    }
}

pub fn tree(repo_root: &Path, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let nodes = repo.thread_tree()?;
    output::print_tree(&nodes, format)
}
