use std::path::Path;

use git2::{BranchType, Repository, StatusOptions};
use tracing::warn;

use crate::error::{Guardrail, HuddleError, Result};

/// Information about the current HEAD: branch name and commit SHA.
pub struct HeadInfo {
    pub branch: Option<String>,
    pub sha: String,
}

/// Retrieve the current HEAD's branch name and commit SHA.
/// Returns None outside a git repository or on an unborn branch.
pub fn current_head_info(path: &Path) -> Option<HeadInfo> {
    let repo = Repository::discover(path).ok()?;
    let head = repo.head().ok()?;
    let branch = if head.is_branch() {
        head.shorthand().map(String::from)
    } else {
        None
    };
    let sha = head.peel_to_commit().ok()?.id().to_string();
    Some(HeadInfo { branch, sha })
}

/// Check that `data_dir` can be rewritten safely: it lives in a git work
/// tree, has no uncommitted changes (untracked files included, ignored
/// files excluded), and the current branch is level with its upstream.
///
/// A branch without an upstream, or with no commits yet, skips the sync
/// check.
pub fn check_guardrails(data_dir: &Path) -> Result<()> {
    let data_dir = data_dir.canonicalize()?;
    let Ok(repo) = Repository::discover(&data_dir) else {
        return blocked(Guardrail::NotGitRepository);
    };
    let Some(workdir) = repo.workdir() else {
        return blocked(Guardrail::NotGitRepository);
    };
    let workdir = workdir.canonicalize()?;
    let relative = data_dir
        .strip_prefix(&workdir)
        .map_err(|_| HuddleError::Guarded(Guardrail::NotGitRepository))?;

    let dirty = dirty_paths(&repo, relative)?;
    if !dirty.is_empty() {
        return blocked(Guardrail::DirtyDataDir(dirty));
    }

    if let Some((ahead, behind)) = upstream_divergence(&repo)?
        && (ahead, behind) != (0, 0)
    {
        return blocked(Guardrail::Unsynced { ahead, behind });
    }
    Ok(())
}

fn blocked(guardrail: Guardrail) -> Result<()> {
    warn!(%guardrail, "prune blocked by guardrail");
    Err(HuddleError::Guarded(guardrail))
}

fn dirty_paths(repo: &Repository, relative: &Path) -> Result<Vec<String>> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let spec = relative.to_string_lossy().replace('\\', "/");
    if !spec.is_empty() {
        opts.pathspec(spec);
    }

    let statuses = repo.statuses(Some(&mut opts))?;
    let mut paths: Vec<String> = statuses
        .iter()
        .filter(|entry| !entry.status().is_ignored())
        .filter_map(|entry| entry.path().map(String::from))
        .collect();
    paths.sort();
    Ok(paths)
}

/// `(ahead, behind)` of HEAD against its upstream, or `None` when there is
/// no upstream to compare with.
fn upstream_divergence(repo: &Repository) -> Result<Option<(usize, usize)>> {
    let Ok(head) = repo.head() else {
        return Ok(None);
    };
    if !head.is_branch() {
        return Ok(None);
    }
    let Some(name) = head.shorthand() else {
        return Ok(None);
    };
    let branch = repo.find_branch(name, BranchType::Local)?;
    let Ok(upstream) = branch.upstream() else {
        return Ok(None);
    };
    let (Some(local), Some(remote)) = (head.target(), upstream.get().target()) else {
        return Ok(None);
    };
    Ok(Some(repo.graph_ahead_behind(local, remote)?))
}
