//! Thread forest: name rules, sibling and mirror-key collisions, bounded
//! ancestor walks, and name/path resolution.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::error::{HuddleError, Result};
use crate::ids;
use crate::model::{MENTIONS, ROOM, Thread};
use crate::store::index::Index;

pub const MAX_NAME_LEN: usize = 64;
pub const PATH_SEPARATOR: char = '/';
/// Leading character of reserved (system mirror) name segments.
pub const RESERVED_PREFIX: char = '_';

/// Validate a thread name, returning it trimmed.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HuddleError::InvalidArgument(
            "thread name cannot be empty".into(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(HuddleError::InvalidArgument(format!(
            "thread name is longer than {MAX_NAME_LEN} characters"
        )));
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(HuddleError::InvalidArgument(format!(
            "thread name '{name}' contains '{PATH_SEPARATOR}'"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(HuddleError::InvalidArgument(format!(
            "thread name '{}' contains control characters",
            name.escape_default()
        )));
    }
    if name == ROOM || name == MENTIONS {
        return Err(HuddleError::InvalidArgument(format!(
            "'{name}' is a reserved home name"
        )));
    }
    Ok(name.to_string())
}

/// True when any segment of `path` starts with the reserved prefix.
pub fn is_reserved_path(path: &str) -> bool {
    path.split(PATH_SEPARATOR)
        .any(|segment| segment.trim_start().starts_with(RESERVED_PREFIX))
}

/// Normalized form of a thread path used to spot duplicate structures:
/// segments lowercased, the reserved `_` prefix stripped, and runs of `-`,
/// `_` and whitespace folded to a single `-`.
pub fn mirror_key(path: &str) -> String {
    path.split(PATH_SEPARATOR)
        .map(|segment| {
            let segment = segment
                .trim()
                .trim_start_matches(RESERVED_PREFIX)
                .to_lowercase();
            let mut folded = String::with_capacity(segment.len());
            let mut in_run = false;
            for c in segment.chars() {
                if c == '-' || c == '_' || c.is_whitespace() {
                    if !in_run {
                        folded.push('-');
                    }
                    in_run = true;
                } else {
                    folded.push(c);
                    in_run = false;
                }
            }
            folded
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// One node of `Forest::tree`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TreeNode {
    #[serde(flatten)]
    pub thread: Thread,
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// Snapshot of every thread, for walks that must not hit the database per step.
pub struct Forest {
    threads: BTreeMap<String, Thread>,
}

impl Forest {
    pub fn new(threads: impl IntoIterator<Item = Thread>) -> Self {
        Self {
            threads: threads.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn load(index: &Index) -> Result<Self> {
        Ok(Self::new(index.list_threads()?))
    }

    pub fn get(&self, id: &str) -> Option<&Thread> {
        self.threads.get(id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Ancestors of `id`, nearest first.
    ///
    /// The walk is bounded by the number of threads; a revisit or an
    /// overrun means the stored parent edges already form a loop.
    pub fn ancestors(&self, id: &str) -> Result<Vec<&Thread>> {
        let bound = self.threads.len() + 1;
        let mut visited: HashSet<&str> = HashSet::from([id]);
        let mut chain = Vec::new();
        let mut current = self.threads.get(id).and_then(|t| t.parent.as_deref());
        while let Some(parent_id) = current {
            if !visited.insert(parent_id) || visited.len() > bound {
                return Err(HuddleError::CycleDetected(format!(
                    "parent chain of {id} loops through {parent_id}"
                )));
            }
            let Some(parent) = self.threads.get(parent_id) else {
                break;
            };
            chain.push(parent);
            current = parent.parent.as_deref();
        }
        Ok(chain)
    }

    /// `/`-joined names from the root down to `id`.
    pub fn path(&self, id: &str) -> Result<String> {
        let thread = self
            .threads
            .get(id)
            .ok_or_else(|| HuddleError::not_found("thread", id))?;
        let mut names: Vec<&str> = self
            .ancestors(id)?
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        names.reverse();
        names.push(&thread.name);
        Ok(names.join("/"))
    }

    fn parent_path(&self, parent: Option<&str>) -> Result<Option<String>> {
        parent.map(|p| self.path(p)).transpose()
    }

    /// Direct children of `parent` (roots when `None`), by name.
    pub fn children(&self, parent: Option<&str>) -> Vec<&Thread> {
        let mut children: Vec<&Thread> = self
            .threads
            .values()
            .filter(|t| t.parent.as_deref() == parent)
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        children
    }

    /// `id` and everything below it.
    pub fn subtree<'a>(&'a self, id: &'a str) -> HashSet<&'a str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            stack.extend(
                self.threads
                    .values()
                    .filter(|t| t.parent.as_deref() == Some(current))
                    .map(|t| t.id.as_str()),
            );
        }
        seen
    }

    /// Reject placing a thread named `name` under `parent` when a sibling has
    /// the same name, or when the path and another thread's path share a
    /// mirror key and either of them lies in the reserved namespace.
    /// `moving` excludes that thread and its subtree from the comparison.
    pub fn check_placement(
        &self,
        name: &str,
        parent: Option<&str>,
        moving: Option<&str>,
    ) -> Result<()> {
        if let Some(parent) = parent
            && !self.threads.contains_key(parent)
        {
            return Err(HuddleError::not_found("thread", parent));
        }
        let excluded = moving.map(|id| self.subtree(id)).unwrap_or_default();

        if let Some(sibling) = self
            .children(parent)
            .into_iter()
            .find(|t| t.name == name && !excluded.contains(t.id.as_str()))
        {
            return Err(HuddleError::Conflict(format!(
                "a thread named '{name}' already exists here ({})",
                sibling.id
            )));
        }

        let path = match self.parent_path(parent)? {
            Some(parent_path) => format!("{parent_path}/{name}"),
            None => name.to_string(),
        };
        let key = mirror_key(&path);
        for thread in self.threads.values() {
            if excluded.contains(thread.id.as_str()) {
                continue;
            }
            let existing = self.path(&thread.id)?;
            if existing != path
                && (is_reserved_path(&path) || is_reserved_path(&existing))
                && mirror_key(&existing) == key
            {
                return Err(HuddleError::Conflict(format!(
                    "path '{path}' mirrors existing thread '{existing}' ({})",
                    thread.id
                )));
            }
        }
        Ok(())
    }

    /// Walk `new_parent`'s ancestor chain looking for `thread`, identity
    /// included. Finding it means the move would close a loop.
    pub fn check_reparent(&self, thread: &str, new_parent: Option<&str>) -> Result<()> {
        let Some(new_parent) = new_parent else {
            return Ok(());
        };
        if !self.threads.contains_key(new_parent) {
            return Err(HuddleError::not_found("thread", new_parent));
        }
        if new_parent == thread {
            return Err(HuddleError::CycleDetected(format!(
                "thread {thread} cannot be its own parent"
            )));
        }
        if self
            .ancestors(new_parent)?
            .iter()
            .any(|ancestor| ancestor.id == thread)
        {
            return Err(HuddleError::CycleDetected(format!(
                "{new_parent} is a descendant of {thread}"
            )));
        }
        Ok(())
    }

    /// Resolve a thread reference: exact ID, `/`-separated path, unique
    /// bare name, then unique ID prefix.
    pub fn resolve(&self, reference: &str) -> Result<&Thread> {
        let reference = reference.trim().trim_matches(PATH_SEPARATOR);
        if let Some(thread) = self.threads.get(reference) {
            return Ok(thread);
        }

        let mut by_path = Vec::new();
        for thread in self.threads.values() {
            if self.path(&thread.id)? == reference {
                by_path.push(thread);
            }
        }
        if let [thread] = by_path.as_slice() {
            return Ok(*thread);
        }

        if !reference.contains(PATH_SEPARATOR) {
            let named: Vec<&Thread> = self
                .threads
                .values()
                .filter(|t| t.name == reference)
                .collect();
            match named.as_slice() {
                [thread] => return Ok(*thread),
                [] => {}
                many => {
                    return Err(HuddleError::Ambiguous {
                        prefix: reference.to_string(),
                        candidates: many.iter().map(|t| t.id.clone()).collect(),
                    });
                }
            }
        }

        let id = ids::resolve_prefix(
            "thread",
            reference,
            self.threads.keys().map(String::as_str),
        )?;
        self.threads
            .get(&id)
            .ok_or_else(|| HuddleError::not_found("thread", id))
    }

    /// Nested view of the whole forest. Threads whose parent is unknown are
    /// shown as roots.
    pub fn tree(&self) -> Result<Vec<TreeNode>> {
        let mut roots: Vec<&Thread> = self
            .threads
            .values()
            .filter(|t| match t.parent.as_deref() {
                None => true,
                Some(p) => !self.threads.contains_key(p),
            })
            .collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        roots.into_iter().map(|t| self.node(t)).collect()
    }

    fn node(&self, thread: &Thread) -> Result<TreeNode> {
        let children = self
            .children(Some(&thread.id))
            .into_iter()
            .map(|child| self.node(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(TreeNode {
            thread: thread.clone(),
            path: self.path(&thread.id)?,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThreadStatus;
    use chrono::Utc;

    fn thread(id: &str, name: &str, parent: Option<&str>) -> Thread {
        Thread {
            id: id.into(),
            name: name.into(),
            parent: parent.map(String::from),
            status: ThreadStatus::Open,
            anchor: None,
            created_by: "alice".into(),
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
        }
    }

    fn sample() -> Forest {
        Forest::new([
            thread("thr-a", "ops", None),
            thread("thr-b", "deploy", Some("thr-a")),
            thread("thr-c", "canary", Some("thr-b")),
            thread("thr-d", "design", None),
        ])
    }

    #[test]
    fn names_are_validated() {
        assert_eq!(validate_name("  ops ").unwrap(), "ops");
        for bad in ["", "   ", "a/b", "room", "mentions", "tab\there"] {
            assert!(
                matches!(validate_name(bad), Err(HuddleError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn mirror_key_folds_reserved_prefix_case_and_separators() {
        assert_eq!(mirror_key("_Archive/Old  Stuff"), "archive/old-stuff");
        assert_eq!(mirror_key("archive/old_-_stuff"), "archive/old-stuff");
        assert_ne!(mirror_key("archive/old"), mirror_key("archive/older"));
    }

    #[test]
    fn paths_and_ancestors() {
        let forest = sample();
        assert_eq!(forest.path("thr-c").unwrap(), "ops/deploy/canary");
        let ancestors: Vec<&str> = forest
            .ancestors("thr-c")
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ancestors, vec!["thr-b", "thr-a"]);
    }

    #[test]
    fn reparent_onto_self_or_descendant_is_a_cycle() {
        let forest = sample();
        for target in ["thr-a", "thr-b", "thr-c"] {
            assert!(matches!(
                forest.check_reparent("thr-a", Some(target)),
                Err(HuddleError::CycleDetected(_))
            ));
        }
        assert!(forest.check_reparent("thr-c", Some("thr-d")).is_ok());
        assert!(forest.check_reparent("thr-c", None).is_ok());
        assert!(matches!(
            forest.check_reparent("thr-c", Some("thr-zz")),
            Err(HuddleError::NotFound { .. })
        ));
    }

    #[test]
    fn corrupt_parent_loop_fails_fast() {
        let forest = Forest::new([
            thread("thr-1", "one", Some("thr-2")),
            thread("thr-2", "two", Some("thr-1")),
            thread("thr-3", "three", None),
        ]);
        assert!(matches!(
            forest.ancestors("thr-1"),
            Err(HuddleError::CycleDetected(_))
        ));
        assert!(matches!(
            forest.check_reparent("thr-3", Some("thr-1")),
            Err(HuddleError::CycleDetected(_))
        ));
    }

    #[test]
    fn sibling_and_mirror_collisions_conflict() {
        let forest = Forest::new([
            thread("thr-a", "ops", None),
            thread("thr-r", "_archive", None),
            thread("thr-x", "old notes", Some("thr-r")),
        ]);
        assert!(matches!(
            forest.check_placement("ops", None, None),
            Err(HuddleError::Conflict(_))
        ));
        assert!(matches!(
            forest.check_placement("Archive", None, None),
            Err(HuddleError::Conflict(_))
        ));
        assert!(forest.check_placement("ops", Some("thr-r"), None).is_ok());
        assert!(forest.check_placement("deploy", None, None).is_ok());
    }

    #[test]
    fn mirror_keys_only_collide_with_reserved_paths() {
        let forest = Forest::new([
            thread("thr-a", "deploy-log", None),
            thread("thr-r", "_deploy log", None),
        ]);
        assert!(is_reserved_path("_archive/old"));
        assert!(is_reserved_path("ops/_mirror"));
        assert!(!is_reserved_path("ops/deploy_log"));

        // `Deploy Log` folds to the same key as `_deploy log`.
        assert!(matches!(
            forest.check_placement("Deploy Log", None, Some("thr-a")),
            Err(HuddleError::Conflict(_))
        ));
        let unreserved = Forest::new([thread("thr-a", "deploy-log", None)]);
        assert!(unreserved.check_placement("Deploy Log", None, None).is_ok());
    }

    #[test]
    fn moving_a_thread_ignores_its_own_old_path() {
        let forest = sample();
        assert!(forest
            .check_placement("deploy", Some("thr-a"), Some("thr-b"))
            .is_ok());
    }

    #[test]
    fn resolve_by_id_path_name_and_prefix() {
        let forest = sample();
        assert_eq!(forest.resolve("thr-b").unwrap().id, "thr-b");
        assert_eq!(forest.resolve("ops/deploy/canary").unwrap().id, "thr-c");
        assert_eq!(forest.resolve("canary").unwrap().id, "thr-c");
        assert_eq!(forest.resolve("d").unwrap().id, "thr-d");
        assert!(matches!(
            forest.resolve("nope"),
            Err(HuddleError::NotFound { .. })
        ));
    }

    #[test]
    fn tree_nests_children_by_name() {
        let forest = sample();
        let tree = forest.tree().unwrap();
        let roots: Vec<&str> = tree.iter().map(|n| n.thread.name.as_str()).collect();
        assert_eq!(roots, vec!["design", "ops"]);
        assert_eq!(tree[1].children[0].children[0].path, "ops/deploy/canary");
    }
}
