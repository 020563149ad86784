//! Retention: compute a reachability-preserving keep set for one scope,
//! archive the live message log, and rewrite every family without the
//! discarded messages.
//!
//! Planning is a pure function over a `Projection`. Execution holds the
//! writer lock from the first read to the final rebuild, stages every new
//! file beside its live counterpart, and renames them into place only when
//! all of them are durable. Any error before the renames leaves the live
//! log byte-for-byte unchanged.

use std::collections::{BTreeSet, HashSet};
use std::fs;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{HuddleError, Result};
use crate::git;
use crate::model::{MENTIONS, MessageKind, SYSTEM_AUTHOR, TombstoneInfo};
use crate::store::log::{Rewrite, join_lines};
use crate::store::projection::Projection;
use crate::store::record::{Entry, Family, MessageRecord, Record};
use crate::store::repo::{Repo, rebuild_index};

/// What a prune run discards within its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Keep the newest `keep` messages (plus everything protected).
    Tail { keep: usize },
    /// Discard every in-scope message, with no protection and no tombstone.
    All,
    /// Discard messages carrying this reaction label, regardless of age.
    Label(String),
}

impl Policy {
    /// Build a policy from command-line style options.
    pub fn from_options(
        keep: Option<usize>,
        all: bool,
        label: Option<&str>,
        default_keep: usize,
    ) -> Result<Self> {
        match (keep, all, label) {
            (_, true, Some(_)) | (Some(_), _, Some(_)) => Err(HuddleError::InvalidArgument(
                "--label cannot be combined with --keep or --all".into(),
            )),
            (Some(k), true, None) if k != 0 => Err(HuddleError::InvalidArgument(
                "--all clears the scope; it requires --keep 0 or no --keep".into(),
            )),
            (_, true, None) => Ok(Self::All),
            (None, false, Some(label)) => {
                let label = label.trim();
                if label.is_empty() {
                    return Err(HuddleError::InvalidArgument(
                        "reaction label cannot be empty".into(),
                    ));
                }
                Ok(Self::Label(label.to_string()))
            }
            (keep, false, None) => Ok(Self::Tail {
                keep: keep.unwrap_or(default_keep),
            }),
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tail { keep } => write!(f, "keep {keep}"),
            Self::All => write!(f, "all"),
            Self::Label(label) => write!(f, "label {label}"),
        }
    }
}

/// The outcome of planning, before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunePlan {
    pub scope: String,
    /// Final discard set, in log order.
    pub discard: Vec<String>,
    /// In-scope survivors, in log order.
    pub keep: Vec<String>,
    /// Raw discard candidates saved by protection or reply ancestry.
    pub protected: Vec<String>,
    pub tombstone: Option<TombstoneInfo>,
}

/// Compute what `policy` would discard from `scope`.
pub fn plan(projection: &Projection, scope: &str, policy: &Policy) -> PrunePlan {
    let ordered = projection.messages_in_order();
    let in_scope: Vec<&str> = ordered
        .iter()
        .filter(|m| m.home == scope)
        .map(|m| m.id.as_str())
        .collect();

    if *policy == Policy::All {
        return PrunePlan {
            scope: scope.to_string(),
            discard: in_scope.iter().map(|id| id.to_string()).collect(),
            keep: vec![],
            protected: vec![],
            tombstone: None,
        };
    }

    let raw_discard: HashSet<&str> = match policy {
        Policy::Tail { keep } => {
            let cut = in_scope.len().saturating_sub(*keep);
            in_scope[..cut].iter().copied().collect()
        }
        Policy::Label(label) => in_scope
            .iter()
            .copied()
            .filter(|id| projection.messages[*id].has_reaction(label))
            .collect(),
        Policy::All => HashSet::new(),
    };

    let anchors = projection.anchor_ids();
    let favorites = projection.favorited_ids();
    let label = match policy {
        Policy::Label(label) => Some(label.as_str()),
        _ => None,
    };
    let required: HashSet<&str> = ordered
        .iter()
        .filter(|m| {
            let id = m.id.as_str();
            let reacted = match label {
                Some(label) => m.has_reactions_besides(label),
                None => m.has_reactions(),
            };
            anchors.contains(id) || favorites.contains(id) || reacted
        })
        .map(|m| m.id.as_str())
        .collect();

    // Every message outside the raw discard set survives, as do required ones.
    let mut keep: HashSet<&str> = ordered
        .iter()
        .map(|m| m.id.as_str())
        .filter(|id| !raw_discard.contains(id) || required.contains(id))
        .collect();
    let survivors: Vec<&str> = keep.iter().copied().collect();
    let bound = projection.messages.len() + 1;
    for start in survivors {
        keep_reply_ancestors(projection, start, &mut keep, bound);
    }

    let mut discard = Vec::new();
    let mut kept = Vec::new();
    let mut protected = Vec::new();
    for id in &in_scope {
        match (raw_discard.contains(id), keep.contains(id)) {
            (true, false) => discard.push(id.to_string()),
            (true, true) => {
                protected.push(id.to_string());
                kept.push(id.to_string());
            }
            (false, _) => kept.push(id.to_string()),
        }
    }

    let tombstone = tombstone_for(projection, scope, &discard);
    PrunePlan {
        scope: scope.to_string(),
        discard,
        keep: kept,
        protected,
        tombstone,
    }
}

/// Add the reply chain above `start` to `keep`, stopping at a parentless
/// message, one already kept, or one that no longer exists.
fn keep_reply_ancestors<'a>(
    projection: &'a Projection,
    start: &str,
    keep: &mut HashSet<&'a str>,
    bound: usize,
) {
    let mut steps = 0;
    let mut current = projection
        .messages
        .get(start)
        .and_then(|m| m.reply_to.as_deref());
    while let Some(parent_id) = current {
        let Some(parent) = projection.messages.get(parent_id) else {
            break;
        };
        if !keep.insert(parent.id.as_str()) {
            break;
        }
        steps += 1;
        if steps > bound {
            warn!(start, at = parent_id, "reply chain loops; ancestor walk stopped");
            break;
        }
        current = parent.reply_to.as_deref();
    }
}

fn tombstone_for(projection: &Projection, scope: &str, discard: &[String]) -> Option<TombstoneInfo> {
    let first = discard.first()?;
    let last = discard.last()?;
    let participants: BTreeSet<&str> = discard
        .iter()
        .filter_map(|id| projection.messages.get(id))
        .map(|m| m.author.as_str())
        .filter(|author| *author != SYSTEM_AUTHOR)
        .collect();
    Some(TombstoneInfo {
        scope: scope.to_string(),
        count: discard.len(),
        participants: participants.into_iter().map(String::from).collect(),
        first_id: first.clone(),
        last_id: last.clone(),
        git_sha: None,
    })
}

fn tombstone_body(info: &TombstoneInfo) -> String {
    let noun = if info.count == 1 { "message" } else { "messages" };
    if info.participants.is_empty() {
        format!("pruned {} {noun}", info.count)
    } else {
        format!(
            "pruned {} {noun} from {}",
            info.count,
            info.participants.join(", ")
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    /// Skip the git guardrails.
    pub force: bool,
    /// Plan and report without writing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PruneReport {
    pub scope: String,
    pub policy: String,
    pub dry_run: bool,
    pub discarded: usize,
    pub kept: usize,
    pub protected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tombstone_id: Option<String>,
    pub archived_records: usize,
    pub watermarks_repointed: usize,
    pub watermarks_cleared: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub discarded_ids: Vec<String>,
}

impl PruneReport {
    fn from_plan(plan: &PrunePlan, policy: &Policy, dry_run: bool) -> Self {
        Self {
            scope: plan.scope.clone(),
            policy: policy.to_string(),
            dry_run,
            discarded: plan.discard.len(),
            kept: plan.keep.len(),
            protected: plan.protected.len(),
            tombstone_id: None,
            archived_records: 0,
            watermarks_repointed: 0,
            watermarks_cleared: 0,
            discarded_ids: plan.discard.clone(),
        }
    }
}

impl Repo {
    /// Run retention over one scope (`room` or a thread ID).
    pub fn prune(&self, scope: &str, policy: &Policy, opts: PruneOptions) -> Result<PruneReport> {
        if scope == MENTIONS {
            return Err(HuddleError::InvalidArgument(
                "'mentions' holds no messages and cannot be pruned".into(),
            ));
        }
        self.home_thread(scope)?;

        if opts.dry_run {
            let projection = Projection::replay(&self.log.read_all()?);
            let plan = plan(&projection, scope, policy);
            return Ok(PruneReport::from_plan(&plan, policy, true));
        }

        if self.config.prune_guardrails && !opts.force {
            git::check_guardrails(self.data_dir())?;
        }

        let _lock = self.lock()?;
        let before = Projection::replay(&self.log.read_all()?);
        let plan = plan(&before, scope, policy);
        let mut report = PruneReport::from_plan(&plan, policy, false);
        info!(
            scope,
            %policy,
            discard = plan.discard.len(),
            keep = plan.keep.len(),
            protected = plan.protected.len(),
            "prune plan"
        );

        if plan.discard.is_empty() && *policy != Policy::All {
            return Ok(report);
        }

        let discard: HashSet<&str> = plan.discard.iter().map(String::as_str).collect();
        let mut rewrite = Rewrite::new();

        // Archive first: a snapshot of the live message log, or a full reset.
        let archive_path = self.log.archive_path();
        if *policy == Policy::All {
            rewrite.stage(&archive_path, "")?;
        } else {
            let mut archive = if archive_path.exists() {
                fs::read_to_string(&archive_path)?
            } else {
                String::new()
            };
            if !archive.is_empty() && !archive.ends_with('\n') {
                archive.push('\n');
            }
            let live = self.log.read_family(Family::Messages)?;
            report.archived_records = live.len();
            archive.push_str(&join_lines(live.iter().map(|l| l.raw.as_str())));
            rewrite.stage(&archive_path, &archive)?;
        }

        let mut tombstone_line = None;
        if let Some(mut info) = plan.tombstone.clone() {
            info.git_sha = git::current_head_info(self.project_root()).map(|h| h.sha);
            let id = self.fresh_tombstone_id(&before)?;
            let entry = Entry {
                seq: self.log.next_seq()?,
                ts: Utc::now(),
                record: Record::Message(MessageRecord {
                    id: id.clone(),
                    home: scope.to_string(),
                    author: SYSTEM_AUTHOR.to_string(),
                    body: tombstone_body(&info),
                    kind: MessageKind::Tombstone,
                    reply_to: None,
                    tombstone: Some(info),
                }),
            };
            tombstone_line = Some(serde_json::to_string(&entry)?);
            report.tombstone_id = Some(id);
        }

        // Messages family before the dependents.
        let families = std::iter::once(Family::Messages)
            .chain(Family::ALL.into_iter().filter(|f| *f != Family::Messages));
        for family in families {
            let lines = self.log.read_family(family)?;
            let total = lines.len();
            let kept: Vec<&str> = lines
                .iter()
                .filter(|line| {
                    line.entry
                        .record
                        .message_id()
                        .is_none_or(|id| !discard.contains(id))
                })
                .map(|line| line.raw.as_str())
                .collect();
            let dropped = total - kept.len();
            if family == Family::Messages {
                let mut contents = join_lines(kept);
                if let Some(line) = &tombstone_line {
                    contents.push_str(line);
                    contents.push('\n');
                }
                rewrite.stage(&self.log.family_path(family), &contents)?;
            } else if dropped > 0 {
                rewrite.stage(&self.log.family_path(family), &join_lines(kept))?;
            }
        }

        rewrite.commit()?;

        let (_, after) = rebuild_index(&self.log, &self.index)?;
        let missing: Vec<&String> = plan
            .keep
            .iter()
            .chain(report.tombstone_id.iter())
            .filter(|id| !after.messages.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            return Err(HuddleError::Inconsistent(format!(
                "kept messages missing after prune: {}",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let (repointed, cleared) = self.repoint_watermarks(&before, &after, &discard)?;
        report.watermarks_repointed = repointed;
        report.watermarks_cleared = cleared;

        info!(
            scope,
            discarded = report.discarded,
            kept = report.kept,
            tombstone = ?report.tombstone_id,
            "prune complete"
        );
        Ok(report)
    }

    fn fresh_tombstone_id(&self, before: &Projection) -> Result<String> {
        for _ in 0..8 {
            let id = self.fresh_message_id()?;
            if !before.messages.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(HuddleError::Conflict(
            "could not allocate an unused tombstone id".into(),
        ))
    }

    /// Move cursors off discarded messages onto their nearest surviving
    /// reply ancestor (as the chain stood before the prune), or clear them.
    fn repoint_watermarks(
        &self,
        before: &Projection,
        after: &Projection,
        discard: &HashSet<&str>,
    ) -> Result<(usize, usize)> {
        let mut marks = self.watermarks.load()?;
        let mut repointed = 0;
        let mut cleared = Vec::new();
        let bound = before.messages.len() + 1;

        for (key, mark) in marks.iter_mut() {
            if !discard.contains(mark.message_id.as_str()) {
                continue;
            }
            let mut target = None;
            let mut seen: HashSet<&str> = HashSet::new();
            let mut current = before
                .messages
                .get(&mark.message_id)
                .and_then(|m| m.reply_to.as_deref());
            while let Some(id) = current {
                if !seen.insert(id) || seen.len() > bound {
                    break;
                }
                if after.messages.contains_key(id) {
                    target = Some(id.to_string());
                    break;
                }
                current = before.messages.get(id).and_then(|m| m.reply_to.as_deref());
            }
            match target {
                Some(id) => {
                    mark.message_id = id;
                    repointed += 1;
                }
                None => cleared.push(key.clone()),
            }
        }
        for key in &cleared {
            marks.remove(key);
        }
        if repointed > 0 || !cleared.is_empty() {
            self.watermarks.save(&marks)?;
        }
        Ok((repointed, cleared.len()))
    }
}
