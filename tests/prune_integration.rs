use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::Repository;
use huddle::error::{Guardrail, HuddleError};
use huddle::model::{Message, MessageKind, ROOM};
use huddle::store::messages::NewMessage;
use huddle::store::prune::{Policy, PruneOptions};
use huddle::store::repo::{DATA_DIR, Repo};
use tempfile::tempdir;

const FORCE: PruneOptions = PruneOptions {
    force: true,
    dry_run: false,
};

fn post(repo: &Repo, home: &str, author: &str, body: &str, reply_to: Option<&str>) -> Message {
    let mut new = NewMessage::new(home, author, body);
    new.reply_to = reply_to.map(String::from);
    repo.create_message(new).unwrap()
}

/// Post `count` room messages, alternating authors. Returns them in order.
fn fill_room(repo: &Repo, count: usize) -> Vec<Message> {
    (1..=count)
        .map(|n| {
            let author = if n % 2 == 0 { "bob" } else { "alice" };
            post(repo, ROOM, author, &format!("m{n}"), None)
        })
        .collect()
}

fn room_ids(repo: &Repo) -> Vec<String> {
    repo.index
        .messages_in(ROOM)
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect()
}

fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("Test", "test@example.com").unwrap();
    let parents: Vec<git2::Commit> = repo
        .head()
        .ok()
        .and_then(|h| h.peel_to_commit().ok())
        .into_iter()
        .collect();
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap();
}

fn snapshot_files(data_dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    for sub in ["log", "archive"] {
        for entry in fs::read_dir(data_dir.join(sub)).unwrap() {
            let path = entry.unwrap().path();
            files.insert(path.clone(), fs::read(&path).unwrap());
        }
    }
    files
}

#[test]
fn scenario_a_favorite_and_reply_ancestors_survive() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let room = fill_room(&repo, 20);
    // m21..m25, where m23 replies to m3.
    let mut tail = Vec::new();
    for n in 21..=25 {
        let reply_to = (n == 23).then(|| room[2].id.as_str());
        tail.push(post(&repo, ROOM, "carol", &format!("m{n}"), reply_to));
    }
    repo.set_favorite(&room[9].id, "bob", true).unwrap();

    let report = repo
        .prune(ROOM, &Policy::Tail { keep: 5 }, FORCE)
        .unwrap();

    let survivors = room_ids(&repo);
    let mut expected: Vec<String> = vec![room[2].id.clone(), room[9].id.clone()];
    expected.extend(tail.iter().map(|m| m.id.clone()));
    let tombstone_id = report.tombstone_id.clone().unwrap();
    expected.push(tombstone_id.clone());
    assert_eq!(survivors, expected);

    let tombstones: Vec<Message> = repo
        .index
        .messages_in(ROOM)
        .unwrap()
        .into_iter()
        .filter(|m| m.kind == MessageKind::Tombstone)
        .collect();
    assert_eq!(tombstones.len(), 1);
    let info = tombstones[0].tombstone.clone().unwrap();
    // 25 in scope, 7 kept besides the tombstone.
    assert_eq!(info.count, 25 - 7);
    assert_eq!(report.discarded, 18);
    assert_eq!(info.first_id, room[0].id);
    assert_eq!(info.last_id, room[19].id);
    assert_eq!(info.participants, vec!["alice", "bob"]);
    assert!(info.git_sha.is_none());

    // Discarded raw records went to the archive.
    let archived = repo.log.read_archive().unwrap();
    assert_eq!(archived.len(), 25);
}

#[test]
fn scenario_b_all_empties_room_and_archive() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    fill_room(&repo, 6);
    repo.prune(ROOM, &Policy::Tail { keep: 2 }, FORCE).unwrap();
    assert!(!repo.log.read_archive().unwrap().is_empty());

    let report = repo.prune(ROOM, &Policy::All, FORCE).unwrap();
    assert!(room_ids(&repo).is_empty());
    assert!(repo.log.read_archive().unwrap().is_empty());
    assert!(report.tombstone_id.is_none());
}

#[test]
fn ordinary_prunes_append_to_the_archive() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    fill_room(&repo, 6);
    repo.prune(ROOM, &Policy::Tail { keep: 2 }, FORCE).unwrap();
    let first = repo.log.read_archive().unwrap();
    assert_eq!(first.len(), 6);

    // Two survivors plus the tombstone, then three more posts.
    for n in 7..=9 {
        post(&repo, ROOM, "carol", &format!("m{n}"), None);
    }
    repo.prune(ROOM, &Policy::Tail { keep: 2 }, FORCE).unwrap();
    let second = repo.log.read_archive().unwrap();
    assert_eq!(second.len(), 12);
    assert_eq!(&second[..6], &first[..]);
    assert!(
        second[6..]
            .iter()
            .any(|line| line.raw.contains("\"m9\""))
    );
}

#[test]
fn tail_keeps_exactly_k_newest_without_protection() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let room = fill_room(&repo, 12);

    let report = repo
        .prune(ROOM, &Policy::Tail { keep: 4 }, FORCE)
        .unwrap();
    assert_eq!(report.kept, 4);
    assert_eq!(report.discarded, 8);

    let survivors = room_ids(&repo);
    let kept: Vec<String> = room[8..].iter().map(|m| m.id.clone()).collect();
    assert_eq!(&survivors[..4], kept.as_slice());
    assert_eq!(survivors.len(), 5);
}

#[test]
fn prune_only_touches_its_scope() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let thread = repo.create_thread("ops", None, None, "alice").unwrap();
    fill_room(&repo, 5);
    let in_thread: Vec<String> = (0..3)
        .map(|n| post(&repo, &thread.id, "bob", &format!("t{n}"), None).id)
        .collect();

    repo.prune(&thread.id, &Policy::Tail { keep: 1 }, FORCE)
        .unwrap();
    assert_eq!(room_ids(&repo).len(), 5);
    let left: Vec<String> = repo
        .index
        .messages_in(&thread.id)
        .unwrap()
        .into_iter()
        .filter(|m| m.kind != MessageKind::Tombstone)
        .map(|m| m.id)
        .collect();
    assert_eq!(left, vec![in_thread[2].clone()]);
}

#[test]
fn dependent_records_of_discarded_messages_are_dropped() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let room = fill_room(&repo, 4);
    repo.edit_message(&room[0].id, "edited", "alice", None)
        .unwrap();
    repo.add_reaction(&room[3].id, "bob", "+1").unwrap();

    repo.prune(ROOM, &Policy::Tail { keep: 1 }, FORCE).unwrap();
    assert!(repo.index.find_message(&room[0].id).unwrap().is_none());
    assert!(repo.verify().unwrap().is_empty());
    let edits = repo
        .log
        .read_family(huddle::store::record::Family::MessageEdits)
        .unwrap();
    assert!(edits.is_empty());
}

#[test]
fn label_policy_discards_only_labelled_messages() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let room = fill_room(&repo, 4);
    repo.add_reaction(&room[1].id, "bob", "done").unwrap();
    repo.add_reaction(&room[2].id, "bob", "done").unwrap();
    repo.add_reaction(&room[2].id, "carol", "important").unwrap();

    let report = repo
        .prune(ROOM, &Policy::Label("done".into()), FORCE)
        .unwrap();
    assert_eq!(report.discarded, 1);
    assert!(repo.index.find_message(&room[1].id).unwrap().is_none());
    assert!(repo.index.find_message(&room[2].id).unwrap().is_some());
}

#[test]
fn dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    fill_room(&repo, 6);
    let before = snapshot_files(repo.data_dir());

    let report = repo
        .prune(
            ROOM,
            &Policy::Tail { keep: 2 },
            PruneOptions {
                force: false,
                dry_run: true,
            },
        )
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.discarded, 4);
    assert_eq!(snapshot_files(repo.data_dir()), before);
}

#[test]
fn watermarks_move_to_surviving_ancestor_or_clear() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let root = post(&repo, ROOM, "alice", "root", None);
    let reply = post(&repo, ROOM, "bob", "reply", Some(&root.id));
    let loose = post(&repo, ROOM, "carol", "loose", None);
    repo.set_favorite(&root.id, "dave", true).unwrap();
    fill_room(&repo, 3);

    repo.mark_read("erin", ROOM, &reply.id).unwrap();
    repo.mark_read("frank", ROOM, &loose.id).unwrap();

    let report = repo
        .prune(ROOM, &Policy::Tail { keep: 3 }, FORCE)
        .unwrap();
    assert_eq!(report.watermarks_repointed, 1);
    assert_eq!(report.watermarks_cleared, 1);

    let erin = repo.watermarks.get("erin", ROOM).unwrap().unwrap();
    assert_eq!(erin.message_id, root.id);
    assert!(repo.watermarks.get("frank", ROOM).unwrap().is_none());
}

#[test]
fn outside_git_prune_is_guarded_unless_forced() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    fill_room(&repo, 3);
    let before = snapshot_files(repo.data_dir());

    let err = repo
        .prune(ROOM, &Policy::Tail { keep: 1 }, PruneOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        HuddleError::Guarded(Guardrail::NotGitRepository)
    ));
    assert_eq!(snapshot_files(repo.data_dir()), before);
}

#[test]
fn dirty_data_dir_blocks_and_leaves_log_byte_identical() {
    let dir = tempdir().unwrap();
    let git = Repository::init(dir.path()).unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    fill_room(&repo, 4);
    commit_all(&git, "chat history");

    // Clean tree: prune goes through and records the commit.
    let head = git.head().unwrap().target().unwrap().to_string();
    let report = repo
        .prune(ROOM, &Policy::Tail { keep: 2 }, PruneOptions::default())
        .unwrap();
    let tombstone = repo
        .index
        .get_message(&report.tombstone_id.unwrap())
        .unwrap();
    assert_eq!(tombstone.tombstone.unwrap().git_sha, Some(head));

    // The prune itself left uncommitted changes.
    let before = snapshot_files(repo.data_dir());
    match repo
        .prune(ROOM, &Policy::Tail { keep: 1 }, PruneOptions::default())
        .unwrap_err()
    {
        HuddleError::Guarded(Guardrail::DirtyDataDir(paths)) => {
            assert!(paths.iter().all(|p| p.starts_with(DATA_DIR)));
            assert!(!paths.is_empty());
        }
        other => panic!("expected DirtyDataDir, got {other:?}"),
    }
    assert_eq!(snapshot_files(repo.data_dir()), before);
}

#[test]
fn unsynced_branch_blocks_prune() {
    let dir = tempdir().unwrap();
    let git = Repository::init(dir.path()).unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    fill_room(&repo, 4);
    commit_all(&git, "chat history");

    // Point a remote-tracking branch at the current commit and track it.
    let head = git.head().unwrap();
    let branch_name = head.shorthand().unwrap().to_string();
    let synced = head.target().unwrap();
    git.remote("origin", "https://example.invalid/huddle.git")
        .unwrap();
    git.reference(
        &format!("refs/remotes/origin/{branch_name}"),
        synced,
        true,
        "test upstream",
    )
    .unwrap();
    let mut branch = git
        .find_branch(&branch_name, git2::BranchType::Local)
        .unwrap();
    branch
        .set_upstream(Some(&format!("origin/{branch_name}")))
        .unwrap();

    fs::write(dir.path().join("README.md"), "notes").unwrap();
    commit_all(&git, "local only");

    let before = snapshot_files(repo.data_dir());
    let err = repo
        .prune(ROOM, &Policy::Tail { keep: 1 }, PruneOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        HuddleError::Guarded(Guardrail::Unsynced {
            ahead: 1,
            behind: 0
        })
    ));
    assert_eq!(snapshot_files(repo.data_dir()), before);

    // --force skips the guardrails.
    repo.prune(ROOM, &Policy::Tail { keep: 1 }, FORCE).unwrap();
}
