use std::fs;
use std::io::Write;

use huddle::model::ROOM;
use huddle::store::messages::NewMessage;
use huddle::store::projection::Projection;
use huddle::store::record::Family;
use huddle::store::repo::{DATA_DIR, Repo};
use huddle::store::threads::ThreadPatch;
use tempfile::tempdir;

/// Run a mixed workload touching every record family.
fn workload(repo: &Repo) {
    let first = repo
        .create_message(NewMessage::new(ROOM, "alice", "hello @bob"))
        .unwrap();
    let second = repo
        .create_message(NewMessage::new(ROOM, "bob", "hi alice"))
        .unwrap();
    let ops = repo
        .create_thread("ops", None, Some(&first.id), "alice")
        .unwrap();
    let deploys = repo
        .create_thread("deploys", Some(&ops.id), None, "bob")
        .unwrap();

    let mut reply = NewMessage::new(ops.id.clone(), "carol", "on it");
    reply.reply_to = Some(first.id.clone());
    let reply = repo.create_message(reply).unwrap();

    repo.edit_message(&second.id, "hi alice!", "bob", Some("typo".into()))
        .unwrap();
    repo.add_reaction(&first.id, "bob", "+1").unwrap();
    repo.add_reaction(&first.id, "carol", "+1").unwrap();
    repo.add_reaction(&reply.id, "alice", "eyes").unwrap();
    repo.remove_reaction(&reply.id, "alice", "eyes").unwrap();
    repo.move_message(&second.id, &deploys.id).unwrap();
    repo.delete_message(&reply.id, Some("carol")).unwrap();

    repo.set_subscription(&ops.id, "bob", true).unwrap();
    repo.set_favorite(&first.id, "bob", true).unwrap();
    repo.set_pin(&first.id, "alice", true).unwrap();
    repo.rename_thread(&deploys.id, "releases").unwrap();
    repo.update_thread(
        &ops.id,
        ThreadPatch {
            anchor: Some(None),
            ..Default::default()
        },
    )
    .unwrap();
    repo.reparent_thread(&deploys.id, None).unwrap();
    repo.archive_thread(&ops.id).unwrap();
}

#[test]
fn rebuild_matches_incremental_application() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    workload(&repo);

    let incremental = repo.index.snapshot().unwrap();
    let replayed = Projection::replay(&repo.log.read_all().unwrap());
    assert_eq!(incremental, replayed);

    repo.rebuild().unwrap();
    assert_eq!(repo.index.snapshot().unwrap(), incremental);
    assert!(repo.verify().unwrap().is_empty());
}

#[test]
fn deleted_index_is_rebuilt_on_open() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    workload(&repo);
    let before = repo.index.snapshot().unwrap();
    drop(repo);

    for entry in fs::read_dir(dir.path().join(DATA_DIR)).unwrap() {
        let path = entry.unwrap().path();
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("index.db"))
        {
            fs::remove_file(path).unwrap();
        }
    }

    let reopened = Repo::open(dir.path()).unwrap();
    assert_eq!(reopened.index.snapshot().unwrap(), before);
}

#[test]
fn truncated_tail_does_not_block_open() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let kept = repo
        .create_message(NewMessage::new(ROOM, "alice", "survives"))
        .unwrap();
    let path = repo.log.family_path(Family::Messages);
    drop(repo);

    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"seq\":99,\"ts\":\"2026-").unwrap();
    drop(file);

    let repo = Repo::open(dir.path()).unwrap();
    let ids = repo.index.message_ids().unwrap();
    assert_eq!(ids, vec![kept.id.clone()]);

    // Writes keep working past the torn line.
    let next = repo
        .create_message(NewMessage::new(ROOM, "bob", "after the tear"))
        .unwrap();
    repo.rebuild().unwrap();
    let mut ids = repo.index.message_ids().unwrap();
    ids.sort();
    let mut expected = vec![kept.id, next.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn unknown_fields_are_ignored_on_replay() {
    let dir = tempdir().unwrap();
    let repo = Repo::init(dir.path()).unwrap();
    let path = repo.log.family_path(Family::Messages);
    let line = r#"{"seq":1,"ts":"2026-03-01T10:00:00Z","kind":"message","id":"msg-future01","home":"room","author":"alice","body":"from the future","color":"teal"}"#;
    fs::write(&path, format!("{line}\n")).unwrap();
    repo.log.ensure_counter_above(1).unwrap();
    drop(repo);

    let repo = Repo::open(dir.path()).unwrap();
    let message = repo.index.get_message("msg-future01").unwrap();
    assert_eq!(message.body, "from the future");
}
