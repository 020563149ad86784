use std::path::Path;

use crate::error::Result;
use crate::model::MessageKind;
use crate::output::{self, Format};
use crate::store::messages::NewMessage;
use crate::store::repo::Repo;

pub fn post(
    repo_root: &Path,
    body: String,
    home: &str,
    reply_to: Option<String>,
    kind: MessageKind,
    author: &str,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let home = repo.resolve_home(home)?;
    let reply_to = reply_to
        .map(|prefix| repo.get_message_by_prefix(&prefix).map(|m| m.id))
        .transpose()?;

    let mut new = NewMessage::new(home, author, body);
    new.kind = kind;
    new.reply_to = reply_to;
    let message = repo.create_message(new)?;
    output::print_message(&message, format)
}

pub fn edit(
    repo_root: &Path,
    id: &str,
    body: &str,
    reason: Option<String>,
    editor: &str,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.get_message_by_prefix(id)?.id;
    let message = repo.edit_message(&id, body, editor, reason)?;
    output::print_message(&message, format)
}

pub fn delete(repo_root: &Path, id: &str, by: &str, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.get_message_by_prefix(id)?.id;
    let message = repo.delete_message(&id, Some(by))?;
    output::print_message(&message, format)
}

pub fn move_to(repo_root: &Path, id: &str, to: &str, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.get_message_by_prefix(id)?.id;
    let to = repo.resolve_home(to)?;
    let message = repo.move_message(&id, &to)?;
    output::print_message(&message, format)
}

pub fn react(
    repo_root: &Path,
    id: &str,
    label: &str,
    agent: &str,
    removed: bool,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let id = repo.get_message_by_prefix(id)?.id;
    let message = if removed {
        repo.remove_reaction(&id, agent, label)?
    } else {
        repo.add_reaction(&id, agent, label)?
    };
    output::print_message(&message, format)
}
