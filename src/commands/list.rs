use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::MENTIONS;
use crate::output::{self, Format};
use crate::store::index::MessageFilter;
use crate::store::repo::Repo;

/// List messages oldest first. `--in mentions` lists messages that mention
/// `agent`, wherever they live.
#[allow(clippy::too_many_arguments)]
pub fn run(
    repo_root: &Path,
    home: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    label: Option<String>,
    mentions: Option<String>,
    author: Option<String>,
    limit: Option<usize>,
    agent: &str,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let mut filter = MessageFilter {
        since,
        until,
        label,
        mentions,
        author,
        limit,
        ..Default::default()
    };
    match home.map(|h| repo.resolve_home(&h)).transpose()? {
        Some(home) if home == MENTIONS => {
            filter.mentions.get_or_insert_with(|| agent.to_string());
        }
        home => filter.home = home,
    }
    let messages = repo.index.list_messages(&filter)?;
    output::print_messages(&messages, format)
}
