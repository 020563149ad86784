use std::path::Path;

use crate::error::Result;
use crate::output::{self, Format};
use crate::store::repo::Repo;

/// Show a message as projected, or with `original` the creation record
/// exactly as it was first written to the log.
pub fn run(repo_root: &Path, id: &str, original: bool, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let message = repo.get_message_by_prefix(id)?;
    if original {
        let entry = repo.original_message(&message.id)?;
        return output::print_json(&entry);
    }
    output::print_message(&message, format)
}
