use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::store::repo::{DATA_DIR, Repo};

pub fn run(repo_root: &Path) -> Result<()> {
    let repo = Repo::init(repo_root)?;
    info!(data_dir = %repo.data_dir().display(), "initialized");
    eprintln!("Initialized {DATA_DIR}/ in {}", repo_root.display());
    Ok(())
}
