use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::output::{self, Format};
use crate::store::repo::Repo;

#[derive(Serialize)]
struct VerifyReport {
    consistent: bool,
    mismatched: Vec<String>,
    fixed: bool,
}

/// Replay the log in memory and compare with the index. With `fix`, a
/// mismatch triggers a full rebuild. Exits 1 on an unfixed mismatch.
pub fn run(repo_root: &Path, fix: bool, format: Format) -> Result<()> {
    let repo = Repo::open(repo_root)?;
    let mismatched = repo.verify()?;
    let consistent = mismatched.is_empty();
    let fixed = !consistent && fix;
    if fixed {
        repo.rebuild()?;
    }

    match format {
        Format::Json => output::print_json(&VerifyReport {
            consistent,
            mismatched: mismatched.clone(),
            fixed,
        })?,
        _ => {
            if consistent {
                println!("  Index matches the log.");
            } else {
                for id in &mismatched {
                    println!("  [MISMATCH] {id}");
                }
                if fixed {
                    println!("  Index rebuilt from the log.");
                }
            }
        }
    }

    if !consistent && !fixed {
        std::process::exit(1);
    }
    Ok(())
}
