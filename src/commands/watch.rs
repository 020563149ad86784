use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::output::{self, Format};
use crate::poll::Feed;
use crate::store::repo::Repo;

/// Print new messages as they arrive, one line per message in JSON mode.
/// Runs until interrupted, or until `timeout_secs` elapse.
pub fn run(
    repo_root: &Path,
    home: Option<String>,
    interval: Option<Duration>,
    timeout_secs: Option<u64>,
    format: Format,
) -> Result<()> {
    let home = match home {
        Some(home) => Some(Repo::open(repo_root)?.resolve_home(&home)?),
        None => None,
    };
    let mut feed = Feed::open(repo_root, home.as_deref())?;
    let interval = interval.unwrap_or_else(|| feed.repo().config.poll_interval());
    debug!(?home, ?interval, "watching");

    let started = Instant::now();
    loop {
        for message in feed.poll()? {
            output::print_message(&message, format)?;
        }
        if timeout_secs.is_some_and(|secs| started.elapsed() >= Duration::from_secs(secs)) {
            return Ok(());
        }
        thread::sleep(interval);
    }
}
