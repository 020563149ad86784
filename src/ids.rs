use crate::error::{HuddleError, Result};

pub const MESSAGE_PREFIX: &str = "msg-";
pub const THREAD_PREFIX: &str = "thr-";

/// Hex characters in the random part of a generated ID.
pub const RANDOM_HEX_LEN: usize = 8;

/// Generate a fresh message ID using OS-backed CSPRNG entropy.
pub fn new_message_id() -> Result<String> {
    generate_with(MESSAGE_PREFIX, fill_os_random)
}

/// Generate a fresh thread ID using OS-backed CSPRNG entropy.
pub fn new_thread_id() -> Result<String> {
    generate_with(THREAD_PREFIX, fill_os_random)
}

fn fill_os_random(bytes: &mut [u8]) -> Result<()> {
    getrandom::fill(bytes)
        .map_err(|e| HuddleError::Io(std::io::Error::other(format!("random source: {e}"))))
}

/// Test hook: inject deterministic random bytes when needed.
pub(crate) fn generate_with<F>(prefix: &str, mut fill_random: F) -> Result<String>
where
    F: FnMut(&mut [u8]) -> Result<()>,
{
    let mut bytes = [0_u8; RANDOM_HEX_LEN / 2];
    fill_random(&mut bytes)?;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("{prefix}{hex}"))
}

/// Shared exact-or-prefix resolver for message and thread ID inputs.
///
/// Resolution strategy:
/// 1) exact match on the full ID,
/// 2) prefix match on either the full ID or the ID with its kind stem
///    (`msg-`/`thr-`) removed,
/// 3) zero matches is `NotFound`, two or more is `Ambiguous` carrying every
///    candidate in sorted order.
pub fn resolve_prefix<'a, I>(what: &'static str, input: &str, existing: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let raw = input.trim();
    if raw.is_empty() {
        return Err(HuddleError::InvalidArgument(format!(
            "{what} id cannot be empty"
        )));
    }

    let mut matches = Vec::new();
    for id in existing {
        if id == raw {
            return Ok(id.to_string());
        }
        if id.starts_with(raw) || strip_stem(id).starts_with(raw) {
            matches.push(id.to_string());
        }
    }
    matches.sort();
    matches.dedup();

    match matches.len() {
        0 => Err(HuddleError::not_found(what, raw)),
        1 => Ok(matches.remove(0)),
        _ => Err(HuddleError::Ambiguous {
            prefix: raw.to_string(),
            candidates: matches,
        }),
    }
}

fn strip_stem(id: &str) -> &str {
    id.strip_prefix(MESSAGE_PREFIX)
        .or_else(|| id.strip_prefix(THREAD_PREFIX))
        .unwrap_or(id)
}
