//! Git-native message log for multi-agent chat: an append-only JSONL event
//! log, a SQLite projection rebuilt from it, and retention that rewrites
//! the log without breaking reply chains.

pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod git;
pub mod ids;
pub mod model;
pub mod output;
pub mod poll;

pub mod store {
    pub mod hierarchy;
    pub mod index;
    pub mod lock;
    pub mod log;
    pub mod messages;
    pub mod projection;
    pub mod prune;
    pub mod record;
    pub mod repo;
    pub mod threads;
    pub mod watermarks;
}

pub mod commands {
    pub mod init;
    pub mod list;
    pub mod membership;
    pub mod message;
    pub mod prune;
    pub mod read;
    pub mod reindex;
    pub mod show;
    pub mod thread;
    pub mod verify;
    pub mod watch;
}
