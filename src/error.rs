use thiserror::Error;

/// Which prune precondition blocked a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guardrail {
    NotGitRepository,
    DirtyDataDir(Vec<String>),
    Unsynced { ahead: usize, behind: usize },
}

impl std::fmt::Display for Guardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotGitRepository => write!(f, "project is not inside a git working tree"),
            Self::DirtyDataDir(paths) => write!(
                f,
                "data directory has uncommitted changes: {}",
                paths.join(", ")
            ),
            Self::Unsynced { ahead, behind } => write!(
                f,
                "branch is not synced with its upstream ({ahead} ahead, {behind} behind)"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("not a huddle project (run `huddle init` first)")]
    NotInitialized,

    #[error("huddle already initialized in this directory")]
    AlreadyInitialized,

    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    #[error("prefix '{prefix}' is ambiguous; candidates: {}", candidates.join(", "))]
    Ambiguous {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("prune blocked: {0}")]
    Guarded(Guardrail),

    #[error("locked by another writer: {0}")]
    Locked(String),

    #[error("index and log disagree: {0}")]
    Inconsistent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl HuddleError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::NotFound { .. } => "not_found",
            Self::Ambiguous { .. } => "ambiguous",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::CycleDetected(_) => "cycle_detected",
            Self::Conflict(_) => "conflict",
            Self::Guarded(_) => "guarded",
            Self::Locked(_) => "locked",
            Self::Inconsistent(_) => "inconsistent",
            Self::Io(_) => "io_failure",
            Self::Json(_) => "json_error",
            Self::Db(_) => "db_error",
            Self::Git(_) => "git_error",
        }
    }

    /// Only a failed durable write may be re-issued verbatim; everything
    /// else is a precondition the caller has to resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, HuddleError>;
