use thiserror::Error;

/// Upload-level failures. Any of these aborts the preview before a session exists.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("upload is empty")]
    Empty,

    #[error("upload has a header row but no data rows")]
    NoDataRows,

    #[error("upload is not valid UTF-8 text (byte offset {offset})")]
    Encoding { offset: usize },

    #[error("upload is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("upload session not found; upload the file again")]
    NotFound,

    #[error("upload session expired; upload the file again")]
    Expired,

    #[error("upload session was already confirmed; upload the file again to re-apply")]
    AlreadyConsumed,
}

impl SessionError {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "session_not_found",
            Self::Expired => "session_expired",
            Self::AlreadyConsumed => "session_already_consumed",
        }
    }
}

/// Failure while applying one row; the batch carries on.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("row no longer resolves: {0}")]
    Unresolved(String),

    #[error("reference lookup failed: {0}")]
    Lookup(String),

    #[error("result for subject {subject} is published and cannot be changed")]
    ResultLocked { subject: String },
}

impl ApplyError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "db_write_failed",
            Self::Unresolved(_) => "unresolved",
            Self::Lookup(_) => "db_query_failed",
            Self::ResultLocked { .. } => "result_locked",
        }
    }
}
