use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("reading users file: {source:#}")]
    UsersUnavailable {
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed users file: {0}")]
    MalformedUsers(#[source] serde_json::Error),

    #[error("listing channels of {archive}: {source:#}")]
    ArchiveUnreadable {
        archive: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("listing files of channel {channel}: {source:#}")]
    ListChannel {
        channel: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("reading {file} in channel {channel}: {source:#}")]
    ReadFile {
        channel: String,
        file: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("parsing {file} in channel {channel}: {source}")]
    ParseFile {
        channel: String,
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("writing message {timestamp} to channel {channel} ({written} already written): {source:#}")]
    WriteMessage {
        channel: String,
        timestamp: String,
        written: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("storing users: {source:#}")]
    StoreUsers {
        #[source]
        source: anyhow::Error,
    },

    /// Every per-channel failure of one run, plus the users write if it failed.
    #[error("{} failure(s) during import: {}", .0.len(), summarize(.0))]
    Incomplete(Vec<ImportError>),
}

impl ImportError {
    pub fn channel(&self) -> Option<&str> {
        match self {
            ImportError::ListChannel { channel, .. }
            | ImportError::ReadFile { channel, .. }
            | ImportError::ParseFile { channel, .. }
            | ImportError::WriteMessage { channel, .. } => Some(channel),
            ImportError::Incomplete(all) => all.iter().find_map(ImportError::channel),
            _ => None,
        }
    }

    /// Setup failures stop the run before any channel work starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::UsersUnavailable { .. }
                | ImportError::MalformedUsers(_)
                | ImportError::ArchiveUnreadable { .. }
        )
    }

    /// The individual failures, flattening nested aggregates.
    pub fn failures(&self) -> Vec<&ImportError> {
        match self {
            ImportError::Incomplete(all) => all.iter().flat_map(ImportError::failures).collect(),
            other => vec![other],
        }
    }

    pub fn into_failures(self) -> Vec<ImportError> {
        match self {
            ImportError::Incomplete(all) => {
                all.into_iter().flat_map(ImportError::into_failures).collect()
            }
            other => vec![other],
        }
    }
}

fn summarize(failures: &[ImportError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
