use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReorgError {
    #[error("document store unreachable: {0}")]
    ConnectionFailure(String),
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
    #[error("invalid merge mode `{0}`; use `replace`, `append`, or `upsert`")]
    InvalidMergeMode(String),
    #[error("invalid collection name `{0}`")]
    InvalidCollection(String),
    #[error("invalid object id `{0}`")]
    InvalidObjectId(String),
    #[error("invalid schema description: {0}")]
    InvalidSchema(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
}

/// Pipeline stage reached by a reorganization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analysis,
    Backup,
    Deduplicate,
    Migrate,
    Validate,
    Complete,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Backup => "backup",
            Self::Deduplicate => "deduplicate",
            Self::Migrate => "migrate",
            Self::Validate => "validate",
            Self::Complete => "complete",
        }
    }
}
