use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CosmicError {
    #[error("missing config file {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("invalid config value for `{key}`: {message}")]
    ConfigValue { key: String, message: String },

    #[error("invalid ISO-8601 duration: {0}")]
    InvalidDuration(String),

    #[error("invalid DB_ID: {0}")]
    InvalidDbId(String),

    #[error("wrong number of \"{name}\" reference databases: {count}; exactly 1 was expected")]
    #[diagnostic(help("remove the duplicate reference database or point the run at the right one"))]
    ReferenceDatabaseCardinality { name: String, count: usize },

    #[error("instance {0} not found in knowledge base")]
    InstanceNotFound(u64),

    #[error("instance {db_id}: attribute `{attribute}` is not {expected}")]
    UnexpectedAttribute {
        db_id: u64,
        attribute: String,
        expected: String,
    },

    #[error("knowledge base error: {0}")]
    KnowledgeBase(String),

    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("{}:{line}: row has no `{column}` column", .path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        column: String,
    },

    #[error("download request failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
