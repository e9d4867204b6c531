//! Structured error types.
//!
//! Only structural failures live here as hard errors. Command failures inside a
//! merge analysis are folded into the record as sentinels or test outcomes and
//! never reach these types past `git.rs`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of an external repository command.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("empty command")]
    EmptyCommand,

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed cache record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} not readable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config file {path} is not valid toml: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown target language `{0}`")]
    UnknownLanguage(String),

    #[error("invalid source glob `{pattern}`: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid import pattern: {0}")]
    Regex(#[from] regex::Error),
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("repository {slug} does not have a list of merges at {path}")]
    MissingMergeList { slug: String, path: PathBuf },

    #[error("malformed merge list {path}: {source}")]
    MalformedMergeList {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed repository list {path}: {reason}")]
    MalformedRepoList { path: PathBuf, reason: String },

    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("summary serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

impl AnalyzeError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn repo_list(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedRepoList {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyzeError>;
