// src/config.rs
//
// Run settings: built-in defaults, overridden by a TOML file, overridden by
// command-line flags in main.rs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::detectors::language::{Language, TargetLanguage};
use crate::error::ConfigError;
use crate::git::GitSettings;
use crate::oracle::OracleSettings;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub repos_dir: PathBuf,
    pub workdir: PathBuf,
    pub parent_test_timeout_secs: u64,
    pub test_repetitions: u32,
    pub n_sampled_merges: usize,
    pub seed: u64,
    pub workers: Option<usize>,
    pub target_language: String,
    pub source_globs: Vec<String>,
    pub test_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache/merge_diffs"),
            repos_dir: PathBuf::from("repos"),
            workdir: PathBuf::from(".workdir"),
            parent_test_timeout_secs: 30 * 60,
            test_repetitions: 3,
            n_sampled_merges: 20,
            seed: 42,
            workers: None,
            target_language: "java".to_string(),
            source_globs: Vec::new(),
            test_command: None,
        }
    }
}

fn default_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("mergesift");
    dir.push("config.toml");
    dir
}

/// An explicit path must exist; the default one may be absent.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound && !required => return Ok(Config::default()),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
}

impl Config {
    pub fn worker_count(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or_else(default_workers)
    }

    pub fn target(&self) -> Result<TargetLanguage, ConfigError> {
        let language: Language = self.target_language.parse()?;
        TargetLanguage::new(language, &self.source_globs)
    }

    pub fn oracle(&self) -> OracleSettings {
        OracleSettings {
            timeout: Duration::from_secs(self.parent_test_timeout_secs),
            repetitions: self.test_repetitions.max(1),
        }
    }

    pub fn git(&self) -> GitSettings {
        GitSettings {
            repos_dir: self.repos_dir.clone(),
            workdir_root: self.workdir.clone(),
            log_dir: self.cache_dir.join("test_logs"),
            test_command: self.test_command.clone(),
        }
    }
}

/// 70% of the cores on machines with more than three, otherwise all of them.
pub fn default_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    workers_for(cores)
}

fn workers_for(cores: usize) -> usize {
    if cores > 3 {
        (cores * 7 / 10).max(1)
    } else {
        cores.max(1)
    }
}
