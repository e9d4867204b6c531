// src/oracle.rs
//
// Parent test oracle: classifies one parent commit by running its test suite
// in a scratch working copy nobody else uses.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::git::{OpenRequest, RepositoryOpener};
use crate::state::{ParentPairKey, TestOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OracleSettings {
    pub timeout: Duration,
    /// Passed through to the test runner; the oracle does not retry on its own.
    pub repetitions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentVerdict {
    pub outcome: TestOutcome,
    pub fingerprint: Option<String>,
    pub log: Option<PathBuf>,
}

pub struct ParentTestOracle<'a> {
    opener: &'a dyn RepositoryOpener,
    settings: OracleSettings,
}

impl<'a> ParentTestOracle<'a> {
    pub fn new(opener: &'a dyn RepositoryOpener, settings: OracleSettings) -> Self {
        Self { opener, settings }
    }

    /// Tests the `side` parent of `key`. Failures of any kind come back as an
    /// outcome, never as an error.
    pub fn test_parent(
        &self,
        task_id: &str,
        slug: &str,
        key: &ParentPairKey,
        side: Side,
    ) -> ParentVerdict {
        let commit = match side {
            Side::Left => &key.left,
            Side::Right => &key.right,
        };

        let req = OpenRequest {
            id: task_id,
            slug,
            workdir_id: scratch_id(slug, key, side),
            lazy_clone: true,
        };

        let mut repo = match self.opener.open(&req) {
            Ok(repo) => repo,
            Err(e) => {
                warn!(task_id, slug, commit = %commit, "cannot open repository for {side} parent: {e}");
                return ParentVerdict {
                    outcome: TestOutcome::ProcessError,
                    fingerprint: None,
                    log: None,
                };
            }
        };

        let run = repo.checkout_and_test(commit, self.settings.timeout, self.settings.repetitions);
        info!(task_id, slug, commit = %commit, outcome = %run.outcome, "{side} parent tested");

        ParentVerdict {
            outcome: run.outcome,
            fingerprint: run.fingerprint,
            log: run.log,
        }
    }
}

/// `<slug>/<side>-<left>-<right>-<uuid>`; unique per invocation.
fn scratch_id(slug: &str, key: &ParentPairKey, side: Side) -> String {
    format!(
        "{slug}/{side}-{}-{}-{}",
        key.left,
        key.right,
        Uuid::new_v4().simple()
    )
}
