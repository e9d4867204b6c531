// src/testutil.rs
//
// Scripted repository collaborator for unit tests. Answers the handful of git
// invocations the diff statistics issue and records every test run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::RepoError;
use crate::git::{OpenRequest, Repository, RepositoryOpener, TestRun};
use crate::state::TestOutcome;

#[derive(Debug, Clone)]
pub struct FakeChange {
    pub path: String,
    pub added: u64,
    pub deleted: u64,
    /// `+`/`-` prefixed body lines of a single hunk.
    pub lines: Vec<String>,
}

impl FakeChange {
    pub fn new(path: &str, lines: &[&str]) -> Self {
        let added = lines.iter().filter(|l| l.starts_with('+')).count() as u64;
        let deleted = lines.iter().filter(|l| l.starts_with('-')).count() as u64;
        Self {
            path: path.to_string(),
            added,
            deleted,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }
}

#[derive(Default)]
struct World {
    diffs: HashMap<(String, String), Vec<FakeChange>>,
    merge_bases: HashMap<(String, String), String>,
    outcomes: HashMap<String, TestOutcome>,
    heads: HashMap<String, String>,
    tested: Vec<String>,
    runs: Vec<(String, Duration, u32)>,
    workdirs: Vec<String>,
    commands: usize,
    fail_open: bool,
    test_delay: Duration,
}

#[derive(Clone, Default)]
pub struct FakeRepos {
    world: Arc<Mutex<World>>,
}

impl FakeRepos {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.world.lock().unwrap())
    }

    pub fn diff(&self, from: &str, to: &str, changes: Vec<FakeChange>) -> &Self {
        self.with(|w| w.diffs.insert((from.into(), to.into()), changes));
        self
    }

    pub fn merge_base(&self, left: &str, right: &str, base: &str) -> &Self {
        self.with(|w| w.merge_bases.insert((left.into(), right.into()), base.into()));
        self
    }

    pub fn outcome(&self, commit: &str, outcome: TestOutcome) -> &Self {
        self.with(|w| w.outcomes.insert(commit.into(), outcome));
        self
    }

    pub fn head(&self, slug: &str, hash: &str) -> &Self {
        self.with(|w| w.heads.insert(slug.into(), hash.into()));
        self
    }

    pub fn fail_open(&self) -> &Self {
        self.with(|w| w.fail_open = true);
        self
    }

    pub fn test_delay(&self, delay: Duration) -> &Self {
        self.with(|w| w.test_delay = delay);
        self
    }

    /// Commits passed to `checkout_and_test`, in call order.
    pub fn tested(&self) -> Vec<String> {
        self.with(|w| w.tested.clone())
    }

    /// `(commit, timeout, repeat)` as received by `checkout_and_test`.
    pub fn runs(&self) -> Vec<(String, Duration, u32)> {
        self.with(|w| w.runs.clone())
    }

    pub fn workdirs(&self) -> Vec<String> {
        self.with(|w| w.workdirs.clone())
    }

    pub fn commands(&self) -> usize {
        self.with(|w| w.commands)
    }
}

impl RepositoryOpener for FakeRepos {
    fn open(&self, req: &OpenRequest<'_>) -> Result<Box<dyn Repository>, RepoError> {
        if self.with(|w| w.fail_open) {
            return Err(RepoError::Command {
                command: format!("git clone {}", req.slug),
                code: Some(128),
                stderr: "repository not found".into(),
            });
        }
        self.with(|w| w.workdirs.push(req.workdir_id.clone()));
        Ok(Box::new(FakeRepo {
            slug: req.slug.to_string(),
            repos: self.clone(),
        }))
    }
}

struct FakeRepo {
    slug: String,
    repos: FakeRepos,
}

fn not_found(args: &[&str]) -> RepoError {
    RepoError::Command {
        command: args.join(" "),
        code: Some(1),
        stderr: "fatal: bad revision".into(),
    }
}

impl Repository for FakeRepo {
    fn run_command(&self, args: &[&str]) -> Result<String, RepoError> {
        self.repos.with(|w| w.commands += 1);

        match args {
            ["git", "merge-base", l, r] => self
                .repos
                .with(|w| w.merge_bases.get(&(l.to_string(), r.to_string())).cloned())
                .map(|b| format!("{b}\n"))
                .ok_or_else(|| not_found(args)),

            ["git", "diff", mode, a, b] => {
                let changes = self
                    .repos
                    .with(|w| w.diffs.get(&(a.to_string(), b.to_string())).cloned())
                    .ok_or_else(|| not_found(args))?;

                let out: String = match *mode {
                    "--name-only" => changes.iter().map(|c| format!("{}\n", c.path)).collect(),
                    "--numstat" => changes
                        .iter()
                        .map(|c| format!("{}\t{}\t{}\n", c.added, c.deleted, c.path))
                        .collect(),
                    "--unified=3" => changes
                        .iter()
                        .map(|c| {
                            let mut s = format!(
                                "diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -1 +1 @@\n",
                                p = c.path
                            );
                            for l in &c.lines {
                                s.push_str(l);
                                s.push('\n');
                            }
                            s
                        })
                        .collect(),
                    _ => return Err(not_found(args)),
                };
                Ok(out)
            }

            _ => Err(not_found(args)),
        }
    }

    fn checkout_and_test(&mut self, commit: &str, timeout: Duration, repeat: u32) -> TestRun {
        let delay = self.repos.with(|w| {
            w.tested.push(commit.to_string());
            w.runs.push((commit.to_string(), timeout, repeat));
            w.test_delay
        });
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let outcome = self
            .repos
            .with(|w| w.outcomes.get(commit).copied())
            .unwrap_or(TestOutcome::Passed);

        TestRun {
            outcome,
            log: None,
            fingerprint: Some(format!("fp-{commit}")),
        }
    }

    fn head_hash(&self) -> Result<String, RepoError> {
        self.repos
            .with(|w| w.heads.get(&self.slug).cloned())
            .ok_or_else(|| not_found(&["git", "rev-parse", "HEAD"]))
    }
}
