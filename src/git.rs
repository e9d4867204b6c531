// src/git.rs
//
// Repository collaborator: a shared clone per repository plus exclusive
// working copies for checkouts and test runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::KeyLocks;
use crate::detectors::framework::detect_framework;
use crate::error::RepoError;
use crate::executor::run_with_timeout;
use crate::fingerprint::tree_fingerprint;
use crate::state::TestOutcome;

/// Result of `checkout_and_test`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub outcome: TestOutcome,
    pub log: Option<PathBuf>,
    pub fingerprint: Option<String>,
}

impl TestRun {
    fn aborted(outcome: TestOutcome) -> Self {
        Self {
            outcome,
            log: None,
            fingerprint: None,
        }
    }
}

pub trait Repository {
    /// Runs `args[0]` with the remaining args inside the repository and returns stdout.
    fn run_command(&self, args: &[&str]) -> Result<String, RepoError>;

    /// Checks `commit` out and runs the test suite up to `repeat` times.
    /// Never fails: every problem is a `TestOutcome`.
    fn checkout_and_test(&mut self, commit: &str, timeout: Duration, repeat: u32) -> TestRun;

    fn head_hash(&self) -> Result<String, RepoError>;
}

#[derive(Debug, Clone)]
pub struct OpenRequest<'a> {
    /// Task id, only used for log context.
    pub id: &'a str,
    pub slug: &'a str,
    /// Relative path of the exclusive working copy.
    pub workdir_id: String,
    /// Defer creating the working copy until a checkout needs it.
    pub lazy_clone: bool,
}

pub trait RepositoryOpener: Send + Sync {
    fn open(&self, req: &OpenRequest<'_>) -> Result<Box<dyn Repository>, RepoError>;
}

/* ============================================================
   Git implementation
   ============================================================ */

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub repos_dir: PathBuf,
    pub workdir_root: PathBuf,
    pub log_dir: PathBuf,
    /// Overrides framework detection when set.
    pub test_command: Option<String>,
}

pub struct GitOpener {
    settings: GitSettings,
    clone_locks: KeyLocks,
}

impl GitOpener {
    pub fn new(settings: GitSettings) -> Self {
        Self {
            settings,
            clone_locks: KeyLocks::default(),
        }
    }

    /// Clones `slug` once into the shared base; concurrent callers wait.
    fn ensure_base_clone(&self, slug: &str) -> Result<PathBuf, RepoError> {
        self.clone_locks.with_lock(slug, || self.clone_base(slug))
    }

    fn clone_base(&self, slug: &str) -> Result<PathBuf, RepoError> {
        let base = self.settings.repos_dir.join(slug);
        if base.join(".git").exists() {
            return Ok(base);
        }

        let parent = base.parent().unwrap_or(&self.settings.repos_dir);
        fs::create_dir_all(parent)?;

        let partial = base.with_extension(format!("partial-{}", uuid::Uuid::new_v4()));
        let url = format!("https://github.com/{slug}.git");
        info!(slug, "cloning {}", url);
        run_in(
            &["git", "clone", "--quiet", &url, &partial.to_string_lossy()],
            parent,
        )
        .inspect_err(|_| {
            let _ = fs::remove_dir_all(&partial);
        })?;
        fs::rename(&partial, &base)?;

        Ok(base)
    }
}

impl RepositoryOpener for GitOpener {
    fn open(&self, req: &OpenRequest<'_>) -> Result<Box<dyn Repository>, RepoError> {
        let base = self.ensure_base_clone(req.slug)?;

        let mut repo = GitRepository {
            base,
            workdir: self.settings.workdir_root.join(&req.workdir_id),
            log_path: self
                .settings
                .log_dir
                .join(format!("{}.log", req.workdir_id)),
            test_command: self.settings.test_command.clone(),
            materialized: false,
        };

        if !req.lazy_clone {
            repo.materialize()?;
        }

        debug!(id = req.id, workdir = %repo.workdir.display(), "opened repository");
        Ok(Box::new(repo))
    }
}

pub struct GitRepository {
    base: PathBuf,
    workdir: PathBuf,
    log_path: PathBuf,
    test_command: Option<String>,
    materialized: bool,
}

impl GitRepository {
    fn materialize(&mut self) -> Result<(), RepoError> {
        if self.materialized {
            return Ok(());
        }

        if self.workdir.exists() {
            fs::remove_dir_all(&self.workdir)?;
        }
        if let Some(parent) = self.workdir.parent() {
            fs::create_dir_all(parent)?;
        }

        run_in(
            &[
                "git",
                "clone",
                "--quiet",
                "--shared",
                "--no-checkout",
                &self.base.to_string_lossy(),
                &self.workdir.to_string_lossy(),
            ],
            &self.base,
        )?;
        self.materialized = true;
        Ok(())
    }

    fn current_dir(&self) -> &Path {
        if self.materialized {
            &self.workdir
        } else {
            &self.base
        }
    }

    fn open_log(&self) -> std::io::Result<File> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
    }
}

impl Repository for GitRepository {
    fn run_command(&self, args: &[&str]) -> Result<String, RepoError> {
        run_in(args, self.current_dir())
    }

    fn checkout_and_test(&mut self, commit: &str, timeout: Duration, repeat: u32) -> TestRun {
        if let Err(e) = self.materialize() {
            warn!(commit, "working copy failed: {e}");
            return TestRun::aborted(TestOutcome::ProcessError);
        }

        if let Err(e) = run_in(
            &["git", "checkout", "--quiet", "--force", commit],
            &self.workdir,
        ) {
            warn!(commit, "checkout failed: {e}");
            return TestRun::aborted(TestOutcome::ProcessError);
        }

        let fingerprint = match tree_fingerprint(&self.workdir) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(commit, "fingerprint failed: {e}");
                None
            }
        };

        let command = self
            .test_command
            .clone()
            .or_else(|| detect_framework(&self.workdir).command().map(str::to_string));
        let Some(command) = command else {
            return TestRun {
                outcome: TestOutcome::NotRun,
                log: None,
                fingerprint,
            };
        };

        let mut log = match self.open_log() {
            Ok(f) => f,
            Err(e) => {
                warn!(commit, "cannot open test log: {e}");
                return TestRun {
                    outcome: TestOutcome::ProcessError,
                    log: None,
                    fingerprint,
                };
            }
        };

        let repeat = repeat.max(1);
        let mut outcome = TestOutcome::Passed;
        for attempt in 1..=repeat {
            let _ = writeln!(log, "=== {commit} run {attempt}/{repeat}: {command} ===");
            let status = run_with_timeout(&command, &self.workdir, timeout, &log);
            outcome = status.outcome();
            if outcome != TestOutcome::Passed {
                let _ = writeln!(log, "=== stopped after run {attempt}: {status:?} ===");
                break;
            }
        }

        TestRun {
            outcome,
            log: Some(self.log_path.clone()),
            fingerprint,
        }
    }

    fn head_hash(&self) -> Result<String, RepoError> {
        Ok(run_in(&["git", "rev-parse", "HEAD"], &self.base)?.trim().to_string())
    }
}

impl Drop for GitRepository {
    fn drop(&mut self) {
        if self.materialized {
            if let Err(e) = fs::remove_dir_all(&self.workdir) {
                debug!(workdir = %self.workdir.display(), "cleanup failed: {e}");
            }
        }
    }
}

/* ============================================================
   Process helper
   ============================================================ */

fn run_in(args: &[&str], cwd: &Path) -> Result<String, RepoError> {
    let (program, rest) = args.split_first().ok_or(RepoError::EmptyCommand)?;

    let out = Command::new(program)
        .args(rest)
        .current_dir(cwd)
        .output()
        .map_err(|source| RepoError::Spawn {
            command: args.join(" "),
            source,
        })?;

    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    } else {
        Err(RepoError::Command {
            command: args.join(" "),
            code: out.status.code(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let mut full = vec!["git"];
        full.extend_from_slice(args);
        run_in(&full, dir).unwrap();
    }

    /// A local repository standing in for a pre-populated shared clone.
    fn seeded_base(repos: &Path, slug: &str) -> String {
        let base = repos.join(slug);
        fs::create_dir_all(&base).unwrap();
        git(&base, &["init", "--quiet"]);
        git(&base, &["config", "user.email", "t@example.com"]);
        git(&base, &["config", "user.name", "t"]);
        fs::write(base.join("A.java"), "class A {}\n").unwrap();
        git(&base, &["add", "."]);
        git(&base, &["commit", "--quiet", "-m", "init"]);
        run_in(&["git", "rev-parse", "HEAD"], &base)
            .unwrap()
            .trim()
            .to_string()
    }

    fn opener(root: &Path, test_command: Option<&str>) -> GitOpener {
        GitOpener::new(GitSettings {
            repos_dir: root.join("repos"),
            workdir_root: root.join("work"),
            log_dir: root.join("logs"),
            test_command: test_command.map(str::to_string),
        })
    }

    #[test]
    fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(run_in(&[], dir.path()), Err(RepoError::EmptyCommand)));
    }

    #[test]
    fn failing_command_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_in(&["git", "rev-parse", "HEAD"], dir.path()).unwrap_err();
        assert!(matches!(err, RepoError::Command { .. }));
    }

    #[test]
    fn checkout_and_test_uses_an_exclusive_workdir() {
        let root = tempfile::tempdir().unwrap();
        let head = seeded_base(&root.path().join("repos"), "a/b");
        let opener = opener(root.path(), Some("test -f A.java"));

        let req = OpenRequest {
            id: "0-1",
            slug: "a/b",
            workdir_id: "a/b/left-x".to_string(),
            lazy_clone: true,
        };
        let mut repo = opener.open(&req).unwrap();
        assert_eq!(repo.head_hash().unwrap(), head);

        let run = repo.checkout_and_test(&head, Duration::from_secs(30), 2);
        assert_eq!(run.outcome, TestOutcome::Passed);
        assert!(run.fingerprint.is_some());
        assert!(run.log.as_ref().unwrap().exists());
        assert!(root.path().join("work/a/b/left-x").exists());

        drop(repo);
        assert!(!root.path().join("work/a/b/left-x").exists());
    }

    #[test]
    fn unknown_commit_is_a_process_error() {
        let root = tempfile::tempdir().unwrap();
        seeded_base(&root.path().join("repos"), "a/b");
        let opener = opener(root.path(), Some("true"));

        let req = OpenRequest {
            id: "0-2",
            slug: "a/b",
            workdir_id: "a/b/right-y".to_string(),
            lazy_clone: false,
        };
        let mut repo = opener.open(&req).unwrap();
        let run = repo.checkout_and_test("deadbeef", Duration::from_secs(30), 1);
        assert_eq!(run.outcome, TestOutcome::ProcessError);
        assert_eq!(run.fingerprint, None);
    }

    #[test]
    fn tree_without_framework_is_not_run() {
        let root = tempfile::tempdir().unwrap();
        let head = seeded_base(&root.path().join("repos"), "a/b");
        let opener = opener(root.path(), None);

        let req = OpenRequest {
            id: "0-3",
            slug: "a/b",
            workdir_id: "a/b/left-z".to_string(),
            lazy_clone: true,
        };
        let mut repo = opener.open(&req).unwrap();
        let run = repo.checkout_and_test(&head, Duration::from_secs(30), 1);
        assert_eq!(run.outcome, TestOutcome::NotRun);
        assert!(run.fingerprint.is_some());
    }

    fn runs_logged(log: &Path, commit: &str) -> usize {
        fs::read_to_string(log)
            .unwrap()
            .lines()
            .filter(|l| l.starts_with(&format!("=== {commit} run ")))
            .count()
    }

    #[test]
    fn failing_run_ends_the_series() {
        let root = tempfile::tempdir().unwrap();
        let head = seeded_base(&root.path().join("repos"), "a/b");
        let opener = opener(root.path(), Some("false"));

        let req = OpenRequest {
            id: "0-4",
            slug: "a/b",
            workdir_id: "a/b/left-f".to_string(),
            lazy_clone: true,
        };
        let mut repo = opener.open(&req).unwrap();
        let run = repo.checkout_and_test(&head, Duration::from_secs(30), 3);

        assert_eq!(run.outcome, TestOutcome::Failed);
        assert_eq!(runs_logged(run.log.as_ref().unwrap(), &head), 1);
    }

    #[test]
    fn timed_out_run_is_not_retried() {
        let root = tempfile::tempdir().unwrap();
        let head = seeded_base(&root.path().join("repos"), "a/b");
        let opener = opener(root.path(), Some("sleep 5"));

        let req = OpenRequest {
            id: "0-5",
            slug: "a/b",
            workdir_id: "a/b/left-t".to_string(),
            lazy_clone: true,
        };
        let mut repo = opener.open(&req).unwrap();
        let run = repo.checkout_and_test(&head, Duration::from_millis(300), 3);

        assert_eq!(run.outcome, TestOutcome::TimedOut);
        assert_eq!(runs_logged(run.log.as_ref().unwrap(), &head), 1);
    }

    #[test]
    fn passing_runs_repeat_the_requested_number_of_times() {
        let root = tempfile::tempdir().unwrap();
        let head = seeded_base(&root.path().join("repos"), "a/b");
        let opener = opener(root.path(), Some("true"));

        let req = OpenRequest {
            id: "0-6",
            slug: "a/b",
            workdir_id: "a/b/left-p".to_string(),
            lazy_clone: true,
        };
        let mut repo = opener.open(&req).unwrap();
        let run = repo.checkout_and_test(&head, Duration::from_secs(30), 3);

        assert_eq!(run.outcome, TestOutcome::Passed);
        assert_eq!(runs_logged(run.log.as_ref().unwrap(), &head), 3);
    }
}
