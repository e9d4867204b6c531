//src/executor/run.rs
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::state::TestOutcome;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    Failed(Option<i32>),
    TimedOut,
    SpawnFailed(String),
}

impl RunStatus {
    pub fn outcome(&self) -> TestOutcome {
        match self {
            RunStatus::Passed => TestOutcome::Passed,
            RunStatus::Failed(_) => TestOutcome::Failed,
            RunStatus::TimedOut => TestOutcome::TimedOut,
            RunStatus::SpawnFailed(_) => TestOutcome::ProcessError,
        }
    }
}

/// Runs `command` through `sh -c` in `cwd`, stdout and stderr appended to `log`.
/// The child is killed once `timeout` elapses.
pub fn run_with_timeout(command: &str, cwd: &Path, timeout: Duration, log: &File) -> RunStatus {
    let (stdout, stderr) = match (log.try_clone(), log.try_clone()) {
        (Ok(o), Ok(e)) => (o, e),
        (Err(e), _) | (_, Err(e)) => return RunStatus::SpawnFailed(e.to_string()),
    };

    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn();

    let mut child = match spawned {
        Ok(c) => c,
        Err(e) => return RunStatus::SpawnFailed(e.to_string()),
    };

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return RunStatus::Passed,
            Ok(Some(status)) => return RunStatus::Failed(status.code()),
            Ok(None) => {
                let now = Instant::now();
                if now >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return RunStatus::TimedOut;
                }
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
            Err(e) => {
                let _ = child.kill();
                return RunStatus::SpawnFailed(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn log_in(dir: &Path) -> File {
        File::create(dir.join("run.log")).unwrap()
    }

    #[test]
    fn exit_codes_map_to_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());

        let ok = run_with_timeout("true", dir.path(), Duration::from_secs(10), &log);
        assert_eq!(ok, RunStatus::Passed);

        let bad = run_with_timeout("exit 3", dir.path(), Duration::from_secs(10), &log);
        assert_eq!(bad, RunStatus::Failed(Some(3)));
        assert_eq!(bad.outcome(), TestOutcome::Failed);
    }

    #[test]
    fn output_lands_in_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        run_with_timeout("echo hello; echo oops >&2", dir.path(), Duration::from_secs(10), &log);

        let text = fs::read_to_string(dir.path().join("run.log")).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("oops"));
    }

    #[test]
    fn slow_commands_time_out() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());

        let started = Instant::now();
        let status = run_with_timeout("sleep 30", dir.path(), Duration::from_millis(200), &log);
        assert_eq!(status, RunStatus::TimedOut);
        assert_eq!(status.outcome(), TestOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
