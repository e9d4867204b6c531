//! detectors/diff_stats.rs
//!
//! Structural differences between the two parents of a merge.
//!
//! Every statistic is computed independently. When the git command behind one
//! of them fails, that statistic gets a sentinel string and the others are
//! still computed.

use std::collections::BTreeSet;

use tracing::{error, warn};

use crate::detectors::language::TargetLanguage;
use crate::error::RepoError;
use crate::git::Repository;
use crate::state::{AnalysisRecord, Stat, StatField};

pub const MERGE_BASE_SENTINEL: &str = "Error while retrieving base sha";

pub struct DiffStatsComputer<'a> {
    repo: &'a dyn Repository,
    language: &'a TargetLanguage,
    left: &'a str,
    right: &'a str,
    base: Option<Option<String>>,
}

impl<'a> DiffStatsComputer<'a> {
    pub fn new(
        repo: &'a dyn Repository,
        language: &'a TargetLanguage,
        left: &'a str,
        right: &'a str,
    ) -> Self {
        Self {
            repo,
            language,
            left,
            right,
            base: None,
        }
    }

    /// Computes `field` and stores it in `record`.
    pub fn fill(&mut self, field: StatField, record: &mut AnalysisRecord) {
        match field {
            StatField::NumDiffFiles => {
                let r = self.changed_files(self.left, self.right).map(|f| f.len() as u64);
                record.num_diff_files = Some(self.stat(field, r));
            }
            StatField::UnionDiffFiles => {
                record.union_diff_files = Some(self.three_way(field, |l, r| l.union(r).count()));
            }
            StatField::NumIntersectingFiles => {
                record.num_intersecting_files =
                    Some(self.three_way(field, |l, r| l.intersection(r).count()));
            }
            StatField::NumDiffLines => {
                let r = self
                    .git_diff("--numstat", self.left, self.right)
                    .map(|out| count_numstat_lines(&out));
                record.num_diff_lines = Some(self.stat(field, r));
            }
            StatField::NumDiffHunks => {
                let r = self.patch().map(|p| count_hunks(&p));
                record.num_diff_hunks = Some(self.stat(field, r));
            }
            StatField::ImportsInvolved => {
                let r = self.patch().map(|p| imports_touched(&p, self.language));
                record.imports_involved = Some(self.stat(field, r));
            }
            StatField::NonTargetInvolved => {
                let r = self
                    .changed_files(self.left, self.right)
                    .map(|files| files.iter().any(|f| !self.language.is_source_file(f)));
                record.non_target_involved = Some(self.stat(field, r));
            }
            StatField::TouchesTarget => {
                let r = self
                    .changed_files(self.left, self.right)
                    .map(|files| files.iter().any(|f| self.language.is_source_file(f)));
                record.touches_target = Some(self.stat(field, r));
            }
        }
    }

    /* ============================================================
       Helpers
       ============================================================ */

    fn stat<T>(&self, field: StatField, result: Result<T, RepoError>) -> Stat<T> {
        match result {
            Ok(v) => Stat::Value(v),
            Err(e) => {
                error!(
                    left = self.left,
                    right = self.right,
                    "computing {} failed: {e}",
                    field.name()
                );
                Stat::error(format!("Error while computing {}", field.name()))
            }
        }
    }

    /// Compares the files each parent changed relative to their merge base.
    fn three_way(
        &mut self,
        field: StatField,
        combine: impl Fn(&BTreeSet<String>, &BTreeSet<String>) -> usize,
    ) -> Stat<u64> {
        let Some(base) = self.merge_base() else {
            return Stat::error(MERGE_BASE_SENTINEL);
        };

        let r = self.changed_files(&base, self.left).and_then(|l| {
            let r = self.changed_files(&base, self.right)?;
            Ok(combine(&l, &r) as u64)
        });
        self.stat(field, r)
    }

    fn merge_base(&mut self) -> Option<String> {
        if let Some(cached) = &self.base {
            return cached.clone();
        }

        let base = match self.repo.run_command(&["git", "merge-base", self.left, self.right]) {
            Ok(out) if !out.trim().is_empty() => Some(out.trim().to_string()),
            Ok(_) => {
                warn!(left = self.left, right = self.right, "no common ancestor");
                None
            }
            Err(e) => {
                error!(left = self.left, right = self.right, "git merge-base failed: {e}");
                None
            }
        };
        self.base = Some(base.clone());
        base
    }

    fn changed_files(&self, from: &str, to: &str) -> Result<BTreeSet<String>, RepoError> {
        let out = self.git_diff("--name-only", from, to)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn patch(&self) -> Result<String, RepoError> {
        self.git_diff("--unified=3", self.left, self.right)
    }

    fn git_diff(&self, mode: &str, from: &str, to: &str) -> Result<String, RepoError> {
        self.repo.run_command(&["git", "diff", mode, from, to])
    }
}

/* ============================================================
   Diff parsing
   ============================================================ */

/// Sum of added and deleted lines; binary entries (`-`) count as zero.
fn count_numstat_lines(numstat: &str) -> u64 {
    numstat
        .lines()
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let added = cols.next()?.trim().parse::<u64>().unwrap_or(0);
            let deleted = cols.next()?.trim().parse::<u64>().unwrap_or(0);
            Some(added + deleted)
        })
        .sum()
}

fn count_hunks(patch: &str) -> u64 {
    patch.lines().filter(|l| l.starts_with("@@")).count() as u64
}

/// Whether an added or removed line of a target-language file is an import.
fn imports_touched(patch: &str, language: &TargetLanguage) -> bool {
    split_diff_by_file(patch)
        .into_iter()
        .filter(|(file, _)| language.is_source_file(file))
        .any(|(_, body)| {
            body.lines()
                .filter(|l| !l.starts_with("+++ ") && !l.starts_with("--- "))
                .filter_map(|l| l.strip_prefix('+').or_else(|| l.strip_prefix('-')))
                .any(|l| language.is_import_line(l))
        })
}

fn split_diff_by_file(diff: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();
    let mut current_file: Option<String> = None;
    let mut buffer = String::new();

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(file) = current_file.take() {
                results.push((file, std::mem::take(&mut buffer)));
            }

            let target = rest.split_whitespace().nth(1).unwrap_or(rest);
            current_file = Some(target.strip_prefix("b/").unwrap_or(target).to_string());
        } else if current_file.is_some() {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }

    if let Some(file) = current_file {
        results.push((file, buffer));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::language::Language;
    use crate::git::{OpenRequest, RepositoryOpener};
    use crate::testutil::{FakeChange, FakeRepos};

    fn java() -> TargetLanguage {
        TargetLanguage::new(Language::Java, &[]).unwrap()
    }

    fn open(repos: &FakeRepos) -> Box<dyn Repository> {
        repos
            .open(&OpenRequest {
                id: "t",
                slug: "a/b",
                workdir_id: "a/b/stats".into(),
                lazy_clone: true,
            })
            .unwrap()
    }

    fn fill_all(repo: &dyn Repository, lang: &TargetLanguage) -> AnalysisRecord {
        let mut record = AnalysisRecord::default();
        let mut stats = DiffStatsComputer::new(repo, lang, "L", "R");
        for field in StatField::ALL {
            stats.fill(field, &mut record);
        }
        record
    }

    #[test]
    fn computes_every_statistic() {
        let repos = FakeRepos::new();
        repos
            .diff(
                "L",
                "R",
                vec![
                    FakeChange::new("src/A.java", &["-import java.util.List;", "+import java.util.Set;"]),
                    FakeChange::new("README.md", &["+docs"]),
                ],
            )
            .merge_base("L", "R", "B")
            .diff("B", "L", vec![FakeChange::new("src/A.java", &["+x"])])
            .diff(
                "B",
                "R",
                vec![
                    FakeChange::new("src/A.java", &["+y"]),
                    FakeChange::new("src/C.java", &["+z"]),
                ],
            );

        let lang = java();
        let repo = open(&repos);
        let rec = fill_all(repo.as_ref(), &lang);

        assert_eq!(rec.num_diff_files, Some(Stat::Value(2)));
        assert_eq!(rec.union_diff_files, Some(Stat::Value(2)));
        assert_eq!(rec.num_intersecting_files, Some(Stat::Value(1)));
        assert_eq!(rec.num_diff_lines, Some(Stat::Value(3)));
        assert_eq!(rec.num_diff_hunks, Some(Stat::Value(2)));
        assert_eq!(rec.imports_involved, Some(Stat::Value(true)));
        assert_eq!(rec.non_target_involved, Some(Stat::Value(true)));
        assert_eq!(rec.touches_target, Some(Stat::Value(true)));
    }

    #[test]
    fn missing_merge_base_only_poisons_three_way_stats() {
        let repos = FakeRepos::new();
        repos.diff("L", "R", vec![FakeChange::new("notes.txt", &["+a"])]);

        let lang = java();
        let repo = open(&repos);
        let rec = fill_all(repo.as_ref(), &lang);

        assert_eq!(rec.union_diff_files, Some(Stat::error(MERGE_BASE_SENTINEL)));
        assert_eq!(rec.num_intersecting_files, Some(Stat::error(MERGE_BASE_SENTINEL)));
        assert_eq!(rec.num_diff_files, Some(Stat::Value(1)));
        assert_eq!(rec.touches_target, Some(Stat::Value(false)));
        assert_eq!(rec.imports_involved, Some(Stat::Value(false)));
    }

    #[test]
    fn merge_base_is_looked_up_once() {
        let repos = FakeRepos::new();
        repos.diff("L", "R", vec![]);

        let lang = java();
        let repo = open(&repos);
        let mut record = AnalysisRecord::default();
        let mut stats = DiffStatsComputer::new(repo.as_ref(), &lang, "L", "R");
        stats.fill(StatField::UnionDiffFiles, &mut record);
        stats.fill(StatField::NumIntersectingFiles, &mut record);
        assert_eq!(repos.commands(), 1);
    }

    #[test]
    fn unknown_commits_become_sentinels() {
        let repos = FakeRepos::new();
        let lang = java();
        let repo = open(&repos);
        let rec = fill_all(repo.as_ref(), &lang);

        assert_eq!(
            rec.num_diff_files,
            Some(Stat::error("Error while computing num_diff_files"))
        );
        assert_eq!(
            rec.touches_target,
            Some(Stat::error("Error while computing diff contains target-language file"))
        );
    }

    #[test]
    fn numstat_ignores_binary_entries() {
        let out = "3\t1\tsrc/A.java\n-\t-\tlogo.png\n10\t0\tB.java\n";
        assert_eq!(count_numstat_lines(out), 14);
    }

    #[test]
    fn imports_in_other_languages_are_ignored() {
        let patch = "diff --git a/x.py b/x.py\n--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n+import os\n";
        assert!(!imports_touched(patch, &java()));
    }

    #[test]
    fn split_diff_handles_multiple_files() {
        let patch = "diff --git a/A.java b/A.java\n@@ -1 +1 @@\n+a\ndiff --git a/B.java b/B.java\n@@ -2 +2 @@\n-b\n";
        let files = split_diff_by_file(patch);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "A.java");
        assert_eq!(files[1].1, "@@ -2 +2 @@\n-b\n");
    }
}
