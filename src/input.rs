// src/input.rs
//
// Repository lists and per-repository merge lists.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::{info, warn};

use crate::error::{AnalyzeError, Result};
use crate::state::{MergeRecord, TestOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEntry {
    pub idx: String,
    pub slug: String,
}

const REPOSITORY_COLUMN: &str = "repository";
const IDX_COLUMN: &str = "idx";
const HEAD_RESULT_COLUMN: &str = "head test result";

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Reads the head-pass list. When it carries a head test result, only
/// repositories whose head passed are returned. A repository listed more than
/// once keeps its first row.
pub fn read_repositories(path: &Path) -> Result<Vec<RepoEntry>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| AnalyzeError::repo_list(path, e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| AnalyzeError::repo_list(path, e.to_string()))?
        .clone();
    let repo_col = column(&headers, REPOSITORY_COLUMN)
        .ok_or_else(|| AnalyzeError::repo_list(path, "missing `repository` column"))?;
    let idx_col = column(&headers, IDX_COLUMN);
    let head_col = column(&headers, HEAD_RESULT_COLUMN);

    let mut repos = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;
    for (row_no, row) in reader.records().enumerate() {
        let row = row.map_err(|e| AnalyzeError::repo_list(path, e.to_string()))?;

        let slug = row.get(repo_col).map(str::trim).unwrap_or_default();
        if slug.is_empty() {
            return Err(AnalyzeError::repo_list(
                path,
                format!("row {} has no repository", row_no + 1),
            ));
        }

        if let Some(col) = head_col {
            let raw = row.get(col).unwrap_or_default();
            let outcome: TestOutcome = raw
                .parse()
                .map_err(|e: String| AnalyzeError::repo_list(path, e))?;
            if !outcome.is_passed() {
                skipped += 1;
                continue;
            }
        }

        if !seen.insert(slug.to_string()) {
            warn!(slug, "repository listed more than once, keeping the first row");
            continue;
        }

        let idx = idx_col
            .and_then(|c| row.get(c))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| row_no.to_string());

        repos.push(RepoEntry {
            idx,
            slug: slug.to_string(),
        });
    }

    if skipped > 0 {
        info!("{skipped} repositories skipped: head does not pass tests");
    }
    Ok(repos)
}

pub fn merge_list_path(merges_dir: &Path, slug: &str) -> PathBuf {
    merges_dir.join(format!("{slug}.csv"))
}

/// Columns are taken by position: idx, branch_name, merge, left, right, notes.
pub fn read_merge_list(merges_dir: &Path, slug: &str) -> Result<Vec<MergeRecord>> {
    let path = merge_list_path(merges_dir, slug);
    if !path.exists() {
        return Err(AnalyzeError::MissingMergeList {
            slug: slug.to_string(),
            path,
        });
    }

    let malformed = |source: csv::Error| AnalyzeError::MalformedMergeList {
        path: path.clone(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&path)
        .map_err(malformed)?;

    let mut merges = Vec::new();
    for row in reader.records() {
        let row = row.map_err(malformed)?;
        let record: MergeRecord = row.deserialize(None).map_err(malformed)?;
        merges.push(record);
    }
    Ok(merges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_merges_positionally() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(
            dir.path().join("a/b.csv"),
            "idx,branch_name,merge,left,right,notes\n\
             0,refs/heads/main,m0,l0,r0,\n\
             1,refs/heads/dev,m1,l1,r1,has conflict\n",
        )
        .unwrap();

        let merges = read_merge_list(dir.path(), "a/b").unwrap();
        assert_eq!(merges.len(), 2);
        assert_eq!(merges[0].notes, "");
        assert_eq!(merges[1].left, "l1");
        assert_eq!(merges[1].notes, "has conflict");
    }

    #[test]
    fn missing_merge_list_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_merge_list(dir.path(), "a/b").unwrap_err();
        assert!(matches!(err, AnalyzeError::MissingMergeList { .. }));
    }

    #[test]
    fn bad_idx_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(
            dir.path().join("a/b.csv"),
            "idx,branch_name,merge,left,right,notes\nzero,main,m,l,r,\n",
        )
        .unwrap();
        let err = read_merge_list(dir.path(), "a/b").unwrap_err();
        assert!(matches!(err, AnalyzeError::MalformedMergeList { .. }));
    }

    #[test]
    fn head_results_filter_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.csv");
        fs::write(
            &path,
            "idx,repository,head hash,head test result\n\
             0,a/b,h0,Tests_passed\n\
             1,c/d,h1,Tests_failed\n\
             2,e/f,h2,passed\n",
        )
        .unwrap();

        let repos = read_repositories(&path).unwrap();
        let slugs: Vec<_> = repos.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a/b", "e/f"]);
        assert_eq!(repos[1].idx, "2");
    }

    #[test]
    fn duplicate_repositories_keep_the_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.csv");
        fs::write(&path, "idx,repository\n0,a/b\n1,c/d\n2,a/b\n").unwrap();

        let repos = read_repositories(&path).unwrap();
        assert_eq!(
            repos,
            vec![
                RepoEntry { idx: "0".into(), slug: "a/b".into() },
                RepoEntry { idx: "1".into(), slug: "c/d".into() },
            ]
        );
    }

    #[test]
    fn repository_column_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.csv");
        fs::write(&path, "idx,name\n0,a/b\n").unwrap();
        assert!(matches!(
            read_repositories(&path),
            Err(AnalyzeError::MalformedRepoList { .. })
        ));
    }
}
