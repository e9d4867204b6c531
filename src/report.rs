// src/report.rs
//
// Sampler and reporter: picks the merges worth testing per repository and
// writes one CSV per repository plus a run summary.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use crate::error::{AnalyzeError, Result};
use crate::state::{AnalyzedMerge, TOUCHES_TARGET};

pub const REPORT_HEADER: [&str; 21] = [
    "idx",
    "branch_name",
    "merge",
    "left",
    "right",
    "notes",
    "num_diff_files",
    "union_diff_files",
    "num_intersecting_files",
    "num_diff_lines",
    "num_diff_hunks",
    "imports_involved",
    "non_target_involved",
    TOUCHES_TARGET,
    "left parent test result",
    "left_tree_fingerprint",
    "right parent test result",
    "right_tree_fingerprint",
    "parents pass",
    "test merge",
    "sampled for testing",
];

const SUMMARY_FILE: &str = "merges_analyzer_summary.json";

/// Marks at most `max` testable rows as sampled. The rows must already be in
/// a stable order; the same order and seed always give the same picks.
pub fn sample_for_testing(rows: &mut [AnalyzedMerge], max: usize, seed: u64) -> usize {
    let mut testable: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.analysis.is_testable())
        .map(|(i, _)| i)
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    testable.shuffle(&mut rng);

    let picked = testable.len().min(max);
    for &i in &testable[..picked] {
        rows[i].sampled = true;
    }
    picked
}

fn cell<T: Display>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn row_fields(row: &AnalyzedMerge) -> [String; 21] {
    let m = &row.record;
    let a = &row.analysis;
    [
        m.idx.to_string(),
        m.branch_name.clone(),
        m.merge.clone(),
        m.left.clone(),
        m.right.clone(),
        m.notes.clone(),
        cell(&a.num_diff_files),
        cell(&a.union_diff_files),
        cell(&a.num_intersecting_files),
        cell(&a.num_diff_lines),
        cell(&a.num_diff_hunks),
        cell(&a.imports_involved),
        cell(&a.non_target_involved),
        cell(&a.touches_target),
        cell(&a.left_result),
        cell(&a.left_fingerprint),
        cell(&a.right_result),
        cell(&a.right_fingerprint),
        cell(&a.parents_pass),
        cell(&a.test_merge),
        row.sampled.to_string(),
    ]
}

pub fn report_path(output_dir: &Path, slug: &str) -> PathBuf {
    output_dir.join(format!("{slug}.csv"))
}

/// Writes the header even when there are no rows.
pub fn write_report(path: &Path, rows: &[AnalyzedMerge]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AnalyzeError::io(parent, e))?;
    }

    let output = |source: csv::Error| AnalyzeError::Output {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(output)?;
    writer.write_record(REPORT_HEADER).map_err(output)?;
    for row in rows {
        writer.write_record(row_fields(row)).map_err(output)?;
    }
    writer.flush().map_err(|e| AnalyzeError::io(path, e))?;
    Ok(())
}

/* ============================================================
   Summary
   ============================================================ */

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoCounts {
    pub slug: String,
    pub analyzed: usize,
    pub touches_target: usize,
    pub testable: usize,
    pub sampled: usize,
}

impl RepoCounts {
    fn of(slug: &str, rows: &[AnalyzedMerge]) -> Self {
        Self {
            slug: slug.to_string(),
            analyzed: rows.len(),
            touches_target: rows
                .iter()
                .filter(|r| r.analysis.touches_target_language())
                .count(),
            testable: rows.iter().filter(|r| r.analysis.is_testable()).count(),
            sampled: rows.iter().filter(|r| r.sampled).count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated_at: String,
    pub seed: u64,
    pub analyzed: usize,
    pub touches_target: usize,
    pub testable: usize,
    pub sampled: usize,
    pub repositories: Vec<RepoCounts>,
}

impl RunSummary {
    fn new(seed: u64, repositories: Vec<RepoCounts>) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            seed,
            analyzed: repositories.iter().map(|r| r.analyzed).sum(),
            touches_target: repositories.iter().map(|r| r.touches_target).sum(),
            testable: repositories.iter().map(|r| r.testable).sum(),
            sampled: repositories.iter().map(|r| r.sampled).sum(),
            repositories,
        }
    }

    pub fn log(&self) {
        info!("number of merges analyzed: {}", self.analyzed);
        info!(
            "merges whose diff touches the target language: {}",
            self.touches_target
        );
        info!("merges worth testing: {}", self.testable);
        info!("merges sampled for testing: {}", self.sampled);
    }
}

/// Sibling of the output directory.
pub fn summary_path(output_dir: &Path) -> PathBuf {
    match output_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(SUMMARY_FILE),
        _ => PathBuf::from(SUMMARY_FILE),
    }
}

pub fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AnalyzeError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).map_err(|e| AnalyzeError::io(path, e))
}

/// Samples and writes one report per repository, in `slugs` order. Every
/// listed repository gets a file, even one with zero merges.
pub fn write_reports(
    slugs: &[String],
    mut per_repo: Vec<Vec<AnalyzedMerge>>,
    output_dir: &Path,
    max_sampled: usize,
    seed: u64,
) -> Result<RunSummary> {
    let mut counts = Vec::with_capacity(slugs.len());

    for (slug, rows) in slugs.iter().zip(per_repo.iter_mut()) {
        rows.sort_by_key(|r| r.record.idx);
        sample_for_testing(rows, max_sampled, seed);

        let path = report_path(output_dir, slug);
        write_report(&path, rows)?;

        let repo = RepoCounts::of(slug, rows);
        info!(
            slug = %slug,
            analyzed = repo.analyzed,
            testable = repo.testable,
            sampled = repo.sampled,
            "report written to {}",
            path.display()
        );
        counts.push(repo);
    }

    Ok(RunSummary::new(seed, counts))
}
