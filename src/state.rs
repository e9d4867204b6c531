// src/state.rs
//
// Records exchanged between the input reader, the classifier, the cache and
// the reporter.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/* ---------- merge input ---------- */

/// One row of a per-repository merge list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub idx: u64,
    pub branch_name: String,
    pub merge: String,
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub notes: String,
}

impl MergeRecord {
    pub fn pair_key(&self) -> ParentPairKey {
        ParentPairKey {
            left: self.left.clone(),
            right: self.right.clone(),
        }
    }
}

/// Cache identity of a merge: the (left, right) parent pair, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentPairKey {
    pub left: String,
    pub right: String,
}

impl fmt::Display for ParentPairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.left, self.right)
    }
}

/* ---------- test outcomes ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    #[serde(alias = "Tests_passed")]
    Passed,
    #[serde(alias = "Tests_failed")]
    Failed,
    #[serde(alias = "Tests_timedout")]
    TimedOut,
    #[serde(alias = "Git_checkout_failed")]
    ProcessError,
    #[serde(alias = "Not_tested")]
    NotRun,
}

impl TestOutcome {
    pub fn is_passed(self) -> bool {
        self == TestOutcome::Passed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::TimedOut => "timed_out",
            TestOutcome::ProcessError => "process_error",
            TestOutcome::NotRun => "not_run",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "passed" | "Tests_passed" => Ok(TestOutcome::Passed),
            "failed" | "Tests_failed" => Ok(TestOutcome::Failed),
            "timed_out" | "Tests_timedout" => Ok(TestOutcome::TimedOut),
            "process_error" | "Git_checkout_failed" => Ok(TestOutcome::ProcessError),
            "not_run" | "Not_tested" => Ok(TestOutcome::NotRun),
            other => Err(format!("unknown test outcome `{other}`")),
        }
    }
}

/* ---------- statistics ---------- */

/// A computed statistic, or the sentinel left behind when computing it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stat<T> {
    Value(T),
    Error(String),
}

impl<T> Stat<T> {
    pub fn error(sentinel: impl Into<String>) -> Self {
        Stat::Error(sentinel.into())
    }
}

impl<T: fmt::Display> fmt::Display for Stat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stat::Value(v) => v.fmt(f),
            Stat::Error(msg) => f.write_str(msg),
        }
    }
}

/// Statistics filled by `detectors::diff_stats`, in computation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    NumDiffFiles,
    UnionDiffFiles,
    NumIntersectingFiles,
    NumDiffLines,
    NumDiffHunks,
    ImportsInvolved,
    NonTargetInvolved,
    TouchesTarget,
}

impl StatField {
    pub const ALL: [StatField; 8] = [
        StatField::NumDiffFiles,
        StatField::UnionDiffFiles,
        StatField::NumIntersectingFiles,
        StatField::NumDiffLines,
        StatField::NumDiffHunks,
        StatField::ImportsInvolved,
        StatField::NonTargetInvolved,
        StatField::TouchesTarget,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StatField::NumDiffFiles => "num_diff_files",
            StatField::UnionDiffFiles => "union_diff_files",
            StatField::NumIntersectingFiles => "num_intersecting_files",
            StatField::NumDiffLines => "num_diff_lines",
            StatField::NumDiffHunks => "num_diff_hunks",
            StatField::ImportsInvolved => "imports_involved",
            StatField::NonTargetInvolved => "non_target_involved",
            StatField::TouchesTarget => TOUCHES_TARGET,
        }
    }

    /// Union and intersection compare both parents against their merge base.
    pub fn needs_merge_base(self) -> bool {
        matches!(self, StatField::UnionDiffFiles | StatField::NumIntersectingFiles)
    }

    pub fn is_set(self, record: &AnalysisRecord) -> bool {
        match self {
            StatField::NumDiffFiles => record.num_diff_files.is_some(),
            StatField::UnionDiffFiles => record.union_diff_files.is_some(),
            StatField::NumIntersectingFiles => record.num_intersecting_files.is_some(),
            StatField::NumDiffLines => record.num_diff_lines.is_some(),
            StatField::NumDiffHunks => record.num_diff_hunks.is_some(),
            StatField::ImportsInvolved => record.imports_involved.is_some(),
            StatField::NonTargetInvolved => record.non_target_involved.is_some(),
            StatField::TouchesTarget => record.touches_target.is_some(),
        }
    }
}

pub const TOUCHES_TARGET: &str = "diff contains target-language file";

/* ---------- cache entry ---------- */

/// Partial analysis of one parent pair. Fields accumulate across runs and are
/// never overwritten once set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_diff_files: Option<Stat<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub union_diff_files: Option<Stat<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_intersecting_files: Option<Stat<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_diff_lines: Option<Stat<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_diff_hunks: Option<Stat<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports_involved: Option<Stat<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_target_involved: Option<Stat<bool>>,
    #[serde(
        rename = "diff contains target-language file",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub touches_target: Option<Stat<bool>>,

    #[serde(
        rename = "left parent test result",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub left_result: Option<TestOutcome>,
    #[serde(
        rename = "left_tree_fingerprint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub left_fingerprint: Option<String>,
    #[serde(
        rename = "right parent test result",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub right_result: Option<TestOutcome>,
    #[serde(
        rename = "right_tree_fingerprint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub right_fingerprint: Option<String>,

    #[serde(rename = "parents pass", default, skip_serializing_if = "Option::is_none")]
    pub parents_pass: Option<bool>,
    #[serde(rename = "test merge", default, skip_serializing_if = "Option::is_none")]
    pub test_merge: Option<bool>,

    /// Fields written by other tools or older versions; carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

macro_rules! fill_fields {
    ($dst:ident, $src:ident, $added:ident; $($field:ident),+ $(,)?) => {
        $(
            if $dst.$field.is_none() && $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
                $added = true;
            }
        )+
    };
}

impl AnalysisRecord {
    /// Copies every field of `other` that is still missing here. Returns whether
    /// anything was added; fields already present are left byte-identical.
    pub fn fill_missing(&mut self, other: &AnalysisRecord) -> bool {
        let mut added = false;
        fill_fields!(self, other, added;
            num_diff_files,
            union_diff_files,
            num_intersecting_files,
            num_diff_lines,
            num_diff_hunks,
            imports_involved,
            non_target_involved,
            touches_target,
            left_result,
            left_fingerprint,
            right_result,
            right_fingerprint,
            parents_pass,
            test_merge,
        );
        for (k, v) in &other.extra {
            if !self.extra.contains_key(k) {
                self.extra.insert(k.clone(), v.clone());
                added = true;
            }
        }
        added
    }

    pub fn set_stat_error(&mut self, field: StatField, sentinel: &str) {
        match field {
            StatField::NumDiffFiles => self.num_diff_files = Some(Stat::error(sentinel)),
            StatField::UnionDiffFiles => self.union_diff_files = Some(Stat::error(sentinel)),
            StatField::NumIntersectingFiles => {
                self.num_intersecting_files = Some(Stat::error(sentinel))
            }
            StatField::NumDiffLines => self.num_diff_lines = Some(Stat::error(sentinel)),
            StatField::NumDiffHunks => self.num_diff_hunks = Some(Stat::error(sentinel)),
            StatField::ImportsInvolved => self.imports_involved = Some(Stat::error(sentinel)),
            StatField::NonTargetInvolved => self.non_target_involved = Some(Stat::error(sentinel)),
            StatField::TouchesTarget => self.touches_target = Some(Stat::error(sentinel)),
        }
    }

    /// True only for a successfully computed positive flag.
    pub fn touches_target_language(&self) -> bool {
        matches!(self.touches_target, Some(Stat::Value(true)))
    }

    /// True only when the flag was computed and is negative.
    pub fn known_not_to_touch_target(&self) -> bool {
        matches!(self.touches_target, Some(Stat::Value(false)))
    }

    pub fn is_testable(&self) -> bool {
        self.test_merge == Some(true)
    }
}

/* ---------- report rows ---------- */

/// A merge record with everything the analysis learned about it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedMerge {
    pub order: usize,
    pub slug: String,
    pub record: MergeRecord,
    pub analysis: AnalysisRecord,
    pub sampled: bool,
}
