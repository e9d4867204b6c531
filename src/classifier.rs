// src/classifier.rs
//
// Merge candidacy: fills in whatever the cache does not know yet about a
// parent pair and derives the `test merge` verdict.

use tracing::{debug, info, warn};

use crate::cache::{CacheStore, KeyLocks};
use crate::detectors::diff_stats::DiffStatsComputer;
use crate::detectors::language::TargetLanguage;
use crate::error::CacheError;
use crate::git::{OpenRequest, RepositoryOpener};
use crate::oracle::{OracleSettings, ParentTestOracle, Side};
use crate::state::{AnalysisRecord, AnalyzedMerge, MergeRecord, ParentPairKey, StatField};

pub const MERGE_ANALYSIS_PARTITION: &str = "merge_analysis";

const OPEN_FAILED_SENTINEL: &str = "Error while opening repository";

/// One unit of work for the pool.
#[derive(Debug, Clone)]
pub struct MergeTask {
    /// Position in the unshuffled task list.
    pub order: usize,
    /// `<repo idx>-<merge idx>`, for logs.
    pub task_id: String,
    pub slug: String,
    pub record: MergeRecord,
}

pub struct Classifier<'a> {
    cache: &'a dyn CacheStore,
    opener: &'a dyn RepositoryOpener,
    language: &'a TargetLanguage,
    oracle: ParentTestOracle<'a>,
    locks: KeyLocks,
}

impl<'a> Classifier<'a> {
    pub fn new(
        cache: &'a dyn CacheStore,
        opener: &'a dyn RepositoryOpener,
        language: &'a TargetLanguage,
        oracle: OracleSettings,
    ) -> Self {
        Self {
            cache,
            opener,
            language,
            oracle: ParentTestOracle::new(opener, oracle),
            locks: KeyLocks::default(),
        }
    }

    /// Only cache failures escape; command and test failures end up in the record.
    pub fn analyze(&self, task: &MergeTask) -> Result<AnalyzedMerge, CacheError> {
        let key = task.record.pair_key();

        // Tasks sharing a parent pair run one after another, so the second
        // one finds the first one's results in the cache.
        let lock_key = format!("{}/{}", task.slug, key);
        self.locks
            .with_lock(&lock_key, || self.analyze_locked(task, &key))
    }

    fn analyze_locked(
        &self,
        task: &MergeTask,
        key: &ParentPairKey,
    ) -> Result<AnalyzedMerge, CacheError> {
        let cache_key = key.to_string();
        let loaded = self
            .cache
            .lookup(&cache_key, &task.slug, MERGE_ANALYSIS_PARTITION)?
            .unwrap_or_default();
        let mut record = loaded.clone();

        self.fill_diff_stats(task, key, &mut record);

        info!(task_id = %task.task_id, slug = %task.slug, left = %key.left, right = %key.right, "analyzing");

        // Only a computed `false` skips the parents; a sentinel still gets
        // both outcomes recorded and ends up with `test merge = false`.
        if record.known_not_to_touch_target() {
            if record.test_merge.is_none() {
                record.test_merge = Some(false);
            }
        } else {
            self.fill_parent_results(task, key, &mut record);
            derive_verdict(&mut record);
        }

        let analysis = if record != loaded {
            debug!(task_id = %task.task_id, key = %cache_key, "persisting analysis");
            self.cache
                .merge_put(&cache_key, &record, &task.slug, MERGE_ANALYSIS_PARTITION)?
        } else {
            record
        };

        info!(
            task_id = %task.task_id,
            slug = %task.slug,
            test_merge = ?analysis.test_merge,
            "analyzed"
        );

        Ok(AnalyzedMerge {
            order: task.order,
            slug: task.slug.clone(),
            record: task.record.clone(),
            analysis,
            sampled: false,
        })
    }

    fn fill_diff_stats(&self, task: &MergeTask, key: &ParentPairKey, record: &mut AnalysisRecord) {
        let missing: Vec<StatField> = StatField::ALL
            .into_iter()
            .filter(|f| !f.is_set(record))
            .collect();
        if missing.is_empty() {
            return;
        }

        let req = OpenRequest {
            id: &task.task_id,
            slug: &task.slug,
            workdir_id: format!("{}/stats-{}-{}", task.slug, key.left, key.right),
            lazy_clone: true,
        };

        let repo = match self.opener.open(&req) {
            Ok(repo) => repo,
            Err(e) => {
                warn!(task_id = %task.task_id, slug = %task.slug, "cannot open repository: {e}");
                for field in missing {
                    record.set_stat_error(field, OPEN_FAILED_SENTINEL);
                }
                return;
            }
        };

        let mut stats = DiffStatsComputer::new(repo.as_ref(), self.language, &key.left, &key.right);
        for field in missing {
            stats.fill(field, record);
        }
    }

    /// Tests each parent whose outcome is not cached. Both sides are tested
    /// even when the first one fails.
    fn fill_parent_results(&self, task: &MergeTask, key: &ParentPairKey, record: &mut AnalysisRecord) {
        for side in [Side::Left, Side::Right] {
            let (result, fingerprint) = match side {
                Side::Left => (&mut record.left_result, &mut record.left_fingerprint),
                Side::Right => (&mut record.right_result, &mut record.right_fingerprint),
            };
            if result.is_some() {
                continue;
            }

            let v = self.oracle.test_parent(&task.task_id, &task.slug, key, side);
            if let Some(log) = &v.log {
                debug!(task_id = %task.task_id, "{side} parent log: {}", log.display());
            }
            *result = Some(v.outcome);
            if fingerprint.is_none() {
                *fingerprint = v.fingerprint;
            }
        }
    }
}

fn derive_verdict(record: &mut AnalysisRecord) {
    if record.parents_pass.is_none() {
        if let (Some(l), Some(r)) = (record.left_result, record.right_result) {
            record.parents_pass = Some(l.is_passed() && r.is_passed());
        }
    }

    if record.test_merge.is_none() {
        if let Some(parents_pass) = record.parents_pass {
            record.test_merge = Some(parents_pass && record.touches_target_language());
        }
    }
}
