// src/orchestrator.rs
//
// Parallel orchestrator: expands the repository list into merge tasks,
// shuffles them, fans them out to a fixed pool of worker threads and hands
// the regrouped results to the reporter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use clap::Args;
use crossbeam_channel::unbounded;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::cache::{CacheStore, FsCacheStore};
use crate::classifier::{Classifier, MergeTask};
use crate::config::Config;
use crate::detectors::language::TargetLanguage;
use crate::error::{AnalyzeError, Result};
use crate::git::{GitOpener, RepositoryOpener};
use crate::input::{read_merge_list, read_repositories, RepoEntry};
use crate::oracle::OracleSettings;
use crate::report::{self, RunSummary};
use crate::state::AnalyzedMerge;

const PROGRESS_EVERY: usize = 50;

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(
        long,
        alias = "repos_head_passes_csv",
        help = "CSV of repositories whose head passes tests"
    )]
    pub repos_head_passes: PathBuf,

    #[arg(long, alias = "merges_path", help = "Directory of <owner>/<name>.csv merge lists")]
    pub merges_path: PathBuf,

    #[arg(long, alias = "output_dir", help = "Directory for the per-repository reports")]
    pub output_dir: PathBuf,

    #[arg(long, help = "Cache directory (overrides config)")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, help = "Maximum merges sampled for testing per repository")]
    pub n_sampled_merges: Option<usize>,

    #[arg(long, help = "Worker threads (default: 70% of cores)")]
    pub workers: Option<usize>,

    #[arg(long, help = "Seed for shuffling and sampling")]
    pub seed: Option<u64>,
}

/// Resolves flags against `config` and runs the whole pipeline on the real
/// cache and git.
pub fn run(args: AnalyzeArgs, config: &Config) -> Result<RunSummary> {
    let mut config = config.clone();
    if let Some(dir) = args.cache_dir {
        config.cache_dir = dir;
    }
    if let Some(n) = args.n_sampled_merges {
        config.n_sampled_merges = n;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }

    let opts = AnalyzeOptions {
        repos_head_passes: args.repos_head_passes,
        merges_path: args.merges_path,
        output_dir: args.output_dir,
        n_sampled_merges: config.n_sampled_merges,
        seed: config.seed,
        workers: config.worker_count(),
        language: config.target()?,
        oracle: config.oracle(),
    };

    let cache = FsCacheStore::new(&config.cache_dir);
    let opener = GitOpener::new(config.git());
    run_analysis(&opts, &cache, &opener)
}

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub repos_head_passes: PathBuf,
    pub merges_path: PathBuf,
    pub output_dir: PathBuf,
    pub n_sampled_merges: usize,
    pub seed: u64,
    pub workers: usize,
    pub language: TargetLanguage,
    pub oracle: OracleSettings,
}

/// One task per merge, in repository order then merge-list order.
pub fn build_tasks(repos: &[RepoEntry], merges_dir: &Path) -> Result<Vec<MergeTask>> {
    let mut tasks = Vec::new();
    for repo in repos {
        for record in read_merge_list(merges_dir, &repo.slug)? {
            tasks.push(MergeTask {
                order: tasks.len(),
                task_id: format!("{}-{}", repo.idx, record.idx),
                slug: repo.slug.clone(),
                record,
            });
        }
    }
    Ok(tasks)
}

/// Spreads expensive repositories across the pool.
pub fn shuffle_tasks<T>(tasks: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    tasks.shuffle(&mut rng);
}

/// Runs `f` over every item on `workers` threads. Results come back in
/// completion order. The first error stops workers from taking new items
/// and is returned once in-flight items have finished.
pub fn run_pool<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, total);

    let (task_tx, task_rx) = unbounded::<T>();
    for item in items {
        // receiver is alive in this scope; send cannot fail
        let _ = task_tx.send(item);
    }
    drop(task_tx);

    let (result_tx, result_rx) = unbounded::<Result<R>>();
    let abort = AtomicBool::new(false);

    thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let rx = task_rx.clone();
                let tx = result_tx.clone();
                let f = &f;
                let abort = &abort;
                s.spawn(move || {
                    while !abort.load(Ordering::Relaxed) {
                        let Ok(item) = rx.recv() else { break };
                        let out = f(item);
                        if out.is_err() {
                            abort.store(true, Ordering::Relaxed);
                        }
                        if tx.send(out).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        let mut first_err = None;
        for out in result_rx.iter() {
            match out {
                Ok(r) => {
                    results.push(r);
                    let done = results.len();
                    if done % PROGRESS_EVERY == 0 || done == total {
                        info!("progress: {done}/{total}");
                    }
                }
                Err(e) => {
                    if first_err.is_none() {
                        warn!("aborting: {e}");
                        first_err = Some(e);
                    }
                }
            }
        }

        let panicked = handles.into_iter().any(|h| h.join().is_err());
        match first_err {
            Some(e) => Err(e),
            None if panicked => Err(AnalyzeError::WorkerPanicked),
            None => Ok(results),
        }
    })
}

/// Classifies every task and returns the rows in task order.
pub fn analyze_all(
    classifier: &Classifier<'_>,
    tasks: Vec<MergeTask>,
    workers: usize,
) -> Result<Vec<AnalyzedMerge>> {
    let mut rows = run_pool(tasks, workers, |task| {
        classifier.analyze(&task).map_err(AnalyzeError::from)
    })?;
    rows.sort_by_key(|r| r.order);
    Ok(rows)
}

/// Regroups rows by repository, following `repos` order.
fn group_by_repo(repos: &[RepoEntry], rows: Vec<AnalyzedMerge>) -> Vec<Vec<AnalyzedMerge>> {
    let index: HashMap<&str, usize> = repos
        .iter()
        .enumerate()
        .map(|(i, r)| (r.slug.as_str(), i))
        .collect();

    let mut groups: Vec<Vec<AnalyzedMerge>> = vec![Vec::new(); repos.len()];
    for row in rows {
        if let Some(&i) = index.get(row.slug.as_str()) {
            groups[i].push(row);
        }
    }
    groups
}

pub fn run_analysis(
    opts: &AnalyzeOptions,
    cache: &dyn CacheStore,
    opener: &dyn RepositoryOpener,
) -> Result<RunSummary> {
    let repos = read_repositories(&opts.repos_head_passes)?;
    info!("constructing merge tasks for {} repositories", repos.len());

    // every merge list is read before any analysis starts
    let mut tasks = build_tasks(&repos, &opts.merges_path)?;
    shuffle_tasks(&mut tasks, opts.seed);
    info!(
        "analyzing {} merges with {} workers",
        tasks.len(),
        opts.workers
    );

    let classifier = Classifier::new(cache, opener, &opts.language, opts.oracle);
    let rows = analyze_all(&classifier, tasks, opts.workers)?;

    let slugs: Vec<String> = repos.iter().map(|r| r.slug.clone()).collect();
    let summary = report::write_reports(
        &slugs,
        group_by_repo(&repos, rows),
        &opts.output_dir,
        opts.n_sampled_merges,
        opts.seed,
    )?;

    summary.log();
    let summary_path = report::summary_path(&opts.output_dir);
    report::write_summary(&summary, &summary_path)?;
    info!("summary written to {}", summary_path.display());
    Ok(summary)
}
