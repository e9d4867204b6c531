// src/heads.rs
//
// `head-hashes`: resolves the current head commit of every listed repository.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use csv::StringRecord;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AnalyzeError, Result};
use crate::git::{GitOpener, OpenRequest, RepositoryOpener};
use crate::orchestrator::run_pool;

pub const HEAD_HASH_COLUMN: &str = "head hash";

#[derive(Args, Debug, Clone)]
pub struct HeadHashesArgs {
    #[arg(long, help = "CSV with a `repository` column (owner/name)")]
    pub repos_csv: PathBuf,

    #[arg(long, help = "Where to write the list with a `head hash` column added")]
    pub output_path: PathBuf,

    #[arg(long, help = "Worker threads (default: from config or core count)")]
    pub workers: Option<usize>,
}

pub fn run(args: HeadHashesArgs, config: &Config) -> Result<()> {
    let opener = GitOpener::new(config.git());
    let workers = args.workers.unwrap_or_else(|| config.worker_count());
    write_head_hashes(&args.repos_csv, &args.output_path, &opener, workers)?;
    Ok(())
}

/// Writes `output` as `input` plus a head hash per row; repositories whose
/// head cannot be resolved are dropped. Returns `None` if `output` already
/// exists and nothing was done.
pub fn write_head_hashes(
    input: &Path,
    output: &Path,
    opener: &dyn RepositoryOpener,
    workers: usize,
) -> Result<Option<usize>> {
    if output.exists() {
        info!("{} already exists, skipping", output.display());
        return Ok(None);
    }

    let mut reader = csv::Reader::from_path(input)
        .map_err(|e| AnalyzeError::repo_list(input, e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| AnalyzeError::repo_list(input, e.to_string()))?
        .clone();
    let repo_col = headers
        .iter()
        .position(|h| h.trim() == "repository")
        .ok_or_else(|| AnalyzeError::repo_list(input, "missing `repository` column"))?;

    let rows: Vec<(usize, StringRecord)> = reader
        .records()
        .enumerate()
        .map(|(i, r)| r.map(|r| (i, r)))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| AnalyzeError::repo_list(input, e.to_string()))?;
    let listed = rows.len();

    // GitHub slugs are case-insensitive; one spelling means one base clone.
    let mut resolved = run_pool(rows, workers, |(i, row)| {
        let slug = row.get(repo_col).unwrap_or_default().trim().to_lowercase();
        let row: StringRecord = row
            .iter()
            .enumerate()
            .map(|(j, field)| if j == repo_col { slug.as_str() } else { field })
            .collect();
        let req = OpenRequest {
            id: "head",
            slug: &slug,
            workdir_id: format!("{slug}/head"),
            lazy_clone: true,
        };
        let hash = opener.open(&req).and_then(|repo| repo.head_hash());
        match hash {
            Ok(hash) => Ok(Some((i, row, hash))),
            Err(e) => {
                warn!(slug = %slug, "dropping repository: {e}");
                Ok(None)
            }
        }
    })?
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();
    resolved.sort_by_key(|(i, _, _)| *i);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AnalyzeError::io(parent, e))?;
    }
    let out_err = |source: csv::Error| AnalyzeError::Output {
        path: output.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(output).map_err(out_err)?;

    let mut header = headers.clone();
    header.push_field(HEAD_HASH_COLUMN);
    writer.write_record(&header).map_err(out_err)?;
    for (_, mut row, hash) in resolved.iter().cloned() {
        row.push_field(&hash);
        writer.write_record(&row).map_err(out_err)?;
    }
    writer.flush().map_err(|e| AnalyzeError::io(output, e))?;

    info!(
        "{} of {} repositories resolved, written to {}",
        resolved.len(),
        listed,
        output.display()
    );
    Ok(Some(resolved.len()))
}
