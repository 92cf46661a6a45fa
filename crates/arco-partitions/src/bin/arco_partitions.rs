//! `arco-partitions` - page through a partition-set file.
//!
//! Loads a JSON partition set into the in-memory source and prints each page
//! with its step keys and per-step summaries, exactly as a partition run
//! matrix would see it.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;

use arco_partitions::config::EngineConfig;
use arco_partitions::model::{PageSize, PartitionSet, RunTagFilter};
use arco_partitions::observability::{LogFormat, init_logging};
use arco_partitions::source::memory::InMemoryPartitionSource;
use arco_partitions::view::{PartitionView, ViewParams, ViewSnapshot};

/// Page through a partition set the way the partition run matrix does.
#[derive(Debug, Parser)]
#[command(name = "arco-partitions")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding one partition set (`{"name": ..., "partitions": [...]}`).
    file: PathBuf,

    /// Partitions per page: a positive integer or `all`.
    #[arg(long)]
    page_size: Option<PageSize>,

    /// Run tag filter as `key=value`. Repeatable; all must match.
    #[arg(long = "tag", value_name = "KEY=VALUE")]
    tags: Vec<String>,

    /// Number of pages to print.
    #[arg(long, default_value_t = 1)]
    pages: usize,

    /// Print pages as JSON lines.
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "ARCO_PARTITIONS_LOG_JSON")]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let config = EngineConfig::from_env()?;
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let set: PartitionSet = serde_json::from_str(&raw)
        .with_context(|| format!("parsing partition set from {}", args.file.display()))?;

    let run_tags = args
        .tags
        .iter()
        .map(|tag| {
            let filter = RunTagFilter::new(RunTagFilter::TAG_TOKEN, tag.as_str());
            filter.validate().map(|()| filter)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let params = ViewParams {
        page_size: args.page_size,
        ..ViewParams::new(set.name.clone())
    }
    .with_run_tags(run_tags);
    let source = Arc::new(InMemoryPartitionSource::with_set(set));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(&args, params, source, &config))
}

async fn run(
    args: &Args,
    params: ViewParams,
    source: Arc<InMemoryPartitionSource>,
    config: &EngineConfig,
) -> Result<()> {
    let mut view = PartitionView::new(params, source, config);
    for page in 1..=args.pages {
        view.load().await?;
        let snapshot = view.snapshot();
        if let Some(err) = &snapshot.error {
            bail!("page {page} failed: {err}");
        }
        if args.json {
            print_json(page, &snapshot)?;
        } else {
            print_text(page, &snapshot);
        }
        if !snapshot.pagination.has_next_cursor {
            break;
        }
        view.advance()?;
    }
    Ok(())
}

fn print_json(page: usize, snapshot: &ViewSnapshot) -> Result<()> {
    let line = json!({
        "page": page,
        "partitions": snapshot.partitions,
        "stepKeys": snapshot.step_keys,
        "summaries": snapshot.matrix().summaries(),
        "pagination": snapshot.pagination,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn print_text(page: usize, snapshot: &ViewSnapshot) {
    println!(
        "page {page}: {} partitions{}",
        snapshot.partitions.len(),
        if snapshot.pagination.has_next_cursor {
            ", more available"
        } else {
            ""
        }
    );
    for partition in &snapshot.partitions {
        println!("  {:<24} {} runs", partition.name, partition.runs.len());
    }
    if snapshot.step_keys.is_empty() {
        return;
    }
    println!("  steps:");
    for summary in snapshot.matrix().summaries() {
        println!(
            "    {:<24} ok={} failed={} skipped={} running={} missing={}",
            summary.step_key,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.in_progress,
            summary.missing
        );
    }
}
