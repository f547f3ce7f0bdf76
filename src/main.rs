mod catalog;
mod cli;
mod http;
mod images;
mod llm;
mod models;
mod pipeline;
mod progress;
mod search;
mod storage;

use catalog::OutputCatalog;
use clap::Parser;
use cli::CliOptions;
use pipeline::{DefaultPipeline, PipelineConfig};
use progress::ProgressStore;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let options = CliOptions::parse();
    init_tracing(options.debug);

    if let Err(err) = run(options).await {
        error!(target = "catalogr", "run aborted: {err}");
        std::process::exit(1);
    }
}

async fn run(options: CliOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut names = match &options.input {
        Some(path) => cli::load_names(path)?,
        None => Vec::new(),
    };
    names.extend(options.names.iter().cloned());

    if options.tidy {
        let removed = images::clear_images_dir(&options.images_dir);
        info!(
            target = "catalogr",
            entries_removed = removed,
            dir = %options.images_dir.display(),
            "images directory tidied",
        );
    }

    let mut progress = ProgressStore::load(&options.progress)?;

    if options.print_progress {
        for name in progress.names() {
            println!("{name}");
        }
        if names.is_empty() {
            println!("{} done", progress.len());
        } else {
            let done = names.iter().filter(|name| progress.is_done(name)).count();
            println!("{done} of {} done", names.len());
        }
        return Ok(());
    }

    if names.is_empty() {
        if options.tidy {
            return Ok(());
        }
        return Err("no product names given (pass an input file or --name)".into());
    }
    let names = apply_limit(names, &progress, options.limit);

    let mut catalog = OutputCatalog::load(&options.catalog)?;
    if !catalog.is_empty() {
        info!(
            target = "catalogr",
            existing = catalog.len(),
            "appending to an existing catalog",
        );
    }
    let pipeline = DefaultPipeline::from_env(PipelineConfig {
        images_dir: options.images_dir.clone(),
        image_max_kb: image_budget_from_env(),
    })?;

    info!(
        target = "catalogr",
        products = names.len(),
        already_done = progress.len(),
        resumed = !progress.is_empty(),
        catalog = %options.catalog.display(),
        "starting batch",
    );

    let summary = pipeline.run_batch(&names, &mut progress, &mut catalog).await?;

    for failed in &summary.failed {
        warn!(
            target = "catalogr",
            product = %failed.name,
            stage = %failed.stage,
            reason = %failed.reason,
            "product incomplete; rerun to retry",
        );
    }
    if summary.is_clean() {
        info!(
            target = "catalogr",
            completed = summary.completed.len(),
            skipped = summary.skipped.len(),
            catalog_total = catalog.len(),
            "batch finished",
        );
    } else {
        warn!(
            target = "catalogr",
            completed = summary.completed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            catalog_total = catalog.len(),
            "batch finished with failures",
        );
    }
    Ok(())
}

/// Caps how many not-yet-done products this run will attempt. Names already
/// marked done pass through so the summary still counts them as skipped.
fn apply_limit(names: Vec<String>, progress: &ProgressStore, limit: Option<usize>) -> Vec<String> {
    let Some(limit) = limit else {
        return names;
    };
    let mut pending = 0usize;
    names
        .into_iter()
        .filter(|name| {
            if progress.is_done(name.trim()) {
                return true;
            }
            if pending < limit {
                pending += 1;
                return true;
            }
            false
        })
        .collect()
}

fn image_budget_from_env() -> usize {
    std::env::var("IMAGE_MAX_KB")
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|kb| *kb > 0)
        .unwrap_or(30)
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[&str]) -> (tempfile::TempDir, ProgressStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::load(dir.path().join("processed.txt")).unwrap();
        for name in names {
            store.mark_done(name).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn limit_counts_only_pending_products() {
        let (_dir, progress) = store_with(&["Lux Soap"]);
        let names = vec![
            "Lux Soap".to_string(),
            "Maggi Noodles".to_string(),
            "Surf Excel".to_string(),
            "Dettol Antiseptic Liquid".to_string(),
        ];
        let limited = apply_limit(names, &progress, Some(2));
        assert_eq!(limited, vec!["Lux Soap", "Maggi Noodles", "Surf Excel"]);
    }

    #[test]
    fn no_limit_keeps_everything() {
        let (_dir, progress) = store_with(&[]);
        let names = vec!["A".to_string(), "B".to_string()];
        assert_eq!(apply_limit(names.clone(), &progress, None), names);
    }
}
