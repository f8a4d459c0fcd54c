//! CLI commands that run pipeline tasks

use std::path::Path;
use std::time::Instant;

use console::style;

use crate::build::BuildManifest;
use crate::cli::progress::{
    DISK, GEAR, LINK, LOOKING_GLASS, PACKAGE, build_bar, print_done, print_step, simple_spinner,
    update_build_bar,
};
use crate::config::Settings;
use crate::error::AssetOutcome;
use crate::merge::MergeOptions;
use crate::pipeline::{DumpOptions, Pipeline, Task, TaskOutput, merge_mode};
use crate::sync::{SyncClient, SyncOutcome};
use crate::workspace::Workspace;

/// Number of individual changes listed after a dump
const CHANGE_LISTING_LIMIT: usize = 20;

pub fn init(config: &Path) -> anyhow::Result<()> {
    let settings = Settings::load_or_create(config)?;
    let workspace = Workspace::open_or_create(settings.workspace_dir())?;
    println!("Settings:  {}", config.display());
    println!("Workspace: {}", workspace.root().display());
    println!("Container: {}", settings.container_path().display());
    println!("Layout:    {}", settings.layout_path().display());
    Ok(())
}

pub fn dump(settings: Settings, tables: &[String], overwrite: bool, quiet: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    let container = settings.container_path();
    let options = DumpOptions {
        tables: (!tables.is_empty()).then(|| tables.to_vec()),
        merge: MergeOptions {
            cosmetic: settings.merge.cosmetic,
            mode: merge_mode(overwrite),
        },
    };
    let pipeline = Pipeline::open(settings)?;

    if !quiet {
        print_step(1, 2, LOOKING_GLASS, &format!("Reading {}...", container.display()));
    }
    let spinner = (!quiet).then(|| simple_spinner("Decoding tables and merging..."));
    let output = pipeline.run(Task::Dump(options));
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let TaskOutput::Dump(report) = output? else {
        anyhow::bail!("dump task returned another task's output");
    };

    if !quiet {
        print_step(2, 2, DISK, "Workspace updated");
    }
    let merge = &report.merge;
    println!(
        "{} tables, {} assets: {} added, {} changed ({} cosmetic), {} removed, {} restored, {} deleted, {} unchanged",
        report.tables,
        report.assets,
        merge.added.len(),
        merge.changed.len(),
        merge.cosmetic.len(),
        merge.removed.len(),
        merge.restored.len(),
        merge.deleted.len(),
        merge.unchanged.len()
    );
    if merge.discarded_translations > 0 {
        println!(
            "{} {} translated entries discarded by --overwrite",
            style("Warning:").yellow().bold(),
            merge.discarded_translations
        );
    }
    if !quiet {
        for (change, key) in merge.changes().take(CHANGE_LISTING_LIMIT) {
            println!("  {change} {key}");
        }
        let total = merge.changes().count();
        if total > CHANGE_LISTING_LIMIT {
            println!("  ... and {} more", total - CHANGE_LISTING_LIMIT);
        }
    }
    print_outcomes("Could not decode", &report.outcomes);
    if !quiet {
        print_done(start.elapsed());
    }
    Ok(())
}

pub fn autofill(settings: Settings, rule: Option<String>) -> anyhow::Result<()> {
    if settings.autofill.is_empty() {
        println!("No [[autofill]] rules configured");
        return Ok(());
    }
    let pipeline = Pipeline::open(settings)?;
    print_step(1, 1, GEAR, "Running autofill rules...");
    let TaskOutput::Autofill(report) = pipeline.run(Task::Autofill { only: rule })? else {
        anyhow::bail!("autofill task returned another task's output");
    };

    for rule in &report.rules {
        println!(
            "  {:<24} {:>6} filled  {:>6} waiting on dependencies",
            rule.rule, rule.filled, rule.skipped_dependencies
        );
    }
    println!(
        "{} entries filled, {} skipped for unsettled dependencies",
        report.filled, report.skipped_dependencies
    );
    Ok(())
}

pub fn build(settings: Settings, sync: bool, json: bool, quiet: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    let quiet = quiet || json;
    let pipeline = Pipeline::open(settings)?;

    if !quiet {
        print_step(1, 2, PACKAGE, "Building assets...");
    }
    let bar = build_bar(quiet);
    let progress_bar = bar.clone();
    let handle = pipeline.submit_with_progress(Task::Build { sync }, move |progress| {
        update_build_bar(&progress_bar, progress);
    })?;
    let output = handle.join();
    bar.finish_and_clear();
    let TaskOutput::Build(summary) = output? else {
        anyhow::bail!("build task returned another task's output");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        summary.report.into_result()?;
        return Ok(());
    }

    let report = &summary.report;
    if !report.committed {
        print_outcomes("Could not build", &report.outcomes);
        report.clone().into_result()?;
    }

    print_step(2, 2, DISK, &format!("Wrote {}", report.output_dir.display()));
    println!(
        "Generation {}: {} tables, {} rows, {} story files, {} entries substituted{}",
        report.generation,
        report.tables,
        report.rows,
        report.stories,
        report.substituted,
        if report.container_passthrough {
            " (container unchanged)"
        } else {
            ""
        }
    );
    println!("{} assets changed since the previous build", report.changed_assets.len());
    if let Some(outcome) = &summary.sync {
        print_sync(outcome);
    }
    if !quiet {
        print_done(start.elapsed());
    }
    Ok(())
}

pub fn sync(settings: &Settings, goto_block: Option<u32>, incremental: bool, all: bool) -> anyhow::Result<()> {
    let client = SyncClient::new(settings.sync.clone())?;
    print_step(1, 1, LINK, &format!("Contacting {}...", client.config().url));

    let outcome = match goto_block {
        Some(block_id) => client.goto_block(block_id, incremental),
        None if all => client.reload_localized_data(),
        None => {
            let Some(manifest) = BuildManifest::load_previous(&settings.output_dir()) else {
                anyhow::bail!("no build found in {}; run `kotoba build` first", settings.output_dir().display());
            };
            let assets: Vec<String> = manifest.assets.keys().cloned().collect();
            client.notify(&assets, manifest.generation)
        }
    };
    print_sync(&outcome);
    Ok(())
}

fn print_sync(outcome: &SyncOutcome) {
    let line = format!("Game sync: {outcome}");
    match outcome {
        SyncOutcome::Ack => println!("{}", style(line).green()),
        SyncOutcome::Skipped => println!("{}", style(line).dim()),
        _ => println!("{}", style(line).yellow()),
    }
}

fn print_outcomes(what: &str, outcomes: &[AssetOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    println!("{} {} assets:", style(what).red().bold(), outcomes.len());
    for outcome in outcomes {
        println!("  {outcome}");
    }
}
