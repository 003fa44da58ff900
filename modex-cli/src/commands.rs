use std::fs;
use std::path::Path;
use std::time::Duration;
use std::time::SystemTime;

use anyhow::Context;
use anyhow::Result;
use modex_core::ExportEngine;
use modex_core::load_dataset_config;

pub fn handle_info(engine: &ExportEngine) -> Result<()> {
    println!(
        "Loaded configuration from {}",
        engine.paths().config_file.display()
    );
    println!(
        "Exporter program: {}",
        engine.config().toolkit.resolved_program()
    );

    if engine.config().batches.is_empty() {
        println!("No batches configured yet. Add one to run an export.");
        return Ok(());
    }

    let mut names: Vec<&String> = engine.config().batches.keys().collect();
    names.sort();
    println!("Configured batches: {}", names.len());
    for name in names {
        let batch = engine.resolve_batch(name)?;
        println!(
            "  {} ({} checkpoints, {} format)",
            name,
            batch.ids.len(),
            batch.export.format
        );
    }

    Ok(())
}

pub fn handle_list(engine: &ExportEngine) -> Result<()> {
    if engine.config().batches.is_empty() {
        println!("No batches configured.");
        return Ok(());
    }

    let mut names: Vec<&String> = engine.config().batches.keys().collect();
    names.sort();

    for name in names {
        let batch = engine.resolve_batch(name)?;

        println!("\n{}", name);
        if let Some(description) = &batch.description {
            println!("  {}", description);
        }
        println!("  Template: {}", batch.template);
        println!("  Identifiers: {}", batch.ids.join(", "));
        println!(
            "  Export: {} (int8={}, imgsz={})",
            batch.export.format, batch.export.int8, batch.export.imgsz
        );
        if let Some(data) = &batch.export.data {
            println!("  Dataset config: {}", data.display());
        }
    }

    Ok(())
}

pub fn handle_inspect(data_path: &Path) -> Result<()> {
    let dataset = load_dataset_config(data_path)?;

    println!("Dataset config: {}", data_path.display());
    if let Some(path) = &dataset.path {
        println!("  Dataset root: {}", path);
    }
    println!("  Classes: {}", dataset.class_count());

    for (index, label) in dataset.names.labels() {
        println!("  {:>4}  {}", index, label);
    }

    Ok(())
}

pub fn handle_history(engine: &ExportEngine, batch: Option<&str>, detailed: bool) -> Result<()> {
    let Some(log_root) = engine
        .config()
        .resolved_log_dir(engine.paths())
        .context("failed to resolve export log directory")?
    else {
        println!("Local export logging is disabled.");
        return Ok(());
    };

    if !log_root.exists() {
        println!("No export history found.");
        return Ok(());
    }

    let mut runs = Vec::new();

    for batch_entry in fs::read_dir(&log_root)? {
        let batch_entry = batch_entry?;
        let batch_path = batch_entry.path();
        if !batch_path.is_dir() {
            continue;
        }

        let batch_name = batch_entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = batch
            && batch_name != filter
        {
            continue;
        }

        for run_entry in fs::read_dir(&batch_path)? {
            let run_entry = run_entry?;
            let run_path = run_entry.path();
            if !run_path.is_dir() {
                continue;
            }

            let report_file = run_path.join("report.json");
            if !report_file.exists() {
                continue;
            }

            let report: serde_json::Value =
                serde_json::from_str(&fs::read_to_string(&report_file)?)?;
            let run_id = run_entry.file_name().to_string_lossy().to_string();

            runs.push((batch_name.clone(), run_id, report));
        }
    }

    if runs.is_empty() {
        println!(
            "No export runs found{}",
            if batch.is_some() {
                " for the specified batch"
            } else {
                ""
            }
        );
        return Ok(());
    }

    // Sort by run id (Unix timestamp), newest first.
    runs.sort_by(|a, b| b.1.cmp(&a.1));

    println!("\n{}", "=".repeat(80));
    println!("Export History");
    println!("{}", "=".repeat(80));

    for (batch_name, run_id, report) in &runs {
        let format = report
            .get("format")
            .and_then(|value| value.as_str())
            .unwrap_or("unknown");
        let exports = report
            .get("exports")
            .and_then(|value| value.as_array())
            .map(|entries| entries.len())
            .unwrap_or(0);

        println!("\n{}/{}", batch_name, run_id);
        println!("  Format: {}", format);
        println!("  Checkpoints exported: {}", exports);
        if let Some(timestamp) = report.get("timestamp").and_then(|value| value.as_str()) {
            println!("  Completed: {}", timestamp);
        }

        if detailed
            && let Some(entries) = report.get("exports").and_then(|value| value.as_array())
        {
            for entry in entries {
                let id = entry.get("id").and_then(|value| value.as_str()).unwrap_or("?");
                let checkpoint = entry
                    .get("checkpoint")
                    .and_then(|value| value.as_str())
                    .unwrap_or("?");
                let duration = entry
                    .get("duration_ms")
                    .and_then(|value| value.as_u64())
                    .unwrap_or(0);
                println!("    {}  {}  ({} ms)", id, checkpoint, duration);
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("Total runs: {}", runs.len());

    Ok(())
}

pub fn handle_clean(engine: &ExportEngine, older_than_days: u32, dry_run: bool) -> Result<()> {
    let Some(log_root) = engine
        .config()
        .resolved_log_dir(engine.paths())
        .context("failed to resolve export log directory")?
    else {
        println!("Local export logging is disabled.");
        return Ok(());
    };

    if !log_root.exists() {
        println!("No export log directory found.");
        return Ok(());
    }

    let cutoff_time =
        SystemTime::now() - Duration::from_secs(older_than_days as u64 * 24 * 60 * 60);

    let mut to_delete = Vec::new();
    let mut total_size = 0u64;

    for batch_entry in fs::read_dir(&log_root)? {
        let batch_entry = batch_entry?;
        let batch_path = batch_entry.path();
        if !batch_path.is_dir() {
            continue;
        }

        for run_entry in fs::read_dir(&batch_path)? {
            let run_entry = run_entry?;
            let run_path = run_entry.path();
            if !run_path.is_dir() {
                continue;
            }

            let metadata = fs::metadata(&run_path)?;
            if let Ok(modified) = metadata.modified()
                && modified < cutoff_time
            {
                let size = calculate_dir_size(&run_path)?;
                total_size += size;
                to_delete.push((run_path, size));
            }
        }
    }

    if to_delete.is_empty() {
        println!(
            "No export runs older than {} days found.",
            older_than_days
        );
        return Ok(());
    }

    println!("\n{}", "=".repeat(80));
    if dry_run {
        println!("DRY RUN - Would delete the following:");
    } else {
        println!("Deleting export runs older than {} days:", older_than_days);
    }
    println!("{}", "=".repeat(80));

    for (path, size) in &to_delete {
        println!(
            "  {} ({:.2} MB)",
            path.display(),
            *size as f64 / 1_000_000.0
        );
    }

    println!(
        "\nTotal: {} runs, {:.2} MB",
        to_delete.len(),
        total_size as f64 / 1_000_000.0
    );

    if !dry_run {
        for (path, _) in to_delete {
            fs::remove_dir_all(&path)?;
        }
        println!("\n✓ Cleanup complete");
    } else {
        println!("\nRun without --dry-run to actually delete these runs.");
    }

    Ok(())
}

fn calculate_dir_size(path: &Path) -> Result<u64> {
    let mut size = 0;
    if path.is_dir() {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                size += calculate_dir_size(&path)?;
            } else {
                size += fs::metadata(&path)?.len();
            }
        }
    }
    Ok(size)
}
