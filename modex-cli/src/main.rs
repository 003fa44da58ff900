use std::env;
use std::path::PathBuf;

use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use modex_core::CommandToolkit;
use modex_core::ExportEngine;
use modex_core::ExportSettings;

mod commands;

#[derive(Parser)]
#[command(name = "modex")]
#[command(about = "Batch checkpoint export CLI", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[arg(long, short, global = true, help = "Show verbose output")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show configuration and batch information")]
    Info,

    #[command(about = "List configured export batches")]
    List,

    #[command(about = "Export every checkpoint of a batch")]
    Run {
        #[arg(help = "Batch name to export (the only configured batch if omitted)")]
        batch: Option<String>,

        #[arg(long, help = "Target format tag (e.g. coreml, onnx, tflite)")]
        format: Option<String>,

        #[arg(long, help = "Enable 8-bit weight quantization (true/false)")]
        int8: Option<bool>,

        #[arg(long, help = "Export with half-precision weights (true/false)")]
        half: Option<bool>,

        #[arg(long, help = "Embed non-maximum suppression in the artifact (true/false)")]
        nms: Option<bool>,

        #[arg(long, help = "Input image size in pixels")]
        imgsz: Option<u32>,

        #[arg(long, help = "Dataset-config YAML handed to the exporter")]
        data: Option<PathBuf>,

        #[arg(long, help = "Print planned exports without invoking the exporter")]
        dry_run: bool,
    },

    #[command(about = "Show class metadata of a dataset-config file")]
    Inspect {
        #[arg(help = "Path to the dataset YAML")]
        data: PathBuf,
    },

    #[command(about = "List past export runs")]
    History {
        #[arg(help = "Batch name (shows all batches if omitted)")]
        batch: Option<String>,

        #[arg(long, help = "Show per-checkpoint details")]
        detailed: bool,
    },

    #[command(about = "Clean old export run logs")]
    Clean {
        #[arg(long, help = "Delete runs older than N days (default: 30)")]
        older_than: Option<u32>,

        #[arg(long, help = "Dry run - show what would be deleted")]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let engine = ExportEngine::load("modex")?;

    match cli.command {
        Commands::Run {
            batch,
            format,
            int8,
            half,
            nms,
            imgsz,
            data,
            dry_run,
        } => {
            let batch_name = match batch {
                Some(name) => name,
                None => default_batch(&engine)?,
            };

            let mut overrides = None;
            if format.is_some()
                || int8.is_some()
                || half.is_some()
                || nms.is_some()
                || imgsz.is_some()
                || data.is_some()
            {
                overrides = Some(ExportSettings {
                    format,
                    int8,
                    half,
                    nms,
                    imgsz,
                    data: data.map(absolute_path_string).transpose()?,
                });
            }

            if dry_run {
                let (resolved, planned) = engine.plan_batch(&batch_name, overrides)?;
                println!(
                    "Would export batch '{}' to {} format:",
                    batch_name, resolved.export.format
                );
                for item in &planned {
                    println!("  {}  {}", item.id, item.checkpoint.display());
                }
                if let Some(data) = &resolved.export.data {
                    println!("Dataset config: {}", data.display());
                }
            } else {
                let toolkit = CommandToolkit::from_settings(&engine.config().toolkit);
                println!(
                    "Exporting batch '{}' with '{}'...",
                    batch_name,
                    toolkit.program()
                );

                let report = engine.run_batch(&toolkit, &batch_name, overrides)?;

                println!(
                    "Exported {} checkpoints to {} format",
                    report.exports.len(),
                    report.format
                );
                if cli.verbose {
                    for record in &report.exports {
                        println!(
                            "  {}  {}  ({} ms)",
                            record.id,
                            record.checkpoint.display(),
                            record.duration_ms
                        );
                    }
                }
            }
        }
        Commands::Info => {
            commands::handle_info(&engine)?;
        }
        Commands::List => {
            commands::handle_list(&engine)?;
        }
        Commands::Inspect { data } => {
            commands::handle_inspect(&data)?;
        }
        Commands::History { batch, detailed } => {
            commands::handle_history(&engine, batch.as_deref(), detailed)?;
        }
        Commands::Clean {
            older_than,
            dry_run,
        } => {
            commands::handle_clean(&engine, older_than.unwrap_or(30), dry_run)?;
        }
    }

    Ok(())
}

/// The batch to run when none is named: unambiguous only when the
/// configuration has exactly one.
fn default_batch(engine: &ExportEngine) -> Result<String> {
    let batches = &engine.config().batches;
    match batches.len() {
        0 => bail!("configuration has no batches; add one under [batches.<name>]"),
        1 => Ok(batches.keys().next().cloned().unwrap_or_default()),
        count => bail!("configuration has {count} batches; pass a batch name"),
    }
}

/// Command-line paths resolve against the invocation directory, not the
/// config directory the settings layer assumes.
fn absolute_path_string(path: PathBuf) -> Result<String> {
    let absolute = if path.is_absolute() {
        path
    } else {
        env::current_dir()?.join(path)
    };
    Ok(absolute.to_string_lossy().into_owned())
}
