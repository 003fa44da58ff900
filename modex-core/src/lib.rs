//! Core library for the modex batch checkpoint export driver.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod runlog;
pub mod toolkit;

pub use checkpoint::CheckpointTemplate;
pub use config::AppConfig;
pub use config::AppPaths;
pub use config::BatchConfig;
pub use config::ConfigBundle;
pub use config::ExportSettings;
pub use config::ResolvedBatchConfig;
pub use config::ResolvedExportOptions;
pub use config::ToolkitSettings;
pub use config::load_or_initialize_config;
pub use dataset::DatasetConfig;
pub use dataset::load_dataset_config;
pub use driver::BatchReport;
pub use driver::ExportEngine;
pub use driver::ExportRecord;
pub use driver::PlannedExport;
pub use toolkit::CommandToolkit;
pub use toolkit::ExportFormat;
pub use toolkit::ExportOutcome;
pub use toolkit::ExportRequest;
pub use toolkit::ModelToolkit;
