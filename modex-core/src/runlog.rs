use std::fs;
use std::path::PathBuf;

use anyhow::Result;

use crate::config::AppConfig;
use crate::config::AppPaths;
use crate::config::ResolvedExportOptions;
use crate::driver::BatchReport;

/// Local record of one export run, written under
/// `<state_dir>/export_logs/<batch>/<run_id>/`.
pub struct RunLogger {
    batch_name: String,
    log_dir: PathBuf,
    run_id: String,
}

impl RunLogger {
    /// Returns `None` when local logging is disabled in the configuration.
    pub fn create(
        config: &AppConfig,
        paths: &AppPaths,
        batch_name: &str,
    ) -> Result<Option<Self>> {
        let Some(log_dir) = config.resolved_log_dir(paths)? else {
            return Ok(None);
        };

        let logger = Self {
            batch_name: batch_name.to_string(),
            log_dir,
            run_id: generate_run_id(),
        };
        fs::create_dir_all(logger.run_dir())?;

        Ok(Some(logger))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> PathBuf {
        self.log_dir.join(&self.batch_name).join(&self.run_id)
    }

    fn log_to_file(&self, name: &str, content: &str) -> Result<()> {
        let run_dir = self.run_dir();
        fs::create_dir_all(&run_dir)?;
        fs::write(run_dir.join(name), content)?;
        Ok(())
    }

    /// Record the resolved export options the run was invoked with.
    pub fn log_options(&self, options: &ResolvedExportOptions) -> Result<()> {
        let options_json = serde_json::to_string_pretty(options)?;
        self.log_to_file("options.json", &options_json)
    }

    /// Record the per-checkpoint outcome of a completed run.
    pub fn log_report(&self, report: &BatchReport) -> Result<()> {
        let report_json = serde_json::to_string_pretty(report)?;
        self.log_to_file("report.json", &report_json)?;

        let mut summary = format!(
            "Batch: {}\n\
             Run ID: {}\n\
             Format: {}\n\
             Completed: {}\n\
             Exports: {}\n\n",
            self.batch_name,
            self.run_id,
            report.format,
            report.timestamp,
            report.exports.len(),
        );
        for record in &report.exports {
            summary.push_str(&format!(
                "  {}  {}  ({} ms)\n",
                record.id,
                record.checkpoint.display(),
                record.duration_ms,
            ));
        }
        self.log_to_file("summary.txt", &summary)?;

        eprintln!("✓ Export log saved to: {}", self.run_dir().display());

        Ok(())
    }
}

fn generate_run_id() -> String {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    format!("{timestamp}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ExportRecord;
    use tempfile::TempDir;

    fn paths_under(root: &std::path::Path) -> AppPaths {
        AppPaths {
            app_name: "modex-test".to_string(),
            config_dir: root.join("config"),
            config_file: root.join("config/config.toml"),
            data_dir: root.join("data"),
            state_dir: root.join("state"),
            cache_dir: root.join("cache"),
        }
    }

    fn sample_report() -> BatchReport {
        BatchReport {
            batch: "seg".to_string(),
            format: "coreml".to_string(),
            timestamp: "2026-08-06T00:00:00+00:00".to_string(),
            exports: vec![ExportRecord {
                id: "n".to_string(),
                checkpoint: PathBuf::from("yolo11n-seg.pt"),
                duration_ms: 1200,
            }],
        }
    }

    #[test]
    fn writes_options_and_report_when_enabled() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::default();
        let paths = paths_under(tmp.path());

        let logger = RunLogger::create(&config, &paths, "seg")
            .unwrap()
            .expect("logging enabled by default");

        let options = ResolvedExportOptions {
            format: "coreml".to_string(),
            int8: true,
            half: false,
            nms: false,
            imgsz: 640,
            data: None,
        };
        logger.log_options(&options).unwrap();
        logger.log_report(&sample_report()).unwrap();

        let run_dir = logger.run_dir();
        assert!(run_dir.starts_with(paths.state_dir.join("export_logs").join("seg")));
        assert!(run_dir.join("options.json").exists());
        assert!(run_dir.join("report.json").exists());

        let summary = fs::read_to_string(run_dir.join("summary.txt")).unwrap();
        assert!(summary.contains("Batch: seg"));
        assert!(summary.contains("yolo11n-seg.pt"));
    }

    #[test]
    fn disabled_logging_produces_no_logger() {
        let tmp = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.logging.local_logging = false;
        let paths = paths_under(tmp.path());

        assert!(RunLogger::create(&config, &paths, "seg").unwrap().is_none());
        assert!(!paths.state_dir.join("export_logs").exists());
    }
}
