use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use serde::Serialize;

use crate::config::AppConfig;
use crate::config::AppPaths;
use crate::config::ConfigBundle;
use crate::config::ExportSettings;
use crate::config::ResolvedBatchConfig;
use crate::config::load_or_initialize_config;
use crate::config::merge_export_settings_public;
use crate::runlog::RunLogger;
use crate::toolkit::ExportRequest;
use crate::toolkit::ModelToolkit;

/// One planned load/export pair of a batch run, produced without touching the
/// toolkit. Used for dry runs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedExport {
    pub id: String,
    pub checkpoint: PathBuf,
}

/// Record of one completed export call.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub id: String,
    pub checkpoint: PathBuf,
    pub duration_ms: u64,
}

/// Summary of a completed batch run. Written to the run log; the driver
/// itself never consumes it.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: String,
    pub format: String,
    pub timestamp: String,
    pub exports: Vec<ExportRecord>,
}

/// High-level orchestrator for batch checkpoint exports.
#[derive(Debug)]
pub struct ExportEngine {
    bundle: ConfigBundle,
}

impl ExportEngine {
    /// Load configuration from disk (creating defaults if needed) and produce a
    /// ready-to-use engine instance.
    pub fn load(app_name: impl AsRef<str>) -> Result<Self> {
        Ok(Self {
            bundle: load_or_initialize_config(app_name)?,
        })
    }

    /// Construct an engine from an existing [`ConfigBundle`]. Useful for tests.
    pub fn from_bundle(bundle: ConfigBundle) -> Self {
        Self { bundle }
    }

    pub fn config(&self) -> &AppConfig {
        &self.bundle.config
    }

    pub fn paths(&self) -> &AppPaths {
        &self.bundle.paths
    }

    pub fn resolve_batch(&self, batch_name: &str) -> Result<ResolvedBatchConfig> {
        self.bundle
            .config
            .resolve_batch(batch_name, &self.bundle.paths)
    }

    /// Resolve a batch, stacking command-line export overrides on top of the
    /// batch's own overrides from the config file.
    fn resolve_batch_with_overrides(
        &self,
        batch_name: &str,
        overrides: Option<&ExportSettings>,
    ) -> Result<ResolvedBatchConfig> {
        let mut batch = self.resolve_batch(batch_name)?;

        if let Some(override_settings) = overrides {
            let stacked = match self.bundle.config.export.batches.get(batch_name) {
                Some(existing) => {
                    merge_export_settings_public(existing, Some(override_settings))
                }
                None => override_settings.clone(),
            };

            batch.export = self.bundle.config.export.resolve(
                Some(&stacked),
                batch_name,
                &self.bundle.paths.config_dir,
            )?;
        }

        Ok(batch)
    }

    /// Render the load/export plan for a batch without invoking the toolkit.
    pub fn plan_batch(
        &self,
        batch_name: &str,
        overrides: Option<ExportSettings>,
    ) -> Result<(ResolvedBatchConfig, Vec<PlannedExport>)> {
        let batch = self.resolve_batch_with_overrides(batch_name, overrides.as_ref())?;

        let planned = batch
            .ids
            .iter()
            .map(|id| PlannedExport {
                id: id.clone(),
                checkpoint: batch
                    .template
                    .render_path(id, batch.checkpoint_dir.as_deref()),
            })
            .collect();

        Ok((batch, planned))
    }

    /// Export every checkpoint of the named batch, strictly in list order.
    ///
    /// Each identifier is fully processed (load, then export) before the next
    /// begins, and every export call receives the same option set. The first
    /// loader or exporter error aborts the whole run: identifiers after the
    /// failing position are never touched and nothing is retried.
    pub fn run_batch<T: ModelToolkit>(
        &self,
        toolkit: &T,
        batch_name: &str,
        overrides: Option<ExportSettings>,
    ) -> Result<BatchReport> {
        let batch = self.resolve_batch_with_overrides(batch_name, overrides.as_ref())?;
        let request = ExportRequest::from_options(&batch.export)
            .with_context(|| format!("invalid export options for batch '{batch_name}'"))?;

        let mut exports = Vec::with_capacity(batch.ids.len());
        for id in &batch.ids {
            let checkpoint = batch
                .template
                .render_path(id, batch.checkpoint_dir.as_deref());

            let model = toolkit
                .load_model(&checkpoint)
                .with_context(|| format!("failed to load checkpoint '{}'", checkpoint.display()))?;

            let started = Instant::now();
            toolkit
                .export_model(&model, &request)
                .with_context(|| format!("failed to export '{}'", checkpoint.display()))?;

            exports.push(ExportRecord {
                id: id.clone(),
                checkpoint,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let report = BatchReport {
            batch: batch.name.clone(),
            format: request.format.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            exports,
        };

        // The exports already happened; a run-log failure only warns.
        if let Err(err) = self.write_run_log(&batch, &report) {
            eprintln!("Warning: failed to write export run log: {err}");
        }

        Ok(report)
    }

    fn write_run_log(&self, batch: &ResolvedBatchConfig, report: &BatchReport) -> Result<()> {
        let Some(logger) =
            RunLogger::create(&self.bundle.config, &self.bundle.paths, &batch.name)?
        else {
            return Ok(());
        };

        logger.log_options(&batch.export)?;
        logger.log_report(report)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::config::ExportSection;
    use crate::config::LoggingSettings;
    use crate::toolkit::ExportFormat;
    use crate::toolkit::ExportOutcome;
    use anyhow::bail;
    use std::cell::RefCell;
    use std::path::Path;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Load(PathBuf),
        Export(PathBuf, ExportRequest),
    }

    #[derive(Default)]
    struct FakeToolkit {
        events: RefCell<Vec<Event>>,
        fail_load_at: Option<usize>,
        fail_export_at: Option<usize>,
    }

    struct FakeModel {
        checkpoint: PathBuf,
    }

    impl FakeToolkit {
        fn events(&self) -> Vec<Event> {
            self.events.borrow().clone()
        }

        fn load_count(&self) -> usize {
            self.events
                .borrow()
                .iter()
                .filter(|event| matches!(event, Event::Load(_)))
                .count()
        }

        fn export_requests(&self) -> Vec<ExportRequest> {
            self.events
                .borrow()
                .iter()
                .filter_map(|event| match event {
                    Event::Export(_, request) => Some(request.clone()),
                    Event::Load(_) => None,
                })
                .collect()
        }
    }

    impl ModelToolkit for FakeToolkit {
        type Model = FakeModel;

        fn load_model(&self, checkpoint: &Path) -> Result<FakeModel> {
            if self.fail_load_at == Some(self.load_count()) {
                bail!("injected load failure for '{}'", checkpoint.display());
            }
            self.events
                .borrow_mut()
                .push(Event::Load(checkpoint.to_path_buf()));
            Ok(FakeModel {
                checkpoint: checkpoint.to_path_buf(),
            })
        }

        fn export_model(
            &self,
            model: &FakeModel,
            request: &ExportRequest,
        ) -> Result<ExportOutcome> {
            let exports_so_far = self.events.borrow().len() / 2;
            if self.fail_export_at == Some(exports_so_far) {
                bail!("injected export failure");
            }
            self.events
                .borrow_mut()
                .push(Event::Export(model.checkpoint.clone(), request.clone()));
            Ok(ExportOutcome {
                checkpoint: model.checkpoint.clone(),
            })
        }
    }

    fn test_engine(tmp: &TempDir) -> ExportEngine {
        let mut config = AppConfig::default();
        config.logging = LoggingSettings {
            local_logging: false,
            log_dir: None,
        };

        config.batches.insert(
            "seg".to_string(),
            BatchConfig {
                ids: vec!["n".to_string(), "s".to_string()],
                template: Some("yolo11{id}-seg.pt".to_string()),
                checkpoint_dir: None,
                description: None,
            },
        );
        config.batches.insert(
            "vistas".to_string(),
            BatchConfig {
                ids: vec!["m".to_string(), "l".to_string()],
                template: Some("vistas-{id}.pt".to_string()),
                checkpoint_dir: None,
                description: None,
            },
        );

        let mut export = ExportSection::default();
        export.defaults.int8 = Some(true);
        export.batches.insert(
            "vistas".to_string(),
            ExportSettings {
                data: Some("data-vistas.yaml".to_string()),
                ..ExportSettings::default()
            },
        );
        config.export = export;

        let root = tmp.path();
        let paths = AppPaths {
            app_name: "modex-test".to_string(),
            config_dir: root.join("config"),
            config_file: root.join("config/config.toml"),
            data_dir: root.join("data"),
            state_dir: root.join("state"),
            cache_dir: root.join("cache"),
        };

        ExportEngine::from_bundle(ConfigBundle { config, paths })
    }

    #[test]
    fn loads_then_exports_each_identifier_in_order() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);
        let toolkit = FakeToolkit::default();

        let report = engine.run_batch(&toolkit, "seg", None).unwrap();

        let request = ExportRequest {
            format: ExportFormat::CoreMl,
            int8: true,
            half: false,
            nms: false,
            imgsz: 640,
            data: None,
        };
        assert_eq!(
            toolkit.events(),
            vec![
                Event::Load(PathBuf::from("yolo11n-seg.pt")),
                Event::Export(PathBuf::from("yolo11n-seg.pt"), request.clone()),
                Event::Load(PathBuf::from("yolo11s-seg.pt")),
                Event::Export(PathBuf::from("yolo11s-seg.pt"), request),
            ]
        );

        assert_eq!(report.batch, "seg");
        assert_eq!(report.format, "coreml");
        assert_eq!(report.exports.len(), 2);
        assert_eq!(report.exports[0].id, "n");
        assert_eq!(report.exports[1].id, "s");
    }

    #[test]
    fn export_options_are_constant_across_a_run() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);
        let toolkit = FakeToolkit::default();

        engine.run_batch(&toolkit, "seg", None).unwrap();

        let requests = toolkit.export_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn dataset_config_reaches_every_export_call() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);
        let toolkit = FakeToolkit::default();

        engine.run_batch(&toolkit, "vistas", None).unwrap();

        let requests = toolkit.export_requests();
        assert_eq!(requests.len(), 2);
        let expected = engine.paths().config_dir.join("data-vistas.yaml");
        for request in requests {
            assert_eq!(request.data.as_deref(), Some(expected.as_path()));
        }
    }

    #[test]
    fn first_load_failure_aborts_the_remaining_batch() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);
        let toolkit = FakeToolkit {
            fail_load_at: Some(1),
            ..FakeToolkit::default()
        };

        let err = engine.run_batch(&toolkit, "seg", None).unwrap_err();
        assert!(format!("{err:#}").contains("yolo11s-seg.pt"));

        // First identifier fully processed, second never exported.
        assert_eq!(
            toolkit
                .events()
                .iter()
                .filter(|event| matches!(event, Event::Export(..)))
                .count(),
            1
        );
        assert_eq!(toolkit.load_count(), 1);
    }

    #[test]
    fn first_export_failure_aborts_the_remaining_batch() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);
        let toolkit = FakeToolkit {
            fail_export_at: Some(0),
            ..FakeToolkit::default()
        };

        let err = engine.run_batch(&toolkit, "seg", None).unwrap_err();
        assert!(format!("{err:#}").contains("yolo11n-seg.pt"));
        assert_eq!(toolkit.events(), vec![Event::Load(PathBuf::from(
            "yolo11n-seg.pt"
        ))]);
    }

    #[test]
    fn command_line_overrides_stack_on_batch_overrides() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);
        let toolkit = FakeToolkit::default();

        let overrides = ExportSettings {
            format: Some("onnx".to_string()),
            imgsz: Some(320),
            ..ExportSettings::default()
        };
        engine
            .run_batch(&toolkit, "vistas", Some(overrides))
            .unwrap();

        let requests = toolkit.export_requests();
        let expected_data = engine.paths().config_dir.join("data-vistas.yaml");
        for request in requests {
            assert_eq!(request.format, ExportFormat::Onnx);
            assert_eq!(request.imgsz, 320);
            // Batch-level dataset config survives unrelated CLI overrides.
            assert_eq!(request.data.as_deref(), Some(expected_data.as_path()));
        }
    }

    #[test]
    fn plan_batch_renders_without_invoking_the_toolkit() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);

        let (batch, planned) = engine.plan_batch("seg", None).unwrap();

        assert_eq!(batch.name, "seg");
        assert_eq!(
            planned,
            vec![
                PlannedExport {
                    id: "n".to_string(),
                    checkpoint: PathBuf::from("yolo11n-seg.pt"),
                },
                PlannedExport {
                    id: "s".to_string(),
                    checkpoint: PathBuf::from("yolo11s-seg.pt"),
                },
            ]
        );
    }

    #[test]
    fn unknown_format_override_fails_before_any_toolkit_call() {
        let tmp = TempDir::new().unwrap();
        let engine = test_engine(&tmp);
        let toolkit = FakeToolkit::default();

        let overrides = ExportSettings {
            format: Some("gguf".to_string()),
            ..ExportSettings::default()
        };
        let err = engine
            .run_batch(&toolkit, "seg", Some(overrides))
            .unwrap_err();

        assert!(format!("{err:#}").contains("unsupported export format"));
        assert!(toolkit.events().is_empty());
    }
}
