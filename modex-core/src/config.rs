use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use config::Config as ConfigLoader;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::checkpoint::CheckpointTemplate;

/// Embedded template used to bootstrap the on-disk configuration when the user
/// runs the tool for the first time.
pub const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../templates/config.toml");

/// Container returned after loading configuration data and resolving runtime
/// paths.
#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub config: AppConfig,
    pub paths: AppPaths,
}

/// Resolve and load the configuration for the provided application name. If no
/// config file exists yet, a default file is created from
/// [`DEFAULT_CONFIG_TEMPLATE`].
pub fn load_or_initialize_config(app_name: impl AsRef<str>) -> Result<ConfigBundle> {
    let app_name = app_name.as_ref();
    let mut paths = AppPaths::discover(app_name)?;
    paths.ensure_config_dir()?;

    if !paths.config_file.exists() {
        if let Some(parent) = paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        fs::write(&paths.config_file, DEFAULT_CONFIG_TEMPLATE).with_context(|| {
            format!(
                "failed to write default config to {}",
                paths.config_file.display()
            )
        })?;
    }

    let env_prefix = app_name
        .chars()
        .map(|ch| if ch == '-' { '_' } else { ch })
        .collect::<String>()
        .to_ascii_uppercase();

    let builder = ConfigLoader::builder()
        .add_source(File::from(paths.config_file.clone()))
        .add_source(
            Environment::with_prefix(&env_prefix)
                .separator("__")
                .try_parsing(true),
        );

    let config: AppConfig = builder
        .build()
        .with_context(|| {
            format!(
                "failed to parse configuration at {}",
                paths.config_file.display()
            )
        })?
        .try_deserialize()
        .context("failed to deserialize configuration into AppConfig")?;

    paths = paths.apply_storage_overrides(&config.storage)?;
    paths.ensure_runtime_dirs()?;

    config.normalize()?;

    Ok(ConfigBundle { config, paths })
}

/// Persistent runtime paths derived from XDG environment variables or sensible
/// fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub app_name: String,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl AppPaths {
    pub fn discover(app_name: impl Into<String>) -> Result<Self> {
        let app_name = app_name.into();
        let home = home_dir().context("unable to determine home directory for XDG resolution")?;

        let config_base = xdg_dir("XDG_CONFIG_HOME", &home, ".config");
        let data_base = xdg_dir("XDG_DATA_HOME", &home, ".local/share");
        let state_base = xdg_dir("XDG_STATE_HOME", &home, ".local/state");
        let cache_base = env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| state_base.join("cache"));

        let config_dir = config_base.join(&app_name);
        let data_dir = data_base.join(&app_name);
        let state_dir = state_base.join(&app_name);
        let cache_dir = cache_base.join(&app_name);
        let config_file = config_dir.join("config.toml");

        Ok(Self {
            app_name,
            config_dir,
            config_file,
            data_dir,
            state_dir,
            cache_dir,
        })
    }

    pub fn ensure_config_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.config_dir).with_context(|| {
            format!(
                "failed to create config directory {}",
                self.config_dir.display()
            )
        })
    }

    pub fn ensure_runtime_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.state_dir, &self.cache_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create runtime directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn apply_storage_overrides(&self, storage: &StorageSettings) -> Result<Self> {
        let mut next = self.clone();

        if let Some(data_dir) = storage.data_dir.as_ref() {
            next.data_dir = resolve_path_value(data_dir, &self.config_dir)?;
        }

        if let Some(state_dir) = storage.state_dir.as_ref() {
            next.state_dir = resolve_path_value(state_dir, &self.config_dir)?;
        }

        if let Some(cache_dir) = storage.cache_dir.as_ref() {
            next.cache_dir = resolve_path_value(cache_dir, &self.config_dir)?;
        } else {
            // Ensure cache lives under the state directory by default.
            next.cache_dir = next.state_dir.join("cache");
        }

        Ok(next)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct AppConfig {
    pub toolkit: ToolkitSettings,
    pub batches: HashMap<String, BatchConfig>,
    pub export: ExportSection,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    pub fn normalize(&self) -> Result<()> {
        for (name, batch) in &self.batches {
            if batch.ids.is_empty() {
                bail!("batch '{name}' has an empty identifier list");
            }

            let template = batch
                .template
                .as_deref()
                .ok_or_else(|| anyhow!("batch '{name}' is missing a checkpoint template"))?;
            CheckpointTemplate::parse(template)
                .with_context(|| format!("invalid checkpoint template for batch '{name}'"))?;
        }

        if self.toolkit.resolved_program().trim().is_empty() {
            bail!("toolkit program must not be empty");
        }

        Ok(())
    }

    pub fn resolve_batch(&self, batch_name: &str, paths: &AppPaths) -> Result<ResolvedBatchConfig> {
        let batch = self
            .batches
            .get(batch_name)
            .ok_or_else(|| anyhow!("batch '{batch_name}' is not configured"))?;

        let template = batch
            .template
            .as_deref()
            .ok_or_else(|| anyhow!("batch '{batch_name}' is missing a checkpoint template"))?;
        let template = CheckpointTemplate::parse(template)
            .with_context(|| format!("invalid checkpoint template for batch '{batch_name}'"))?;

        let checkpoint_dir = batch
            .checkpoint_dir
            .as_ref()
            .map(|dir| resolve_path_value(dir, &paths.config_dir))
            .transpose()
            .with_context(|| {
                format!("failed to resolve checkpoint directory for batch '{batch_name}'")
            })?;

        let export_overrides = self.export.batches.get(batch_name);
        let export = self
            .export
            .resolve(export_overrides, batch_name, &paths.config_dir)
            .context("failed to resolve export options")?;

        Ok(ResolvedBatchConfig {
            name: batch_name.to_string(),
            description: batch.description.clone(),
            ids: batch.ids.clone(),
            template,
            checkpoint_dir,
            export,
        })
    }

    /// Directory export run logs are written to, or `None` when local logging
    /// is disabled.
    pub fn resolved_log_dir(&self, paths: &AppPaths) -> Result<Option<PathBuf>> {
        if !self.logging.local_logging {
            return Ok(None);
        }

        let dir = if let Some(custom_dir) = self.logging.log_dir.as_ref() {
            resolve_path_value(custom_dir, &paths.config_dir)?
        } else {
            paths.state_dir.join("export_logs")
        };

        Ok(Some(dir))
    }
}

/// External exporter program consumed by the command-backed toolkit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitSettings {
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl Default for ToolkitSettings {
    fn default() -> Self {
        Self {
            program: Some(DEFAULT_TOOLKIT_PROGRAM.to_string()),
            args: Vec::new(),
        }
    }
}

impl ToolkitSettings {
    pub fn resolved_program(&self) -> &str {
        self.program.as_deref().unwrap_or(DEFAULT_TOOLKIT_PROGRAM)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct BatchConfig {
    pub ids: Vec<String>,
    pub template: Option<String>,
    pub checkpoint_dir: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct StorageSettings {
    pub data_dir: Option<String>,
    pub state_dir: Option<String>,
    pub cache_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Write a local record of each export run under the state directory.
    pub local_logging: bool,
    /// Directory export run logs are written to (defaults to
    /// `<state_dir>/export_logs`).
    pub log_dir: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            local_logging: true,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ExportSection {
    pub defaults: ExportSettings,
    pub batches: HashMap<String, ExportSettings>,
}

impl ExportSection {
    pub fn resolve(
        &self,
        overrides: Option<&ExportSettings>,
        batch_name: &str,
        config_dir: &Path,
    ) -> Result<ResolvedExportOptions> {
        let merged = merge_export_settings(&self.defaults, overrides);

        let format = merged.format.unwrap_or_else(|| DEFAULT_FORMAT.to_string());
        let int8 = merged.int8.unwrap_or(DEFAULT_INT8);
        let half = merged.half.unwrap_or(DEFAULT_HALF);
        let nms = merged.nms.unwrap_or(DEFAULT_NMS);
        let imgsz = merged.imgsz.unwrap_or(DEFAULT_IMGSZ);

        let data = merged
            .data
            .as_ref()
            .map(|path| resolve_path_value(path, config_dir))
            .transpose()
            .with_context(|| {
                format!("failed to resolve dataset config path for batch '{batch_name}'")
            })?;

        Ok(ResolvedExportOptions {
            format,
            int8,
            half,
            nms,
            imgsz,
            data,
        })
    }
}

const DEFAULT_TOOLKIT_PROGRAM: &str = "yolo";
const DEFAULT_FORMAT: &str = "coreml";
const DEFAULT_INT8: bool = false;
const DEFAULT_HALF: bool = false;
const DEFAULT_NMS: bool = false;
const DEFAULT_IMGSZ: u32 = 640;

pub fn merge_export_settings_public(
    base: &ExportSettings,
    overrides: Option<&ExportSettings>,
) -> ExportSettings {
    merge_export_settings(base, overrides)
}

fn merge_export_settings(
    base: &ExportSettings,
    overrides: Option<&ExportSettings>,
) -> ExportSettings {
    let mut merged = base.clone();
    if let Some(override_settings) = overrides {
        if override_settings.format.is_some() {
            merged.format = override_settings.format.clone();
        }
        if override_settings.int8.is_some() {
            merged.int8 = override_settings.int8;
        }
        if override_settings.half.is_some() {
            merged.half = override_settings.half;
        }
        if override_settings.nms.is_some() {
            merged.nms = override_settings.nms;
        }
        if override_settings.imgsz.is_some() {
            merged.imgsz = override_settings.imgsz;
        }
        if override_settings.data.is_some() {
            merged.data = override_settings.data.clone();
        }
    }
    merged
}

/// Partial export options as authored in the config file or on the command
/// line. Unset fields fall back through the defaults chain during resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ExportSettings {
    pub format: Option<String>,
    pub int8: Option<bool>,
    pub half: Option<bool>,
    pub nms: Option<bool>,
    pub imgsz: Option<u32>,
    pub data: Option<String>,
}

/// Fully resolved export options. Constant across every checkpoint of one
/// batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedExportOptions {
    pub format: String,
    pub int8: bool,
    pub half: bool,
    pub nms: bool,
    pub imgsz: u32,
    pub data: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBatchConfig {
    pub name: String,
    pub description: Option<String>,
    pub ids: Vec<String>,
    pub template: CheckpointTemplate,
    pub checkpoint_dir: Option<PathBuf>,
    pub export: ResolvedExportOptions,
}

fn xdg_dir(var: &str, home: &Path, fallback_suffix: &str) -> PathBuf {
    env::var(var)
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(fallback_suffix))
}

pub fn resolve_path_value(value: &str, base_dir: &Path) -> Result<PathBuf> {
    let expanded = expand_path(value)?;
    let mut path = PathBuf::from(&expanded);
    if path.is_absolute() {
        path = path.components().collect();
        Ok(path)
    } else {
        Ok(base_dir.join(path))
    }
}

fn expand_path(value: &str) -> Result<String> {
    let home = home_dir();
    let home_utf8 = match home.as_ref() {
        Some(path) => Some(
            path.to_str()
                .ok_or_else(|| anyhow!("home directory contains invalid UTF-8"))?
                .to_string(),
        ),
        None => None,
    };

    let expanded = shellexpand::full_with_context(
        value,
        || home_utf8.as_deref(),
        |var| Ok(env::var(var).ok()),
    )
    .map_err(|error: shellexpand::LookupError<std::env::VarError>| {
        anyhow!("failed to expand '{value}': {error}")
    })?;
    Ok(expanded.into_owned())
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
}
