use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;

use crate::config::ResolvedExportOptions;
use crate::config::ToolkitSettings;

/// Target encodings the external exporter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    CoreMl,
    Onnx,
    TfLite,
    Engine,
    TorchScript,
}

impl ExportFormat {
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "coreml" | "mlpackage" => Ok(Self::CoreMl),
            "onnx" => Ok(Self::Onnx),
            "tflite" => Ok(Self::TfLite),
            "engine" | "tensorrt" => Ok(Self::Engine),
            "torchscript" => Ok(Self::TorchScript),
            other => Err(anyhow!("unsupported export format '{other}'")),
        }
    }

    /// Tag passed on the exporter command line.
    pub fn tag(self) -> &'static str {
        match self {
            Self::CoreMl => "coreml",
            Self::Onnx => "onnx",
            Self::TfLite => "tflite",
            Self::Engine => "engine",
            Self::TorchScript => "torchscript",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Uniform option set handed to every export call of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub int8: bool,
    pub half: bool,
    pub nms: bool,
    pub imgsz: u32,
    pub data: Option<PathBuf>,
}

impl ExportRequest {
    pub fn from_options(options: &ResolvedExportOptions) -> Result<Self> {
        Ok(Self {
            format: ExportFormat::from_tag(&options.format)?,
            int8: options.int8,
            half: options.half,
            nms: options.nms,
            imgsz: options.imgsz,
            data: options.data.clone(),
        })
    }
}

/// Outcome of one export call. The artifact layout and location are owned by
/// the external toolkit; the driver only records that the call returned.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub checkpoint: PathBuf,
}

/// The two-operation surface the driver consumes from the external model
/// toolkit: load a checkpoint, export the loaded model.
pub trait ModelToolkit {
    type Model;

    fn load_model(&self, checkpoint: &Path) -> Result<Self::Model>;

    fn export_model(&self, model: &Self::Model, request: &ExportRequest) -> Result<ExportOutcome>;
}

/// Handle produced by [`CommandToolkit::load_model`]. The external program
/// reconstructs the weights itself when the export invocation runs, so the
/// handle only pins the checkpoint path for the duration of one iteration.
#[derive(Debug, Clone)]
pub struct CheckpointModel {
    checkpoint: PathBuf,
}

impl CheckpointModel {
    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }
}

/// Production toolkit that shells out to an external exporter program, e.g.
///
/// ```text
/// yolo export model=yolo11n-seg.pt format=coreml imgsz=640 int8=True
/// ```
#[derive(Debug, Clone)]
pub struct CommandToolkit {
    program: String,
    extra_args: Vec<String>,
}

impl CommandToolkit {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_settings(settings: &ToolkitSettings) -> Self {
        Self {
            program: settings.resolved_program().to_string(),
            extra_args: settings.args.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Render the argument list for one export invocation. Pure, so the
    /// command shape is testable without spawning anything.
    pub fn export_args(checkpoint: &Path, request: &ExportRequest) -> Vec<String> {
        let mut args = vec![
            "export".to_string(),
            format!("model={}", checkpoint.display()),
            format!("format={}", request.format.tag()),
        ];

        if let Some(data) = request.data.as_ref() {
            args.push(format!("data={}", data.display()));
        }

        args.push(format!("imgsz={}", request.imgsz));
        args.push(format!("int8={}", py_bool(request.int8)));

        if request.half {
            args.push(format!("half={}", py_bool(true)));
        }
        if request.nms {
            args.push(format!("nms={}", py_bool(true)));
        }

        args
    }
}

impl ModelToolkit for CommandToolkit {
    type Model = CheckpointModel;

    fn load_model(&self, checkpoint: &Path) -> Result<CheckpointModel> {
        if !checkpoint.is_file() {
            bail!("checkpoint '{}' does not exist", checkpoint.display());
        }

        Ok(CheckpointModel {
            checkpoint: checkpoint.to_path_buf(),
        })
    }

    fn export_model(&self, model: &CheckpointModel, request: &ExportRequest) -> Result<ExportOutcome> {
        let mut args = Self::export_args(model.checkpoint(), request);
        args.extend(self.extra_args.iter().cloned());

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to launch exporter '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "exporter '{}' failed for '{}' ({}): {}",
                self.program,
                model.checkpoint().display(),
                output.status,
                stderr.trim()
            );
        }

        Ok(ExportOutcome {
            checkpoint: model.checkpoint().to_path_buf(),
        })
    }
}

/// The exporter follows the toolkit's Python-style boolean spelling.
fn py_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}
