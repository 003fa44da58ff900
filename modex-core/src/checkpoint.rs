use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use anyhow::bail;

/// Placeholder substituted with a model identifier when rendering a
/// checkpoint filename.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Checkpoint filename template, e.g. `yolo11{id}-seg.pt`.
///
/// Rendering is a pure function of the template and the identifier: the same
/// inputs always produce the same filename and nothing else happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTemplate {
    raw: String,
}

impl CheckpointTemplate {
    /// Validate that the template contains the `{id}` placeholder.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if !raw.contains(ID_PLACEHOLDER) {
            bail!("checkpoint template '{raw}' is missing the {{id}} placeholder");
        }
        Ok(Self { raw })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Substitute the identifier into the template.
    pub fn render(&self, id: &str) -> String {
        self.raw.replace(ID_PLACEHOLDER, id)
    }

    /// Render the filename and join it onto the checkpoint directory. Without
    /// a directory the name is relative to the working directory, which is
    /// where the external toolkit looks for checkpoints by default.
    pub fn render_path(&self, id: &str, checkpoint_dir: Option<&Path>) -> PathBuf {
        let name = self.render(id);
        match checkpoint_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl fmt::Display for CheckpointTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
