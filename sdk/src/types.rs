//! Invocation input/output types

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raster format for image export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Tiff,
}

/// A request routed to a loaded plugin
///
/// Each variant is one capability entry point. The host only delivers an
/// invocation to a plugin that declared the matching capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Invocation {
    /// Transform a single document
    ProcessDocument {
        document: PathBuf,
        #[serde(default)]
        options: serde_json::Value,
    },
    /// Render pages of a document to images in `output_dir`
    ExportImage {
        document: PathBuf,
        pages: Vec<u32>,
        format: ImageFormat,
        output_dir: PathBuf,
    },
    /// Run over several documents in one request
    RunBatch {
        documents: Vec<PathBuf>,
        #[serde(default)]
        options: serde_json::Value,
    },
    /// A contributed menu action was triggered
    MenuAction { action_id: String },
}

impl Invocation {
    /// Capability the plugin must declare to receive this invocation
    pub fn required_capability(&self) -> Capability {
        match self {
            Self::ProcessDocument { .. } => Capability::DocumentProcessing,
            Self::ExportImage { .. } => Capability::ImageExport,
            Self::RunBatch { .. } => Capability::BatchProcessing,
            Self::MenuAction { .. } => Capability::UiContribution,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessDocument { .. } => "process_document",
            Self::ExportImage { .. } => "export_image",
            Self::RunBatch { .. } => "run_batch",
            Self::MenuAction { .. } => "menu_action",
        }
    }
}

/// Output from a plugin invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOutput {
    pub data: serde_json::Value,
    /// Files the plugin wrote
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

impl PluginOutput {
    /// Create an output with text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: serde_json::json!({ "text": text.into() }),
            artifacts: Vec::new(),
        }
    }

    /// Create an output with JSON data
    pub fn json(data: serde_json::Value) -> Self {
        Self {
            data,
            artifacts: Vec::new(),
        }
    }

    /// Create an empty output
    pub fn empty() -> Self {
        Self {
            data: serde_json::Value::Null,
            artifacts: Vec::new(),
        }
    }

    /// Record a file the plugin produced
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}
