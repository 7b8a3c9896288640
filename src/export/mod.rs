//! Handing the project to an external editor.

mod stackblitz;

use serde::Serialize;

use crate::config::types::ExportConfig;
use crate::error::Result;
use crate::project::ProjectDefinition;

pub use stackblitz::StackblitzExporter;

/// Everything an external editor needs to recreate the project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedProject {
    pub files: ProjectDefinition,
    pub title: String,
    pub description: String,
    pub template: String,
}

/// How the external editor should present the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenOptions {
    /// File focused when the project opens
    pub open_file: String,
}

/// Presentation metadata attached to every export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportMetadata {
    pub title: String,
    pub description: String,
    pub template: String,
    pub open_file: String,
}

impl From<&ExportConfig> for ExportMetadata {
    fn from(config: &ExportConfig) -> Self {
        Self {
            title: config.title.clone(),
            description: config.description.clone(),
            template: config.template.clone(),
            open_file: config.open_file.clone(),
        }
    }
}

impl Default for ExportMetadata {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

/// Opens a project outside this process. Fire-and-forget: nothing flows back.
pub trait ProjectExporter: Send + Sync {
    fn open_project(&self, project: &ExportedProject, options: &OpenOptions) -> Result<()>;
}
