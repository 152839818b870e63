use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::config::ConfigError;
use super::tools::ToolError;
use crate::core::io::pdb::PdbError;
use crate::core::models::structure::StructureError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Input structure file '{}' does not exist", path.display())]
    InputMissing { path: PathBuf },

    #[error("Output directory '{}' already exists; remove it or choose another location", path.display())]
    OutputExists { path: PathBuf },

    #[error("Structure file error at '{}': {source}", path.display())]
    Structure {
        path: PathBuf,
        #[source]
        source: PdbError,
    },

    #[error("Fragment file error: {0}")]
    Fragment(#[from] PdbError),

    #[error("File system error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize residue log: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("External tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordinate update rejected: {0}")]
    Update(#[from] StructureError),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
