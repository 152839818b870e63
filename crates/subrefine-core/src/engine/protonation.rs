use super::tools::{self, ToolError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const PROTONATED_FILE: &str = "reprotonated_substructure.pdb";

/// Adds missing hydrogens to a fragment file.
///
/// Implementations must keep the input atoms first and in order, and append
/// any new atoms after them.
pub trait Protonator: Send + Sync {
    fn name(&self) -> &str;

    fn preflight(&self) -> Result<(), ToolError> {
        Ok(())
    }

    fn protonate(&self, work_dir: &Path, input: &Path, output: &Path) -> Result<(), ToolError>;
}

/// Protonation through Open Babel (`obabel -h`).
#[derive(Debug, Clone)]
pub struct OpenBabelProtonator {
    binary: PathBuf,
    name: String,
}

impl OpenBabelProtonator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let binary = tools::resolve_binary(binary.into());
        let name = tools::tool_name(&binary);
        Self { binary, name }
    }
}

impl Default for OpenBabelProtonator {
    fn default() -> Self {
        Self::new("obabel")
    }
}

impl Protonator for OpenBabelProtonator {
    fn name(&self) -> &str {
        &self.name
    }

    fn preflight(&self) -> Result<(), ToolError> {
        tools::preflight(&self.binary, "-V")
    }

    fn protonate(&self, work_dir: &Path, input: &Path, output: &Path) -> Result<(), ToolError> {
        let out = File::create(output).map_err(|source| ToolError::Io {
            tool: self.name.clone(),
            source,
        })?;
        let status = tools::run(
            &self.name,
            Command::new(&self.binary)
                .current_dir(work_dir)
                .args(["-h", "-iPDB", "-oPDB"])
                .arg(tools::relative_to(work_dir, input))
                .stdin(Stdio::null())
                .stdout(Stdio::from(out))
                .stderr(Stdio::null()),
        )?;
        if !status.success() {
            return Err(ToolError::Failed {
                tool: self.name.clone(),
                status,
            });
        }
        Ok(())
    }
}
