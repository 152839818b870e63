use super::error::EngineError;
use super::state::Stage;
use super::tools::{self, ToolError, ToolRun};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "xtb_settings.inp";
pub const OUTPUT_LOG: &str = "xtb_output.txt";
pub const RESULT_FILE: &str = "xtbopt.pdb";

/// Geometry optimization algorithm selected in the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerEngine {
    RationalFunction,
    Lbfgs,
}

impl OptimizerEngine {
    pub fn keyword(self) -> &'static str {
        match self {
            OptimizerEngine::RationalFunction => "rf",
            OptimizerEngine::Lbfgs => "lbfgs",
        }
    }

    /// The engine to try when this one leaves no result.
    pub fn fallback(self) -> Option<Self> {
        match self {
            OptimizerEngine::RationalFunction => Some(OptimizerEngine::Lbfgs),
            OptimizerEngine::Lbfgs => None,
        }
    }
}

/// Contents of the optimizer settings file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSpec {
    /// 1-based fragment atom indices held in place.
    pub atoms: Vec<usize>,
    pub force_constant: f64,
    pub engine: OptimizerEngine,
}

impl ConstraintSpec {
    pub fn with_engine(&self, engine: OptimizerEngine) -> Self {
        Self {
            engine,
            ..self.clone()
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<(), EngineError> {
        fs::write(path, self.to_string()).map_err(|e| EngineError::io(path, e))
    }
}

impl fmt::Display for ConstraintSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let atoms = self
            .atoms
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "$constrain")?;
        writeln!(f, "    atoms: {}", atoms)?;
        writeln!(f, "    force constant={:?}", self.force_constant)?;
        writeln!(f, "$end")?;
        writeln!(f, "$opt")?;
        writeln!(f, "    engine={}", self.engine.keyword())?;
        writeln!(f, "$end")
    }
}

/// A constrained geometry optimizer run as an external program.
pub trait ExternalOptimizer: Send + Sync {
    fn name(&self) -> &str;

    fn preflight(&self) -> Result<(), ToolError> {
        Ok(())
    }

    /// Optimizes `fragment` under `settings` inside `work_dir`.
    ///
    /// A run that leaves no result file is not an error; it is reported
    /// through [`ToolRun::artifact`] being `None`.
    fn optimize(&self, work_dir: &Path, fragment: &Path, settings: &Path) -> Result<ToolRun, ToolError>;
}

/// GFN-FF optimization in implicit water through `xtb`.
#[derive(Debug, Clone)]
pub struct XtbOptimizer {
    binary: PathBuf,
    name: String,
}

impl XtbOptimizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let binary = tools::resolve_binary(binary.into());
        let name = tools::tool_name(&binary);
        Self { binary, name }
    }

    fn remove_scratch(&self, work_dir: &Path) {
        let Ok(entries) = fs::read_dir(work_dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with("gfnff_") {
                if let Err(e) = fs::remove_file(entry.path()) {
                    debug!(path = %entry.path().display(), error = %e, "Could not remove scratch file");
                }
            }
        }
    }
}

impl Default for XtbOptimizer {
    fn default() -> Self {
        Self::new("xtb")
    }
}

impl ExternalOptimizer for XtbOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn preflight(&self) -> Result<(), ToolError> {
        tools::preflight(&self.binary, "--version")
    }

    fn optimize(&self, work_dir: &Path, fragment: &Path, settings: &Path) -> Result<ToolRun, ToolError> {
        let (stdout, stderr) = tools::log_handles(&self.name, &work_dir.join(OUTPUT_LOG))?;
        let status = tools::run(
            &self.name,
            Command::new(&self.binary)
                .current_dir(work_dir)
                .arg(tools::relative_to(work_dir, fragment))
                .arg("--gfnff")
                .arg("--input")
                .arg(tools::relative_to(work_dir, settings))
                .args(["--opt", "tight", "--alpb", "water", "--verbose"])
                .env("OMP_NUM_THREADS", "1,1")
                .env("OMP_MAX_ACTIVE_LEVELS", "1")
                .env("MKL_NUM_THREADS", "1")
                .stdin(Stdio::null())
                .stdout(stdout)
                .stderr(stderr),
        );
        self.remove_scratch(work_dir);
        let status = status?;

        Ok(ToolRun {
            success: status.success(),
            artifact: tools::artifact(work_dir.join(RESULT_FILE)),
        })
    }
}

/// Result of running the optimizer with fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationAttempt {
    /// [`Stage::Converged`], [`Stage::RetryConverged`] or [`Stage::Failed`].
    pub outcome: Stage,
    pub artifact: Option<PathBuf>,
    pub attempts: usize,
}

/// Runs `optimizer` with the engine in `spec`, then once more with each
/// fallback engine until a result file appears.
///
/// The settings file is rewritten before every attempt so it always records
/// the engine last used.
pub fn optimize_with_fallback(
    optimizer: &dyn ExternalOptimizer,
    work_dir: &Path,
    fragment: &Path,
    spec: &ConstraintSpec,
) -> Result<OptimizationAttempt, EngineError> {
    let settings = work_dir.join(SETTINGS_FILE);
    let mut engine = Some(spec.engine);
    let mut attempts = 0;

    while let Some(current) = engine {
        spec.with_engine(current).write_to(&settings)?;
        attempts += 1;
        let run = optimizer.optimize(work_dir, fragment, &settings)?;
        if run.converged() {
            if !run.success {
                warn!(
                    optimizer = optimizer.name(),
                    engine = current.keyword(),
                    "Optimizer exited with an error status but left a result; using it"
                );
            }
            let outcome = if attempts == 1 {
                Stage::Converged
            } else {
                Stage::RetryConverged
            };
            return Ok(OptimizationAttempt {
                outcome,
                artifact: run.artifact,
                attempts,
            });
        }
        engine = current.fallback();
        if let Some(next) = engine {
            debug!(
                optimizer = optimizer.name(),
                engine = current.keyword(),
                retry = next.keyword(),
                exit_ok = run.success,
                "No optimized structure produced, retrying"
            );
        }
    }

    warn!(
        optimizer = optimizer.name(),
        work_dir = %work_dir.display(),
        "Optimization did not converge with any engine"
    );
    Ok(OptimizationAttempt {
        outcome: Stage::Failed,
        artifact: None,
        attempts,
    })
}
