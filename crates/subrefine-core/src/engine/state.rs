use super::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Lifecycle of one substructure task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pending,
    Extracted,
    Protonated,
    Optimizing,
    /// The first optimizer attempt produced a result.
    Converged,
    /// Only the fallback attempt produced a result.
    RetryConverged,
    Failed,
    Reconciled,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Pending, Extracted)
                | (Extracted, Protonated)
                | (Protonated, Optimizing)
                | (Optimizing, Converged | RetryConverged)
                | (Pending | Extracted | Protonated | Optimizing, Failed)
                | (Converged | RetryConverged | Failed, Reconciled)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Reconciled
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Extracted => "extracted",
            Stage::Protonated => "protonated",
            Stage::Optimizing => "optimizing",
            Stage::Converged => "converged",
            Stage::RetryConverged => "retry-converged",
            Stage::Failed => "failed",
            Stage::Reconciled => "reconciled",
        };
        f.write_str(name)
    }
}

/// Stage bookkeeping for the task refining one target residue.
#[derive(Debug, Clone)]
pub struct StageTracker {
    residue_number: isize,
    stage: Stage,
}

impl StageTracker {
    pub fn new(residue_number: isize) -> Self {
        Self {
            residue_number,
            stage: Stage::Pending,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), EngineError> {
        if !self.stage.can_advance_to(next) {
            return Err(EngineError::Internal(format!(
                "residue {}: illegal stage transition {} -> {}",
                self.residue_number, self.stage, next
            )));
        }
        trace!(residue = self.residue_number, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
        Ok(())
    }

    /// Moves to [`Stage::Failed`] unless the task already finished optimizing.
    pub fn fail(&mut self) {
        if self.stage.can_advance_to(Stage::Failed) {
            self.stage = Stage::Failed;
        }
    }
}

/// Outcome class of a refined residue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Optimized,
    HighlyOptimized,
    NotOptimized,
}

impl Category {
    /// Classifies a target residue by how far the optimizer moved it.
    ///
    /// `None` means no usable result was produced.
    pub fn classify(residual: Option<f64>, threshold: f64) -> Self {
        match residual {
            None => Category::NotOptimized,
            Some(r) if r > threshold => Category::HighlyOptimized,
            Some(_) => Category::Optimized,
        }
    }
}

/// One line of the per-residue report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "residue index")]
    pub residue_index: isize,
    #[serde(rename = "residue name")]
    pub residue_name: char,
    pub category: Category,
    pub residual: Option<f64>,
}
