use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_NEIGHBOR_MARGIN: f64 = 10.0;
pub const DEFAULT_MEMBER_CUTOFF: f64 = 6.0;
pub const DEFAULT_CONSTRAINT_CUTOFF: f64 = 4.0;
pub const DEFAULT_CAP_DISTANCE: f64 = 1.1;
pub const DEFAULT_FORCE_CONSTANT: f64 = 1.0;
pub const DEFAULT_HIGHLY_OPTIMIZED_THRESHOLD: f64 = 1.0;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Distances (Angstroms) that shape each substructure.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborhoodConfig {
    /// Added to a residue's characteristic radius to get its neighbor search radius.
    pub neighbor_margin: f64,
    /// Neighbors closer than this (closest atom pair) to the target become members.
    pub member_cutoff: f64,
    /// Member atoms farther than this from the target are held fixed.
    pub constraint_cutoff: f64,
    /// Added hydrogens must lie within this distance of a severed C or N to be kept.
    pub cap_distance: f64,
}

impl Default for NeighborhoodConfig {
    fn default() -> Self {
        Self {
            neighbor_margin: DEFAULT_NEIGHBOR_MARGIN,
            member_cutoff: DEFAULT_MEMBER_CUTOFF,
            constraint_cutoff: DEFAULT_CONSTRAINT_CUTOFF,
            cap_distance: DEFAULT_CAP_DISTANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationConfig {
    pub force_constant: f64,
    /// Target residues whose residual deviation exceeds this are reported as highly optimized.
    pub highly_optimized_threshold: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            force_constant: DEFAULT_FORCE_CONSTANT,
            highly_optimized_threshold: DEFAULT_HIGHLY_OPTIMIZED_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementConfig {
    /// Root of the output layout; must not exist before a run.
    pub data_dir: PathBuf,
    /// Size of the worker pool.
    pub workers: usize,
    /// Remove each `sub_<n>` scratch directory as soon as its task is done.
    pub delete_auxiliary_files: bool,
    pub neighborhood: NeighborhoodConfig,
    pub optimization: OptimizationConfig,
}

#[derive(Default)]
pub struct RefinementConfigBuilder {
    data_dir: Option<PathBuf>,
    workers: Option<usize>,
    delete_auxiliary_files: bool,
    neighbor_margin: Option<f64>,
    member_cutoff: Option<f64>,
    constraint_cutoff: Option<f64>,
    cap_distance: Option<f64>,
    force_constant: Option<f64>,
    highly_optimized_threshold: Option<f64>,
}

impl RefinementConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir(mut self, path: PathBuf) -> Self {
        self.data_dir = Some(path);
        self
    }
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }
    pub fn delete_auxiliary_files(mut self, delete: bool) -> Self {
        self.delete_auxiliary_files = delete;
        self
    }
    pub fn neighbor_margin(mut self, margin: f64) -> Self {
        self.neighbor_margin = Some(margin);
        self
    }
    pub fn member_cutoff(mut self, cutoff: f64) -> Self {
        self.member_cutoff = Some(cutoff);
        self
    }
    pub fn constraint_cutoff(mut self, cutoff: f64) -> Self {
        self.constraint_cutoff = Some(cutoff);
        self
    }
    pub fn cap_distance(mut self, distance: f64) -> Self {
        self.cap_distance = Some(distance);
        self
    }
    pub fn force_constant(mut self, k: f64) -> Self {
        self.force_constant = Some(k);
        self
    }
    pub fn highly_optimized_threshold(mut self, threshold: f64) -> Self {
        self.highly_optimized_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Result<RefinementConfig, ConfigError> {
        let data_dir = self
            .data_dir
            .ok_or(ConfigError::MissingParameter("data_dir"))?;
        let workers = self.workers.unwrap_or(1);
        if workers == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "workers",
                reason: "at least one worker is required".to_string(),
            });
        }

        let neighborhood = NeighborhoodConfig {
            neighbor_margin: finite(
                "neighbor_margin",
                self.neighbor_margin.unwrap_or(DEFAULT_NEIGHBOR_MARGIN),
            )?,
            member_cutoff: non_negative(
                "member_cutoff",
                self.member_cutoff.unwrap_or(DEFAULT_MEMBER_CUTOFF),
            )?,
            constraint_cutoff: non_negative(
                "constraint_cutoff",
                self.constraint_cutoff.unwrap_or(DEFAULT_CONSTRAINT_CUTOFF),
            )?,
            cap_distance: positive(
                "cap_distance",
                self.cap_distance.unwrap_or(DEFAULT_CAP_DISTANCE),
            )?,
        };
        let optimization = OptimizationConfig {
            force_constant: positive(
                "force_constant",
                self.force_constant.unwrap_or(DEFAULT_FORCE_CONSTANT),
            )?,
            highly_optimized_threshold: non_negative(
                "highly_optimized_threshold",
                self.highly_optimized_threshold
                    .unwrap_or(DEFAULT_HIGHLY_OPTIMIZED_THRESHOLD),
            )?,
        };

        Ok(RefinementConfig {
            data_dir,
            workers,
            delete_auxiliary_files: self.delete_auxiliary_files,
            neighborhood,
            optimization,
        })
    }
}

fn finite(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: format!("{} is not a finite number", value),
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    let value = finite(name, value)?;
    if value < 0.0 {
        return Err(ConfigError::InvalidParameter {
            name,
            reason: format!("{} must not be negative", value),
        });
    }
    Ok(value)
}

fn positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    let value = finite(name, value)?;
    if value <= 0.0 {
        return Err(ConfigError::InvalidParameter {
            name,
            reason: format!("{} must be greater than zero", value),
        });
    }
    Ok(value)
}
