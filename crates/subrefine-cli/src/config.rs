use crate::cli::Cli;
use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use subrefine::engine::config::{RefinementConfig, RefinementConfigBuilder};
use tracing::debug;

const DEFAULT_XTB: &str = "xtb";
const DEFAULT_OBABEL: &str = "obabel";

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialNeighborhoodConfig {
    #[serde(rename = "neighbor-margin")]
    neighbor_margin: Option<f64>,
    #[serde(rename = "member-cutoff")]
    member_cutoff: Option<f64>,
    #[serde(rename = "constraint-cutoff")]
    constraint_cutoff: Option<f64>,
    #[serde(rename = "cap-distance")]
    cap_distance: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialOptimizationConfig {
    #[serde(rename = "force-constant")]
    force_constant: Option<f64>,
    #[serde(rename = "highly-optimized-threshold")]
    highly_optimized_threshold: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialToolsConfig {
    xtb: Option<PathBuf>,
    obabel: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialRefinementConfig {
    neighborhood: Option<PartialNeighborhoodConfig>,
    optimization: Option<PartialOptimizationConfig>,
    tools: Option<PartialToolsConfig>,
}

/// Everything a run needs once the file and the command line have been merged.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub input: PathBuf,
    pub refinement: RefinementConfig,
    pub xtb: PathBuf,
    pub obabel: PathBuf,
}

impl PartialRefinementConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Command-line values win over the file; anything still unset falls back
    /// to the library defaults.
    pub fn merge_with_cli(mut self, args: &Cli) -> Result<AppConfig> {
        self.apply_set_values(&args.set_values)?;

        let neighborhood = self.neighborhood.take().unwrap_or_default();
        let optimization = self.optimization.take().unwrap_or_default();
        let tools = self.tools.take().unwrap_or_default();

        let mut builder = RefinementConfigBuilder::new()
            .data_dir(args.data_dir.clone())
            .workers(args.cpu)
            .delete_auxiliary_files(args.delete_auxiliary_files);

        if let Some(v) = neighborhood.neighbor_margin {
            builder = builder.neighbor_margin(v);
        }
        if let Some(v) = neighborhood.member_cutoff {
            builder = builder.member_cutoff(v);
        }
        if let Some(v) = neighborhood.constraint_cutoff {
            builder = builder.constraint_cutoff(v);
        }
        if let Some(v) = neighborhood.cap_distance {
            builder = builder.cap_distance(v);
        }
        if let Some(v) = optimization.force_constant {
            builder = builder.force_constant(v);
        }
        if let Some(v) = optimization.highly_optimized_threshold {
            builder = builder.highly_optimized_threshold(v);
        }

        let refinement = builder
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        Ok(AppConfig {
            input: args.pdb_file.clone(),
            refinement,
            xtb: args
                .xtb
                .clone()
                .or(tools.xtb)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_XTB)),
            obabel: args
                .obabel
                .clone()
                .or(tools.obabel)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OBABEL)),
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "neighborhood.neighbor-margin" => {
                    self.neighborhood
                        .get_or_insert_with(Default::default)
                        .neighbor_margin = Some(parse_value(key, value_str)?);
                }
                "neighborhood.member-cutoff" => {
                    self.neighborhood
                        .get_or_insert_with(Default::default)
                        .member_cutoff = Some(parse_value(key, value_str)?);
                }
                "neighborhood.constraint-cutoff" => {
                    self.neighborhood
                        .get_or_insert_with(Default::default)
                        .constraint_cutoff = Some(parse_value(key, value_str)?);
                }
                "neighborhood.cap-distance" => {
                    self.neighborhood
                        .get_or_insert_with(Default::default)
                        .cap_distance = Some(parse_value(key, value_str)?);
                }
                "optimization.force-constant" => {
                    self.optimization
                        .get_or_insert_with(Default::default)
                        .force_constant = Some(parse_value(key, value_str)?);
                }
                "optimization.highly-optimized-threshold" => {
                    self.optimization
                        .get_or_insert_with(Default::default)
                        .highly_optimized_threshold = Some(parse_value(key, value_str)?);
                }
                "tools.xtb" => {
                    self.tools.get_or_insert_with(Default::default).xtb =
                        Some(PathBuf::from(value_str));
                }
                "tools.obabel" => {
                    self.tools.get_or_insert_with(Default::default).obabel =
                        Some(PathBuf::from(value_str));
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CliError::Config(format!("Invalid value for {}: {}", key, value))
    })
}
