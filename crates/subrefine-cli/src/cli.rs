use clap::Parser;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "subrefine - Localized refinement of protein structures by density-ordered substructure optimization with xtb.",
    help_template = HELP_TEMPLATE,
)]
pub struct Cli {
    // --- Core Arguments ---
    /// Path to the input protein structure in PDB format.
    #[arg(long = "pdb-file", required = true, value_name = "PATH")]
    pub pdb_file: PathBuf,

    /// Directory for all outputs. Must not exist yet.
    #[arg(long = "data-dir", required = true, value_name = "PATH")]
    pub data_dir: PathBuf,

    /// Number of substructures optimized in parallel.
    #[arg(long, default_value_t = 1, value_name = "NUM")]
    pub cpu: usize,

    /// Remove each substructure's scratch directory once it has been processed.
    #[arg(long)]
    pub delete_auxiliary_files: bool,

    /// Optional configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Tool Overrides ---
    /// Path or name of the xtb executable.
    #[arg(long, value_name = "PATH")]
    pub xtb: Option<PathBuf>,

    /// Path or name of the Open Babel executable.
    #[arg(long, value_name = "PATH")]
    pub obabel: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S neighborhood.constraint-cutoff=3.5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,

    // --- Logging ---
    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}
