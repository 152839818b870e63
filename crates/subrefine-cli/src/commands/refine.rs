use crate::cli::Cli;
use crate::config::{AppConfig, PartialRefinementConfig};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use subrefine::engine::optimizer::XtbOptimizer;
use subrefine::engine::progress::ProgressReporter;
use subrefine::engine::protonation::OpenBabelProtonator;
use subrefine::engine::state::{Category, LogEntry};
use subrefine::workflows::refine::{self, OutputLayout, Toolchain};
use tracing::info;

pub fn run(args: &Cli) -> Result<()> {
    let partial = match &args.config {
        Some(path) => PartialRefinementConfig::from_file(path)?,
        None => PartialRefinementConfig::default(),
    };
    let config = partial.merge_with_cli(args)?;
    info!(
        input = %config.input.display(),
        data_dir = %config.refinement.data_dir.display(),
        workers = config.refinement.workers,
        "Configuration resolved."
    );

    execute(&config)
}

fn execute(config: &AppConfig) -> Result<()> {
    let protonator = OpenBabelProtonator::new(&config.obabel);
    let optimizer = XtbOptimizer::new(&config.xtb);
    let tools = Toolchain {
        protonator: &protonator,
        optimizer: &optimizer,
    };

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    let report = refine::run(&config.input, &config.refinement, tools, &reporter)?;

    let layout = OutputLayout::new(&config.refinement.data_dir);
    println!("{}", summarize(&report.log, report.plan.len()));
    println!(
        "Optimized structure: {}",
        layout.optimised_structure_path(&config.input).display()
    );
    println!("Residue log:         {}", layout.log_path().display());
    Ok(())
}

fn summarize(log: &[LogEntry], rounds: usize) -> String {
    let count = |category: Category| log.iter().filter(|e| e.category == category).count();
    format!(
        "Refined {} residues in {} rounds: {} highly optimized, {} optimized, {} not optimized.",
        log.len(),
        rounds,
        count(Category::HighlyOptimized),
        count(Category::Optimized),
        count(Category::NotOptimized),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(residue_index: isize, category: Category) -> LogEntry {
        LogEntry {
            residue_index,
            residue_name: 'A',
            category,
            residual: None,
        }
    }

    #[test]
    fn summary_counts_each_category() {
        let log = vec![
            entry(1, Category::HighlyOptimized),
            entry(2, Category::Optimized),
            entry(3, Category::Optimized),
            entry(4, Category::NotOptimized),
        ];
        assert_eq!(
            summarize(&log, 2),
            "Refined 4 residues in 2 rounds: 1 highly optimized, 2 optimized, 1 not optimized."
        );
    }
}
