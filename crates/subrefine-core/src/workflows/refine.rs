use crate::core::io::pdb::PdbFile;
use crate::core::io::traits::StructureFile;
use crate::core::models::residue::Residue;
use crate::core::models::structure::Structure;
use crate::engine::alignment::{self, Reconciliation, ResidueUpdate};
use crate::engine::config::RefinementConfig;
use crate::engine::context::RefinementContext;
use crate::engine::error::EngineError;
use crate::engine::optimizer::{self, ExternalOptimizer};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::protonation::Protonator;
use crate::engine::scheduler::{self, RoundPlan};
use crate::engine::state::{Category, LogEntry, Stage, StageTracker};
use crate::engine::substructure::SubstructureBuilder;
use crate::engine::tools::ToolError;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace, warn};

pub const INPUT_DIR: &str = "inputed_PDB";
pub const OPTIMISED_DIR: &str = "optimised_PDB";
pub const LOG_FILE: &str = "residues.logs";

/// Where a run puts its files, relative to the data directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join(INPUT_DIR)
    }

    pub fn optimised_dir(&self) -> PathBuf {
        self.root.join(OPTIMISED_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Scratch directory of the substructure built around `residue`.
    pub fn scratch_dir(&self, residue: &Residue) -> PathBuf {
        self.root.join(format!("sub_{}", residue.label()))
    }

    /// `<basename>_optimised.pdb` inside the optimized-structure directory.
    pub fn optimised_structure_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "structure".to_string());
        self.optimised_dir().join(format!("{}_optimised.pdb", stem))
    }

    fn create(&self, input: &Path) -> Result<(), EngineError> {
        for dir in [self.root.clone(), self.input_dir(), self.optimised_dir()] {
            fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        }
        if let Some(name) = input.file_name() {
            let copy = self.input_dir().join(name);
            fs::copy(input, &copy).map_err(|e| EngineError::io(&copy, e))?;
        }
        Ok(())
    }
}

/// The external programs a run drives.
#[derive(Clone, Copy)]
pub struct Toolchain<'a> {
    pub protonator: &'a dyn Protonator,
    pub optimizer: &'a dyn ExternalOptimizer,
}

impl Toolchain<'_> {
    pub fn preflight(&self) -> Result<(), ToolError> {
        self.protonator.preflight()?;
        self.optimizer.preflight()
    }
}

#[derive(Debug, Clone)]
pub struct RefinementReport {
    pub structure: Structure,
    /// One entry per residue, sorted by residue number.
    pub log: Vec<LogEntry>,
    pub plan: RoundPlan,
}

/// Outcome of one task, applied by the coordinator at the end of its round.
#[derive(Debug, Clone)]
struct TaskReport {
    target: usize,
    entry: LogEntry,
    updates: Vec<ResidueUpdate>,
}

/// Refines the structure in `input` and writes every output under
/// `config.data_dir`.
///
/// # Errors
///
/// Fails before creating anything if the input is missing or unreadable, the
/// data directory already exists, or an external tool cannot be started.
/// After that, only failures to write the outputs are errors; problems with
/// individual substructures are reported in the log instead.
#[instrument(skip_all, name = "refinement_workflow")]
pub fn run(
    input: &Path,
    config: &RefinementConfig,
    tools: Toolchain,
    reporter: &ProgressReporter,
) -> Result<RefinementReport, EngineError> {
    // === Phase 0: Setup checks and output scaffolding ===
    reporter.report(Progress::PhaseStart {
        name: "Preparation",
    });
    if !input.is_file() {
        return Err(EngineError::InputMissing {
            path: input.to_path_buf(),
        });
    }
    let layout = OutputLayout::new(&config.data_dir);
    if layout.root().exists() {
        return Err(EngineError::OutputExists {
            path: layout.root().to_path_buf(),
        });
    }
    let structure = PdbFile::read_from_path(input).map_err(|source| EngineError::Structure {
        path: input.to_path_buf(),
        source,
    })?;
    tools.preflight()?;
    info!(
        residues = structure.len(),
        atoms = structure.atom_count(),
        chain = %structure.chain_id(),
        "Loaded input structure."
    );
    layout.create(input)?;
    reporter.report(Progress::PhaseFinish);

    let report = refine(structure, config, tools, reporter)?;

    // === Final phase: Write results ===
    reporter.report(Progress::PhaseStart {
        name: "Writing Results",
    });
    let output = layout.optimised_structure_path(input);
    PdbFile::write_to_path(&report.structure, &output).map_err(|source| EngineError::Structure {
        path: output.clone(),
        source,
    })?;
    write_log(&layout.log_path(), &report.log)?;
    reporter.report(Progress::Message(format!(
        "Optimized structure written to {}",
        output.display()
    )));
    reporter.report(Progress::PhaseFinish);

    info!(output = %output.display(), "Refinement complete.");
    Ok(report)
}

/// Runs every round against `structure`, using `config.data_dir` for
/// scratch directories.
#[instrument(skip_all, name = "refinement_rounds")]
pub fn refine(
    structure: Structure,
    config: &RefinementConfig,
    tools: Toolchain,
    reporter: &ProgressReporter,
) -> Result<RefinementReport, EngineError> {
    // === Phase 1: Frozen neighborhood context ===
    reporter.report(Progress::PhaseStart {
        name: "Analyzing Neighborhoods",
    });
    let context = RefinementContext::build(&structure, &config.neighborhood);
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Round scheduling ===
    reporter.report(Progress::PhaseStart {
        name: "Scheduling",
    });
    let plan = scheduler::schedule(&context.neighbors, &context.densities)?;
    info!(
        residues = structure.len(),
        rounds = plan.len(),
        "Residues scheduled into rounds."
    );
    reporter.report(Progress::StatusUpdate {
        text: format!("{} residues in {} rounds", structure.len(), plan.len()),
    });
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: Round-synchronous refinement ===
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(|i| format!("subrefine-worker-{}", i))
        .build()
        .map_err(|e| EngineError::Initialization(format!("failed to start worker pool: {}", e)))?;
    let layout = OutputLayout::new(&config.data_dir);

    reporter.report(Progress::PhaseStart {
        name: "Refinement",
    });
    let mut structure = structure;
    let mut finalized = vec![false; structure.len()];
    let mut log = Vec::with_capacity(structure.len());

    for (round_idx, round) in plan.iter().enumerate() {
        reporter.report(Progress::RoundStart {
            round: round_idx + 1,
            total_rounds: plan.len(),
            tasks: round.len() as u64,
        });

        let snapshot = &structure;
        let reports: Vec<TaskReport> = pool.install(|| {
            round
                .par_iter()
                .map(|&target| {
                    let report = refine_target(target, snapshot, &context, config, tools, &layout);
                    reporter.report(Progress::TaskIncrement);
                    report
                })
                .collect()
        });

        let entries = commit_round(&mut structure, &mut finalized, round, reports, &context.densities)?;
        let optimized = entries
            .iter()
            .filter(|(_, e)| e.category != Category::NotOptimized)
            .count();
        debug!(
            round = round_idx + 1,
            tasks = round.len(),
            optimized,
            "Round committed."
        );
        log.extend(entries);
        reporter.report(Progress::RoundFinish);
    }
    reporter.report(Progress::PhaseFinish);

    // Insertion codes share a number; ties keep chain order.
    log.sort_by_key(|(target, entry)| (entry.residue_index, *target));
    Ok(RefinementReport {
        structure,
        log: log.into_iter().map(|(_, entry)| entry).collect(),
        plan,
    })
}

fn refine_target(
    target: usize,
    structure: &Structure,
    context: &RefinementContext,
    config: &RefinementConfig,
    tools: Toolchain,
    layout: &OutputLayout,
) -> TaskReport {
    let residue = &structure.residues()[target];
    let work_dir = layout.scratch_dir(residue);
    let mut tracker = StageTracker::new(residue.number);

    let (updates, residual) =
        match optimize_target(target, structure, context, config, tools, &work_dir, &mut tracker) {
            Ok(Some(Reconciliation { updates, residual })) => (updates, Some(residual)),
            Ok(None) => (Vec::new(), None),
            Err(e) => {
                warn!(
                    residue = residue.number,
                    error = %e,
                    "Substructure refinement failed; residue left unchanged."
                );
                tracker.fail();
                (Vec::new(), None)
            }
        };
    if let Err(e) = tracker.advance(Stage::Reconciled) {
        warn!(residue = residue.number, error = %e, "Unexpected task state.");
    }

    if config.delete_auxiliary_files {
        if let Err(e) = remove_scratch_dir(&work_dir) {
            warn!(path = %work_dir.display(), error = %e, "Could not remove scratch directory.");
        }
    }

    let category = Category::classify(residual, config.optimization.highly_optimized_threshold);
    debug!(residue = residue.number, ?category, ?residual, "Residue processed.");
    TaskReport {
        target,
        entry: LogEntry {
            residue_index: residue.number,
            residue_name: residue.residue_type.to_one_letter(),
            category,
            residual,
        },
        updates,
    }
}

fn optimize_target(
    target: usize,
    structure: &Structure,
    context: &RefinementContext,
    config: &RefinementConfig,
    tools: Toolchain,
    work_dir: &Path,
    tracker: &mut StageTracker,
) -> Result<Option<Reconciliation>, EngineError> {
    let builder = SubstructureBuilder::new(structure, context, &config.neighborhood);
    let Some(mut substructure) = builder.extract(target, work_dir)? else {
        debug!(target, "Empty substructure; nothing to optimize.");
        tracker.advance(Stage::Failed)?;
        return Ok(None);
    };
    tracker.advance(Stage::Extracted)?;

    builder.protonate(&mut substructure, tools.protonator)?;
    tracker.advance(Stage::Protonated)?;

    let spec = substructure.constraint_spec(&config.optimization);
    tracker.advance(Stage::Optimizing)?;
    let attempt = optimizer::optimize_with_fallback(
        tools.optimizer,
        &substructure.work_dir,
        &substructure.fragment_path(),
        &spec,
    )?;
    tracker.advance(attempt.outcome)?;

    let Some(artifact) = attempt.artifact else {
        return Ok(None);
    };
    let optimized = PdbFile::read_records_from_path(&artifact)?;
    alignment::reconcile(&substructure, &optimized).map(Some)
}

/// Applies a round's updates to the shared structure.
///
/// Residues finalized as targets in earlier rounds are never rewritten. Within
/// the round every residue is written at most once: a round target only by its
/// own task, any other residue by the highest-priority task (density, then
/// index) that carries an update for it.
fn commit_round(
    structure: &mut Structure,
    finalized: &mut [bool],
    round: &[usize],
    mut reports: Vec<TaskReport>,
    densities: &[f64],
) -> Result<Vec<(usize, LogEntry)>, EngineError> {
    let density = |i: usize| densities.get(i).copied().unwrap_or(0.0);
    reports.sort_by(|a, b| {
        density(b.target)
            .total_cmp(&density(a.target))
            .then(a.target.cmp(&b.target))
    });

    let targets: HashSet<usize> = round.iter().copied().collect();
    let mut claimed = HashSet::new();
    for report in &reports {
        for update in &report.updates {
            let residue = update.residue;
            let frozen = finalized.get(residue).copied().unwrap_or(true);
            let owned_elsewhere = targets.contains(&residue) && residue != report.target;
            if frozen || owned_elsewhere || !claimed.insert(residue) {
                trace!(residue, owner = report.target, "Skipping update.");
                continue;
            }
            structure.set_residue_positions(residue, &update.positions)?;
        }
    }

    for &target in round {
        if let Some(flag) = finalized.get_mut(target) {
            *flag = true;
        }
    }
    Ok(reports.into_iter().map(|r| (r.target, r.entry)).collect())
}

fn remove_scratch_dir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn write_log(path: &Path, entries: &[LogEntry]) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(path, json).map_err(|e| EngineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::pdb::AtomRecord;
    use crate::core::models::atom::Atom;
    use crate::core::models::residue::{Residue, ResidueType};
    use crate::engine::config::RefinementConfigBuilder;
    use crate::engine::optimizer::RESULT_FILE;
    use crate::engine::protonation::OpenBabelProtonator;
    use crate::engine::tools::ToolRun;
    use nalgebra::{Point3, Vector3};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CopyProtonator;

    impl Protonator for CopyProtonator {
        fn name(&self) -> &str {
            "copy"
        }

        fn protonate(&self, _work_dir: &Path, input: &Path, output: &Path) -> Result<(), ToolError> {
            fs::copy(input, output).map_err(|source| ToolError::Io {
                tool: "copy".to_string(),
                source,
            })?;
            Ok(())
        }
    }

    enum Behavior {
        NeverConverges,
        ConvergesOnRetry,
        /// Moves the unconstrained atoms of one residue (by number).
        ShiftFree { residue_number: isize, by: Vector3<f64> },
    }

    struct FakeOptimizer {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeOptimizer {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn constrained_from_settings(text: &str) -> BTreeSet<usize> {
        text.lines()
            .find_map(|l| l.trim().strip_prefix("atoms:"))
            .map(|list| {
                list.split(',')
                    .filter_map(|i| i.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    impl ExternalOptimizer for FakeOptimizer {
        fn name(&self) -> &str {
            "fake"
        }

        fn optimize(&self, work_dir: &Path, fragment: &Path, settings: &Path) -> Result<ToolRun, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let settings = fs::read_to_string(settings).unwrap();
            let mut records: Vec<AtomRecord> = PdbFile::read_records_from_path(fragment).unwrap();

            match &self.behavior {
                Behavior::NeverConverges => {
                    return Ok(ToolRun {
                        success: false,
                        artifact: None,
                    });
                }
                Behavior::ConvergesOnRetry if !settings.contains("engine=lbfgs") => {
                    return Ok(ToolRun {
                        success: false,
                        artifact: None,
                    });
                }
                Behavior::ConvergesOnRetry => {}
                Behavior::ShiftFree { residue_number, by } => {
                    let constrained = constrained_from_settings(&settings);
                    for (i, record) in records.iter_mut().enumerate() {
                        if record.residue_number == *residue_number && !constrained.contains(&(i + 1)) {
                            record.position += *by;
                        }
                    }
                }
            }

            let path = work_dir.join(RESULT_FILE);
            PdbFile::write_records_to_path(&records, &path).unwrap();
            Ok(ToolRun {
                success: true,
                artifact: Some(path),
            })
        }
    }

    fn alanine(number: isize, origin: Vector3<f64>) -> Residue {
        let mut residue = Residue::new(number, "ALA", ResidueType::Alanine);
        let atoms = [
            ("N", Vector3::new(-1.2, 0.5, 0.0), "N"),
            ("CA", Vector3::new(0.0, 0.0, 0.0), "C"),
            ("C", Vector3::new(1.2, 0.6, 0.0), "C"),
            ("O", Vector3::new(1.3, 1.8, 0.0), "O"),
            ("CB", Vector3::new(0.0, -1.5, 0.3), "C"),
        ];
        for (i, (name, offset, element)) in atoms.into_iter().enumerate() {
            let serial = (number as usize - 1) * 5 + i + 1;
            residue.add_atom(Atom::new(serial, name, Point3::from(origin + offset)).with_element(element));
        }
        residue
    }

    /// Two alanines stacked 5.5 Å apart: every cross-residue atom pair is
    /// farther than 4 Å but the closest pair is within 6 Å.
    fn stacked_pair() -> Structure {
        let mut structure = Structure::new('A');
        structure.push_residue(alanine(1, Vector3::zeros())).unwrap();
        structure
            .push_residue(alanine(2, Vector3::new(0.0, 0.0, 5.5)))
            .unwrap();
        structure
    }

    /// Three alanines in an L: the corner residue (2) touches both arms, the
    /// arms (1 and 3) are more than 6 Å apart, and no three alpha carbons are
    /// collinear.
    fn bent_triple() -> Structure {
        let mut structure = stacked_pair();
        structure
            .push_residue(alanine(3, Vector3::new(5.5, 0.0, 5.5)))
            .unwrap();
        structure
    }

    fn config_in(dir: &Path) -> RefinementConfig {
        RefinementConfigBuilder::new()
            .data_dir(dir.join("out"))
            .workers(2)
            .build()
            .unwrap()
    }

    fn write_input(dir: &Path, structure: &Structure) -> PathBuf {
        let path = dir.join("protein.pdb");
        PdbFile::write_to_path(structure, &path).unwrap();
        path
    }

    #[test]
    fn never_converging_optimizer_leaves_structure_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let structure = stacked_pair();
        let input = write_input(dir.path(), &structure);
        let config = config_in(dir.path());
        let optimizer = FakeOptimizer::new(Behavior::NeverConverges);
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };

        let report = run(&input, &config, tools, &ProgressReporter::new()).unwrap();
        assert_eq!(report.structure, PdbFile::read_from_path(&input).unwrap());
        assert_eq!(optimizer.calls(), 4);
        for entry in &report.log {
            assert_eq!(entry.category, Category::NotOptimized);
            assert_eq!(entry.residual, None);
        }

        let out = dir.path().join("out");
        assert!(out.join(INPUT_DIR).join("protein.pdb").is_file());
        assert!(out.join(OPTIMISED_DIR).join("protein_optimised.pdb").is_file());
        let log: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(LOG_FILE)).unwrap()).unwrap();
        assert_eq!(log[0]["category"], "not-optimized");
        assert_eq!(log[0]["residual"], serde_json::Value::Null);
        assert_eq!(log[0]["residue index"], 1);
        assert_eq!(log[1]["residue name"], "A");
        assert!(out.join("sub_1").join("substructure.pdb").is_file());
        assert!(out.join("sub_2").join("xtb_settings.inp").is_file());
    }

    #[test]
    fn large_target_motion_is_highly_optimized() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let optimizer = FakeOptimizer::new(Behavior::ShiftFree {
            residue_number: 2,
            by: Vector3::new(1.0, 1.0, 1.0),
        });
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };

        let before = stacked_pair();
        let report = refine(before.clone(), &config, tools, &ProgressReporter::new()).unwrap();

        // Four of five target atoms move by sqrt(3) Å.
        let expected = (4.0 * 3.0 / 5.0f64).sqrt();
        assert_eq!(report.log[0].category, Category::Optimized);
        assert!(report.log[0].residual.unwrap() < 1e-3);
        assert_eq!(report.log[1].category, Category::HighlyOptimized);
        assert!((report.log[1].residual.unwrap() - expected).abs() < 1e-3);

        let moved = &report.structure.residues()[1].atoms()[0];
        let original = &before.residues()[1].atoms()[0];
        assert!((moved.position - original.position - Vector3::new(1.0, 1.0, 1.0)).norm() < 1e-2);
        let ca = &report.structure.residues()[1].atoms()[1];
        assert!((ca.position - before.residues()[1].atoms()[1].position).norm() < 1e-2);
        for (after, original) in report.structure.residues()[0]
            .atoms()
            .iter()
            .zip(before.residues()[0].atoms())
        {
            assert!((after.position - original.position).norm() < 1e-2);
        }
    }

    #[test]
    fn small_target_motion_is_optimized() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let by = Vector3::new(0.15, 0.15, 0.15);
        let optimizer = FakeOptimizer::new(Behavior::ShiftFree { residue_number: 2, by });
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };

        let report = refine(stacked_pair(), &config, tools, &ProgressReporter::new()).unwrap();
        let expected = (4.0 * by.norm_squared() / 5.0).sqrt();
        assert_eq!(report.log[1].category, Category::Optimized);
        assert!((report.log[1].residual.unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn later_rounds_extract_committed_coordinates_and_keep_finalized_targets() {
        let dir = tempfile::tempdir().unwrap();
        // Neighbor atoms must be free for the fake optimizer to move them.
        let config = RefinementConfigBuilder::new()
            .data_dir(dir.path().join("out"))
            .workers(2)
            .constraint_cutoff(10.0)
            .build()
            .unwrap();
        let by = Vector3::new(0.5, 0.25, 0.0);
        let optimizer = FakeOptimizer::new(Behavior::ShiftFree { residue_number: 2, by });
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };

        let before = bent_triple();
        let report = refine(before.clone(), &config, tools, &ProgressReporter::new()).unwrap();

        // The corner is densest and goes alone; both arms follow later.
        assert!(report.plan.len() >= 2);
        assert_eq!(report.plan.rounds()[0], vec![1]);
        assert_eq!(report.log[1].category, Category::Optimized);

        let shifted = |atom: &Atom, original: &Atom| {
            let expected = if atom.name == "CA" {
                original.position
            } else {
                original.position + by
            };
            (atom.position - expected).norm() < 1e-3
        };

        // Round 1 committed before the arm around residue 1 was extracted.
        let fragment = PdbFile::read_records_from_path(dir.path().join("out/sub_1/substructure.pdb")).unwrap();
        let corner: Vec<&AtomRecord> = fragment.iter().filter(|r| r.residue_number == 2).collect();
        assert_eq!(corner.len(), 5);
        for (record, original) in corner.iter().zip(before.residues()[1].atoms()) {
            let as_atom = Atom::new(record.serial, &record.name, record.position);
            assert!(shifted(&as_atom, original), "{} not at committed position", record.name);
        }

        // Later rounds moved the corner's free atoms again, but it was already final.
        assert!(optimizer.calls() >= 3);
        for (after, original) in report.structure.residues()[1]
            .atoms()
            .iter()
            .zip(before.residues()[1].atoms())
        {
            assert!(shifted(after, original), "{} was rewritten", after.name);
        }
    }

    #[test]
    fn retry_with_fallback_engine_still_counts_as_optimized() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let optimizer = FakeOptimizer::new(Behavior::ConvergesOnRetry);
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };

        let report = refine(stacked_pair(), &config, tools, &ProgressReporter::new()).unwrap();
        assert_eq!(optimizer.calls(), 4);
        assert!(report.log.iter().all(|e| e.category == Category::Optimized));
        let settings = fs::read_to_string(dir.path().join("out/sub_1/xtb_settings.inp")).unwrap();
        assert!(settings.contains("engine=lbfgs"));
    }

    #[test]
    fn isolated_residues_terminate_as_not_optimized() {
        let dir = tempfile::tempdir().unwrap();
        let config = RefinementConfigBuilder::new()
            .data_dir(dir.path().join("out"))
            .neighbor_margin(-100.0)
            .build()
            .unwrap();
        let optimizer = FakeOptimizer::new(Behavior::ConvergesOnRetry);
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };

        let report = refine(stacked_pair(), &config, tools, &ProgressReporter::new()).unwrap();
        assert_eq!(report.plan.len(), 1);
        assert_eq!(report.log.len(), 2);
        assert!(report.log.iter().all(|e| e.category == Category::NotOptimized));
        assert_eq!(optimizer.calls(), 0);
    }

    #[test]
    fn auxiliary_files_are_removed_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = RefinementConfigBuilder::new()
            .data_dir(dir.path().join("out"))
            .delete_auxiliary_files(true)
            .build()
            .unwrap();
        let optimizer = FakeOptimizer::new(Behavior::NeverConverges);
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };
        let input = write_input(dir.path(), &stacked_pair());

        run(&input, &config, tools, &ProgressReporter::new()).unwrap();
        let out = dir.path().join("out");
        assert!(!out.join("sub_1").exists());
        assert!(!out.join("sub_2").exists());
        assert!(out.join(LOG_FILE).is_file());
    }

    #[test]
    fn tool_errors_are_isolated_to_their_residue() {
        struct FailingProtonator;
        impl Protonator for FailingProtonator {
            fn name(&self) -> &str {
                "failing"
            }
            fn protonate(&self, _: &Path, _: &Path, _: &Path) -> Result<(), ToolError> {
                Err(ToolError::MalformedOutput {
                    tool: "failing".to_string(),
                    reason: "no output".to_string(),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let optimizer = FakeOptimizer::new(Behavior::ConvergesOnRetry);
        let tools = Toolchain {
            protonator: &FailingProtonator,
            optimizer: &optimizer,
        };
        let report = refine(stacked_pair(), &config, tools, &ProgressReporter::new()).unwrap();
        assert!(report.log.iter().all(|e| e.category == Category::NotOptimized));
        assert_eq!(optimizer.calls(), 0);
    }

    #[test]
    fn setup_errors_create_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let optimizer = FakeOptimizer::new(Behavior::NeverConverges);
        let tools = Toolchain {
            protonator: &CopyProtonator,
            optimizer: &optimizer,
        };
        let reporter = ProgressReporter::new();

        let missing = dir.path().join("missing.pdb");
        assert!(matches!(
            run(&missing, &config, tools, &reporter),
            Err(EngineError::InputMissing { .. })
        ));

        let empty = dir.path().join("empty.pdb");
        fs::write(&empty, "HEADER    NOTHING\nEND\n").unwrap();
        assert!(matches!(
            run(&empty, &config, tools, &reporter),
            Err(EngineError::Structure { .. })
        ));

        let input = write_input(dir.path(), &stacked_pair());
        let broken_tools = Toolchain {
            protonator: &OpenBabelProtonator::new("/nonexistent/obabel"),
            optimizer: &optimizer,
        };
        assert!(matches!(
            run(&input, &config, broken_tools, &reporter),
            Err(EngineError::Tool(ToolError::Launch { .. }))
        ));
        assert!(!config.data_dir.exists());

        fs::create_dir(&config.data_dir).unwrap();
        assert!(matches!(
            run(&input, &config, tools, &reporter),
            Err(EngineError::OutputExists { .. })
        ));
        assert_eq!(fs::read_dir(&config.data_dir).unwrap().count(), 0);
        assert_eq!(optimizer.calls(), 0);
    }

    #[test]
    fn commit_respects_finalized_and_round_ownership() {
        let mut structure = Structure::new('A');
        for number in 1..=4 {
            structure
                .push_residue(alanine(number, Vector3::new(number as f64 * 10.0, 0.0, 0.0)))
                .unwrap();
        }
        let original = structure.clone();
        let shifted = |residue: usize, dx: f64| ResidueUpdate {
            residue,
            positions: original.residues()[residue]
                .positions()
                .iter()
                .map(|p| p + Vector3::new(dx, 0.0, 0.0))
                .collect(),
        };
        let report = |target: usize, updates: Vec<ResidueUpdate>| TaskReport {
            target,
            entry: LogEntry {
                residue_index: target as isize + 1,
                residue_name: 'A',
                category: Category::Optimized,
                residual: Some(0.1),
            },
            updates,
        };

        // Residue 0 was a target in an earlier round; 1 and 2 are this round's targets.
        let mut finalized = vec![true, false, false, false];
        let densities = [9.0, 2.0, 5.0, 1.0];
        let reports = vec![
            report(1, vec![shifted(0, 1.0), shifted(1, 1.0), shifted(2, 1.0), shifted(3, 1.0)]),
            report(2, vec![shifted(1, 2.0), shifted(2, 2.0), shifted(3, 2.0)]),
        ];

        let entries = commit_round(&mut structure, &mut finalized, &[1, 2], reports, &densities).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(finalized, vec![true, true, true, false]);

        let x = |s: &Structure, r: usize| s.residues()[r].atoms()[1].position.x;
        assert_eq!(x(&structure, 0), x(&original, 0));
        assert_eq!(x(&structure, 1), x(&original, 1) + 1.0);
        assert_eq!(x(&structure, 2), x(&original, 2) + 2.0);
        // Residue 3 goes to the denser task, residue index 2.
        assert_eq!(x(&structure, 3), x(&original, 3) + 2.0);
    }

    #[test]
    fn layout_names_outputs_after_input() {
        let layout = OutputLayout::new("data");
        assert_eq!(
            layout.optimised_structure_path(Path::new("/in/1abc.pdb")),
            PathBuf::from("data/optimised_PDB/1abc_optimised.pdb")
        );
        let mut residue = Residue::new(-3, "GLY", ResidueType::Glycine);
        assert_eq!(layout.scratch_dir(&residue), PathBuf::from("data/sub_-3"));
        residue.insertion_code = Some('B');
        assert_eq!(layout.scratch_dir(&residue), PathBuf::from("data/sub_-3B"));
        assert_eq!(layout.log_path(), PathBuf::from("data/residues.logs"));
    }
}
