use super::context::NeighborSet;
use super::error::EngineError;
use tracing::{debug, instrument};

/// Ordered partition of residue indices into refinement rounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundPlan {
    rounds: Vec<Vec<usize>>,
}

impl RoundPlan {
    pub fn rounds(&self) -> &[Vec<usize>] {
        &self.rounds
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.rounds.iter().map(Vec::as_slice)
    }
}

/// Peels residues off in rounds, densest first.
///
/// A residue joins the current round when none of its neighbors that are still
/// unscheduled is strictly denser than it. Eligibility is decided against the
/// set of residues scheduled before the round started, so two mutually
/// neighboring residues with equal density land in the same round.
///
/// # Errors
///
/// Returns [`EngineError::Internal`] if a pass schedules nothing, which would
/// otherwise loop forever.
#[instrument(skip_all, name = "round_scheduling")]
pub fn schedule(neighbors: &NeighborSet, densities: &[f64]) -> Result<RoundPlan, EngineError> {
    let total = densities.len();
    let mut scheduled = vec![false; total];
    let mut remaining: Vec<usize> = (0..total).collect();
    let mut rounds = Vec::new();

    while !remaining.is_empty() {
        let round: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&residue| {
                let own = densities[residue];
                neighbors.of(residue).iter().all(|&other| {
                    other == residue
                        || scheduled.get(other).copied().unwrap_or(true)
                        || densities.get(other).is_none_or(|&d| d <= own)
                })
            })
            .collect();

        if round.is_empty() {
            return Err(EngineError::Internal(format!(
                "round scheduling stalled with {} residues left",
                remaining.len()
            )));
        }

        for &residue in &round {
            scheduled[residue] = true;
        }
        remaining.retain(|&residue| !scheduled[residue]);
        debug!(round = rounds.len() + 1, size = round.len(), "Scheduled round");
        rounds.push(round);
    }

    Ok(RoundPlan { rounds })
}
