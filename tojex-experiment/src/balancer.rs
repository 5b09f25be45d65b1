use crate::config::DesignConfig;
use crate::error::{BalanceError, ConfigError};
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::Serialize;
use std::collections::BTreeMap;
use tojex_core::TrialDescriptor;
use tracing::{debug, warn};

/// Ordered, block-stamped trial list plus how packing went.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialPlan {
    pub trials: Vec<TrialDescriptor>,
    pub block_count: usize,
    /// Trials placed beyond the block size limit because a run was kept whole.
    pub overflow_trials: usize,
    /// The last block holds fewer trials than the limit.
    pub short_final_block: bool,
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    soa: f64,
    probe_left: Option<bool>,
}

#[derive(Debug)]
struct Run {
    negated: bool,
    cells: Vec<Cell>,
}

/// Turns a factor design into an ordered trial list, either a shuffled
/// factorial product or alternating polarity runs of balanced lengths.
#[derive(Debug, Clone)]
pub struct SequenceBalancer {
    design: DesignConfig,
    soas: Vec<f64>,
}

impl SequenceBalancer {
    pub fn new(design: DesignConfig) -> Result<Self, ConfigError> {
        design.validate()?;
        let soas = design.soa_levels();
        Ok(Self { design, soas })
    }

    pub fn design(&self) -> &DesignConfig {
        &self.design
    }

    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<TrialPlan, BalanceError> {
        let plan = if self.design.is_run_balanced() {
            self.build_runs(rng)?
        } else {
            self.build_factorial(rng)
        };
        debug!(
            trials = plan.trials.len(),
            blocks = plan.block_count,
            "built trial plan"
        );
        if plan.short_final_block {
            warn!(
                trials = plan.trials.len(),
                block_size = self.design.block_size,
                "trial count is not a multiple of the block size; final block is short"
            );
        }
        if plan.overflow_trials > 0 {
            warn!(
                overflow = plan.overflow_trials,
                "runs pushed blocks past their size limit"
            );
        }
        Ok(plan)
    }

    /// SOA by probe side combinations; probe side is left open when it is
    /// drawn per trial.
    fn cells(&self) -> Vec<Cell> {
        let sides: Vec<Option<bool>> = if self.design.probe_left_is_factor {
            self.design.probe_left.iter().copied().map(Some).collect()
        } else {
            vec![None]
        };
        self.soas
            .iter()
            .flat_map(|soa| {
                sides.iter().map(move |probe_left| Cell {
                    soa: *soa,
                    probe_left: *probe_left,
                })
            })
            .collect()
    }

    fn resolve_probe_left<R: Rng + ?Sized>(&self, cell: Cell, rng: &mut R) -> bool {
        match cell.probe_left {
            Some(probe_left) => probe_left,
            None => self.design.probe_left.choose(rng).copied().unwrap_or(true),
        }
    }

    fn build_factorial<R: Rng + ?Sized>(&self, rng: &mut R) -> TrialPlan {
        let cells = self.cells();
        let mut order = Vec::with_capacity(self.design.factorial_cardinality());
        for _ in 0..self.design.repetitions {
            for negated in &self.design.polarities {
                order.extend(cells.iter().map(|cell| (*negated, *cell)));
            }
        }
        order.shuffle(rng);

        let block_size = self.design.block_size;
        let mut trials = Vec::with_capacity(order.len());
        for (i, (negated, cell)) in order.into_iter().enumerate() {
            trials.push(TrialDescriptor {
                is_instruction_negated: negated,
                probe_left: self.resolve_probe_left(cell, rng),
                soa: cell.soa,
                sequence_length: None,
                rank: None,
                block_index: i / block_size,
                trial_index: i,
                trial_index_in_block: i % block_size,
            });
        }
        TrialPlan {
            block_count: trials.len().div_ceil(block_size),
            overflow_trials: 0,
            short_final_block: trials.len() % block_size != 0,
            trials,
        }
    }

    /// Runs of one polarity. For every length the runs share out each
    /// (SOA, probe side) combination `repetitions` times at every rank.
    fn runs_for<R: Rng + ?Sized>(&self, negated: bool, rng: &mut R) -> Vec<Run> {
        let cells = self.cells();
        let repetitions = self.design.repetitions;
        let mut runs = Vec::new();
        for &length in &self.design.sequence_lengths {
            let mut group: Vec<Run> = (0..repetitions * cells.len())
                .map(|_| Run {
                    negated,
                    cells: Vec::with_capacity(length),
                })
                .collect();
            for _rank in 0..length {
                let mut column: Vec<Cell> = (0..repetitions)
                    .flat_map(|_| cells.iter().copied())
                    .collect();
                column.shuffle(rng);
                for (run, cell) in group.iter_mut().zip(column) {
                    run.cells.push(cell);
                }
            }
            runs.extend(group);
        }
        runs.shuffle(rng);
        runs
    }

    fn build_runs<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<TrialPlan, BalanceError> {
        let block_size = self.design.block_size;
        let strict = self.design.always_stay_under_block_size;
        if strict {
            if let Some(&length) = self.design.sequence_lengths.iter().find(|l| **l > block_size) {
                return Err(BalanceError::RunExceedsBlock { length, block_size });
            }
        }

        let negated = self.runs_for(true, rng);
        let asserted = self.runs_for(false, rng);
        let (leading, trailing) = if rng.random_bool(0.5) {
            (negated, asserted)
        } else {
            (asserted, negated)
        };

        let mut trials = Vec::with_capacity(self.design.trial_count());
        let mut block = 0;
        let mut in_block = 0;
        let mut overflow = 0;
        for run in leading.into_iter().zip(trailing).flat_map(|(a, b)| [a, b]) {
            let length = run.cells.len();
            if in_block > 0 && (in_block >= block_size || (strict && in_block + length > block_size)) {
                block += 1;
                in_block = 0;
            }
            overflow += (in_block + length).saturating_sub(block_size);
            for (rank, cell) in run.cells.into_iter().enumerate() {
                let probe_left = self.resolve_probe_left(cell, rng);
                trials.push(TrialDescriptor {
                    is_instruction_negated: run.negated,
                    probe_left,
                    soa: cell.soa,
                    sequence_length: Some(length),
                    rank: Some(rank),
                    block_index: block,
                    trial_index: trials.len(),
                    trial_index_in_block: in_block,
                });
                in_block += 1;
            }
        }

        let block_count = if trials.is_empty() { 0 } else { block + 1 };
        Ok(TrialPlan {
            block_count,
            overflow_trials: overflow,
            short_final_block: block_count > 0 && in_block < block_size,
            trials,
        })
    }
}

/// Observed structure of a trial list, for checking a plan after the fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalanceAudit {
    /// Maximal same-polarity segments keyed by (negated, length).
    pub segments: BTreeMap<(bool, usize), usize>,
    /// Trial counts keyed by (rank, SOA in microseconds).
    pub rank_soa: BTreeMap<(usize, i64), usize>,
    pub block_sizes: Vec<usize>,
}

fn soa_key(soa: f64) -> i64 {
    (soa * 1000.0).round() as i64
}

impl BalanceAudit {
    pub fn segment_count(&self, negated: bool, length: usize) -> usize {
        self.segments.get(&(negated, length)).copied().unwrap_or(0)
    }

    pub fn rank_soa_count(&self, rank: usize, soa: f64) -> usize {
        self.rank_soa.get(&(rank, soa_key(soa))).copied().unwrap_or(0)
    }

    /// Every SOA occurs equally often at every rank.
    pub fn is_rank_balanced(&self) -> bool {
        let mut per_rank: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for ((rank, _), count) in &self.rank_soa {
            per_rank.entry(*rank).or_default().push(*count);
        }
        per_rank
            .values()
            .all(|counts| counts.windows(2).all(|w| w[0] == w[1]))
    }
}

pub fn audit(trials: &[TrialDescriptor]) -> BalanceAudit {
    let mut report = BalanceAudit::default();

    let mut segment: Option<(bool, usize)> = None;
    for trial in trials {
        segment = match segment {
            Some((negated, length)) if negated == trial.is_instruction_negated => {
                Some((negated, length + 1))
            }
            Some(done) => {
                *report.segments.entry(done).or_default() += 1;
                Some((trial.is_instruction_negated, 1))
            }
            None => Some((trial.is_instruction_negated, 1)),
        };
        if let Some(rank) = trial.rank {
            *report.rank_soa.entry((rank, soa_key(trial.soa))).or_default() += 1;
        }
        if report.block_sizes.len() <= trial.block_index {
            report.block_sizes.resize(trial.block_index + 1, 0);
        }
        report.block_sizes[trial.block_index] += 1;
    }
    if let Some(done) = segment {
        *report.segments.entry(done).or_default() += 1;
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoaLevels;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn run_design(lengths: &[usize], soas: &[f64], block_size: usize) -> DesignConfig {
        DesignConfig {
            soa: SoaLevels::Millis(soas.to_vec()),
            sequence_lengths: lengths.to_vec(),
            repetitions: 1,
            block_size,
            probe_left_is_factor: false,
            ..DesignConfig::default()
        }
    }

    #[test]
    fn factorial_covers_every_cell_reps_times() {
        let design = DesignConfig::factorial(SoaLevels::Millis(vec![-50.0, 0.0, 50.0]), 2, 5);
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(plan.trials.len(), 24);
        assert_eq!(plan.block_count, 5);
        assert!(plan.short_final_block);

        let mut counts: BTreeMap<(bool, bool, i64), usize> = BTreeMap::new();
        for t in &plan.trials {
            *counts
                .entry((t.is_instruction_negated, t.probe_left, soa_key(t.soa)))
                .or_default() += 1;
        }
        assert_eq!(counts.len(), 12);
        assert!(counts.values().all(|c| *c == 2));

        for (i, t) in plan.trials.iter().enumerate() {
            assert_eq!(t.trial_index, i);
            assert_eq!(t.block_index, i / 5);
            assert_eq!(t.trial_index_in_block, i % 5);
            assert_eq!(t.rank, None);
        }
    }

    #[test]
    fn divisible_factorial_has_no_short_block() {
        let design = DesignConfig::factorial(SoaLevels::Millis(vec![-50.0, 50.0]), 1, 4);
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(plan.block_count, 2);
        assert!(!plan.short_final_block);
    }

    #[test]
    fn two_lengths_give_four_runs() {
        let design = run_design(&[1, 2], &[0.0], 40);
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(7))
            .unwrap();
        assert_eq!(plan.trials.len(), 6);
        let report = audit(&plan.trials);
        for negated in [true, false] {
            assert_eq!(report.segment_count(negated, 1), 1);
            assert_eq!(report.segment_count(negated, 2), 1);
        }
        assert_eq!(report.segments.values().sum::<usize>(), 4);
    }

    #[test]
    fn three_lengths_each_appear_once_per_polarity() {
        let design = run_design(&[1, 2, 5], &[0.0], 40);
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(3))
            .unwrap();
        let report = audit(&plan.trials);
        for negated in [true, false] {
            for length in [1, 2, 5] {
                assert_eq!(report.segment_count(negated, length), 1);
            }
        }
        for t in &plan.trials {
            assert!(t.rank.unwrap() < t.sequence_length.unwrap());
        }
    }

    #[test]
    fn ranks_are_soa_balanced() {
        let design = run_design(&[1, 2, 5], &[-50.0, 0.0, 50.0], 40);
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(19))
            .unwrap();
        let report = audit(&plan.trials);
        assert!(report.is_rank_balanced());
        // rank 0 exists in all three lengths, rank 4 only in length 5
        assert_eq!(report.rank_soa_count(0, -50.0), 6);
        assert_eq!(report.rank_soa_count(4, 50.0), 2);
    }

    #[test]
    fn strict_packing_starts_new_block_instead_of_splitting() {
        let mut design = run_design(&[3], &[-50.0, 50.0], 4);
        design.always_stay_under_block_size = true;
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(5))
            .unwrap();
        assert_eq!(plan.trials.len(), 12);
        assert_eq!(plan.overflow_trials, 0);
        assert_eq!(audit(&plan.trials).block_sizes, vec![3, 3, 3, 3]);
        assert_eq!(plan.block_count, 4);
    }

    #[test]
    fn lenient_packing_counts_overflow() {
        let design = run_design(&[3], &[-50.0, 50.0], 4);
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(5))
            .unwrap();
        assert_eq!(audit(&plan.trials).block_sizes, vec![6, 6]);
        assert_eq!(plan.overflow_trials, 4);
        assert!(!plan.short_final_block);
    }

    #[test]
    fn strict_packing_rejects_oversized_runs() {
        let mut design = run_design(&[5], &[0.0], 4);
        design.always_stay_under_block_size = true;
        let err = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(5))
            .unwrap_err();
        assert_eq!(
            err,
            BalanceError::RunExceedsBlock {
                length: 5,
                block_size: 4
            }
        );
    }

    #[test]
    fn probe_side_factor_is_crossed() {
        let mut design = run_design(&[2], &[0.0], 40);
        design.probe_left_is_factor = true;
        let plan = SequenceBalancer::new(design)
            .unwrap()
            .build(&mut StdRng::seed_from_u64(8))
            .unwrap();
        let left = plan.trials.iter().filter(|t| t.probe_left).count();
        assert_eq!(plan.trials.len(), 8);
        assert_eq!(left, 4);
    }

    proptest! {
        #[test]
        fn run_plans_match_design(
            lengths in prop::collection::btree_set(1usize..6, 1..4),
            repetitions in 1usize..3,
            soa_count in 1usize..4,
            probe_factor in any::<bool>(),
            block_size in 1usize..30,
            strict in any::<bool>(),
            seed in any::<u64>(),
        ) {
            let lengths: Vec<usize> = lengths.into_iter().collect();
            let soas: Vec<f64> = (0..soa_count).map(|i| i as f64 * 50.0 - 50.0).collect();
            let design = DesignConfig {
                soa: SoaLevels::Millis(soas),
                sequence_lengths: lengths.clone(),
                repetitions,
                block_size,
                probe_left_is_factor: probe_factor,
                always_stay_under_block_size: strict,
                ..DesignConfig::default()
            };
            let expected_total = design.trial_count();
            let result = SequenceBalancer::new(design).unwrap().build(&mut StdRng::seed_from_u64(seed));
            let longest = lengths.iter().copied().max().unwrap_or(0);
            if strict && longest > block_size {
                prop_assert!(result.is_err());
                return Ok(());
            }
            let plan = result.unwrap();
            prop_assert_eq!(plan.trials.len(), expected_total);

            let report = audit(&plan.trials);
            let runs_per_length = repetitions * soa_count * if probe_factor { 2 } else { 1 };
            for negated in [true, false] {
                for length in &lengths {
                    prop_assert_eq!(report.segment_count(negated, *length), runs_per_length);
                }
            }
            prop_assert!(report.is_rank_balanced());
            prop_assert_eq!(report.block_sizes.len(), plan.block_count);
            if strict {
                prop_assert!(report.block_sizes.iter().all(|s| *s <= block_size));
                prop_assert_eq!(plan.overflow_trials, 0);
            }
            for w in plan.trials.windows(2) {
                if w[0].block_index != w[1].block_index {
                    // blocks only change on run boundaries
                    prop_assert_eq!(w[1].rank, Some(0));
                }
            }
        }
    }
}
