use crate::error::ConfigError;
use tojex_core::TrialDescriptor;

/// What the session shows next.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleStep {
    Trial(TrialDescriptor),
    /// Rest screen after block `block` (1-based) of `block_count`.
    Pause { block: usize, block_count: usize },
    /// Closing screen after the last block.
    Final { block_count: usize },
}

/// Groups an ordered trial list into blocks and interleaves pause screens.
#[derive(Debug, Clone, Default)]
pub struct BlockScheduler {
    blocks: Vec<Vec<TrialDescriptor>>,
}

impl BlockScheduler {
    /// Uses the block indices already stamped on the trials. A new block
    /// starts wherever the index changes.
    pub fn from_stamped(trials: Vec<TrialDescriptor>) -> Self {
        let mut blocks: Vec<Vec<TrialDescriptor>> = Vec::new();
        let mut current: Option<usize> = None;
        for trial in trials {
            if current != Some(trial.block_index) {
                current = Some(trial.block_index);
                blocks.push(Vec::new());
            }
            if let Some(block) = blocks.last_mut() {
                block.push(trial);
            }
        }
        Self { blocks }
    }

    /// Splits into consecutive blocks of at most `limit` trials and
    /// restamps block fields; the last block may be shorter.
    pub fn with_limit(trials: Vec<TrialDescriptor>, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::Zero("block_size"));
        }
        let mut blocks: Vec<Vec<TrialDescriptor>> = Vec::with_capacity(trials.len().div_ceil(limit));
        for (i, mut trial) in trials.into_iter().enumerate() {
            trial.block_index = i / limit;
            trial.trial_index_in_block = i % limit;
            if trial.trial_index_in_block == 0 {
                blocks.push(Vec::with_capacity(limit));
            }
            if let Some(block) = blocks.last_mut() {
                block.push(trial);
            }
        }
        Ok(Self { blocks })
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_sizes(&self) -> Vec<usize> {
        self.blocks.iter().map(Vec::len).collect()
    }

    pub fn trial_count(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn blocks(&self) -> &[Vec<TrialDescriptor>] {
        &self.blocks
    }

    /// Trials in order, with a pause after every block but the last and a
    /// final screen after the last. Empty when there are no trials.
    pub fn steps(&self) -> Vec<ScheduleStep> {
        let block_count = self.block_count();
        let mut steps = Vec::with_capacity(self.trial_count() + block_count);
        for (i, block) in self.blocks.iter().enumerate() {
            steps.extend(block.iter().cloned().map(ScheduleStep::Trial));
            if i + 1 < block_count {
                steps.push(ScheduleStep::Pause {
                    block: i + 1,
                    block_count,
                });
            } else {
                steps.push(ScheduleStep::Final { block_count });
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trials(n: usize) -> Vec<TrialDescriptor> {
        (0..n)
            .map(|i| TrialDescriptor {
                is_instruction_negated: i % 2 == 0,
                probe_left: true,
                soa: 50.0,
                sequence_length: None,
                rank: None,
                block_index: 0,
                trial_index: i,
                trial_index_in_block: i,
            })
            .collect()
    }

    fn summarize(steps: &[ScheduleStep]) -> Vec<String> {
        steps
            .iter()
            .map(|s| match s {
                ScheduleStep::Trial(t) => format!("t{}", t.trial_index),
                ScheduleStep::Pause { block, .. } => format!("pause{block}"),
                ScheduleStep::Final { .. } => "final".to_string(),
            })
            .collect()
    }

    #[test]
    fn pauses_between_blocks_and_final_at_end() {
        let scheduler = BlockScheduler::with_limit(trials(5), 2).unwrap();
        assert_eq!(scheduler.block_sizes(), vec![2, 2, 1]);
        assert_eq!(
            summarize(&scheduler.steps()),
            vec!["t0", "t1", "pause1", "t2", "t3", "pause2", "t4", "final"]
        );
    }

    #[test]
    fn limit_restamps_block_fields() {
        let scheduler = BlockScheduler::with_limit(trials(5), 2).unwrap();
        let last = &scheduler.blocks()[2][0];
        assert_eq!(last.block_index, 2);
        assert_eq!(last.trial_index_in_block, 0);
        assert_eq!(last.trial_index, 4);
    }

    #[test]
    fn stamped_blocks_may_differ_in_size() {
        let mut list = trials(5);
        for (t, block) in list.iter_mut().zip([0, 0, 0, 1, 1]) {
            t.block_index = block;
        }
        let scheduler = BlockScheduler::from_stamped(list);
        assert_eq!(scheduler.block_sizes(), vec![3, 2]);
        assert_eq!(scheduler.steps().len(), 7);
    }

    #[test]
    fn zero_limit_rejected() {
        assert!(BlockScheduler::with_limit(trials(3), 0).is_err());
    }

    #[test]
    fn empty_list_has_no_steps() {
        let scheduler = BlockScheduler::from_stamped(Vec::new());
        assert_eq!(scheduler.block_count(), 0);
        assert!(scheduler.steps().is_empty());
    }
}
