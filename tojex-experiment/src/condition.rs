use crate::config::{LayoutConfig, PairLayout, TimingConfig};
use crate::error::ConfigError;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use tojex_core::{
    Condition, Distractor, GridPosition, HueAngle, Placement, Quadrant, Side, Target, TargetPair,
};
use tracing::trace;

pub const ORIENTATION_STEP: u32 = 10;
pub const ORIENTATION_COUNT: u32 = 18;

const ROTATION_SLOT: &str = "rotation";

/// Builds per-trial stimulus conditions. Orientation and grid position are
/// drawn without immediate repetition per slot; the history lives here and
/// is owned by whoever owns the generator.
#[derive(Debug, Clone)]
pub struct ConditionGenerator {
    layout: LayoutConfig,
    fixation_range_ms: (u64, u64),
    distractor_soas: Vec<f64>,
    previous_orientations: HashMap<String, u32>,
    previous_positions: HashMap<String, GridPosition>,
}

impl ConditionGenerator {
    pub fn new(
        layout: LayoutConfig,
        timing: &TimingConfig,
        distractor_soas: Vec<f64>,
    ) -> Result<Self, ConfigError> {
        layout.validate()?;
        timing.validate()?;
        if layout.pairs == PairLayout::Dual && distractor_soas.is_empty() {
            return Err(ConfigError::EmptyFactor("soa"));
        }
        Ok(Self {
            layout,
            fixation_range_ms: timing.fixation_range_ms,
            distractor_soas,
            previous_orientations: HashMap::new(),
            previous_positions: HashMap::new(),
        })
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn previous_orientation(&self, slot: &str) -> Option<u32> {
        self.previous_orientations.get(slot).copied()
    }

    pub fn previous_position(&self, slot: &str) -> Option<GridPosition> {
        self.previous_positions.get(slot).copied()
    }

    /// Multiple of 10 in `0..=170`, never the previous value of `slot`.
    /// Without a slot nothing is remembered.
    pub fn generate_orientation<R: Rng + ?Sized>(&mut self, slot: Option<&str>, rng: &mut R) -> u32 {
        let previous = slot.and_then(|s| self.previous_orientation(s));
        let orientation = loop {
            let candidate = rng.random_range(0..ORIENTATION_COUNT) * ORIENTATION_STEP;
            if Some(candidate) != previous {
                break candidate;
            }
        };
        if let Some(slot) = slot {
            self.previous_orientations.insert(slot.to_owned(), orientation);
        }
        orientation
    }

    /// Uniform cell within the inclusive ranges. A repeat of the slot's
    /// previous cell is redrawn unless the ranges hold a single cell.
    pub fn generate_position<R: Rng + ?Sized>(
        &mut self,
        slot: &str,
        x_range: (u32, u32),
        y_range: (u32, u32),
        rng: &mut R,
    ) -> GridPosition {
        let single_cell = x_range.0 == x_range.1 && y_range.0 == y_range.1;
        let previous = self.previous_position(slot);
        let position = loop {
            let candidate = GridPosition {
                x: rng.random_range(x_range.0..=x_range.1),
                y: rng.random_range(y_range.0..=y_range.1),
            };
            if single_cell || Some(candidate) != previous {
                break candidate;
            }
        };
        self.previous_positions.insert(slot.to_owned(), position);
        position
    }

    pub fn random_primary_color<R: Rng + ?Sized>(&self, rng: &mut R) -> HueAngle {
        HueAngle::random_primary(rng)
    }

    fn fixation_ms<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let (min, max) = self.fixation_range_ms;
        rng.random_range(min..=max)
    }

    fn place<R: Rng + ?Sized>(
        &mut self,
        placement: Placement,
        color: HueAngle,
        is_probe: bool,
        rng: &mut R,
    ) -> Target {
        let x_range = self.layout.x_range(placement.side());
        let y_range = self.layout.y_range;
        let grid_position = self.generate_position(placement.slot(), x_range, y_range, rng);
        Target {
            color,
            placement,
            is_probe,
            grid_position,
        }
    }

    pub fn generate_condition<R: Rng + ?Sized>(&mut self, probe_left: bool, rng: &mut R) -> Condition {
        let condition = match self.layout.pairs {
            PairLayout::Single => self.single_pair(probe_left, rng),
            PairLayout::Dual => self.dual_pair(probe_left, rng),
        };
        trace!(?condition, "generated condition");
        condition
    }

    fn single_pair<R: Rng + ?Sized>(&mut self, probe_left: bool, rng: &mut R) -> Condition {
        let probe_side = Side::from_is_left(probe_left);
        let probe_color = self.random_primary_color(rng);
        let alpha = self.layout.alpha;
        let reference_color = if alpha == 0.0 {
            probe_color.complement()
        } else {
            probe_color.random_relative(&[180.0 - alpha, 180.0 + alpha], rng)
        };

        let probe = self.place(Placement::Half(probe_side), probe_color, true, rng);
        let reference = self.place(
            Placement::Half(probe_side.opposite()),
            reference_color,
            false,
            rng,
        );
        let fixation_ms = self.fixation_ms(rng);
        let rotation = self.generate_orientation(Some(ROTATION_SLOT), rng);
        Condition {
            primary: TargetPair {
                probe,
                reference,
                hue: probe_color,
                fixation_ms,
            },
            distractor: None,
            rotation,
        }
    }

    fn dual_pair<R: Rng + ?Sized>(&mut self, probe_left: bool, rng: &mut R) -> Condition {
        let probe_side = Side::from_is_left(probe_left);
        let anchor = self.random_primary_color(rng);
        let [primary_quadrants, distractor_quadrants] = Quadrant::random_mixed_side_pairs(rng);

        let primary = self.quadrant_pair(primary_quadrants, anchor, probe_side, rng);
        let pair = self.quadrant_pair(distractor_quadrants, anchor.complement(), probe_side, rng);
        let soa = self.distractor_soas.choose(rng).copied().unwrap_or(0.0);
        let rotation = self.generate_orientation(Some(ROTATION_SLOT), rng);
        Condition {
            primary,
            distractor: Some(Distractor { pair, soa }),
            rotation,
        }
    }

    /// The anchor colour goes to the first quadrant, the `alpha`-shifted
    /// colour to the second. Whichever lands on the probe side is the probe.
    fn quadrant_pair<R: Rng + ?Sized>(
        &mut self,
        (anchor_quadrant, other_quadrant): (Quadrant, Quadrant),
        hue: HueAngle,
        probe_side: Side,
        rng: &mut R,
    ) -> TargetPair {
        let alpha = self.layout.alpha;
        let other_color = hue.random_relative(&[alpha, -alpha], rng);
        let anchor_is_probe = anchor_quadrant.side() == probe_side;
        let anchor_target = self.place(Placement::Quadrant(anchor_quadrant), hue, anchor_is_probe, rng);
        let other_target = self.place(
            Placement::Quadrant(other_quadrant),
            other_color,
            !anchor_is_probe,
            rng,
        );
        let (probe, reference) = if anchor_is_probe {
            (anchor_target, other_target)
        } else {
            (other_target, anchor_target)
        };
        TargetPair {
            probe,
            reference,
            hue,
            fixation_ms: self.fixation_ms(rng),
        }
    }
}
