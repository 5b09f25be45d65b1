use crate::color::HueAngle;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Screen half relative to the central fixation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn from_is_left(is_left: bool) -> Self {
        if is_left { Side::Left } else { Side::Right }
    }

    pub fn is_left(self) -> bool {
        matches!(self, Side::Left)
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// -1 for left, +1 for right; horizontal offset direction.
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::TopRight,
        Quadrant::BottomLeft,
        Quadrant::BottomRight,
    ];

    pub fn side(self) -> Side {
        match self {
            Quadrant::TopLeft | Quadrant::BottomLeft => Side::Left,
            Quadrant::TopRight | Quadrant::BottomRight => Side::Right,
        }
    }

    pub fn is_top(self) -> bool {
        matches!(self, Quadrant::TopLeft | Quadrant::TopRight)
    }

    pub fn name(self) -> &'static str {
        match self {
            Quadrant::TopLeft => "top-left",
            Quadrant::TopRight => "top-right",
            Quadrant::BottomLeft => "bottom-left",
            Quadrant::BottomRight => "bottom-right",
        }
    }

    /// Splits the four quadrants into two pairs that each hold one left and
    /// one right quadrant. Both the pairing (same row or diagonal), the order
    /// of the pairs and the order inside each pair are random.
    pub fn random_mixed_side_pairs<R: Rng + ?Sized>(rng: &mut R) -> [(Quadrant, Quadrant); 2] {
        use Quadrant::*;
        let mut pairs = if rng.random_bool(0.5) {
            [(TopLeft, TopRight), (BottomLeft, BottomRight)]
        } else {
            [(TopLeft, BottomRight), (BottomLeft, TopRight)]
        };
        pairs.shuffle(rng);
        for pair in pairs.iter_mut() {
            if rng.random_bool(0.5) {
                *pair = (pair.1, pair.0);
            }
        }
        pairs
    }
}

/// Where a target's grid is placed on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Half(Side),
    Quadrant(Quadrant),
}

impl Placement {
    pub fn side(self) -> Side {
        match self {
            Placement::Half(side) => side,
            Placement::Quadrant(q) => q.side(),
        }
    }

    /// `None` for half-screen placements.
    pub fn is_top(self) -> Option<bool> {
        match self {
            Placement::Half(_) => None,
            Placement::Quadrant(q) => Some(q.is_top()),
        }
    }

    /// Identifier used for per-slot no-repeat bookkeeping.
    pub fn slot(self) -> &'static str {
        match self {
            Placement::Half(Side::Left) => "left",
            Placement::Half(Side::Right) => "right",
            Placement::Quadrant(q) => q.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub color: HueAngle,
    pub placement: Placement,
    pub is_probe: bool,
    pub grid_position: GridPosition,
}

impl Target {
    pub fn side(&self) -> Side {
        self.placement.side()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Probe,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairSlot {
    Primary,
    Distractor,
}

/// A probe/reference pair. `hue` is the pair's anchor colour, the one the
/// other target of the pair was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPair {
    pub probe: Target,
    pub reference: Target,
    pub hue: HueAngle,
    pub fixation_ms: u64,
}

impl TargetPair {
    pub fn target(&self, role: Role) -> &Target {
        match role {
            Role::Probe => &self.probe,
            Role::Reference => &self.reference,
        }
    }

    /// Flash order for a signed SOA: negative means the probe leads,
    /// positive means the reference leads. For zero the order is irrelevant
    /// because both flash together.
    pub fn flash_order(soa: f64) -> (Role, Role) {
        if soa < 0.0 {
            (Role::Probe, Role::Reference)
        } else {
            (Role::Reference, Role::Probe)
        }
    }
}

/// Task-irrelevant second pair with its own onset asynchrony.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distractor {
    pub pair: TargetPair,
    pub soa: f64,
}

/// Concrete stimulus configuration of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub primary: TargetPair,
    pub distractor: Option<Distractor>,
    pub rotation: u32,
}

impl Condition {
    pub fn fixation_ms(&self) -> u64 {
        self.primary.fixation_ms
    }

    pub fn pair(&self, slot: PairSlot) -> Option<&TargetPair> {
        match slot {
            PairSlot::Primary => Some(&self.primary),
            PairSlot::Distractor => self.distractor.as_ref().map(|d| &d.pair),
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = (PairSlot, &Target)> {
        let primary = [
            (PairSlot::Primary, &self.primary.probe),
            (PairSlot::Primary, &self.primary.reference),
        ];
        let distractor = self.distractor.iter().flat_map(|d| {
            [
                (PairSlot::Distractor, &d.pair.probe),
                (PairSlot::Distractor, &d.pair.reference),
            ]
        });
        primary.into_iter().chain(distractor)
    }

    /// Colour named by the verbal instruction. Asserted instructions name the
    /// colour to attend to; negated ones name the colour to ignore.
    pub fn instruction_color(&self, negated: bool) -> HueAngle {
        match (&self.distractor, negated) {
            (None, false) => self.primary.probe.color,
            (None, true) => self.primary.reference.color,
            (Some(_), false) => self.primary.hue,
            (Some(d), true) => d.pair.hue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn target(side: Side, is_probe: bool, hue: f64) -> Target {
        Target {
            color: HueAngle::new(hue),
            placement: Placement::Half(side),
            is_probe,
            grid_position: GridPosition { x: 3, y: 3 },
        }
    }

    #[test]
    fn mixed_side_pairs_always_span_both_halves() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let pairs = Quadrant::random_mixed_side_pairs(&mut rng);
            let mut seen = Vec::new();
            for (a, b) in pairs {
                assert_ne!(a.side(), b.side());
                seen.push(a);
                seen.push(b);
            }
            seen.sort_by_key(|q| q.name());
            seen.dedup();
            assert_eq!(seen.len(), 4);
        }
    }

    #[test]
    fn flash_order_follows_soa_sign() {
        assert_eq!(TargetPair::flash_order(-50.0), (Role::Probe, Role::Reference));
        assert_eq!(TargetPair::flash_order(50.0), (Role::Reference, Role::Probe));
    }

    #[test]
    fn instruction_color_single_pair() {
        let condition = Condition {
            primary: TargetPair {
                probe: target(Side::Left, true, 0.0),
                reference: target(Side::Right, false, 180.0),
                hue: HueAngle::new(0.0),
                fixation_ms: 400,
            },
            distractor: None,
            rotation: 30,
        };
        assert_eq!(condition.instruction_color(false).name(), "red");
        assert_eq!(condition.instruction_color(true).name(), "green");
        assert_eq!(condition.targets().count(), 2);
        assert!(condition.pair(PairSlot::Distractor).is_none());
    }

    #[test]
    fn placement_slots_are_distinct() {
        let mut slots: Vec<_> = Quadrant::ALL
            .iter()
            .map(|q| Placement::Quadrant(*q).slot())
            .chain([Placement::Half(Side::Left).slot(), Placement::Half(Side::Right).slot()])
            .collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 6);
    }
}
