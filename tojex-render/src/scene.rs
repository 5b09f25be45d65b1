use rand::Rng;
use std::time::Instant;
use tojex_core::{Condition, GridPosition, PairSlot, Role, Target};

/// Mean length of a non-target bar relative to a target bar.
pub const DISTRACTOR_SCALE: f32 = 0.7;
/// Half-width of the uniform jitter applied to non-target bar lengths.
pub const DISTRACTOR_JITTER: f32 = 0.15;

/// What the display shows right now.
#[derive(Debug, Clone, Default)]
pub enum Scene {
    #[default]
    Blank,
    Screen(ScreenView),
    Trial(TrialView),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Retry,
    Failed,
}

/// Text-free renditions of the session screens.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenView {
    Welcome,
    Instructions { attempt: usize, max_attempts: usize },
    Verdict { verdict: Verdict, correct: usize, total: usize },
    Progress { done: usize, total: usize },
    Summary { accuracy: f64 },
}

/// Length scales of the bars in one target grid, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct BarField {
    pub columns: u32,
    pub rows: u32,
    scales: Vec<f32>,
}

impl BarField {
    pub fn new<R: Rng + ?Sized>(columns: u32, rows: u32, target: GridPosition, rng: &mut R) -> Self {
        let scales = (0..rows)
            .flat_map(|y| (0..columns).map(move |x| (x, y)))
            .map(|(x, y)| {
                if x == target.x && y == target.y {
                    1.0
                } else {
                    DISTRACTOR_SCALE + rng.random_range(-DISTRACTOR_JITTER..=DISTRACTOR_JITTER)
                }
            })
            .collect();
        Self {
            columns,
            rows,
            scales,
        }
    }

    pub fn scale(&self, x: u32, y: u32) -> f32 {
        self.scales
            .get((y * self.columns + x) as usize)
            .copied()
            .unwrap_or(DISTRACTOR_SCALE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flash {
    pub slot: PairSlot,
    pub role: Role,
    pub at: Instant,
}

/// A trial's stimulus display: one bar grid per target plus flash marks.
#[derive(Debug, Clone)]
pub struct TrialView {
    pub condition: Condition,
    pub fields: Vec<BarField>,
    pub flashes: Vec<Flash>,
}

impl TrialView {
    pub fn new<R: Rng + ?Sized>(condition: Condition, grid: (u32, u32), rng: &mut R) -> Self {
        let fields = condition
            .targets()
            .map(|(_, target)| BarField::new(grid.0, grid.1, target.grid_position, rng))
            .collect();
        Self {
            condition,
            fields,
            flashes: Vec::new(),
        }
    }

    pub fn flash(&mut self, slot: PairSlot, role: Role, at: Instant) {
        self.flashes.push(Flash { slot, role, at });
    }

    /// Whether `target` is inside its flash window at `now`.
    pub fn is_flashing(&self, slot: PairSlot, target: &Target, flash_for: std::time::Duration, now: Instant) -> bool {
        let role = if target.is_probe { Role::Probe } else { Role::Reference };
        self.flashes.iter().any(|f| {
            f.slot == slot && f.role == role && now >= f.at && now.duration_since(f.at) < flash_for
        })
    }
}
