use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Lightness used when a hue is turned into a displayable colour.
pub const LIGHTNESS: f64 = 55.0;
/// Chroma used when a hue is turned into a displayable colour.
pub const CHROMA: f64 = 60.0;

/// The two canonical primaries targets are drawn from.
pub const PRIMARY_HUES: [f64; 2] = [0.0, 180.0];

const NAMED_HUES: [(f64, &str); 2] = [(0.0, "red"), (180.0, "green")];

// D65 reference white
const WHITE_X: f64 = 0.950_47;
const WHITE_Y: f64 = 1.0;
const WHITE_Z: f64 = 1.088_83;

/// A perceptual colour given as a hue angle (degrees) in CIE LCh(ab).
///
/// Lightness and chroma are fixed, so two colours only differ by hue and
/// related colours are derived by angular offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HueAngle(f64);

impl HueAngle {
    /// Normalizes `degrees` into `[0, 360)`.
    pub fn new(degrees: f64) -> Self {
        let wrapped = degrees.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs
        Self(if wrapped >= 360.0 { 0.0 } else { wrapped })
    }

    /// One of the two canonical primaries, uniformly.
    pub fn random_primary<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let idx = rng.random_range(0..PRIMARY_HUES.len());
        Self::new(PRIMARY_HUES[idx])
    }

    pub fn degrees(self) -> f64 {
        self.0
    }

    pub fn relative(self, offset: f64) -> Self {
        Self::new(self.0 + offset)
    }

    pub fn complement(self) -> Self {
        self.relative(180.0)
    }

    /// Offsets the hue by one of `offsets`, chosen uniformly. An empty slice
    /// leaves the hue unchanged.
    pub fn random_relative<R: Rng + ?Sized>(self, offsets: &[f64], rng: &mut R) -> Self {
        match offsets.choose(rng) {
            Some(offset) => self.relative(*offset),
            None => self,
        }
    }

    /// Shortest angular distance in degrees, in `[0, 180]`.
    pub fn distance(self, other: HueAngle) -> f64 {
        let d = (self.0 - other.0).abs();
        d.min(360.0 - d)
    }

    /// Name of the nearest canonical hue; used to pick the colour cue.
    pub fn name(self) -> &'static str {
        let mut best = NAMED_HUES[0];
        for named in NAMED_HUES.iter().skip(1) {
            if self.distance(HueAngle(named.0)) < self.distance(HueAngle(best.0)) {
                best = *named;
            }
        }
        best.1
    }

    /// sRGB with gamut clipping, opaque.
    pub fn to_rgba(self) -> [u8; 4] {
        let h = self.0.to_radians();
        let (l, a, b) = (LIGHTNESS, CHROMA * h.cos(), CHROMA * h.sin());

        let fy = (l + 16.0) / 116.0;
        let fx = fy + a / 500.0;
        let fz = fy - b / 200.0;
        let x = WHITE_X * lab_f_inv(fx);
        let y = WHITE_Y * lab_f_inv(fy);
        let z = WHITE_Z * lab_f_inv(fz);

        let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
        let g = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
        let bl = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

        [encode_srgb(r), encode_srgb(g), encode_srgb(bl), 255]
    }
}

fn lab_f_inv(t: f64) -> f64 {
    const DELTA: f64 = 6.0 / 29.0;
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

fn encode_srgb(linear: f64) -> u8 {
    let c = linear.clamp(0.0, 1.0);
    let v = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn normalizes_into_range() {
        assert_eq!(HueAngle::new(-90.0).degrees(), 270.0);
        assert_eq!(HueAngle::new(540.0).degrees(), 180.0);
        assert_eq!(HueAngle::new(360.0).degrees(), 0.0);
        assert!(HueAngle::new(-1e-20).degrees() < 360.0);
    }

    #[test]
    fn complement_of_primaries_is_the_other_primary() {
        assert_eq!(HueAngle::new(0.0).complement(), HueAngle::new(180.0));
        assert_eq!(HueAngle::new(180.0).complement(), HueAngle::new(0.0));
    }

    #[test]
    fn names_follow_nearest_canonical_hue() {
        assert_eq!(HueAngle::new(0.0).name(), "red");
        assert_eq!(HueAngle::new(340.0).name(), "red");
        assert_eq!(HueAngle::new(200.0).name(), "green");
        assert_eq!(HueAngle::new(160.0).name(), "green");
    }

    #[test]
    fn random_relative_only_uses_given_offsets() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = HueAngle::new(0.0);
        for _ in 0..50 {
            let c = base.random_relative(&[20.0, -20.0], &mut rng);
            assert!(c == HueAngle::new(20.0) || c == HueAngle::new(340.0));
        }
        assert_eq!(base.random_relative(&[], &mut rng), base);
    }

    #[test]
    fn primaries_render_reddish_and_greenish() {
        let red = HueAngle::new(0.0).to_rgba();
        let green = HueAngle::new(180.0).to_rgba();
        assert!(red[0] > red[1]);
        assert!(green[1] > green[0]);
        assert_eq!(red[3], 255);
    }

    #[test]
    fn random_primary_is_canonical() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let h = HueAngle::random_primary(&mut rng);
            assert!(PRIMARY_HUES.contains(&h.degrees()));
        }
    }
}
