use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::{Duration, Instant};
use tojex_core::{
    Condition, Distractor, GridPosition, HueAngle, PairSlot, Placement, Quadrant, Role, Target,
    TargetPair,
};
use tojex_render::{Scene, SceneRenderer, TrialView};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn target(quadrant: Quadrant, is_probe: bool, hue: f64) -> Target {
    Target {
        color: HueAngle::new(hue),
        placement: Placement::Quadrant(quadrant),
        is_probe,
        grid_position: GridPosition { x: 3, y: 1 },
    }
}

fn dual_condition() -> Condition {
    Condition {
        primary: TargetPair {
            probe: target(Quadrant::TopLeft, true, 0.0),
            reference: target(Quadrant::BottomRight, false, 20.0),
            hue: HueAngle::new(0.0),
            fixation_ms: 400,
        },
        distractor: Some(Distractor {
            pair: TargetPair {
                probe: target(Quadrant::BottomLeft, true, 180.0),
                reference: target(Quadrant::TopRight, false, 160.0),
                hue: HueAngle::new(180.0),
                fixation_ms: 350,
            },
            soa: 50.0,
        }),
        rotation: 40,
    }
}

fn harness() -> (SceneRenderer, Scene, Vec<u8>) {
    let renderer = SceneRenderer::new(WIDTH, HEIGHT, (7, 4), Duration::from_millis(30))
        .expect("renderer");
    let mut view = TrialView::new(dual_condition(), (7, 4), &mut StdRng::seed_from_u64(7));
    view.flash(PairSlot::Primary, Role::Probe, Instant::now());
    let fb = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
    (renderer, Scene::Trial(view), fb)
}

pub fn bench_trial_frame(c: &mut Criterion) {
    let mut g = c.benchmark_group("render_frame");
    g.sample_size(40);

    g.bench_function("dual_pair_flash", |b| {
        b.iter_batched(
            harness,
            |(mut r, scene, mut fb)| {
                let stats = r.render(&scene, Instant::now(), &mut fb);
                let _ = black_box(stats);
            },
            BatchSize::SmallInput,
        )
    });

    g.finish();
}

criterion_group!(benches, bench_trial_frame);
criterion_main!(benches);
