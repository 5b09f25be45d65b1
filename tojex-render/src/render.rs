use crate::scene::{BarField, Scene, ScreenView, TrialView, Verdict};
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};
use tojex_core::{Placement, Side, Target};
use tojex_timing::{CalibrationStats, FrameRecorder};

/// Grid pitch in px.
pub const CELL_PX: f32 = 40.0;
/// Horizontal (and for quadrants vertical) grid offset per cell, in px.
pub const GRID_OFFSET_PX: f32 = 20.0;

const BAR_LENGTH: f32 = 0.8 * CELL_PX;
const BAR_WIDTH: f32 = 0.15 * CELL_PX;

const BACKGROUND: [u8; 4] = [0, 0, 0, 255];
const BAR_GREY: [u8; 4] = [128, 128, 128, 255];
const FLASH_WHITE: [u8; 4] = [255, 255, 255, 255];
const PASS_GREEN: [u8; 4] = [40, 170, 70, 255];
const RETRY_AMBER: [u8; 4] = [220, 160, 30, 255];
const FAIL_RED: [u8; 4] = [200, 40, 40, 255];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub draw: Duration,
    pub copy: Duration,
    pub total: Duration,
}

fn paint(rgba: [u8; 4]) -> Paint<'static> {
    let mut p = Paint::default();
    p.set_color(Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3]));
    p.anti_alias = true;
    p
}

/// Rasterizes scenes into an RGBA frame buffer.
pub struct SceneRenderer {
    width: u32,
    height: u32,
    center: (f32, f32),
    grid: (u32, u32),
    flash_for: Duration,
    canvas: Pixmap,
    component_timers: HashMap<&'static str, FrameRecorder>,
}

impl SceneRenderer {
    pub fn new(width: u32, height: u32, grid: (u32, u32), flash_for: Duration) -> Result<Self> {
        let canvas = Pixmap::new(width, height)
            .with_context(|| format!("cannot allocate a {width}x{height} canvas"))?;
        Ok(Self {
            width,
            height,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            grid,
            flash_for,
            canvas,
            component_timers: ["draw", "copy", "total"]
                .iter()
                .map(|&k| (k, FrameRecorder::new(600)))
                .collect(),
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.canvas = Pixmap::new(width, height)
            .with_context(|| format!("cannot allocate a {width}x{height} canvas"))?;
        self.width = width;
        self.height = height;
        self.center = (width as f32 / 2.0, height as f32 / 2.0);
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Screen half a touch at horizontal position `x` belongs to.
    pub fn side_at(&self, x: f32) -> Side {
        if x < self.center.0 { Side::Left } else { Side::Right }
    }

    pub fn component_stats(&self, name: &str) -> Option<CalibrationStats> {
        self.component_timers.get(name).map(FrameRecorder::calibration_stats)
    }

    /// Center of the grid holding a target with this placement.
    pub fn grid_center(&self, placement: Placement) -> (f32, f32) {
        let (columns, rows) = (self.grid.0 as f32, self.grid.1 as f32);
        let dx = placement.side().sign() * columns * GRID_OFFSET_PX;
        let dy = match placement.is_top() {
            None => 0.0,
            Some(true) => -rows * GRID_OFFSET_PX,
            Some(false) => rows * GRID_OFFSET_PX,
        };
        (self.center.0 + dx, self.center.1 + dy)
    }

    pub fn cell_center(&self, placement: Placement, x: u32, y: u32) -> (f32, f32) {
        let (gx, gy) = self.grid_center(placement);
        let left = gx - self.grid.0 as f32 * CELL_PX / 2.0;
        let top = gy - self.grid.1 as f32 * CELL_PX / 2.0;
        (
            left + (x as f32 + 0.5) * CELL_PX,
            top + (y as f32 + 0.5) * CELL_PX,
        )
    }

    pub fn target_center(&self, target: &Target) -> (f32, f32) {
        self.cell_center(target.placement, target.grid_position.x, target.grid_position.y)
    }

    pub fn render(&mut self, scene: &Scene, now: Instant, frame: &mut [u8]) -> Result<FrameStats> {
        let started = Instant::now();
        self.canvas.fill(Color::from_rgba8(
            BACKGROUND[0],
            BACKGROUND[1],
            BACKGROUND[2],
            BACKGROUND[3],
        ));
        match scene {
            Scene::Blank => {}
            Scene::Screen(view) => self.draw_screen(view),
            Scene::Trial(view) => self.draw_trial(view, now),
        }
        let draw = started.elapsed();

        let copy_started = Instant::now();
        let data = self.canvas.data();
        if frame.len() != data.len() {
            return Err(anyhow!(
                "frame buffer holds {} bytes, canvas {}",
                frame.len(),
                data.len()
            ));
        }
        // The canvas is opaque, so premultiplied and straight RGBA agree.
        frame.copy_from_slice(data);
        let copy = copy_started.elapsed();
        let total = started.elapsed();

        for (name, d) in [("draw", draw), ("copy", copy), ("total", total)] {
            if let Some(rec) = self.component_timers.get_mut(name) {
                rec.record_frame(d);
            }
        }
        Ok(FrameStats { draw, copy, total })
    }

    fn draw_trial(&mut self, view: &TrialView, now: Instant) {
        self.draw_fixation();
        let rotation = view.condition.rotation as f32;
        for ((slot, target), field) in view.condition.targets().zip(&view.fields) {
            let flashing = view.is_flashing(slot, target, self.flash_for, now);
            let color = if flashing {
                FLASH_WHITE
            } else {
                target.color.to_rgba()
            };
            self.draw_grid(target, field, rotation, color);
        }
    }

    fn draw_grid(&mut self, target: &Target, field: &BarField, rotation: f32, target_color: [u8; 4]) {
        for y in 0..field.rows {
            for x in 0..field.columns {
                let is_target = x == target.grid_position.x && y == target.grid_position.y;
                let color = if is_target { target_color } else { BAR_GREY };
                let center = self.cell_center(target.placement, x, y);
                self.draw_bar(center, BAR_LENGTH * field.scale(x, y), rotation, color);
            }
        }
    }

    fn draw_bar(&mut self, center: (f32, f32), length: f32, rotation: f32, color: [u8; 4]) {
        let Some(rect) = Rect::from_xywh(-length / 2.0, -BAR_WIDTH / 2.0, length, BAR_WIDTH) else {
            return;
        };
        let path = PathBuilder::from_rect(rect);
        let transform = Transform::from_rotate(rotation).post_translate(center.0, center.1);
        self.canvas
            .fill_path(&path, &paint(color), FillRule::Winding, transform, None);
    }

    fn draw_fixation(&mut self) {
        let mut pb = PathBuilder::new();
        pb.push_circle(self.center.0, self.center.1, 4.0);
        if let Some(path) = pb.finish() {
            self.canvas.fill_path(
                &path,
                &paint(FLASH_WHITE),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
    }

    fn draw_cross(&mut self) {
        let size = 40.0;
        let p = paint(FLASH_WHITE);
        let (cx, cy) = self.center;
        if let Some(h) = Rect::from_xywh(cx - size / 2.0, cy - 1.0, size, 2.0) {
            self.canvas.fill_rect(h, &p, Transform::identity(), None);
        }
        if let Some(v) = Rect::from_xywh(cx - 1.0, cy - size / 2.0, 2.0, size) {
            self.canvas.fill_rect(v, &p, Transform::identity(), None);
        }
    }

    /// Horizontal bar below the center, filled to `fraction`.
    fn draw_meter(&mut self, fraction: f32, color: [u8; 4]) {
        let width = self.width as f32 * 0.5;
        let left = self.center.0 - width / 2.0;
        let top = self.center.1 + 60.0;
        if let Some(track) = Rect::from_xywh(left, top, width, 12.0) {
            self.canvas
                .fill_rect(track, &paint(BAR_GREY), Transform::identity(), None);
        }
        let filled = width * fraction.clamp(0.0, 1.0);
        if let Some(fill) = Rect::from_xywh(left, top, filled, 12.0) {
            self.canvas
                .fill_rect(fill, &paint(color), Transform::identity(), None);
        }
    }

    /// One dot per slot, the first `lit` of them highlighted.
    fn draw_dots(&mut self, lit: usize, count: usize) {
        let spacing = 24.0;
        let start = self.center.0 - spacing * (count.saturating_sub(1)) as f32 / 2.0;
        for i in 0..count {
            let mut pb = PathBuilder::new();
            pb.push_circle(start + i as f32 * spacing, self.center.1 + 60.0, 6.0);
            let color = if i < lit { FLASH_WHITE } else { BAR_GREY };
            if let Some(path) = pb.finish() {
                self.canvas.fill_path(
                    &path,
                    &paint(color),
                    FillRule::Winding,
                    Transform::identity(),
                    None,
                );
            }
        }
    }

    fn draw_screen(&mut self, view: &ScreenView) {
        self.draw_cross();
        match *view {
            ScreenView::Welcome => {}
            ScreenView::Instructions {
                attempt,
                max_attempts,
            } => self.draw_dots(attempt, max_attempts),
            ScreenView::Verdict {
                verdict,
                correct,
                total,
            } => {
                let color = match verdict {
                    Verdict::Passed => PASS_GREEN,
                    Verdict::Retry => RETRY_AMBER,
                    Verdict::Failed => FAIL_RED,
                };
                let fraction = if total > 0 {
                    correct as f32 / total as f32
                } else {
                    0.0
                };
                self.draw_meter(fraction, color);
            }
            ScreenView::Progress { done, total } => {
                let fraction = if total > 0 {
                    done as f32 / total as f32
                } else {
                    1.0
                };
                self.draw_meter(fraction, FLASH_WHITE);
            }
            ScreenView::Summary { accuracy } => self.draw_meter(accuracy as f32, PASS_GREEN),
        }
    }
}
