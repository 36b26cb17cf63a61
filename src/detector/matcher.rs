use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::similarity::{loose_match, strict_match};

/// Axis-aligned search rectangle in frame pixels. `max_*` are exclusive.
///
/// Coordinates are signed so a rectangle can be described relative to the
/// frame centre before it is clipped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchRegion {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl SearchRegion {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn full(frame: &RgbImage) -> Self {
        Self::new(0, 0, frame.width() as i32, frame.height() as i32)
    }

    /// Rectangle spanning `left`/`up` towards the origin and `right`/`down`
    /// away from it, measured from the frame centre and clipped to the frame.
    pub fn around_center(frame: &RgbImage, left: i32, up: i32, right: i32, down: i32) -> Self {
        let cx = (frame.width() / 2) as i32;
        let cy = (frame.height() / 2) as i32;
        Self::new(cx - left, cy - up, cx + right, cy + down).clipped(frame.width(), frame.height())
    }

    pub fn clipped(self, width: u32, height: u32) -> Self {
        let min_x = self.min_x.clamp(0, width as i32);
        let min_y = self.min_y.clamp(0, height as i32);
        Self {
            min_x,
            min_y,
            max_x: self.max_x.clamp(min_x, width as i32),
            max_y: self.max_y.clamp(min_y, height as i32),
        }
    }

    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max_y - self.min_y).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// A candidate position (centre of the matched window) with its score.
///
/// Scores are ratios in `[0, 1]` straight out of a scan; verification adds a
/// colour bonus on top, so consumers must not assume they stay below 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

/// Sliding-window parameters for the sampled scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Window origin step, in frame pixels.
    pub stride: u32,
    /// Template sub-sampling step, in template pixels.
    pub sample_step: u32,
    /// Loose Manhattan distance (exclusive) for a sample to count as matching.
    pub loose_distance: u32,
}

impl ScanParams {
    fn stride(&self) -> usize {
        self.stride.max(1) as usize
    }

    fn sample_step(&self) -> usize {
        self.sample_step.max(1) as usize
    }
}

/// Template size when rendered at `scale`.
pub fn scaled_dims(template: &RgbImage, scale: f64) -> (u32, u32) {
    (
        (template.width() as f64 * scale).round() as u32,
        (template.height() as f64 * scale).round() as u32,
    )
}

/// Fraction of sampled template pixels that loosely match the frame when the
/// template is laid at `(origin_x, origin_y)` and stretched by `scale`.
/// Samples landing outside the frame are not counted.
pub fn sampled_similarity(
    frame: &RgbImage,
    template: &RgbImage,
    origin_x: u32,
    origin_y: u32,
    scale: f64,
    params: &ScanParams,
) -> f64 {
    let (fw, fh) = frame.dimensions();
    let mut total = 0u32;
    let mut matching = 0u32;

    for ty in (0..template.height()).step_by(params.sample_step()) {
        let fy = origin_y + (ty as f64 * scale) as u32;
        if fy >= fh {
            continue;
        }
        for tx in (0..template.width()).step_by(params.sample_step()) {
            let fx = origin_x + (tx as f64 * scale) as u32;
            if fx >= fw {
                continue;
            }
            total += 1;
            if loose_match(*frame.get_pixel(fx, fy), *template.get_pixel(tx, ty), params.loose_distance) {
                matching += 1;
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    matching as f64 / total as f64
}

/// Fraction of every template pixel that strictly matches the frame.
pub fn exhaustive_similarity(
    frame: &RgbImage,
    template: &RgbImage,
    origin_x: u32,
    origin_y: u32,
    scale: f64,
) -> f64 {
    let (fw, fh) = frame.dimensions();
    let mut total = 0u32;
    let mut matching = 0u32;

    for (tx, ty, expected) in template.enumerate_pixels() {
        let fx = origin_x + (tx as f64 * scale) as u32;
        let fy = origin_y + (ty as f64 * scale) as u32;
        if fx >= fw || fy >= fh {
            continue;
        }
        total += 1;
        if strict_match(*frame.get_pixel(fx, fy), *expected) {
            matching += 1;
        }
    }

    if total == 0 {
        return 0.0;
    }
    matching as f64 / total as f64
}

/// Slide `template` (scaled by `scale`) over `region` and return the centre of
/// the best window whose sampled score exceeds `threshold`.
///
/// Windows are visited in row-major order and only a strictly better score
/// replaces the current best, so the first of several equal windows wins.
pub fn scan(
    frame: &RgbImage,
    template: &RgbImage,
    threshold: f64,
    region: SearchRegion,
    scale: f64,
    params: &ScanParams,
) -> Option<MatchCandidate> {
    let region = region.clipped(frame.width(), frame.height());
    let (sw, sh) = scaled_dims(template, scale);
    if sw == 0 || sh == 0 || sw > region.width() || sh > region.height() {
        return None;
    }

    let last_x = region.max_x - sw as i32;
    let last_y = region.max_y - sh as i32;
    let mut best: Option<MatchCandidate> = None;
    let mut best_score = threshold;

    for y in (region.min_y..=last_y).step_by(params.stride()) {
        for x in (region.min_x..=last_x).step_by(params.stride()) {
            let score = sampled_similarity(frame, template, x as u32, y as u32, scale, params);
            if score > best_score {
                best_score = score;
                best = Some(MatchCandidate {
                    x: x as u32 + sw / 2,
                    y: y as u32 + sh / 2,
                    score,
                });
            }
        }
    }

    best
}

/// First scale (in the given order) at which `scan` finds a window above
/// `threshold`.
pub fn first_at_any_scale(
    frame: &RgbImage,
    template: &RgbImage,
    region: SearchRegion,
    threshold: f64,
    scales: &[f64],
    params: &ScanParams,
) -> Option<(MatchCandidate, f64)> {
    scales.iter().find_map(|&scale| {
        scan(frame, template, threshold, region, scale, params).map(|hit| (hit, scale))
    })
}

/// Best candidate over the whole `thresholds` x `scales` cross-product.
///
/// Every hit is re-scored with `rank`; the returned candidate carries the
/// ranked score and the scale it was found at. Only a rank strictly above
/// both zero and every previous rank is kept.
pub fn best_across_scales<F>(
    frame: &RgbImage,
    template: &RgbImage,
    region: SearchRegion,
    thresholds: &[f64],
    scales: &[f64],
    params: &ScanParams,
    mut rank: F,
) -> Option<(MatchCandidate, f64)>
where
    F: FnMut(MatchCandidate, f64) -> f64,
{
    // A stricter threshold yields either the same window or nothing for a
    // given scale, so scanning once at the loosest one covers every pair.
    let floor = thresholds.iter().copied().fold(f64::INFINITY, f64::min);
    if !floor.is_finite() {
        return None;
    }

    let mut best: Option<(MatchCandidate, f64)> = None;
    let mut best_rank = 0.0;

    for &scale in scales {
        let Some(hit) = scan(frame, template, floor, region, scale, params) else {
            continue;
        };
        let ranked = rank(hit, scale);
        tracing::debug!(
            "scale {scale:.2}: window at ({}, {}) sampled={:.3} ranked={ranked:.3}",
            hit.x, hit.y, hit.score
        );
        if ranked > best_rank {
            best_rank = ranked;
            best = Some((MatchCandidate { score: ranked, ..hit }, scale));
        }
    }

    best
}
