use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::matcher::SearchRegion;
use super::similarity::{color_distance, is_button_color, is_near_white};

/// Neighbourhood sampled around a candidate for the colour bonus.
const BONUS_RADIUS: i32 = 20;
const BONUS_STEP: usize = 4;

/// Colour-cluster fallback parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub stride: u32,
    /// Half-size of the square neighbourhood counted around each seed pixel.
    pub radius: u32,
    /// A cluster must be strictly larger than this to count.
    pub min_size: u32,
}

/// Edge-density fallback parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeParams {
    pub probe_width: u32,
    pub probe_height: u32,
    pub stride: u32,
    pub sample_step: u32,
    /// Manhattan distance above which an adjacent pair is an edge.
    pub min_contrast: u32,
    /// Fraction of edge samples a probe window must exceed.
    pub min_density: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorCluster {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EdgeWindow {
    /// Centre of the probe window.
    pub x: u32,
    pub y: u32,
    pub density: f64,
}

fn sample_ratio<F>(frame: &RgbImage, region: SearchRegion, stride: u32, mut hit: F) -> f64
where
    F: FnMut(image::Rgb<u8>) -> bool,
{
    let region = region.clipped(frame.width(), frame.height());
    let stride = stride.max(1) as usize;
    let mut total = 0u32;
    let mut matching = 0u32;

    for y in (region.min_y..region.max_y).step_by(stride) {
        for x in (region.min_x..region.max_x).step_by(stride) {
            total += 1;
            if hit(*frame.get_pixel(x as u32, y as u32)) {
                matching += 1;
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    matching as f64 / total as f64
}

/// Fraction of near-white samples in `region`.
pub fn bright_text_ratio(frame: &RgbImage, region: SearchRegion, stride: u32) -> f64 {
    sample_ratio(frame, region, stride, is_near_white)
}

/// Fraction of button-coloured samples in `region`.
pub fn button_color_ratio(frame: &RgbImage, region: SearchRegion, stride: u32) -> f64 {
    sample_ratio(frame, region, stride, is_button_color)
}

/// Button-coloured pixels in the square of `radius` around `(cx, cy)`,
/// restricted to `region`.
pub fn cluster_size(frame: &RgbImage, region: SearchRegion, cx: i32, cy: i32, radius: i32) -> u32 {
    let x0 = (cx - radius).max(region.min_x);
    let x1 = (cx + radius + 1).min(region.max_x);
    let y0 = (cy - radius).max(region.min_y);
    let y1 = (cy + radius + 1).min(region.max_y);

    let mut count = 0;
    for y in y0..y1 {
        for x in x0..x1 {
            if is_button_color(*frame.get_pixel(x as u32, y as u32)) {
                count += 1;
            }
        }
    }
    count
}

/// Seed pixel with the largest button-coloured neighbourhood.
pub fn find_color_cluster(frame: &RgbImage, region: SearchRegion, params: &ClusterParams) -> Option<ColorCluster> {
    let region = region.clipped(frame.width(), frame.height());
    let stride = params.stride.max(1) as usize;
    let mut best: Option<ColorCluster> = None;
    let mut best_size = 0;

    for y in (region.min_y..region.max_y).step_by(stride) {
        for x in (region.min_x..region.max_x).step_by(stride) {
            if !is_button_color(*frame.get_pixel(x as u32, y as u32)) {
                continue;
            }
            let size = cluster_size(frame, region, x, y, params.radius as i32);
            if size > best_size && size > params.min_size {
                best_size = size;
                best = Some(ColorCluster {
                    x: x as u32,
                    y: y as u32,
                    size,
                });
            }
        }
    }

    best
}

/// Edge density of the probe window with top-left `(x, y)`, or `None` when
/// the window does not fit strictly inside the frame.
pub fn edge_density(frame: &RgbImage, x: u32, y: u32, params: &EdgeParams) -> Option<f64> {
    let (fw, fh) = frame.dimensions();
    if x + params.probe_width >= fw || y + params.probe_height >= fh {
        return None;
    }

    let step = params.sample_step.max(1) as usize;
    let mut edges = 0u32;
    let mut total = 0u32;

    for dy in (0..params.probe_height).step_by(step) {
        for dx in (0..params.probe_width).step_by(step) {
            let (px, py) = (x + dx, y + dy);
            let here = *frame.get_pixel(px, py);
            let right = *frame.get_pixel(px + 1, py);
            let below = *frame.get_pixel(px, py + 1);
            if color_distance(here, right) > params.min_contrast
                || color_distance(here, below) > params.min_contrast
            {
                edges += 1;
            }
            total += 1;
        }
    }

    if total == 0 {
        return None;
    }
    Some(edges as f64 / total as f64)
}

/// First probe window (row-major) whose edge density clears the threshold.
pub fn find_edge_window(frame: &RgbImage, region: SearchRegion, params: &EdgeParams) -> Option<EdgeWindow> {
    let region = region.clipped(frame.width(), frame.height());
    let stride = params.stride.max(1) as usize;
    let last_x = region.max_x - params.probe_width as i32;
    let last_y = region.max_y - params.probe_height as i32;

    for y in (region.min_y..last_y).step_by(stride) {
        for x in (region.min_x..last_x).step_by(stride) {
            let Some(density) = edge_density(frame, x as u32, y as u32, params) else {
                continue;
            };
            if density > params.min_density {
                return Some(EdgeWindow {
                    x: x as u32 + params.probe_width / 2,
                    y: y as u32 + params.probe_height / 2,
                    density,
                });
            }
        }
    }

    None
}

/// Bonus added to a verification score when the candidate sits on button
/// colours: +0.2 above 30% coverage, +0.1 above 10%.
pub fn color_bonus(frame: &RgbImage, cx: u32, cy: u32) -> f64 {
    let (fw, fh) = frame.dimensions();
    let mut hits = 0u32;
    let mut total = 0u32;

    for dy in (-BONUS_RADIUS..=BONUS_RADIUS).step_by(BONUS_STEP) {
        for dx in (-BONUS_RADIUS..=BONUS_RADIUS).step_by(BONUS_STEP) {
            let x = cx as i64 + dx as i64;
            let y = cy as i64 + dy as i64;
            if x < 0 || y < 0 || x >= fw as i64 || y >= fh as i64 {
                continue;
            }
            total += 1;
            if is_button_color(*frame.get_pixel(x as u32, y as u32)) {
                hits += 1;
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    let ratio = hits as f64 / total as f64;
    if ratio > 0.3 {
        0.2
    } else if ratio > 0.1 {
        0.1
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const GRAY: Rgb<u8> = Rgb([128, 128, 128]);
    const TEAL: Rgb<u8> = Rgb([0, 170, 150]);
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    const CLUSTER: ClusterParams = ClusterParams {
        stride: 2,
        radius: 20,
        min_size: 50,
    };

    const EDGE: EdgeParams = EdgeParams {
        probe_width: 100,
        probe_height: 50,
        stride: 5,
        sample_step: 2,
        min_contrast: 30,
        min_density: 0.15,
    };

    fn frame_with_block(color: Rgb<u8>, x: i32, y: i32, w: u32, h: u32) -> RgbImage {
        let mut frame = RgbImage::from_pixel(300, 200, GRAY);
        draw_filled_rect_mut(&mut frame, Rect::at(x, y).of_size(w, h), color);
        frame
    }

    #[test]
    fn test_bright_text_ratio() {
        let frame = frame_with_block(WHITE, 0, 0, 150, 200);
        let ratio = bright_text_ratio(&frame, SearchRegion::full(&frame), 3);
        assert!((0.45..=0.55).contains(&ratio), "ratio={ratio}");

        let gray = RgbImage::from_pixel(300, 200, GRAY);
        assert_eq!(bright_text_ratio(&gray, SearchRegion::full(&gray), 3), 0.0);
    }

    #[test]
    fn test_ratio_of_empty_region_is_zero() {
        let frame = frame_with_block(WHITE, 0, 0, 300, 200);
        let empty = SearchRegion::new(400, 400, 500, 500);
        assert_eq!(bright_text_ratio(&frame, empty, 3), 0.0);
    }

    #[test]
    fn test_color_cluster_inside_block() {
        let frame = frame_with_block(TEAL, 120, 100, 60, 30);
        let hit = find_color_cluster(&frame, SearchRegion::full(&frame), &CLUSTER).unwrap();
        assert!((120..180).contains(&hit.x) && (100..130).contains(&hit.y), "{hit:?}");
        assert!(hit.size > 50);
    }

    #[test]
    fn test_color_cluster_too_small() {
        let frame = frame_with_block(TEAL, 120, 100, 5, 5);
        assert!(find_color_cluster(&frame, SearchRegion::full(&frame), &CLUSTER).is_none());
    }

    #[test]
    fn test_cluster_size_is_bounded_by_region() {
        let frame = frame_with_block(TEAL, 0, 0, 300, 200);
        let region = SearchRegion::new(0, 0, 10, 10);
        // Only the 10x10 region is counted even though the radius reaches further.
        assert_eq!(cluster_size(&frame, region, 5, 5, 20), 100);
    }

    #[test]
    fn test_edge_window_on_stripes() {
        let mut frame = RgbImage::from_pixel(300, 200, GRAY);
        for y in 60..140 {
            for x in 80..220 {
                let p = if x % 2 == 0 { WHITE } else { Rgb([0, 0, 0]) };
                frame.put_pixel(x, y, p);
            }
        }
        let hit = find_edge_window(&frame, SearchRegion::full(&frame), &EDGE).unwrap();
        assert!(hit.density > 0.15);
        // The probe window must overlap the striped block.
        assert!(hit.x + 50 > 80 && hit.x < 220 + 50, "{hit:?}");
        assert!(hit.y + 25 > 60 && hit.y < 140 + 25, "{hit:?}");
    }

    #[test]
    fn test_edge_window_uniform_frame() {
        let frame = RgbImage::from_pixel(300, 200, GRAY);
        assert!(find_edge_window(&frame, SearchRegion::full(&frame), &EDGE).is_none());
    }

    #[test]
    fn test_edge_density_rejects_window_touching_border() {
        let frame = RgbImage::from_pixel(300, 200, GRAY);
        assert!(edge_density(&frame, 200, 0, &EDGE).is_none());
        assert_eq!(edge_density(&frame, 199, 0, &EDGE), Some(0.0));
    }

    #[test]
    fn test_color_bonus_levels() {
        let teal = RgbImage::from_pixel(100, 100, TEAL);
        assert_eq!(color_bonus(&teal, 50, 50), 0.2);

        let gray = RgbImage::from_pixel(100, 100, GRAY);
        assert_eq!(color_bonus(&gray, 50, 50), 0.0);

        // 3 of 11 sample columns teal: 27% coverage.
        let mut partial = RgbImage::from_pixel(100, 100, GRAY);
        draw_filled_rect_mut(&mut partial, Rect::at(30, 0).of_size(10, 100), TEAL);
        assert_eq!(color_bonus(&partial, 50, 50), 0.1);
    }

    #[test]
    fn test_color_bonus_at_frame_corner() {
        let teal = RgbImage::from_pixel(10, 10, TEAL);
        assert_eq!(color_bonus(&teal, 0, 0), 0.2);
    }
}
