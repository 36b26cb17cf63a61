use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;

use crate::detector::matcher::SearchRegion;
use crate::detector::{DetectionEngine, FrameAnalysis};

const REGION_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const BUTTON_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CLUSTER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const EDGE_COLOR: Rgb<u8> = Rgb([0, 128, 255]);

/// One-shot environment and detection report.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub os: &'static str,
    pub capture_ms: f64,
    pub analysis: FrameAnalysis,
    pub click_backend: &'static str,
    pub click_available: bool,
    pub total_ms: f64,
    pub debug_frame: Option<PathBuf>,
}

impl DiagnosticReport {
    /// Human-readable lines, in the order they are logged.
    pub fn lines(&self) -> Vec<String> {
        let a = &self.analysis;
        let mut lines = vec![
            format!("os: {}", self.os),
            format!(
                "frame: {}x{} (captured in {:.1}ms)",
                a.frame_width, a.frame_height, self.capture_ms
            ),
        ];

        for t in &a.template_sizes {
            lines.push(format!("{} template: {}x{}", t.kind, t.width, t.height));
        }

        lines.push(format!(
            "match screen: {} ({:.1}ms)",
            if a.match_screen { "detected" } else { "not detected" },
            a.match_screen_ms
        ));
        if let Some(ratio) = a.bright_text_ratio {
            lines.push(format!("bright text ratio: {:.3}", ratio));
        }

        match a.accept_button {
            Some(b) => lines.push(format!(
                "accept button: ({}, {}) score={:.3} scale={:.2} via {:?} ({:.1}ms)",
                b.x, b.y, b.score, b.scale, b.method, a.accept_button_ms
            )),
            None => {
                lines.push(format!("accept button: not found ({:.1}ms)", a.accept_button_ms));
                lines.push(match a.color_cluster {
                    Some(c) => format!("  colour cluster: ({}, {}) size={}", c.x, c.y, c.size),
                    None => "  colour cluster: none".to_owned(),
                });
                lines.push(match a.edge_window {
                    Some(e) => format!("  edge window: ({}, {}) density={:.3}", e.x, e.y, e.density),
                    None => "  edge window: none".to_owned(),
                });
            }
        }

        if let Some(ratio) = a.button_color_ratio {
            lines.push(format!("button colour ratio below centre: {:.1}%", ratio * 100.0));
        }

        lines.push(format!(
            "click backend: {} ({})",
            self.click_backend,
            if self.click_available { "available" } else { "not installed" }
        ));
        if let Some(path) = &self.debug_frame {
            lines.push(format!("debug frame: {}", path.display()));
        }
        lines.push(format!("total: {:.1}ms", self.total_ms));
        lines
    }
}

fn outline(frame: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>) {
    if w > 0 && h > 0 {
        draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(w, h), color);
    }
}

fn outline_centered(frame: &mut RgbImage, cx: u32, cy: u32, w: u32, h: u32, color: Rgb<u8>) {
    outline(frame, cx as i32 - (w / 2) as i32, cy as i32 - (h / 2) as i32, w, h, color);
}

fn outline_region(frame: &mut RgbImage, region: SearchRegion, color: Rgb<u8>) {
    outline(frame, region.min_x, region.min_y, region.width(), region.height(), color);
}

/// Copy of `frame` with the button search region and every hit outlined.
pub fn annotate(frame: &RgbImage, analysis: &FrameAnalysis, accept_size: (u32, u32)) -> RgbImage {
    let mut out = frame.clone();
    outline_region(&mut out, DetectionEngine::button_region(frame), REGION_COLOR);

    if let Some(c) = analysis.color_cluster {
        outline_centered(&mut out, c.x, c.y, 41, 41, CLUSTER_COLOR);
    }
    if let Some(e) = analysis.edge_window {
        outline_centered(&mut out, e.x, e.y, 100, 50, EDGE_COLOR);
    }
    if let Some(b) = analysis.accept_button {
        let w = (accept_size.0 as f64 * b.scale).round() as u32;
        let h = (accept_size.1 as f64 * b.scale).round() as u32;
        outline_centered(&mut out, b.x, b.y, w.max(3), h.max(3), BUTTON_COLOR);
    }
    out
}

/// Write the annotated frame to `dir` under a timestamped name.
pub fn save_debug_frame(
    dir: &Path,
    frame: &RgbImage,
    analysis: &FrameAnalysis,
    accept_size: (u32, u32),
) -> Result<PathBuf, image::ImageError> {
    std::fs::create_dir_all(dir)?;
    let name = format!("diagnostics-{}.png", chrono::Local::now().format("%Y%m%d-%H%M%S%.3f"));
    let path = dir.join(name);
    annotate(frame, analysis, accept_size).save(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::heuristics::ColorCluster;
    use crate::detector::{ButtonMatch, DetectionMethod};

    fn analysis() -> FrameAnalysis {
        FrameAnalysis {
            frame_width: 320,
            frame_height: 240,
            accept_button: Some(ButtonMatch {
                x: 160,
                y: 160,
                score: 1.2,
                scale: 1.0,
                method: DetectionMethod::Template,
            }),
            ..FrameAnalysis::default()
        }
    }

    fn report(analysis: FrameAnalysis) -> DiagnosticReport {
        DiagnosticReport {
            os: "linux",
            capture_ms: 12.0,
            analysis,
            click_backend: "xdotool",
            click_available: false,
            total_ms: 40.0,
            debug_frame: None,
        }
    }

    #[test]
    fn test_lines_report_button() {
        let lines = report(analysis()).lines();
        assert!(lines.iter().any(|l| l.starts_with("accept button: (160, 160) score=1.200")));
        assert!(lines.iter().any(|l| l == "click backend: xdotool (not installed)"));
        assert!(!lines.iter().any(|l| l.contains("colour cluster")));
    }

    #[test]
    fn test_lines_report_fallbacks_when_button_missing() {
        let a = FrameAnalysis {
            color_cluster: Some(ColorCluster { x: 1, y: 2, size: 60 }),
            ..FrameAnalysis::default()
        };
        let lines = report(a).lines();
        assert!(lines.iter().any(|l| l == "  colour cluster: (1, 2) size=60"));
        assert!(lines.iter().any(|l| l == "  edge window: none"));
    }

    #[test]
    fn test_annotate_outlines_button() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([0, 0, 0]));
        let out = annotate(&frame, &analysis(), (40, 20));
        // Top-left corner of the 40x20 box centred on (160, 160).
        assert_eq!(*out.get_pixel(140, 150), BUTTON_COLOR);
        assert_eq!(*out.get_pixel(160, 160), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_debug_frame() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("debug");
        let frame = RgbImage::from_pixel(64, 48, Rgb([9, 9, 9]));

        let path = save_debug_frame(&nested, &frame, &FrameAnalysis::default(), (10, 10)).unwrap();
        assert!(path.starts_with(&nested));
        assert_eq!(image::open(&path).unwrap().to_rgb8().dimensions(), (64, 48));
    }
}
