//! Visual detection of the queue screen and its accept button.
//!
//! Template matching is the primary signal. When it is inconclusive the
//! engine falls back to cheap colour and edge heuristics, trading precision
//! for recall.

pub mod heuristics;
pub mod matcher;
pub mod similarity;

use std::time::Instant;

use image::RgbImage;
use serde::Serialize;

use crate::config::Profile;
use crate::templates::{TemplateKind, Templates};
use heuristics::{ColorCluster, EdgeWindow};
use matcher::{MatchCandidate, SearchRegion};

/// Score returned by [`DetectionEngine::verify`] when the expected template
/// footprint leaves the frame. Low, but above the firing threshold.
pub const OUT_OF_BOUNDS_SCORE: f64 = 0.3;

/// Which sub-method located the accept button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Template,
    ColorCluster,
    EdgeDensity,
}

/// Accept-button location with its verification score.
///
/// `score` may exceed 1.0: it is the strict match ratio plus a colour bonus.
/// Template hits are verified at the scale the template was found at, not
/// re-verified at 1.0; heuristic hits are verified at 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ButtonMatch {
    pub x: u32,
    pub y: u32,
    pub score: f64,
    pub scale: f64,
    pub method: DetectionMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateSize {
    pub kind: TemplateKind,
    pub width: u32,
    pub height: u32,
}

/// Per-method breakdown of one frame, used by diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameAnalysis {
    pub frame_width: u32,
    pub frame_height: u32,
    pub template_sizes: Vec<TemplateSize>,
    pub match_screen: bool,
    pub match_screen_ms: f64,
    pub bright_text_ratio: Option<f64>,
    pub accept_button: Option<ButtonMatch>,
    pub accept_button_ms: f64,
    pub template_hit: Option<MatchCandidate>,
    pub color_cluster: Option<ColorCluster>,
    pub edge_window: Option<EdgeWindow>,
    pub button_color_ratio: Option<f64>,
}

/// The two queries the monitor needs from a frame.
///
/// Implementations are pure: they never call back into the monitor and hold
/// no per-frame state.
pub trait Detector: Send + Sync {
    fn is_match_screen_present(&self, frame: &RgbImage) -> bool;

    fn find_accept_button(&self, frame: &RgbImage) -> Option<ButtonMatch>;

    /// Run both queries with timings.
    fn analyze(&self, frame: &RgbImage) -> FrameAnalysis {
        let started = Instant::now();
        let match_screen = self.is_match_screen_present(frame);
        let match_screen_ms = elapsed_ms(started);

        let started = Instant::now();
        let accept_button = self.find_accept_button(frame);
        let accept_button_ms = elapsed_ms(started);

        FrameAnalysis {
            frame_width: frame.width(),
            frame_height: frame.height(),
            match_screen,
            match_screen_ms,
            accept_button,
            accept_button_ms,
            ..FrameAnalysis::default()
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Template matcher plus heuristics, parameterised by a [`Profile`].
pub struct DetectionEngine {
    templates: Templates,
    profile: Profile,
}

impl DetectionEngine {
    pub fn new(templates: Templates, profile: Profile) -> Self {
        Self { templates, profile }
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Centre band where the queue screen prints its status text.
    pub fn text_region(frame: &RgbImage) -> SearchRegion {
        SearchRegion::around_center(frame, 200, 100, 200, 100)
    }

    /// The accept button sits centrally, just below the middle of the screen.
    pub fn button_region(frame: &RgbImage) -> SearchRegion {
        SearchRegion::around_center(frame, 400, 50, 400, 250)
    }

    /// Band under the frame centre sampled for the button-colour report.
    pub fn button_band(frame: &RgbImage) -> SearchRegion {
        SearchRegion::around_center(frame, 200, 0, 200, 200)
    }

    pub fn bright_text_ratio(&self, frame: &RgbImage) -> f64 {
        heuristics::bright_text_ratio(frame, Self::text_region(frame), self.profile.bright_text_stride)
    }

    /// Confidence that an accept button centred at `(x, y)` and rendered at
    /// `scale` is really there: exhaustive strict-match ratio plus colour bonus.
    pub fn verify(&self, frame: &RgbImage, x: u32, y: u32, scale: f64) -> f64 {
        let (sw, sh) = matcher::scaled_dims(&self.templates.accept, scale);
        let start_x = x as i64 - (sw / 2) as i64;
        let start_y = y as i64 - (sh / 2) as i64;

        if start_x < 0
            || start_y < 0
            || start_x + sw as i64 >= frame.width() as i64
            || start_y + sh as i64 >= frame.height() as i64
        {
            return OUT_OF_BOUNDS_SCORE;
        }

        let ratio = matcher::exhaustive_similarity(
            frame,
            &self.templates.accept,
            start_x as u32,
            start_y as u32,
            scale,
        );
        ratio + heuristics::color_bonus(frame, x, y)
    }

    /// Multi-scale template search for the accept button, ranked by [`verify`].
    ///
    /// [`verify`]: DetectionEngine::verify
    pub fn template_search(&self, frame: &RgbImage, region: SearchRegion) -> Option<(MatchCandidate, f64)> {
        let p = &self.profile;
        matcher::best_across_scales(
            frame,
            &self.templates.accept,
            region,
            &p.button_thresholds,
            &p.button_scales,
            &p.scan,
            |hit, scale| self.verify(frame, hit.x, hit.y, scale),
        )
    }

    pub fn color_cluster(&self, frame: &RgbImage, region: SearchRegion) -> Option<ColorCluster> {
        heuristics::find_color_cluster(frame, region, &self.profile.cluster)
    }

    pub fn edge_window(&self, frame: &RgbImage, region: SearchRegion) -> Option<EdgeWindow> {
        heuristics::find_edge_window(frame, region, &self.profile.edge)
    }

    fn heuristic_match(&self, frame: &RgbImage, x: u32, y: u32, method: DetectionMethod) -> ButtonMatch {
        ButtonMatch {
            x,
            y,
            score: self.verify(frame, x, y, 1.0),
            scale: 1.0,
            method,
        }
    }
}

impl Detector for DetectionEngine {
    fn is_match_screen_present(&self, frame: &RgbImage) -> bool {
        let p = &self.profile;
        let template = &self.templates.matching;
        let region = SearchRegion::full(frame);

        if let Some(hit) = matcher::scan(frame, template, p.screen_primary_threshold, region, 1.0, &p.screen_scan) {
            tracing::debug!("matching screen at ({}, {}) score={:.3}", hit.x, hit.y, hit.score);
            return true;
        }

        if let Some((hit, scale)) = matcher::first_at_any_scale(
            frame,
            template,
            region,
            p.screen_fallback_threshold,
            &p.screen_scales,
            &p.screen_scan,
        ) {
            tracing::debug!(
                "matching screen at ({}, {}) scale={scale:.2} score={:.3}",
                hit.x, hit.y, hit.score
            );
            return true;
        }

        let ratio = self.bright_text_ratio(frame);
        tracing::debug!("bright text ratio {ratio:.3}");
        ratio > p.bright_text_ratio
    }

    fn find_accept_button(&self, frame: &RgbImage) -> Option<ButtonMatch> {
        let region = Self::button_region(frame);
        if region.is_empty() {
            return None;
        }

        if let Some((hit, scale)) = self.template_search(frame, region) {
            tracing::debug!(
                "accept button candidate at ({}, {}) scale={scale:.2} score={:.3}",
                hit.x, hit.y, hit.score
            );
            return Some(ButtonMatch {
                x: hit.x,
                y: hit.y,
                score: hit.score,
                scale,
                method: DetectionMethod::Template,
            });
        }

        if let Some(cluster) = self.color_cluster(frame, region) {
            tracing::debug!("button colour cluster of {} at ({}, {})", cluster.size, cluster.x, cluster.y);
            return Some(self.heuristic_match(frame, cluster.x, cluster.y, DetectionMethod::ColorCluster));
        }

        if let Some(window) = self.edge_window(frame, region) {
            tracing::debug!("edge window at ({}, {}) density={:.3}", window.x, window.y, window.density);
            return Some(self.heuristic_match(frame, window.x, window.y, DetectionMethod::EdgeDensity));
        }

        None
    }

    fn analyze(&self, frame: &RgbImage) -> FrameAnalysis {
        let started = Instant::now();
        let match_screen = self.is_match_screen_present(frame);
        let match_screen_ms = elapsed_ms(started);

        let started = Instant::now();
        let accept_button = self.find_accept_button(frame);
        let accept_button_ms = elapsed_ms(started);

        // Each fallback is reported on its own, whether or not it was needed.
        let region = Self::button_region(frame);
        let template_sizes = [
            (TemplateKind::MatchingScreen, &self.templates.matching),
            (TemplateKind::AcceptButton, &self.templates.accept),
        ]
        .into_iter()
        .map(|(kind, t)| TemplateSize {
            kind,
            width: t.width(),
            height: t.height(),
        })
        .collect();

        FrameAnalysis {
            frame_width: frame.width(),
            frame_height: frame.height(),
            template_sizes,
            match_screen,
            match_screen_ms,
            bright_text_ratio: Some(self.bright_text_ratio(frame)),
            accept_button,
            accept_button_ms,
            template_hit: self.template_search(frame, region).map(|(hit, _)| hit),
            color_cluster: self.color_cluster(frame, region),
            edge_window: self.edge_window(frame, region),
            button_color_ratio: Some(heuristics::button_color_ratio(frame, Self::button_band(frame), 5)),
        }
    }
}
