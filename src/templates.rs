use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    MatchingScreen,
    AcceptButton,
}

impl TemplateKind {
    pub fn file_name(self) -> &'static str {
        match self {
            TemplateKind::MatchingScreen => "matching.png",
            TemplateKind::AcceptButton => "accept_button.png",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::MatchingScreen => f.write_str("matching-screen"),
            TemplateKind::AcceptButton => f.write_str("accept-button"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("{kind} template {file} not found in any search path ({} searched)", .searched.len())]
    Missing {
        kind: TemplateKind,
        file: &'static str,
        searched: Vec<PathBuf>,
    },

    #[error("failed to decode {kind} template {}: {source}", .path.display())]
    Decode {
        kind: TemplateKind,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{0} template has zero size")]
    Empty(TemplateKind),
}

/// Source of reference images.
pub trait TemplateStore: Send + Sync {
    fn load(&self, kind: TemplateKind) -> Result<RgbImage, TemplateError>;
}

/// Both reference images of one monitoring session.
#[derive(Debug, Clone)]
pub struct Templates {
    pub matching: RgbImage,
    pub accept: RgbImage,
}

impl Templates {
    /// Load both templates; either failing aborts the whole load.
    pub fn load(store: &dyn TemplateStore) -> Result<Self, TemplateError> {
        let matching = store.load(TemplateKind::MatchingScreen)?;
        let accept = store.load(TemplateKind::AcceptButton)?;
        Ok(Self { matching, accept })
    }
}

/// Templates read from PNG files on disk.
///
/// Search order for each file:
/// 1. `AUTOACCEPT_ASSETS_DIR` (if configured)
/// 2. `./resources`
/// 3. `./assets`
/// 4. `<exe>/../share/autoaccept/resources` (packaged install layout)
#[derive(Debug, Clone)]
pub struct AssetTemplates {
    dirs: Vec<PathBuf>,
}

impl AssetTemplates {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn with_default_dirs(assets_dir: Option<&Path>) -> Self {
        let bin_share = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent()?.parent().map(|p| p.join("share/autoaccept/resources")));

        let dirs = [
            assets_dir.map(Path::to_path_buf),
            Some(PathBuf::from("resources")),
            Some(PathBuf::from("assets")),
            bin_share,
        ]
        .into_iter()
        .flatten()
        .collect();

        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl TemplateStore for AssetTemplates {
    fn load(&self, kind: TemplateKind) -> Result<RgbImage, TemplateError> {
        let file = kind.file_name();
        let candidates: Vec<PathBuf> = self.dirs.iter().map(|d| d.join(file)).collect();
        let mut decode_error = None;

        for path in &candidates {
            if !path.exists() {
                continue;
            }
            match image::open(path) {
                Ok(img) => {
                    let rgb = img.to_rgb8();
                    if rgb.width() == 0 || rgb.height() == 0 {
                        return Err(TemplateError::Empty(kind));
                    }
                    tracing::info!(
                        "loaded {kind} template: {} ({}x{})",
                        path.display(),
                        rgb.width(),
                        rgb.height()
                    );
                    return Ok(rgb);
                }
                Err(e) => {
                    tracing::warn!("failed to decode {}: {e}", path.display());
                    if decode_error.is_none() {
                        decode_error = Some(TemplateError::Decode {
                            kind,
                            path: path.clone(),
                            source: e,
                        });
                    }
                }
            }
        }

        Err(decode_error.unwrap_or(TemplateError::Missing {
            kind,
            file,
            searched: candidates,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb([10, 200, 150]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_loads_both_templates() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "matching.png", 30, 10);
        write_png(dir.path(), "accept_button.png", 12, 6);

        let store = AssetTemplates::new(vec![dir.path().to_path_buf()]);
        let templates = Templates::load(&store).unwrap();
        assert_eq!(templates.matching.dimensions(), (30, 10));
        assert_eq!(templates.accept.dimensions(), (12, 6));
    }

    #[test]
    fn test_first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_png(first.path(), "accept_button.png", 5, 5);
        write_png(second.path(), "accept_button.png", 9, 9);

        let store = AssetTemplates::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(store.load(TemplateKind::AcceptButton).unwrap().dimensions(), (5, 5));
    }

    #[test]
    fn test_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "matching.png", 30, 10);

        let store = AssetTemplates::new(vec![dir.path().to_path_buf()]);
        match Templates::load(&store) {
            Err(TemplateError::Missing { kind, searched, .. }) => {
                assert_eq!(kind, TemplateKind::AcceptButton);
                assert_eq!(searched.len(), 1);
            }
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn test_undecodable_template_falls_through_to_next_dir() {
        let broken = tempfile::tempdir().unwrap();
        let good = tempfile::tempdir().unwrap();
        std::fs::write(broken.path().join("matching.png"), b"not a png").unwrap();
        write_png(good.path(), "matching.png", 7, 3);

        let store = AssetTemplates::new(vec![broken.path().to_path_buf(), good.path().to_path_buf()]);
        assert_eq!(store.load(TemplateKind::MatchingScreen).unwrap().dimensions(), (7, 3));

        let only_broken = AssetTemplates::new(vec![broken.path().to_path_buf()]);
        assert!(matches!(
            only_broken.load(TemplateKind::MatchingScreen),
            Err(TemplateError::Decode { .. })
        ));
    }

    #[test]
    fn test_default_dirs_prefer_configured_assets() {
        let store = AssetTemplates::with_default_dirs(Some(Path::new("/opt/aa")));
        assert_eq!(store.dirs()[0], PathBuf::from("/opt/aa"));
        assert_eq!(store.dirs()[1], PathBuf::from("resources"));
    }
}
