use std::path::Path;
use std::process::Command;

use image::{DynamicImage, RgbImage, RgbaImage};
use thiserror::Error;

/// Placeholder in a capture command for the PNG the tool must write.
pub const PATH_PLACEHOLDER: &str = "{path}";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("`{command}` did not produce a screenshot")]
    NoOutput { command: String },

    #[error("failed to decode screenshot: {0}")]
    Decode(#[from] image::ImageError),

    #[error("display unavailable: {0}")]
    Unavailable(String),
}

/// One full-display capture per call.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<RgbImage, CaptureError>;
}

/// Captures the primary monitor through `xcap`, falling back to the first
/// monitor when none is flagged primary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenCapture;

impl FrameSource for ScreenCapture {
    fn capture(&self) -> Result<RgbImage, CaptureError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| CaptureError::Unavailable(format!("failed to enumerate monitors: {e}")))?;

        let primary = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
        let monitor = monitors
            .get(primary)
            .ok_or_else(|| CaptureError::Unavailable("no monitors found".into()))?;

        let image = monitor
            .capture_image()
            .map_err(|e| CaptureError::Unavailable(format!("screen capture failed: {e}")))?;

        to_frame(image)
    }
}

/// Drops the alpha channel. Some compositors hand back a 0x0 image instead of
/// an error when capture is denied.
fn to_frame(image: RgbaImage) -> Result<RgbImage, CaptureError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CaptureError::Unavailable("captured an empty frame".into()));
    }
    Ok(DynamicImage::ImageRgba8(image).to_rgb8())
}

/// Captures by shelling out to a screenshot tool that writes a PNG. Used
/// when `AUTOACCEPT_CAPTURE_CMD` is set.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    command: String,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl FrameSource for CommandCapture {
    fn capture(&self) -> Result<RgbImage, CaptureError> {
        let scratch = tempfile::tempdir().map_err(CaptureError::Scratch)?;
        let path = scratch.path().join("frame.png");
        let command = render_command(&self.command, &path);

        let output = shell(&command).output().map_err(|source| CaptureError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(CaptureError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        if !path.exists() {
            return Err(CaptureError::NoOutput { command });
        }

        Ok(image::open(&path)?.to_rgb8())
    }
}

fn render_command(template: &str, path: &Path) -> String {
    template.replace(PATH_PLACEHOLDER, &path.display().to_string())
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-NonInteractive", "-Command", command]);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn test_to_frame_drops_alpha() {
        let mut image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 0]));
        image.put_pixel(3, 2, Rgba([200, 100, 50, 255]));

        let frame = to_frame(image).unwrap();
        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(*frame.get_pixel(0, 0), Rgb([10, 20, 30]));
        assert_eq!(*frame.get_pixel(3, 2), Rgb([200, 100, 50]));
    }

    #[test]
    fn test_to_frame_rejects_empty_capture() {
        match to_frame(RgbaImage::new(0, 0)) {
            Err(CaptureError::Unavailable(reason)) => assert_eq!(reason, "captured an empty frame"),
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert!(matches!(to_frame(RgbaImage::new(1920, 0)), Err(CaptureError::Unavailable(_))));
    }

    #[test]
    fn test_render_command_substitutes_every_placeholder() {
        let cmd = render_command("grab {path} && chmod 600 {path}", Path::new("/tmp/x/frame.png"));
        assert_eq!(cmd, "grab /tmp/x/frame.png && chmod 600 /tmp/x/frame.png");
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_via_shell_command() {
        let fixtures = tempfile::tempdir().unwrap();
        let source = fixtures.path().join("screen.png");
        RgbImage::from_pixel(16, 9, Rgb([1, 2, 3])).save(&source).unwrap();

        let capture = CommandCapture::new(format!("cp '{}' '{{path}}'", source.display()));
        let frame = capture.capture().unwrap();
        assert_eq!(frame.dimensions(), (16, 9));
        assert_eq!(*frame.get_pixel(0, 0), Rgb([1, 2, 3]));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_command_failure() {
        let capture = CommandCapture::new("echo nope >&2; exit 3");
        match capture.capture() {
            Err(CaptureError::Failed { stderr, status, .. }) => {
                assert_eq!(stderr, "nope");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_without_output_file() {
        let capture = CommandCapture::new("true");
        assert!(matches!(capture.capture(), Err(CaptureError::NoOutput { .. })));
    }
}
