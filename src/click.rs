use std::process::Command;
use std::time::Duration;

use thiserror::Error;

/// Pause between pointer move and button press so the target registers hover.
const HOVER_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ClickError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed {
        program: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("click task did not complete: {0}")]
    Interrupted(String),
}

/// Moves the pointer and performs a left press+release at frame coordinates.
pub trait Clicker: Send + Sync {
    fn click(&self, x: u32, y: u32) -> Result<(), ClickError>;

    /// Whether the backing automation tool is installed.
    fn is_available(&self) -> bool;

    fn backend(&self) -> &'static str;
}

/// `xdotool` on Unix desktops, PowerShell `mouse_event` on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClicker;

impl SystemClicker {
    fn program() -> &'static str {
        if cfg!(windows) { "powershell" } else { "xdotool" }
    }
}

impl Clicker for SystemClicker {
    fn click(&self, x: u32, y: u32) -> Result<(), ClickError> {
        if cfg!(windows) {
            return run("powershell", &powershell_args(x, y));
        }

        run("xdotool", &move_args(x, y))?;
        std::thread::sleep(HOVER_DELAY);
        run("xdotool", &["click".to_owned(), "1".to_owned()])
    }

    fn is_available(&self) -> bool {
        if cfg!(windows) {
            return true;
        }
        Command::new("which")
            .arg("xdotool")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn backend(&self) -> &'static str {
        Self::program()
    }
}

fn run(program: &'static str, args: &[String]) -> Result<(), ClickError> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| ClickError::Spawn { program, source })?;

    if !status.success() {
        return Err(ClickError::Failed { program, status });
    }
    Ok(())
}

fn move_args(x: u32, y: u32) -> Vec<String> {
    vec!["mousemove".into(), x.to_string(), y.to_string()]
}

fn powershell_args(x: u32, y: u32) -> Vec<String> {
    let script = format!(
        "Add-Type -AssemblyName System.Windows.Forms; \
         [System.Windows.Forms.Cursor]::Position = New-Object System.Drawing.Point({x}, {y}); \
         Start-Sleep -Milliseconds {delay}; \
         Add-Type -MemberDefinition '[DllImport(\"user32.dll\")] public static extern void mouse_event(int f, int dx, int dy, int d, int e);' -Name U32 -Namespace W; \
         [W.U32]::mouse_event(0x02, 0, 0, 0, 0); [W.U32]::mouse_event(0x04, 0, 0, 0, 0)",
        delay = HOVER_DELAY.as_millis()
    );
    vec!["-NoProfile".into(), "-NonInteractive".into(), "-Command".into(), script]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_args() {
        assert_eq!(move_args(500, 600), ["mousemove", "500", "600"]);
    }

    #[test]
    fn test_powershell_script_embeds_coordinates() {
        let args = powershell_args(12, 34);
        assert_eq!(args[2], "-Command");
        assert!(args[3].contains("Point(12, 34)"));
        assert!(args[3].contains("mouse_event(0x02"));
        assert!(args[3].contains("Start-Sleep -Milliseconds 50"));
    }

    #[test]
    fn test_backend_name() {
        let expected = if cfg!(windows) { "powershell" } else { "xdotool" };
        assert_eq!(SystemClicker.backend(), expected);
    }
}
