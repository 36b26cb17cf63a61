use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::detector::heuristics::{ClusterParams, EdgeParams};
use crate::detector::matcher::ScanParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("unknown detection profile: {0} (expected high_recall or low_latency)")]
    UnknownProfile(String),
}

/// Every tunable of the detection engine and the monitor loop.
///
/// The two presets differ only in scan density; everything else is shared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub name: &'static str,
    /// Sliding-window scan of the accept-button search.
    pub scan: ScanParams,
    /// Sliding-window scan of the full-frame matching-screen search.
    pub screen_scan: ScanParams,
    pub button_scales: Vec<f64>,
    pub button_thresholds: Vec<f64>,
    pub screen_scales: Vec<f64>,
    pub screen_primary_threshold: f64,
    pub screen_fallback_threshold: f64,
    /// Near-white share of the centre band that counts as the queue screen.
    pub bright_text_ratio: f64,
    pub bright_text_stride: u32,
    pub cluster: ClusterParams,
    pub edge: EdgeParams,
    /// Verification score a button must strictly exceed to be clicked.
    pub firing_threshold: f64,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    #[serde(with = "millis")]
    pub watch_interval: Duration,
    #[serde(with = "millis")]
    pub settle_delay: Duration,
}

impl Profile {
    /// Dense 2px scan with a forgiving colour distance for the final button scan.
    pub fn high_recall() -> Self {
        Self {
            name: "high_recall",
            scan: ScanParams {
                stride: 2,
                sample_step: 2,
                loose_distance: 150,
            },
            screen_scan: ScanParams {
                stride: 2,
                sample_step: 2,
                loose_distance: 150,
            },
            button_scales: vec![0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.3, 1.5],
            button_thresholds: vec![0.4, 0.5, 0.6, 0.7],
            screen_scales: vec![0.5, 0.7, 0.8, 1.2, 1.5, 2.0],
            screen_primary_threshold: 0.6,
            screen_fallback_threshold: 0.5,
            bright_text_ratio: 0.05,
            bright_text_stride: 3,
            cluster: ClusterParams {
                stride: 2,
                radius: 20,
                min_size: 50,
            },
            edge: EdgeParams {
                probe_width: 100,
                probe_height: 50,
                stride: 5,
                sample_step: 2,
                min_contrast: 30,
                min_density: 0.15,
            },
            firing_threshold: 0.2,
            poll_interval: Duration::from_millis(500),
            watch_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
        }
    }

    /// Coarse 5px scan with 3px template sampling for slower machines.
    pub fn low_latency() -> Self {
        let coarse = ScanParams {
            stride: 5,
            sample_step: 3,
            loose_distance: 120,
        };
        Self {
            name: "low_latency",
            scan: ScanParams {
                loose_distance: 150,
                ..coarse
            },
            screen_scan: coarse,
            ..Self::high_recall()
        }
    }

    pub fn by_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "high_recall" | "high-recall" => Ok(Self::high_recall()),
            "low_latency" | "low-latency" => Ok(Self::low_latency()),
            other => Err(ConfigError::UnknownProfile(other.into())),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::high_recall()
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    /// Searched first for reference templates.
    pub assets_dir: Option<PathBuf>,
    pub profile: Profile,
    /// Screenshot command used instead of the built-in monitor capture;
    /// `{path}` is replaced with the PNG to write.
    pub capture_command: Option<String>,
    /// Start the auto-watcher as soon as the service is up.
    pub auto_watch: bool,
    /// When set, control endpoints require `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    /// When set, diagnostics save an annotated copy of the analysed frame here.
    pub debug_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8081".into(),
            assets_dir: None,
            profile: Profile::default(),
            capture_command: None,
            auto_watch: true,
            auth_token: None,
            debug_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let listen_addr = optional_env("AUTOACCEPT_LISTEN_ADDR").unwrap_or(defaults.listen_addr);

        let assets_dir = optional_env("AUTOACCEPT_ASSETS_DIR").map(PathBuf::from);

        let profile = match optional_env("AUTOACCEPT_PROFILE") {
            Some(name) => Profile::by_name(&name)?,
            None => defaults.profile,
        };

        let capture_command = optional_env("AUTOACCEPT_CAPTURE_CMD");

        let auto_watch = match optional_env("AUTOACCEPT_AUTO_WATCH") {
            Some(v) => parse_bool("AUTOACCEPT_AUTO_WATCH", &v)?,
            None => defaults.auto_watch,
        };

        let auth_token = optional_env("AUTOACCEPT_AUTH_TOKEN");

        let debug_dir = optional_env("AUTOACCEPT_DEBUG_DIR").map(PathBuf::from);

        Ok(Config {
            listen_addr,
            assets_dir,
            profile,
            capture_command,
            auto_watch,
            auth_token,
            debug_dir,
        })
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.into(),
            value: value.into(),
        }),
    }
}
