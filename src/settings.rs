//! Application settings persistence
//!
//! Settings are stored as JSON under the user config directory,
//! `~/.config/chatvoz/settings.json` on Linux. Missing or unreadable
//! files fall back to defaults; unknown fields in an older file are
//! ignored and missing fields take their defaults.

use std::fs;
use std::path::PathBuf;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::audio::DEFAULT_MAX_SECONDS;

const SETTINGS_DIR: &str = "chatvoz";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Nickname used to log in to the chat
    pub nickname: String,
    /// Hard cap on a single recording, in seconds
    pub max_recording_secs: f64,
    /// Initial playback volume, 0.0 to 1.0
    pub default_volume: f32,
    /// Start the message simulator when entering the chat
    pub simulate_on_start: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            max_recording_secs: DEFAULT_MAX_SECONDS,
            default_volume: 1.0,
            simulate_on_start: true,
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults on any failure.
    pub fn load() -> Self {
        let Some(path) = settings_path() else {
            warn!("No config directory available, using default settings");
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    debug!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persist the settings, creating the config directory if needed.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = settings_path()
            .ok_or_else(|| anyhow::anyhow!("no config directory available"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }
}

fn settings_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join(SETTINGS_DIR).join(SETTINGS_FILE))
}
