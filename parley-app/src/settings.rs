//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use parley_core::SessionConfig;
use serde::{Deserialize, Serialize};

/// Checked in order; the first non-empty value wins over the stored key.
pub const API_KEY_ENV_VARS: [&str; 2] = ["PARLEY_API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub buffer_size: usize,
    pub visualizer_fps: u32,
    pub speech_threshold: f32,
    pub show_meter: bool,
    pub history_enabled: bool,
    pub retention_days: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            preferred_input_device: None,
            api_key: None,
            model: session.model,
            voice: None,
            system_instruction: None,
            input_sample_rate: session.input_sample_rate,
            output_sample_rate: session.output_sample_rate,
            buffer_size: session.buffer_size,
            visualizer_fps: session.visualizer_fps,
            speech_threshold: session.speech_threshold,
            show_meter: true,
            history_enabled: true,
            retention_days: 90,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = SessionConfig::default();
        self.model = normalize_model(&self.model, &defaults.model);
        self.voice = trimmed(self.voice.take());
        self.system_instruction = trimmed(self.system_instruction.take());
        self.api_key = trimmed(self.api_key.take());
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.input_sample_rate = self.input_sample_rate.clamp(8_000, 96_000);
        self.output_sample_rate = self.output_sample_rate.clamp(8_000, 96_000);
        self.buffer_size = normalize_buffer_size(self.buffer_size);
        self.visualizer_fps = self.visualizer_fps.clamp(1, 240);
        self.speech_threshold = if self.speech_threshold.is_finite() {
            self.speech_threshold.clamp(0.0, 1.0)
        } else {
            defaults.speech_threshold
        };
        self.retention_days = self.retention_days.clamp(1, 3650);
    }

    /// Session parameters derived from these settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            buffer_size: self.buffer_size,
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
            visualizer_fps: self.visualizer_fps,
            speech_threshold: self.speech_threshold,
            ..SessionConfig::default()
        }
    }

    /// API key from the environment, else the stored one.
    pub fn resolve_api_key(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| trimmed(lookup(name)))
            .next()
            .or_else(|| self.api_key.clone())
    }
}

/// Accepts bare model ids ("gemini-2.0-flash-exp") as well as "models/…".
pub fn normalize_model(raw: &str, fallback: &str) -> String {
    let model = raw.trim();
    if model.is_empty() {
        fallback.to_string()
    } else if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Nearest power of two in 256..=16384.
pub fn normalize_buffer_size(raw: usize) -> usize {
    let clamped = raw.clamp(256, 16_384);
    let up = clamped.next_power_of_two();
    let down = up / 2;
    if down >= 256 && clamped - down < up - clamped {
        down
    } else {
        up.min(16_384)
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Parley")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("parley")
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

pub fn default_db_path() -> PathBuf {
    data_dir().join("parley.db")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_session_config() {
        let settings = AppSettings::default();
        let config = settings.session_config();
        config.validate().expect("defaults validate");
        assert_eq!(config.buffer_size, 4096);
        assert!(settings.history_enabled);
    }

    #[test]
    fn normalize_clamps_and_trims() {
        let mut settings: AppSettings = serde_json::from_str(
            r#"{
                "model": " gemini-live ",
                "voice": "  ",
                "apiKey": " secret ",
                "bufferSize": 3000,
                "visualizerFps": 0,
                "retentionDays": 0,
                "inputSampleRate": 1000
            }"#,
        )
        .unwrap();
        settings.normalize();
        assert_eq!(settings.model, "models/gemini-live");
        assert_eq!(settings.voice, None);
        assert_eq!(settings.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.buffer_size, 2048);
        assert_eq!(settings.visualizer_fps, 1);
        assert_eq!(settings.retention_days, 1);
        assert_eq!(settings.input_sample_rate, 8_000);
        settings.session_config().validate().expect("normalized settings validate");
    }

    #[test]
    fn buffer_size_snaps_to_power_of_two() {
        assert_eq!(normalize_buffer_size(0), 256);
        assert_eq!(normalize_buffer_size(4096), 4096);
        assert_eq!(normalize_buffer_size(5000), 4096);
        assert_eq!(normalize_buffer_size(7000), 8192);
        assert_eq!(normalize_buffer_size(1 << 20), 16_384);
    }

    #[test]
    fn environment_key_overrides_stored_key() {
        let settings = AppSettings {
            api_key: Some("stored".into()),
            ..AppSettings::default()
        };
        let none = |_: &str| None;
        assert_eq!(settings.resolve_api_key(none).as_deref(), Some("stored"));

        let gemini_only = |name: &str| (name == "GEMINI_API_KEY").then(|| "from-gemini".to_string());
        assert_eq!(
            settings.resolve_api_key(gemini_only).as_deref(),
            Some("from-gemini")
        );

        let both = |name: &str| Some(format!("{name}-value"));
        assert_eq!(
            settings.resolve_api_key(both).as_deref(),
            Some("PARLEY_API_KEY-value")
        );

        let blank = |_: &str| Some("   ".to_string());
        assert_eq!(settings.resolve_api_key(blank).as_deref(), Some("stored"));
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let path = std::env::temp_dir()
            .join(format!("parley-settings-{}", rand::random::<u32>()))
            .join("settings.json");
        let settings = AppSettings {
            voice: Some("Kore".into()),
            show_meter: false,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("parley-does-not-exist").join("settings.json");
        assert_eq!(load_settings(&path), AppSettings::default());
    }
}
