use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MergeError;

/// Size of the render canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanvasSpec {
    /// Natural size of the first video (the filler when there is none).
    FirstVideo,
    Fixed { width: u32, height: u32 },
}

/// What differs between the supported merge variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeProfile {
    pub first_video_optional: bool,
    pub canvas: CanvasSpec,
    pub audio_sample_rate: u32,
}

impl MergeProfile {
    /// First video mandatory, rendered at its own size, 44.1 kHz audio.
    pub fn classic() -> Self {
        Self {
            first_video_optional: false,
            canvas: CanvasSpec::FirstVideo,
            audio_sample_rate: 44_100,
        }
    }

    /// First video optional, phone-screen canvas, 32 kHz audio.
    pub fn portrait_screen() -> Self {
        Self {
            first_video_optional: true,
            canvas: CanvasSpec::Fixed {
                width: 390,
                height: 844,
            },
            audio_sample_rate: 32_000,
        }
    }
}

impl Default for MergeProfile {
    fn default() -> Self {
        Self::classic()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub profile: MergeProfile,
    pub frame_rate: u32,
    pub video_bitrate: usize,
    pub audio_bitrate: usize,
    pub audio_channels: u16,
    pub render_crf: u32,
    pub render_audio_bitrate: usize,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub filler_name: String,
    pub pump_timeout_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            profile: MergeProfile::classic(),
            frame_rate: 30,
            video_bitrate: 1_250_000,
            audio_bitrate: 128_000,
            audio_channels: 2,
            render_crf: 18,
            render_audio_bitrate: 256_000,
            cache_dir: tmp.join("video-merge-cache"),
            temp_dir: tmp,
            output_dir: PathBuf::from("."),
            assets_dir: PathBuf::from("assets"),
            filler_name: "Untitled.mp4".to_string(),
            pump_timeout_secs: 600,
        }
    }
}

impl MergeConfig {
    /// Reads a JSON config; absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, MergeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MergeError::Config(format!("read {}: {}", path.display(), e)))?;
        let config: MergeConfig = serde_json::from_str(&text)
            .map_err(|e| MergeError::Config(format!("parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        if self.frame_rate != 25 && self.frame_rate != 30 {
            return Err(MergeError::Config(format!(
                "frame_rate must be 25 or 30, got {}",
                self.frame_rate
            )));
        }
        if self.video_bitrate == 0 || self.audio_bitrate == 0 || self.render_audio_bitrate == 0 {
            return Err(MergeError::Config("bitrates must be positive".to_string()));
        }
        if self.audio_channels == 0 {
            return Err(MergeError::Config("audio_channels must be positive".to_string()));
        }
        if self.profile.audio_sample_rate == 0 {
            return Err(MergeError::Config("audio_sample_rate must be positive".to_string()));
        }
        if let CanvasSpec::Fixed { width, height } = self.profile.canvas {
            if width == 0 || height == 0 {
                return Err(MergeError::Config(format!(
                    "canvas must not be empty, got {}x{}",
                    width, height
                )));
            }
        }
        if self.pump_timeout_secs == 0 {
            return Err(MergeError::Config("pump_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn pump_timeout(&self) -> Duration {
        Duration::from_secs(self.pump_timeout_secs)
    }
}

pub fn config() -> &'static MergeConfig {
    static CONFIG: LazyLock<MergeConfig> = LazyLock::new(MergeConfig::default);
    &CONFIG
}
