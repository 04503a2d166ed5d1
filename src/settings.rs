use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::error::{SuiteError, SuiteResult};
use crate::recording::LogConfig;
use crate::sensors::SensorCategory;

const APP_DIR_NAME: &str = "sensor-suite";
pub const SENSOR_DATA_DIR: &str = "SensorData";
pub const VIDEO_FRAMES_DIR: &str = "VideoFrames";
pub const AUDIO_RECORDINGS_DIR: &str = "AudioRecordings";

/// Sampling frequencies (Hz) and capture intervals (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SamplingConfig {
    pub eye_tracking_hz: f64,
    pub imu_hz: f64,
    pub light_hz: f64,
    pub audio_level_hz: f64,
    pub video_interval_secs: f64,
    pub audio_segment_secs: f64,
    /// Peak amplitude above which an audio window counts as activity.
    pub audio_sensitivity: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            eye_tracking_hz: 60.0,
            imu_hz: 30.0,
            light_hz: 1.0,
            audio_level_hz: 10.0,
            video_interval_secs: 0.5,
            audio_segment_secs: 10.0,
            audio_sensitivity: 0.02,
        }
    }
}

impl SamplingConfig {
    /// Runs per second of a category's task; capture intervals are inverted.
    pub fn rate_hz(&self, category: SensorCategory) -> Option<f64> {
        let rate = match category {
            SensorCategory::EyeTracking => self.eye_tracking_hz,
            SensorCategory::Imu => self.imu_hz,
            SensorCategory::Light => self.light_hz,
            SensorCategory::AudioLevel => self.audio_level_hz,
            SensorCategory::VideoFrame => 1.0 / self.video_interval_secs,
            SensorCategory::AudioFile => 1.0 / self.audio_segment_secs,
        };
        (rate.is_finite() && rate > 0.0).then_some(rate)
    }

    /// Period between two runs of a category's task.
    pub fn period(&self, category: SensorCategory) -> Option<Duration> {
        let rate = self.rate_hz(category)?;
        Duration::try_from_secs_f64(1.0 / rate)
            .ok()
            .filter(|period| !period.is_zero())
    }

    pub fn audio_segment(&self) -> Duration {
        self.period(SensorCategory::AudioFile)
            .unwrap_or(Duration::from_secs(10))
    }
}

/// Per-category collection switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectionToggles {
    pub eye_tracking: bool,
    pub imu: bool,
    pub facial_expressions: bool,
    pub light: bool,
    pub head_pose: bool,
    pub audio_level: bool,
    pub video_frames: bool,
    pub audio_files: bool,
}

impl Default for CollectionToggles {
    fn default() -> Self {
        Self {
            eye_tracking: true,
            imu: true,
            facial_expressions: true,
            light: true,
            head_pose: true,
            audio_level: true,
            video_frames: true,
            audio_files: true,
        }
    }
}

impl CollectionToggles {
    pub fn none() -> Self {
        Self {
            eye_tracking: false,
            imu: false,
            facial_expressions: false,
            light: false,
            head_pose: false,
            audio_level: false,
            video_frames: false,
            audio_files: false,
        }
    }

    pub fn is_enabled(&self, category: SensorCategory) -> bool {
        match category {
            SensorCategory::EyeTracking => self.eye_tracking,
            SensorCategory::Imu => self.imu,
            SensorCategory::Light => self.light,
            SensorCategory::AudioLevel => self.audio_level,
            SensorCategory::VideoFrame => self.video_frames,
            SensorCategory::AudioFile => self.audio_files,
        }
    }
}

/// Labels copied into the three context columns of every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StudyContext {
    pub study_selection: String,
    pub task_load: String,
    pub path_type: String,
}

impl Default for StudyContext {
    fn default() -> Self {
        Self {
            study_selection: "DefaultStudy".into(),
            task_load: "Medium".into(),
            path_type: "Default".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SuiteSettings {
    pub sampling: SamplingConfig,
    pub collect: CollectionToggles,
    pub context: StudyContext,
    pub log: LogConfig,
    /// Root for all output; the platform data directory when unset.
    pub output_dir: Option<PathBuf>,
}

impl SuiteSettings {
    pub fn output_root(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_output_root)
    }

    pub fn sensor_data_dir(&self) -> PathBuf {
        self.output_root().join(SENSOR_DATA_DIR)
    }

    pub fn video_frames_dir(&self) -> PathBuf {
        self.output_root().join(VIDEO_FRAMES_DIR)
    }

    pub fn audio_recordings_dir(&self) -> PathBuf {
        self.output_root().join(AUDIO_RECORDINGS_DIR)
    }

    /// Reject settings that would leave an enabled task without a usable period.
    pub fn validate(&self) -> SuiteResult<()> {
        for category in SensorCategory::ALL {
            if self.collect.is_enabled(category) && self.sampling.period(category).is_none() {
                return Err(SuiteError::Configuration(format!(
                    "{category} is enabled but its rate/interval is not a positive number"
                )));
            }
        }
        if !self.sampling.audio_sensitivity.is_finite() || self.sampling.audio_sensitivity < 0.0 {
            return Err(SuiteError::Configuration(
                "audio sensitivity must be a non-negative number".into(),
            ));
        }
        if self.log.buffer_size == 0 {
            return Err(SuiteError::Configuration(
                "log buffer size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

pub fn default_output_root() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("settings.json")
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<SuiteSettings>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing file or an unparsable document
    /// yields defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring malformed settings at {}: {err}",
                    path.display()
                );
                SuiteSettings::default()
            })
        } else {
            SuiteSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> SuiteSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: SuiteSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn update_with(&self, change: impl FnOnce(&mut SuiteSettings)) -> Result<()> {
        let mut guard = self.write();
        change(&mut guard);
        self.persist(&guard)
    }

    fn persist(&self, data: &SuiteSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, SuiteSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, SuiteSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_collection_protocol() {
        let settings = SuiteSettings::default();
        assert_eq!(settings.sampling.eye_tracking_hz, 60.0);
        assert_eq!(settings.sampling.imu_hz, 30.0);
        assert_eq!(settings.sampling.light_hz, 1.0);
        assert_eq!(settings.sampling.audio_level_hz, 10.0);
        assert_eq!(settings.sampling.video_interval_secs, 0.5);
        assert_eq!(settings.sampling.audio_segment_secs, 10.0);
        assert_eq!(settings.log, LogConfig::default());
        assert_eq!(settings.context.study_selection, "DefaultStudy");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn output_directories_hang_off_the_root() {
        let settings = SuiteSettings {
            output_dir: Some(PathBuf::from("/data/run")),
            ..Default::default()
        };
        assert_eq!(settings.sensor_data_dir(), PathBuf::from("/data/run/SensorData"));
        assert_eq!(settings.video_frames_dir(), PathBuf::from("/data/run/VideoFrames"));
        assert_eq!(
            settings.audio_recordings_dir(),
            PathBuf::from("/data/run/AudioRecordings")
        );
    }

    #[test]
    fn enabled_category_needs_a_positive_rate() {
        let mut settings = SuiteSettings::default();
        settings.sampling.imu_hz = 0.0;
        assert!(matches!(
            settings.validate(),
            Err(SuiteError::Configuration(_))
        ));

        settings.collect.imu = false;
        assert!(settings.validate().is_ok());

        settings.sampling.light_hz = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let settings: SuiteSettings =
            serde_json::from_str(r#"{"sampling":{"eyeTrackingHz":120.0},"collect":{"videoFrames":false}}"#)
                .unwrap();
        assert_eq!(settings.sampling.eye_tracking_hz, 120.0);
        assert_eq!(settings.sampling.imu_hz, 30.0);
        assert!(!settings.collect.video_frames);
        assert!(settings.collect.audio_files);
    }

    #[test]
    fn store_persists_and_recovers_from_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update_with(|s| s.sampling.light_hz = 4.0)
            .unwrap();
        let reopened = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reopened.get().sampling.light_hz, 4.0);

        fs::write(&path, "{ not json").unwrap();
        let fallback = SettingsStore::new(path).unwrap();
        assert_eq!(fallback.get(), SuiteSettings::default());
    }
}
