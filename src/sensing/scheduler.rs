//! Multi-rate sampling against one session log.
//!
//! Every enabled category owns a [`PeriodicTimer`]; the serialization loop
//! calls [`SamplingScheduler::tick`] and each due task runs to completion on
//! that thread, in category order. Only camera stills and WAV encodes leave
//! the thread, and they come back through the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tokio::sync::watch;

use crate::dispatch::DispatchHandle;
use crate::error::{SuiteError, SuiteResult};
use crate::models::{LogSession, LogStats};
use crate::recording::media::{self, audio_file_name, unique_path};
use crate::recording::{BufferedLog, MediaEvents, MediaKind, SaveTracker};
use crate::sensors::{Capabilities, SensorCategory, SensorRig};
use crate::settings::SuiteSettings;
use crate::{log_debug, log_error, log_info, log_warn};

use super::periodic::PeriodicTimer;
use super::schema::{AudioLevels, RowKind, Schema};
use super::snapshot::SensorSnapshot;
use super::state::CollectionState;

const ENABLE_LOGS: bool = true;

pub const SUBJECT_ID_EVENT: &str = "SUBJECT_ID";
pub const LUX_READING_EVENT: &str = "LUX_READING";
pub const AUDIO_ACTIVITY_EVENT: &str = "AUDIO_ACTIVITY";
pub const AUDIO_LEVEL_EVENT: &str = "AUDIO_LEVEL";
pub const AUDIO_RECORDING_START_EVENT: &str = "AUDIO_RECORDING_START";
pub const AUDIO_RECORDING_END_EVENT: &str = "AUDIO_RECORDING_END";

struct SamplingTask {
    category: SensorCategory,
    timer: PeriodicTimer,
}

struct AudioSegment {
    file_name: String,
    path: std::path::PathBuf,
}

#[derive(Default)]
struct AudioState {
    /// RMS of the most recent level window.
    level: f32,
    sequence: u32,
    segment: Option<AudioSegment>,
}

impl AudioState {
    fn recording_file(&self) -> Option<&str> {
        self.segment.as_ref().map(|s| s.file_name.as_str())
    }
}

pub struct SamplingScheduler {
    settings: SuiteSettings,
    rig: SensorRig,
    log: BufferedLog,
    schema: Schema,
    state: CollectionState,
    tasks: Vec<SamplingTask>,
    audio: AudioState,
    capabilities: watch::Receiver<Capabilities>,
    frame_busy: Arc<AtomicBool>,
    saves: SaveTracker,
    dispatch: DispatchHandle<SamplingScheduler>,
}

impl SamplingScheduler {
    pub fn new(
        settings: SuiteSettings,
        rig: SensorRig,
        dispatch: DispatchHandle<SamplingScheduler>,
    ) -> Self {
        let log = BufferedLog::new(settings.sensor_data_dir(), settings.log.clone());
        let capabilities = rig.capabilities.subscribe();
        Self {
            settings,
            rig,
            log,
            schema: Schema::default(),
            state: CollectionState::new(),
            tasks: Vec::new(),
            audio: AudioState::default(),
            capabilities,
            frame_busy: Arc::new(AtomicBool::new(false)),
            saves: SaveTracker::default(),
            dispatch,
        }
    }

    pub fn settings(&self) -> &SuiteSettings {
        &self.settings
    }

    /// Replace the settings. Only allowed while idle; the log is reopened
    /// under the new output directory on the next start.
    pub fn apply_settings(&mut self, settings: SuiteSettings) -> SuiteResult<()> {
        if self.state.is_running() {
            return Err(SuiteError::AlreadyCollecting);
        }
        settings.validate()?;
        self.log = BufferedLog::new(settings.sensor_data_dir(), settings.log.clone());
        self.settings = settings;
        Ok(())
    }

    pub fn state(&self) -> &CollectionState {
        &self.state
    }

    pub fn is_collecting(&self) -> bool {
        self.state.is_running()
    }

    pub fn total_samples(&self) -> u64 {
        self.state.total_samples
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.state.subject_id.as_deref()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn log(&self) -> &BufferedLog {
        &self.log
    }

    pub fn log_stats(&self) -> LogStats {
        self.log.stats()
    }

    pub fn saves_in_flight(&self) -> usize {
        self.saves.in_flight()
    }

    pub fn active_categories(&self) -> Vec<SensorCategory> {
        self.tasks.iter().map(|task| task.category).collect()
    }

    /// Earliest instant at which some task becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter_map(|task| task.timer.next_due())
            .min()
    }

    /// Open a session, write the header and subject row, and schedule every
    /// enabled category whose hardware is usable. Tasks first fire at `now`.
    pub fn start_collection(
        &mut self,
        subject_id: Option<&str>,
        now: Instant,
    ) -> SuiteResult<LogSession> {
        if self.state.is_running() {
            log_warn!("Data collection already in progress");
            return Err(SuiteError::AlreadyCollecting);
        }
        self.settings.validate()?;

        let session = self.log.start(subject_id)?;

        let channels = self
            .rig
            .expressions
            .as_ref()
            .map(|tracker| tracker.channel_names())
            .unwrap_or_default();
        self.schema = Schema::new(channels);
        self.log.write_header(&self.schema.header());

        self.audio = AudioState::default();
        self.capabilities.borrow_and_update();
        self.write_event(SUBJECT_ID_EVENT, &session.subject_id, None);

        self.tasks = self.schedule(now);
        self.state
            .begin(session.subject_id.clone(), session.created_at, now);

        log_info!(
            "Started data collection with subject ID: {} ({} tasks: {:?})",
            session.subject_id,
            self.tasks.len(),
            self.active_categories()
        );
        Ok(session)
    }

    /// Cancel every task and close the log. Saves already running are left
    /// to finish; their completions find the scheduler idle and are dropped.
    pub fn stop_collection(&mut self) -> Option<LogSession> {
        if !self.state.is_running() {
            log_warn!("Data collection not in progress");
            return None;
        }

        if self.audio.segment.is_some() {
            self.finish_segment();
        }
        self.tasks.clear();
        let closed = self.log.stop();
        self.state.finish();

        log_info!(
            "Stopped data collection. Total data points collected: {}",
            self.state.total_samples
        );
        closed
    }

    /// Run every task that is due at `now`.
    pub fn tick(&mut self, now: Instant) {
        if !self.state.is_running() {
            return;
        }
        if self.capabilities.has_changed().unwrap_or(false) {
            self.capabilities.borrow_and_update();
            self.prune_unavailable();
        }

        for idx in 0..self.tasks.len() {
            if !self.tasks[idx].timer.poll(now) {
                continue;
            }
            let category = self.tasks[idx].category;
            if let Err(err) = self.run_task(category) {
                log_error!("Error collecting {category} data: {err}");
            }
        }
    }

    /// Flush if the log has sat unflushed past its auto-flush interval.
    pub fn housekeeping(&self) {
        self.log.flush_if_stale();
    }

    /// Flush without closing, for when the host loses focus or is paused.
    pub fn safety_flush(&self) {
        if self.log.is_recording() {
            self.log.flush();
            log_debug!("Safety flush completed");
        }
    }

    /// Write a discrete event row. Ignored unless collecting.
    pub fn log_event(&mut self, name: &str, value: &str) -> bool {
        if !self.state.is_running() {
            log_warn!("Ignoring {name} event: data collection not in progress");
            return false;
        }
        self.write_event(name, value, None)
    }

    fn schedule(&self, origin: Instant) -> Vec<SamplingTask> {
        let mut tasks = Vec::new();
        for category in SensorCategory::ALL {
            if !self.settings.collect.is_enabled(category) {
                continue;
            }
            if !self.rig.has(category) {
                log_info!("{}; not scheduled", SuiteError::SensorUnavailable(category));
                continue;
            }
            let Some(rate) = self.settings.sampling.rate_hz(category) else {
                continue;
            };
            tasks.push(SamplingTask {
                category,
                timer: PeriodicTimer::new(rate, origin),
            });
        }
        tasks
    }

    fn prune_unavailable(&mut self) {
        let rig = &self.rig;
        let before = self.tasks.len();
        self.tasks.retain(|task| {
            let keep = rig.has(task.category);
            if !keep {
                log_warn!(
                    "{}; stopping its task",
                    SuiteError::SensorUnavailable(task.category)
                );
            }
            keep
        });
        let segment_lost = self.audio.segment.is_some()
            && !self
                .tasks
                .iter()
                .any(|task| task.category == SensorCategory::AudioFile);
        if segment_lost {
            self.audio.segment = None;
        }
        if before != self.tasks.len() {
            log_debug!("Active tasks now {:?}", self.active_categories());
        }
    }

    fn run_task(&mut self, category: SensorCategory) -> SuiteResult<()> {
        match category {
            SensorCategory::EyeTracking => self.sample_eyes(),
            SensorCategory::Imu => {
                let snapshot = self.capture_snapshot();
                self.write(&RowKind::ImuSample, &snapshot);
                Ok(())
            }
            SensorCategory::Light => {
                self.sample_light();
                Ok(())
            }
            SensorCategory::AudioLevel => self.sample_audio_level(),
            SensorCategory::VideoFrame => {
                self.request_frame();
                Ok(())
            }
            SensorCategory::AudioFile => {
                if self.audio.segment.is_some() {
                    self.finish_segment();
                }
                self.begin_segment();
                Ok(())
            }
        }
    }

    fn sample_eyes(&mut self) -> SuiteResult<()> {
        let Some(tracker) = self.rig.eye_tracker.as_mut() else {
            return Ok(());
        };
        let Some(frame) = tracker
            .poll()
            .map_err(|err| SuiteError::transient(SensorCategory::EyeTracking, err))?
        else {
            return Ok(());
        };

        for (pupil, geometry) in frame.valid_pairs() {
            let snapshot = self.capture_snapshot();
            let kind = RowKind::GazeSample {
                pupil,
                geometry,
                behavior: &frame.behavior,
                static_data: frame.static_data.as_ref(),
                gaze_pose: frame.gaze_pose.as_ref(),
            };
            self.write(&kind, &snapshot);
        }
        Ok(())
    }

    /// The snapshot's single light read feeds both `Value` and `LuxValue`.
    /// Read failures are already logged by the snapshot.
    fn sample_light(&mut self) {
        if self.rig.light.is_none() {
            return;
        }
        let snapshot = self.capture_snapshot();
        if let Some(lux) = snapshot.lux {
            let value = format!("{lux:.2}");
            let kind = RowKind::Event {
                name: LUX_READING_EVENT,
                value: &value,
                audio: None,
            };
            self.write(&kind, &snapshot);
        }
    }

    fn sample_audio_level(&mut self) -> SuiteResult<()> {
        let Some(input) = self.rig.audio.as_mut() else {
            return Ok(());
        };
        let samples = input
            .read_new_samples()
            .map_err(|err| SuiteError::transient(SensorCategory::AudioLevel, err))?;

        let (peak, rms) = window_levels(&samples);
        self.audio.level = rms;
        let name = if peak > self.settings.sampling.audio_sensitivity {
            AUDIO_ACTIVITY_EVENT
        } else {
            AUDIO_LEVEL_EVENT
        };
        let levels = AudioLevels {
            level: self.audio.level,
            peak,
            rms,
        };
        self.write_event(name, &format!("{peak:.4}"), Some(levels));
        Ok(())
    }

    fn request_frame(&mut self) {
        let Some(camera) = self.rig.camera.clone() else {
            return;
        };
        if self.frame_busy.swap(true, Ordering::SeqCst) {
            log_debug!("Previous frame still in flight; skipping capture");
            return;
        }
        media::capture_frame(
            camera,
            self.settings.video_frames_dir(),
            Arc::clone(&self.frame_busy),
            &self.saves,
            self.dispatch.clone(),
        );
    }

    fn begin_segment(&mut self) {
        let Some(input) = self.rig.audio.as_mut() else {
            return;
        };
        let sequence = self.audio.sequence;
        self.audio.sequence += 1;

        let dir = self.settings.audio_recordings_dir();
        let path = unique_path(&dir, &audio_file_name(&Local::now(), sequence));
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        match input.begin_segment(self.settings.sampling.audio_segment()) {
            Ok(()) => {
                self.audio.segment = Some(AudioSegment {
                    file_name: file_name.clone(),
                    path,
                });
                self.write_event(AUDIO_RECORDING_START_EVENT, &file_name, None);
            }
            Err(err) => log_error!("Error recording audio segment {file_name}: {err}"),
        }
    }

    /// End the current segment, hand the clip to a save worker and log the
    /// end marker while the file is still the current recording.
    fn finish_segment(&mut self) {
        let Some(input) = self.rig.audio.as_mut() else {
            self.audio.segment = None;
            return;
        };
        let Some(segment) = self.audio.segment.as_ref() else {
            return;
        };
        let file_name = segment.file_name.clone();

        match input.finish_segment() {
            Ok(clip) => {
                media::save_audio(
                    clip,
                    segment.path.clone(),
                    &self.saves,
                    self.dispatch.clone(),
                );
            }
            Err(err) => log_error!("No audio clip to save for {file_name}: {err}"),
        }

        self.write_event(AUDIO_RECORDING_END_EVENT, &file_name, None);
        self.audio.segment = None;
    }

    fn capture_snapshot(&mut self) -> SensorSnapshot {
        SensorSnapshot::capture(
            &mut self.rig,
            &self.settings.collect,
            &self.settings.context,
            self.schema.expression_channels().len(),
        )
    }

    fn write_event(&mut self, name: &str, value: &str, audio: Option<AudioLevels>) -> bool {
        let snapshot = self.capture_snapshot();
        self.write(&RowKind::Event { name, value, audio }, &snapshot)
    }

    fn write(&mut self, kind: &RowKind<'_>, snapshot: &SensorSnapshot) -> bool {
        let row = self
            .schema
            .assemble(kind, snapshot, self.audio.recording_file());
        let written = self.log.write_row(&row);
        if written {
            self.state.record_sample();
        }
        written
    }
}

impl MediaEvents for SamplingScheduler {
    fn media_saved(&mut self, kind: MediaKind, file_name: String) {
        log_info!("{kind:?} saved: {file_name}");
        self.log_event(kind.saved_event(), &file_name);
    }

    fn media_failed(&mut self, kind: MediaKind, error: SuiteError) {
        log_error!("{kind:?} save failed: {error}");
    }
}

/// Peak absolute amplitude and RMS of one window. Both are zero for an empty
/// window.
pub fn window_levels(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let (peak, sum_squares) = samples.iter().fold((0.0f32, 0.0f32), |(peak, sum), s| {
        let magnitude = s.abs();
        (peak.max(magnitude), sum + magnitude * magnitude)
    });
    (peak, (sum_squares / samples.len() as f32).sqrt())
}
