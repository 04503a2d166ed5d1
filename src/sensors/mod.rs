//! Collaborator interfaces for the hardware the suite samples.
//!
//! The scheduler only ever polls these traits. Reading physical sensors,
//! negotiating permissions and encoding pixels are the implementor's business.

mod types;

pub mod simulated;

pub use types::{
    Capabilities, ConvergenceState, Eye, EyeFrame, EyeStaticData, GazeBehavior,
    GazeBehaviorKind, GazePose, GeometricSample, HeadPose, MotionReading, PupilSample, Quat,
    SensorCategory, StillCapture, StillFormat, Vec2, Vec3,
};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

/// Recorded audio handed to the WAV encoder.
pub type AudioClip = rodio::buffer::SamplesBuffer<f32>;

/// Permission / availability flags plus change notifications.
pub trait CapabilityProvider: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn subscribe(&self) -> watch::Receiver<Capabilities>;
}

pub trait EyeTracker: Send {
    /// `Ok(None)` means the tracker produced no frame this tick.
    fn poll(&mut self) -> Result<Option<EyeFrame>>;
}

pub trait ExpressionTracker: Send {
    /// Channel names, fixed once the tracker has initialised.
    fn channel_names(&self) -> Vec<String>;

    /// One weight per channel; `None` for channels that are not currently tracked.
    fn weights(&mut self) -> Result<Vec<Option<f32>>>;
}

pub trait MotionSensors: Send {
    fn read(&mut self) -> Result<MotionReading>;
}

pub trait PoseTracker: Send {
    fn head_pose(&mut self) -> Option<HeadPose>;
}

pub trait LightSensor: Send {
    /// Illuminance in lux. Negative or `None` means no usable reading.
    fn lux(&mut self) -> Result<Option<f32>>;
}

pub trait AudioInput: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Samples captured since the previous call.
    fn read_new_samples(&mut self) -> Result<Vec<f32>>;

    /// Begin a fixed-length recording segment.
    fn begin_segment(&mut self, length: Duration) -> Result<()>;

    /// End the current segment and hand back what was captured.
    fn finish_segment(&mut self) -> Result<AudioClip>;
}

/// Single-shot still camera. Calls block until the hardware answers and are
/// made from worker threads.
pub trait Camera: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Run auto-exposure / auto-white-balance before a capture.
    fn pre_capture(&self) -> Result<()>;

    fn capture_still(&self) -> Result<StillCapture>;
}

/// The full set of collaborators handed to the scheduler. Absent hardware is
/// simply `None`.
pub struct SensorRig {
    pub capabilities: Arc<dyn CapabilityProvider>,
    pub eye_tracker: Option<Box<dyn EyeTracker>>,
    pub expressions: Option<Box<dyn ExpressionTracker>>,
    pub motion: Option<Box<dyn MotionSensors>>,
    pub pose: Option<Box<dyn PoseTracker>>,
    pub light: Option<Box<dyn LightSensor>>,
    pub audio: Option<Box<dyn AudioInput>>,
    pub camera: Option<Arc<dyn Camera>>,
}

impl SensorRig {
    pub fn new(capabilities: Arc<dyn CapabilityProvider>) -> Self {
        Self {
            capabilities,
            eye_tracker: None,
            expressions: None,
            motion: None,
            pose: None,
            light: None,
            audio: None,
            camera: None,
        }
    }

    pub fn with_eye_tracker(mut self, tracker: impl EyeTracker + 'static) -> Self {
        self.eye_tracker = Some(Box::new(tracker));
        self
    }

    pub fn with_expressions(mut self, tracker: impl ExpressionTracker + 'static) -> Self {
        self.expressions = Some(Box::new(tracker));
        self
    }

    pub fn with_motion(mut self, sensors: impl MotionSensors + 'static) -> Self {
        self.motion = Some(Box::new(sensors));
        self
    }

    pub fn with_pose(mut self, tracker: impl PoseTracker + 'static) -> Self {
        self.pose = Some(Box::new(tracker));
        self
    }

    pub fn with_light(mut self, sensor: impl LightSensor + 'static) -> Self {
        self.light = Some(Box::new(sensor));
        self
    }

    pub fn with_audio(mut self, input: impl AudioInput + 'static) -> Self {
        self.audio = Some(Box::new(input));
        self
    }

    pub fn with_camera(mut self, camera: impl Camera + 'static) -> Self {
        self.camera = Some(Arc::new(camera));
        self
    }

    /// Whether a category has both its collaborator and its capability.
    pub fn has(&self, category: SensorCategory) -> bool {
        let present = match category {
            SensorCategory::EyeTracking => self.eye_tracker.is_some(),
            SensorCategory::Imu => true,
            SensorCategory::Light => self.light.is_some(),
            SensorCategory::AudioLevel | SensorCategory::AudioFile => self.audio.is_some(),
            SensorCategory::VideoFrame => self
                .camera
                .as_ref()
                .is_some_and(|camera| camera.is_connected()),
        };
        present && self.capabilities.capabilities().supports(category)
    }
}
