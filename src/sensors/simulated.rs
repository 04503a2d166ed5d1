//! Software stand-ins for the headset hardware, used by the binary when no
//! device bridge is linked in and by the integration tests.

use std::f32::consts::TAU;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use image::{codecs::jpeg::JpegEncoder, ImageBuffer, Rgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rodio::buffer::SamplesBuffer;
use rodio::Source;
use tokio::sync::watch;

use super::{
    AudioClip, AudioInput, Camera, Capabilities, CapabilityProvider, ConvergenceState, Eye,
    EyeFrame, EyeStaticData, EyeTracker, ExpressionTracker, GazeBehavior, GazeBehaviorKind,
    GazePose, GeometricSample, HeadPose, LightSensor, MotionReading, MotionSensors, PoseTracker,
    PupilSample, Quat, SensorRig, StillCapture, StillFormat, Vec2, Vec3,
};

/// Facial blend shape channels reported by the simulated expression tracker.
pub const EXPRESSION_CHANNELS: [&str; 14] = [
    "BrowLowererL",
    "BrowLowererR",
    "CheekRaiserL",
    "CheekRaiserR",
    "EyesClosedL",
    "EyesClosedR",
    "JawDrop",
    "LipCornerPullerL",
    "LipCornerPullerR",
    "LipPuckerL",
    "LipPuckerR",
    "NoseWrinklerL",
    "NoseWrinklerR",
    "UpperLipRaiserL",
];

/// Capability flags that can be flipped at runtime.
pub struct CapabilityBoard {
    tx: watch::Sender<Capabilities>,
}

impl CapabilityBoard {
    pub fn new(initial: Capabilities) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn update(&self, change: impl FnOnce(&mut Capabilities)) {
        self.tx.send_modify(change);
    }
}

impl CapabilityProvider for CapabilityBoard {
    fn capabilities(&self) -> Capabilities {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Capabilities> {
        self.tx.subscribe()
    }
}

/// Reports `pairs_per_frame` valid pupil/geometry pairs on every poll.
pub struct SimulatedEyeTracker {
    rng: StdRng,
    pairs_per_frame: usize,
    phase: f32,
}

impl SimulatedEyeTracker {
    pub fn new(pairs_per_frame: usize) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            pairs_per_frame,
            phase: 0.0,
        }
    }
}

impl EyeTracker for SimulatedEyeTracker {
    fn poll(&mut self) -> Result<Option<EyeFrame>> {
        if self.pairs_per_frame == 0 {
            return Ok(None);
        }
        self.phase = (self.phase + 0.05) % TAU;

        let mut pupils = Vec::with_capacity(self.pairs_per_frame);
        let mut geometry = Vec::with_capacity(self.pairs_per_frame);
        for idx in 0..self.pairs_per_frame {
            let eye = if idx % 2 == 0 { Eye::Left } else { Eye::Right };
            pupils.push(PupilSample {
                eye,
                diameter: 3.5 + self.rng.gen_range(-0.3..0.3),
                valid: true,
            });
            geometry.push(GeometricSample {
                eye,
                openness: self.rng.gen_range(0.7..1.0),
                eye_in_skull: Vec2 {
                    x: self.phase.sin() * 0.2,
                    y: self.phase.cos() * 0.1,
                },
                valid: true,
            });
        }

        let fixating = self.rng.gen_bool(0.8);
        Ok(Some(EyeFrame {
            pupils,
            geometry,
            behavior: GazeBehavior {
                valid: true,
                kind: if fixating {
                    GazeBehaviorKind::Fixation
                } else {
                    GazeBehaviorKind::Saccade
                },
                amplitude: self.rng.gen_range(0.0..5.0),
                direction: self.rng.gen_range(0.0..360.0),
                velocity: self.rng.gen_range(0.0..300.0),
                onset_time: self.rng.gen_range(0..1_000_000),
                duration: self.rng.gen_range(0.01..0.4),
            },
            static_data: Some(EyeStaticData {
                eye_width_max: 28.0,
                eye_height_max: 11.0,
            }),
            gaze_pose: Some(GazePose {
                position: Vec3::new(0.0, 1.6, 0.0),
                rotation: Quat::from_axis_angle(
                    Vec3::new(0.0, 1.0, 0.0),
                    self.phase.sin() * 15.0,
                ),
            }),
        }))
    }
}

pub struct SimulatedExpressions {
    rng: StdRng,
}

impl SimulatedExpressions {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for SimulatedExpressions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionTracker for SimulatedExpressions {
    fn channel_names(&self) -> Vec<String> {
        EXPRESSION_CHANNELS.iter().map(|s| s.to_string()).collect()
    }

    fn weights(&mut self) -> Result<Vec<Option<f32>>> {
        Ok(EXPRESSION_CHANNELS
            .iter()
            .map(|_| Some(self.rng.gen_range(0.0..0.3)))
            .collect())
    }
}

/// Gravity plus jitter, with a slow yaw drift on the attitude sensor.
pub struct SimulatedMotion {
    rng: StdRng,
    started: Instant,
}

impl SimulatedMotion {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            started: Instant::now(),
        }
    }

    fn jitter(&mut self, scale: f32) -> f32 {
        self.rng.gen_range(-scale..scale)
    }
}

impl Default for SimulatedMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSensors for SimulatedMotion {
    fn read(&mut self) -> Result<MotionReading> {
        let yaw = self.started.elapsed().as_secs_f32() * 3.0;
        Ok(MotionReading {
            acceleration: Some(Vec3::new(
                self.jitter(0.05),
                -9.81 + self.jitter(0.05),
                self.jitter(0.05),
            )),
            angular_velocity: Some(Vec3::new(
                self.jitter(0.02),
                0.05 + self.jitter(0.02),
                self.jitter(0.02),
            )),
            linear_acceleration: Some(Vec3::new(
                self.jitter(0.05),
                self.jitter(0.05),
                self.jitter(0.05),
            )),
            attitude: Some(Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), yaw)),
        })
    }
}

pub struct SimulatedPose {
    started: Instant,
}

impl SimulatedPose {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SimulatedPose {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseTracker for SimulatedPose {
    fn head_pose(&mut self) -> Option<HeadPose> {
        let t = self.started.elapsed().as_secs_f32();
        let yaw = (t * 0.2).sin() * 20.0;
        Some(HeadPose {
            position: Vec3::new(t * 0.01, 1.6, 0.0),
            rotation: Vec3::new(0.0, yaw.rem_euclid(360.0), 0.0),
            forward: Vec3::new(yaw.to_radians().sin(), 0.0, yaw.to_radians().cos()),
        })
    }
}

pub struct SimulatedLight {
    rng: StdRng,
    base_lux: f32,
}

impl SimulatedLight {
    pub fn new(base_lux: f32) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            base_lux,
        }
    }
}

impl LightSensor for SimulatedLight {
    fn lux(&mut self) -> Result<Option<f32>> {
        Ok(Some(self.base_lux + self.rng.gen_range(-5.0..5.0)))
    }
}

/// Brown noise: the running integral of white noise, clamped and slowly
/// decayed so it never drifts into a DC offset.
pub struct BrownNoise {
    sample_rate: u32,
    last_value: f32,
    gain: f32,
    rng: StdRng,
}

impl BrownNoise {
    pub fn new(sample_rate: u32, gain: f32) -> Self {
        Self {
            sample_rate,
            last_value: 0.0,
            gain,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Iterator for BrownNoise {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let white: f32 = self.rng.gen_range(-1.0..1.0);
        self.last_value = (self.last_value + white * 0.02).clamp(-1.0, 1.0);
        self.last_value *= 0.9999;
        Some(self.last_value * self.gain)
    }
}

impl Source for BrownNoise {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// A mono microphone that produces brown noise in real time.
pub struct SimulatedMicrophone {
    noise: BrownNoise,
    last_read: Instant,
    segment: Option<(Instant, Duration)>,
}

impl SimulatedMicrophone {
    /// Never hands back more than this much audio from a single read.
    const MAX_READ: Duration = Duration::from_secs(1);

    pub fn new(sample_rate: u32) -> Self {
        Self {
            noise: BrownNoise::new(sample_rate, 0.3),
            last_read: Instant::now(),
            segment: None,
        }
    }

    fn samples_for(&self, elapsed: Duration) -> usize {
        (elapsed.as_secs_f64() * self.noise.sample_rate() as f64) as usize
    }
}

impl AudioInput for SimulatedMicrophone {
    fn sample_rate(&self) -> u32 {
        self.noise.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.noise.channels()
    }

    fn read_new_samples(&mut self) -> Result<Vec<f32>> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_read).min(Self::MAX_READ);
        self.last_read = now;
        let count = self.samples_for(elapsed);
        Ok(self.noise.by_ref().take(count).collect())
    }

    fn begin_segment(&mut self, length: Duration) -> Result<()> {
        self.segment = Some((Instant::now(), length));
        Ok(())
    }

    fn finish_segment(&mut self) -> Result<AudioClip> {
        let Some((started, length)) = self.segment.take() else {
            bail!("no audio segment in progress");
        };
        let count = self.samples_for(started.elapsed().min(length));
        let samples: Vec<f32> = self.noise.by_ref().take(count).collect();
        Ok(SamplesBuffer::new(
            self.noise.channels(),
            self.noise.sample_rate(),
            samples,
        ))
    }
}

/// Renders a small gradient test card as JPEG. Exposure converges after the
/// first pre-capture.
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    pre_captures: AtomicU64,
    captures: AtomicU64,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pre_captures: AtomicU64::new(0),
            captures: AtomicU64::new(0),
        }
    }

    fn render_jpeg(&self, shift: u32) -> Result<Vec<u8>> {
        let (w, h) = (self.width.max(1), self.height.max(1));
        let card = ImageBuffer::from_fn(w, h, |x, y| {
            Rgb([
                ((x + shift) * 255 / w) as u8,
                (y * 255 / h) as u8,
                (shift % 255) as u8,
            ])
        });
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, 80).encode_image(&card)?;
        Ok(out.into_inner())
    }
}

impl Camera for SimulatedCamera {
    fn is_connected(&self) -> bool {
        true
    }

    fn pre_capture(&self) -> Result<()> {
        self.pre_captures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capture_still(&self) -> Result<StillCapture> {
        let shift = self.captures.fetch_add(1, Ordering::SeqCst) as u32;
        let settled = if self.pre_captures.load(Ordering::SeqCst) > 0 {
            ConvergenceState::Converged
        } else {
            ConvergenceState::Searching
        };
        Ok(StillCapture {
            format: StillFormat::Jpeg,
            data: self.render_jpeg(shift % self.width.max(1))?,
            auto_exposure: Some(settled),
            auto_white_balance: Some(settled),
        })
    }
}

/// Every simulated collaborator, all capabilities granted.
pub fn simulated_rig() -> (SensorRig, Arc<CapabilityBoard>) {
    let board = Arc::new(CapabilityBoard::new(Capabilities::all()));
    let rig = SensorRig::new(board.clone())
        .with_eye_tracker(SimulatedEyeTracker::new(2))
        .with_expressions(SimulatedExpressions::new())
        .with_motion(SimulatedMotion::new())
        .with_pose(SimulatedPose::new())
        .with_light(SimulatedLight::new(320.0))
        .with_audio(SimulatedMicrophone::new(16_000))
        .with_camera(SimulatedCamera::new(160, 120));
    (rig, board)
}
