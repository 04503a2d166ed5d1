use std::fmt;

use serde::{Deserialize, Serialize};

/// Independently scheduled sampling categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorCategory {
    EyeTracking,
    Imu,
    Light,
    AudioLevel,
    VideoFrame,
    AudioFile,
}

impl SensorCategory {
    pub const ALL: [SensorCategory; 6] = [
        SensorCategory::EyeTracking,
        SensorCategory::Imu,
        SensorCategory::Light,
        SensorCategory::AudioLevel,
        SensorCategory::VideoFrame,
        SensorCategory::AudioFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorCategory::EyeTracking => "eye tracking",
            SensorCategory::Imu => "IMU",
            SensorCategory::Light => "light sensor",
            SensorCategory::AudioLevel => "audio level",
            SensorCategory::VideoFrame => "video frames",
            SensorCategory::AudioFile => "audio files",
        }
    }
}

impl fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission and hardware availability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Capabilities {
    pub eye_tracking_permission: bool,
    pub facial_expression_permission: bool,
    pub audio_record_permission: bool,
    pub camera_permission: bool,

    pub eye_tracker_available: bool,
    pub facial_expression_available: bool,
    pub light_sensor_available: bool,
    pub accelerometer_available: bool,
    pub gyroscope_available: bool,
    pub linear_acceleration_available: bool,
    pub attitude_sensor_available: bool,
    pub audio_input_available: bool,
    pub camera_available: bool,
}

impl Capabilities {
    /// Everything granted and present.
    pub fn all() -> Self {
        Self {
            eye_tracking_permission: true,
            facial_expression_permission: true,
            audio_record_permission: true,
            camera_permission: true,
            eye_tracker_available: true,
            facial_expression_available: true,
            light_sensor_available: true,
            accelerometer_available: true,
            gyroscope_available: true,
            linear_acceleration_available: true,
            attitude_sensor_available: true,
            audio_input_available: true,
            camera_available: true,
        }
    }

    pub fn eye_tracking(&self) -> bool {
        self.eye_tracking_permission && self.eye_tracker_available
    }

    pub fn facial_expressions(&self) -> bool {
        self.facial_expression_permission && self.facial_expression_available
    }

    pub fn audio_input(&self) -> bool {
        self.audio_record_permission && self.audio_input_available
    }

    pub fn camera(&self) -> bool {
        self.camera_permission && self.camera_available
    }

    /// Whether the hardware behind a scheduled category is usable.
    pub fn supports(&self, category: SensorCategory) -> bool {
        match category {
            SensorCategory::EyeTracking => self.eye_tracking(),
            // IMU rows degrade to N/A per axis, so the task itself always runs.
            SensorCategory::Imu => true,
            SensorCategory::Light => self.light_sensor_available,
            SensorCategory::AudioLevel | SensorCategory::AudioFile => self.audio_input(),
            SensorCategory::VideoFrame => self.camera(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn from_axis_angle(axis: Vec3, degrees: f32) -> Self {
        let half = degrees.to_radians() * 0.5;
        let len = (axis.x * axis.x + axis.y * axis.y + axis.z * axis.z).sqrt();
        if len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        let s = half.sin() / len;
        Self {
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
            w: half.cos(),
        }
    }

    /// Pitch / yaw / roll in degrees, each normalised to `[0, 360)`.
    /// Rotation order is roll, then pitch, then yaw (Z, X, Y).
    pub fn euler_degrees(&self) -> Vec3 {
        let Quat { x, y, z, w } = *self;
        let pitch = (2.0 * (w * x - y * z)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * y + x * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let roll = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (x * x + z * z));
        Vec3::new(
            normalize_degrees(pitch.to_degrees()),
            normalize_degrees(yaw.to_degrees()),
            normalize_degrees(roll.to_degrees()),
        )
    }
}

fn normalize_degrees(value: f32) -> f32 {
    let wrapped = value.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// One IMU poll. Axes whose sensor is absent stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionReading {
    pub acceleration: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
    pub linear_acceleration: Option<Vec3>,
    pub attitude: Option<Quat>,
}

/// Head/camera pose in world space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadPose {
    pub position: Vec3,
    /// Euler angles in degrees.
    pub rotation: Vec3,
    pub forward: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eye {
    Left,
    Right,
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => f.write_str("Left"),
            Eye::Right => f.write_str("Right"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilSample {
    pub eye: Eye,
    pub diameter: f32,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometricSample {
    pub eye: Eye,
    pub openness: f32,
    pub eye_in_skull: Vec2,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GazeBehaviorKind {
    Unknown,
    EyesClosed,
    Blink,
    Fixation,
    Pursuit,
    Saccade,
}

impl fmt::Display for GazeBehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeBehavior {
    pub valid: bool,
    pub kind: GazeBehaviorKind,
    pub amplitude: f32,
    pub direction: f32,
    pub velocity: f32,
    /// Onset timestamp reported by the tracker, in its own clock units.
    pub onset_time: u64,
    pub duration: f32,
}

impl GazeBehavior {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            kind: GazeBehaviorKind::Unknown,
            amplitude: 0.0,
            direction: 0.0,
            velocity: 0.0,
            onset_time: 0,
            duration: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeStaticData {
    pub eye_width_max: f32,
    pub eye_height_max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazePose {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Everything the eye tracker reports for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct EyeFrame {
    pub pupils: Vec<PupilSample>,
    pub geometry: Vec<GeometricSample>,
    pub behavior: GazeBehavior,
    pub static_data: Option<EyeStaticData>,
    pub gaze_pose: Option<GazePose>,
}

impl EyeFrame {
    /// Pupil/geometry pairs where both halves are valid, in report order.
    pub fn valid_pairs(&self) -> impl Iterator<Item = (&PupilSample, &GeometricSample)> {
        self.pupils
            .iter()
            .zip(self.geometry.iter())
            .filter(|(pupil, geometry)| pupil.valid && geometry.valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceState {
    Inactive,
    Searching,
    Converged,
    Locked,
}

impl ConvergenceState {
    pub fn is_settled(&self) -> bool {
        matches!(self, ConvergenceState::Converged | ConvergenceState::Locked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    Jpeg,
    Yuv420,
    Rgba8,
}

/// A single still delivered by the camera, with its 3A metadata.
#[derive(Debug, Clone)]
pub struct StillCapture {
    pub format: StillFormat,
    pub data: Vec<u8>,
    pub auto_exposure: Option<ConvergenceState>,
    pub auto_white_balance: Option<ConvergenceState>,
}

impl StillCapture {
    pub fn is_converged(&self) -> bool {
        self.auto_exposure.is_some_and(|s| s.is_settled())
            && self.auto_white_balance.is_some_and(|s| s.is_settled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn identity_has_zero_euler_angles() {
        let e = Quat::IDENTITY.euler_degrees();
        assert!(approx(e.x, 0.0) && approx(e.y, 0.0) && approx(e.z, 0.0));
    }

    #[test]
    fn single_axis_rotations_land_on_their_axis() {
        let yaw = Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 90.0).euler_degrees();
        assert!(approx(yaw.y, 90.0), "{yaw:?}");

        let pitch = Quat::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), 30.0).euler_degrees();
        assert!(approx(pitch.x, 30.0), "{pitch:?}");

        let roll = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), -45.0).euler_degrees();
        assert!(approx(roll.z, 315.0), "{roll:?}");
    }

    #[test]
    fn capture_needs_both_exposure_and_white_balance_settled() {
        let mut still = StillCapture {
            format: StillFormat::Jpeg,
            data: vec![],
            auto_exposure: Some(ConvergenceState::Converged),
            auto_white_balance: Some(ConvergenceState::Locked),
        };
        assert!(still.is_converged());

        still.auto_white_balance = Some(ConvergenceState::Searching);
        assert!(!still.is_converged());

        still.auto_white_balance = None;
        assert!(!still.is_converged());
    }

    #[test]
    fn only_fully_valid_pairs_are_yielded() {
        let pupil = |valid| PupilSample {
            eye: Eye::Left,
            diameter: 3.0,
            valid,
        };
        let geometry = |valid| GeometricSample {
            eye: Eye::Left,
            openness: 1.0,
            eye_in_skull: Vec2::default(),
            valid,
        };
        let frame = EyeFrame {
            pupils: vec![pupil(true), pupil(false), pupil(true)],
            geometry: vec![geometry(true), geometry(true), geometry(false)],
            behavior: GazeBehavior::invalid(),
            static_data: None,
            gaze_pose: None,
        };
        assert_eq!(frame.valid_pairs().count(), 1);
    }
}
