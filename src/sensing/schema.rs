//! The wide row schema.
//!
//! Every producer writes the same fixed-width row. Columns that mean nothing
//! for a given row kind carry [`NOT_AVAILABLE`] so the file stays strictly
//! tabular.

use crate::sensors::{
    EyeStaticData, GazeBehavior, GazePose, GeometricSample, PupilSample, Quat, Vec3,
};

use super::snapshot::SensorSnapshot;

pub const NOT_AVAILABLE: &str = "N/A";

pub const GAZE_SAMPLE_TAG: &str = "PUPIL_DATA";
pub const IMU_SAMPLE_TAG: &str = "IMU_DATA";

pub const FIXED_COLUMNS: [&str; 60] = [
    // common
    "Timestamp",
    "StudySelection",
    "TaskLoad",
    "PathType",
    "Event",
    "Value",
    // eye tracking
    "Eye",
    "Openness",
    "EyeInSkullX",
    "EyeInSkullY",
    "PupilDiameter",
    "GazeBehaviorType",
    "GazeAmplitude",
    "GazeDirection",
    "GazeVelocity",
    "GazeOnsetTime",
    "GazeDuration",
    "EyeWidthMax",
    "EyeHeightMax",
    "VergenceX",
    "VergenceY",
    "VergenceZ",
    "FixationConfidence",
    "LeftBlink",
    "RightBlink",
    "LeftCenterConfidence",
    "RightCenterConfidence",
    // motion
    "AccelX",
    "AccelY",
    "AccelZ",
    "GyroX",
    "GyroY",
    "GyroZ",
    "LinearAccelX",
    "LinearAccelY",
    "LinearAccelZ",
    "Pitch",
    "Yaw",
    "Roll",
    // head / camera pose
    "CamPosX",
    "CamPosY",
    "CamPosZ",
    "CamPitch",
    "CamYaw",
    "CamRoll",
    "CamForwardX",
    "CamForwardY",
    "CamForwardZ",
    // environment
    "LuxValue",
    "AudioLevel",
    "AudioPeak",
    "AudioRMS",
    "AudioRecording",
    // gaze pose
    "GazePosX",
    "GazePosY",
    "GazePosZ",
    "GazeRotX",
    "GazeRotY",
    "GazeRotZ",
    "GazeRotW",
];

const COMMON_COLUMNS: usize = 6;
const EYE_COLUMNS: usize = 21;
const GAZE_POSE_COLUMNS: usize = 7;

/// Audio window metrics carried by audio-level events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevels {
    /// Most recent RMS, the running "level" of the input.
    pub level: f32,
    pub peak: f32,
    pub rms: f32,
}

/// What a row represents.
#[derive(Debug, Clone, Copy)]
pub enum RowKind<'a> {
    GazeSample {
        pupil: &'a PupilSample,
        geometry: &'a GeometricSample,
        behavior: &'a GazeBehavior,
        static_data: Option<&'a EyeStaticData>,
        gaze_pose: Option<&'a GazePose>,
    },
    ImuSample,
    Event {
        name: &'a str,
        value: &'a str,
        audio: Option<AudioLevels>,
    },
}

/// Header layout for one session: fixed columns plus the expression channels
/// reported when collection started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    expression_channels: Vec<String>,
}

impl Schema {
    pub fn new(expression_channels: Vec<String>) -> Self {
        Self {
            expression_channels,
        }
    }

    pub fn expression_channels(&self) -> &[String] {
        &self.expression_channels
    }

    pub fn width(&self) -> usize {
        FIXED_COLUMNS.len() + self.expression_channels.len()
    }

    pub fn header(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.expression_channels.iter().cloned())
            .collect()
    }

    /// Build one full-width row. `recording` is the audio file currently being
    /// captured, if any.
    pub fn assemble(
        &self,
        kind: &RowKind<'_>,
        snapshot: &SensorSnapshot,
        recording: Option<&str>,
    ) -> Vec<String> {
        let mut row = RowBuilder::with_capacity(self.width());

        row.text(&snapshot.timestamp);
        row.text(&snapshot.context.study_selection);
        row.text(&snapshot.context.task_load);
        row.text(&snapshot.context.path_type);
        match kind {
            RowKind::GazeSample { .. } => {
                row.text(GAZE_SAMPLE_TAG);
                row.text("");
            }
            RowKind::ImuSample => {
                row.text(IMU_SAMPLE_TAG);
                row.text("");
            }
            RowKind::Event { name, value, .. } => {
                row.text(name);
                row.text(value);
            }
        }

        match kind {
            RowKind::GazeSample {
                pupil,
                geometry,
                behavior,
                static_data,
                ..
            } => gaze_columns(&mut row, pupil, geometry, behavior, *static_data),
            _ => row.unavailable(EYE_COLUMNS),
        }

        motion_columns(&mut row, snapshot);
        pose_columns(&mut row, snapshot);
        row.opt(snapshot.lux, 2);

        match kind {
            RowKind::Event {
                audio: Some(levels),
                ..
            } => {
                row.float(levels.level, 4);
                row.float(levels.peak, 4);
                row.float(levels.rms, 4);
            }
            _ => row.unavailable(3),
        }
        match recording.filter(|name| !name.is_empty()) {
            Some(name) => row.text(name),
            None => row.unavailable(1),
        }

        match kind {
            RowKind::GazeSample {
                gaze_pose: Some(pose),
                ..
            } => {
                row.vec3(Some(pose.position));
                row.quat(Some(pose.rotation));
            }
            _ => row.unavailable(GAZE_POSE_COLUMNS),
        }

        for idx in 0..self.expression_channels.len() {
            row.opt(snapshot.expressions.get(idx).copied().flatten(), 4);
        }

        row.finish()
    }
}

fn gaze_columns(
    row: &mut RowBuilder,
    pupil: &PupilSample,
    geometry: &GeometricSample,
    behavior: &GazeBehavior,
    static_data: Option<&EyeStaticData>,
) {
    row.text(&pupil.eye.to_string());
    row.float(geometry.openness, 4);
    row.float(geometry.eye_in_skull.x, 4);
    row.float(geometry.eye_in_skull.y, 4);
    row.float(pupil.diameter, 4);

    if behavior.valid {
        row.text(&behavior.kind.to_string());
        row.float(behavior.amplitude, 4);
        row.float(behavior.direction, 4);
        row.float(behavior.velocity, 4);
        row.text(&behavior.onset_time.to_string());
        row.float(behavior.duration, 4);
    } else {
        row.text("Invalid");
        row.unavailable(5);
    }

    row.opt(static_data.map(|d| d.eye_width_max), 4);
    row.opt(static_data.map(|d| d.eye_height_max), 4);

    // Vergence, fixation confidence, blinks and centre confidences are not
    // reported per pupil sample.
    row.unavailable(8);
}

fn motion_columns(row: &mut RowBuilder, snapshot: &SensorSnapshot) {
    let motion = &snapshot.motion;
    row.vec3(motion.acceleration);
    row.vec3(motion.angular_velocity);
    row.vec3(motion.linear_acceleration);
    row.vec3(motion.attitude.map(|q| q.euler_degrees()));
}

fn pose_columns(row: &mut RowBuilder, snapshot: &SensorSnapshot) {
    row.vec3(snapshot.head.map(|h| h.position));
    row.vec3(snapshot.head.map(|h| h.rotation));
    row.vec3(snapshot.head.map(|h| h.forward));
}

struct RowBuilder {
    fields: Vec<String>,
}

impl RowBuilder {
    fn with_capacity(width: usize) -> Self {
        Self {
            fields: Vec::with_capacity(width),
        }
    }

    fn text(&mut self, value: &str) {
        self.fields.push(value.to_string());
    }

    fn float(&mut self, value: f32, places: usize) {
        self.opt(Some(value), places);
    }

    fn opt(&mut self, value: Option<f32>, places: usize) {
        match value.filter(|v| v.is_finite()) {
            Some(v) => self.fields.push(format!("{v:.places$}")),
            None => self.fields.push(NOT_AVAILABLE.to_string()),
        }
    }

    fn vec3(&mut self, value: Option<Vec3>) {
        self.opt(value.map(|v| v.x), 4);
        self.opt(value.map(|v| v.y), 4);
        self.opt(value.map(|v| v.z), 4);
    }

    fn quat(&mut self, value: Option<Quat>) {
        self.opt(value.map(|q| q.x), 4);
        self.opt(value.map(|q| q.y), 4);
        self.opt(value.map(|q| q.z), 4);
        self.opt(value.map(|q| q.w), 4);
    }

    fn unavailable(&mut self, count: usize) {
        self.fields
            .extend(std::iter::repeat_with(|| NOT_AVAILABLE.to_string()).take(count));
    }

    fn finish(self) -> Vec<String> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{Eye, GazeBehaviorKind, HeadPose, MotionReading, Vec2};
    use crate::settings::StudyContext;

    fn column(name: &str) -> usize {
        FIXED_COLUMNS
            .iter()
            .position(|c| *c == name)
            .unwrap_or_else(|| panic!("no column {name}"))
    }

    fn schema() -> Schema {
        Schema::new(vec!["JawDrop".into(), "BrowLowererL".into()])
    }

    fn snapshot() -> SensorSnapshot {
        SensorSnapshot {
            timestamp: "2024-03-09 14:05:07.123".into(),
            context: StudyContext::default(),
            motion: MotionReading {
                acceleration: Some(Vec3::new(0.1, -9.81, 0.0)),
                angular_velocity: None,
                linear_acceleration: None,
                attitude: Some(Quat::IDENTITY),
            },
            head: Some(HeadPose {
                position: Vec3::new(1.0, 1.6, 0.0),
                rotation: Vec3::new(0.0, 90.0, 0.0),
                forward: Vec3::new(1.0, 0.0, 0.0),
            }),
            lux: Some(123.456),
            expressions: vec![Some(0.25), None],
        }
    }

    fn pupil() -> PupilSample {
        PupilSample {
            eye: Eye::Right,
            diameter: 3.14159,
            valid: true,
        }
    }

    fn geometry() -> GeometricSample {
        GeometricSample {
            eye: Eye::Right,
            openness: 0.9,
            eye_in_skull: Vec2 { x: 0.1, y: -0.2 },
            valid: true,
        }
    }

    fn behavior() -> GazeBehavior {
        GazeBehavior {
            valid: true,
            kind: GazeBehaviorKind::Fixation,
            amplitude: 1.5,
            direction: 45.0,
            velocity: 12.0,
            onset_time: 987654,
            duration: 0.25,
        }
    }

    #[test]
    fn fixed_columns_are_unique() {
        let mut seen = std::collections::HashSet::new();
        assert!(FIXED_COLUMNS.iter().all(|c| seen.insert(*c)));
        assert_eq!(column("LuxValue"), 48);
        assert_eq!(column("AudioRecording"), 52);
    }

    #[test]
    fn header_appends_expression_channels() {
        let header = schema().header();
        assert_eq!(header.len(), 62);
        assert_eq!(header[0], "Timestamp");
        assert_eq!(header[60], "JawDrop");
        assert_eq!(header[61], "BrowLowererL");
    }

    #[test]
    fn every_row_kind_has_header_width() {
        let schema = schema();
        let snapshot = snapshot();
        let (pupil, geometry, behavior) = (pupil(), geometry(), behavior());
        let kinds = [
            RowKind::GazeSample {
                pupil: &pupil,
                geometry: &geometry,
                behavior: &behavior,
                static_data: None,
                gaze_pose: None,
            },
            RowKind::ImuSample,
            RowKind::Event {
                name: "SUBJECT_ID",
                value: "AB12CD",
                audio: None,
            },
            RowKind::Event {
                name: "AUDIO_LEVEL",
                value: "0.0100",
                audio: Some(AudioLevels {
                    level: 0.01,
                    peak: 0.01,
                    rms: 0.005,
                }),
            },
        ];
        for kind in &kinds {
            assert_eq!(schema.assemble(kind, &snapshot, None).len(), schema.width());
            assert_eq!(
                schema.assemble(kind, &snapshot, Some("audio_x_0001.wav")).len(),
                schema.width()
            );
        }
    }

    #[test]
    fn gaze_row_fills_eye_columns() {
        let schema = schema();
        let static_data = EyeStaticData {
            eye_width_max: 28.0,
            eye_height_max: 11.0,
        };
        let pose = GazePose {
            position: Vec3::new(0.0, 1.6, 0.0),
            rotation: Quat::IDENTITY,
        };
        let (pupil, geometry, behavior) = (pupil(), geometry(), behavior());
        let row = schema.assemble(
            &RowKind::GazeSample {
                pupil: &pupil,
                geometry: &geometry,
                behavior: &behavior,
                static_data: Some(&static_data),
                gaze_pose: Some(&pose),
            },
            &snapshot(),
            None,
        );

        assert_eq!(row[column("Event")], GAZE_SAMPLE_TAG);
        assert_eq!(row[column("Value")], "");
        assert_eq!(row[column("Eye")], "Right");
        assert_eq!(row[column("PupilDiameter")], "3.1416");
        assert_eq!(row[column("EyeInSkullY")], "-0.2000");
        assert_eq!(row[column("GazeBehaviorType")], "Fixation");
        assert_eq!(row[column("GazeOnsetTime")], "987654");
        assert_eq!(row[column("EyeWidthMax")], "28.0000");
        assert_eq!(row[column("VergenceX")], NOT_AVAILABLE);
        assert_eq!(row[column("RightCenterConfidence")], NOT_AVAILABLE);
        assert_eq!(row[column("AudioLevel")], NOT_AVAILABLE);
        assert_eq!(row[column("GazePosY")], "1.6000");
        assert_eq!(row[column("GazeRotW")], "1.0000");
    }

    #[test]
    fn invalid_behavior_is_flagged_and_blanked() {
        let schema = schema();
        let behavior = GazeBehavior::invalid();
        let (pupil, geometry) = (pupil(), geometry());
        let row = schema.assemble(
            &RowKind::GazeSample {
                pupil: &pupil,
                geometry: &geometry,
                behavior: &behavior,
                static_data: None,
                gaze_pose: None,
            },
            &snapshot(),
            None,
        );
        assert_eq!(row[column("GazeBehaviorType")], "Invalid");
        assert_eq!(row[column("GazeAmplitude")], NOT_AVAILABLE);
        assert_eq!(row[column("GazeDuration")], NOT_AVAILABLE);
        assert_eq!(row[column("EyeHeightMax")], NOT_AVAILABLE);
        assert_eq!(row[column("GazePosX")], NOT_AVAILABLE);
    }

    #[test]
    fn imu_row_blanks_gaze_columns_and_formats_snapshot() {
        let schema = schema();
        let row = schema.assemble(&RowKind::ImuSample, &snapshot(), Some("audio_x_0003.wav"));

        assert_eq!(row[column("Event")], IMU_SAMPLE_TAG);
        assert_eq!(row[column("Value")], "");
        for name in &FIXED_COLUMNS[6..27] {
            assert_eq!(row[column(name)], NOT_AVAILABLE, "{name}");
        }
        assert_eq!(row[column("AccelY")], "-9.8100");
        assert_eq!(row[column("GyroX")], NOT_AVAILABLE);
        assert_eq!(row[column("Pitch")], "0.0000");
        assert_eq!(row[column("CamYaw")], "90.0000");
        assert_eq!(row[column("LuxValue")], "123.46");
        assert_eq!(row[column("AudioRecording")], "audio_x_0003.wav");
        assert_eq!(row[60], "0.2500");
        assert_eq!(row[61], NOT_AVAILABLE);
    }

    #[test]
    fn event_row_carries_name_value_and_audio_levels() {
        let schema = Schema::default();
        let row = schema.assemble(
            &RowKind::Event {
                name: "AUDIO_ACTIVITY",
                value: "0.5000",
                audio: Some(AudioLevels {
                    level: 0.2,
                    peak: 0.5,
                    rms: 0.2,
                }),
            },
            &snapshot(),
            None,
        );
        assert_eq!(row.len(), FIXED_COLUMNS.len());
        assert_eq!(row[column("Event")], "AUDIO_ACTIVITY");
        assert_eq!(row[column("Value")], "0.5000");
        assert_eq!(row[column("Eye")], NOT_AVAILABLE);
        assert_eq!(row[column("AudioPeak")], "0.5000");
        assert_eq!(row[column("AudioRMS")], "0.2000");
        assert_eq!(row[column("AudioRecording")], NOT_AVAILABLE);
    }

    #[test]
    fn non_finite_readings_render_unavailable() {
        let mut snap = snapshot();
        snap.lux = Some(f32::NAN);
        let row = Schema::default().assemble(&RowKind::ImuSample, &snap, None);
        assert_eq!(row[column("LuxValue")], NOT_AVAILABLE);
    }
}
