//! The "all sensors" merge shared by every row kind.

use chrono::Local;

use crate::sensors::{HeadPose, MotionReading, SensorCategory, SensorRig};
use crate::settings::{CollectionToggles, StudyContext};
use crate::error::SuiteError;
use crate::log_warn;

const ENABLE_LOGS: bool = true;

/// Row timestamp, local time with millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub timestamp: String,
    pub context: StudyContext,
    pub motion: MotionReading,
    pub head: Option<HeadPose>,
    pub lux: Option<f32>,
    /// One entry per expression channel, `None` when untracked.
    pub expressions: Vec<Option<f32>>,
}

impl SensorSnapshot {
    /// A snapshot with nothing but the timestamp and context filled in.
    pub fn blank(context: &StudyContext, channels: usize) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            context: context.clone(),
            motion: MotionReading::default(),
            head: None,
            lux: None,
            expressions: vec![None; channels],
        }
    }

    /// Poll every snapshot source once. Read failures leave the affected
    /// columns unavailable.
    pub fn capture(
        rig: &mut SensorRig,
        collect: &CollectionToggles,
        context: &StudyContext,
        channels: usize,
    ) -> Self {
        let caps = rig.capabilities.capabilities();
        let mut snapshot = Self::blank(context, channels);

        if let Some(motion) = rig.motion.as_mut() {
            match motion.read() {
                Ok(reading) => {
                    snapshot.motion = MotionReading {
                        acceleration: reading.acceleration.filter(|_| caps.accelerometer_available),
                        angular_velocity: reading
                            .angular_velocity
                            .filter(|_| caps.gyroscope_available),
                        linear_acceleration: reading
                            .linear_acceleration
                            .filter(|_| caps.linear_acceleration_available),
                        attitude: reading.attitude.filter(|_| caps.attitude_sensor_available),
                    };
                }
                Err(err) => log_warn!("{}", SuiteError::transient(SensorCategory::Imu, err)),
            }
        }

        if collect.head_pose {
            if let Some(pose) = rig.pose.as_mut() {
                snapshot.head = pose.head_pose();
            }
        }

        if caps.light_sensor_available {
            if let Some(light) = rig.light.as_mut() {
                match light.lux() {
                    Ok(lux) => snapshot.lux = lux.filter(|v| v.is_finite() && *v >= 0.0),
                    Err(err) => {
                        log_warn!("{}", SuiteError::transient(SensorCategory::Light, err))
                    }
                }
            }
        }

        if collect.facial_expressions && caps.facial_expressions() {
            if let Some(tracker) = rig.expressions.as_mut() {
                match tracker.weights() {
                    Ok(mut weights) => {
                        weights.resize(channels, None);
                        snapshot.expressions = weights;
                    }
                    Err(err) => log_warn!("Error collecting facial expression data: {err}"),
                }
            }
        }

        snapshot
    }
}
