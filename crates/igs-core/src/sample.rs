//! Timestamped samples produced by devices.
//!
//! A [`RawSample`] is either a rigid [`Transform`] (tracked tools) or an
//! image [`Frame`] (video imager tools). Samples are immutable snapshots:
//! every update cycle builds a fresh value with its own validity window
//! instead of mutating the previous one.

use crate::clock::Clock;
use nalgebra::{Isometry3, Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};
use std::sync::Arc;

/// Validity interval `[start_ms, expiration_ms)` of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStamp {
    /// Time at which the sample became valid.
    pub start_ms: f64,
    /// First instant at which the sample is no longer valid.
    pub expiration_ms: f64,
}

impl TimeStamp {
    /// Stamp valid from `now_ms` for `validity_ms` milliseconds.
    pub fn starting_at(now_ms: f64, validity_ms: f64) -> Self {
        Self {
            start_ms: now_ms,
            expiration_ms: now_ms + validity_ms.max(0.0),
        }
    }

    /// Stamp that has never been valid. Used for static offsets such as
    /// calibration transforms, whose validity is irrelevant.
    pub const fn zero() -> Self {
        Self {
            start_ms: 0.0,
            expiration_ms: 0.0,
        }
    }

    /// Length of the validity window.
    pub fn validity_ms(&self) -> f64 {
        self.expiration_ms - self.start_ms
    }

    /// Whether `t_ms` falls inside the validity window.
    pub fn is_valid_at(&self, t_ms: f64) -> bool {
        self.start_ms <= t_ms && t_ms < self.expiration_ms
    }
}

/// Rigid transform with an error estimate and a validity window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Rotation followed by translation.
    pub pose: Isometry3<f64>,
    /// Device-reported RMS error (or confidence scalar).
    pub error: f64,
    /// Validity window.
    pub stamp: TimeStamp,
}

impl Transform {
    /// Identity transform with a zero stamp.
    pub fn identity() -> Self {
        Self {
            pose: Isometry3::identity(),
            error: 0.0,
            stamp: TimeStamp::zero(),
        }
    }

    /// Transform from a translation and a `(w, x, y, z)` quaternion.
    ///
    /// The quaternion is normalized, so callers may pass device values that
    /// drifted slightly off the unit sphere.
    pub fn from_parts(translation: [f64; 3], rotation_wxyz: [f64; 4]) -> Self {
        let [w, x, y, z] = rotation_wxyz;
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
        Self::from_isometry(Isometry3::from_parts(
            Translation3::new(translation[0], translation[1], translation[2]),
            rotation,
        ))
    }

    /// Transform from a translation and a rotation vector (axis * angle).
    pub fn from_axis_angle(translation: [f64; 3], axis_angle: [f64; 3]) -> Self {
        Self::from_isometry(Isometry3::new(
            Vector3::new(translation[0], translation[1], translation[2]),
            Vector3::new(axis_angle[0], axis_angle[1], axis_angle[2]),
        ))
    }

    /// Wrap a pose with zero error and a zero stamp.
    pub fn from_isometry(pose: Isometry3<f64>) -> Self {
        Self {
            pose,
            error: 0.0,
            stamp: TimeStamp::zero(),
        }
    }

    /// Same pose and error with a new stamp.
    pub fn with_stamp(mut self, stamp: TimeStamp) -> Self {
        self.stamp = stamp;
        self
    }

    /// Same pose and stamp with a new error value.
    pub fn with_error(mut self, error: f64) -> Self {
        self.error = error;
        self
    }

    /// `self · other`. The result keeps `self`'s error and stamp.
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            pose: self.pose * other.pose,
            error: self.error,
            stamp: self.stamp,
        }
    }

    /// Inverse pose. Error and stamp are kept.
    pub fn inverse(&self) -> Transform {
        Transform {
            pose: self.pose.inverse(),
            error: self.error,
            stamp: self.stamp,
        }
    }

    /// Translation component.
    pub fn translation(&self) -> [f64; 3] {
        let t = self.pose.translation.vector;
        [t.x, t.y, t.z]
    }

    /// Rotation as a `(w, x, y, z)` unit quaternion.
    pub fn rotation_wxyz(&self) -> [f64; 4] {
        let q = self.pose.rotation.quaternion();
        [q.w, q.i, q.j, q.k]
    }

    /// 4x4 homogeneous matrix.
    pub fn matrix(&self) -> Matrix4<f64> {
        self.pose.to_homogeneous()
    }

    /// Element-wise comparison of the homogeneous matrices.
    pub fn approx_eq(&self, other: &Transform, tolerance: f64) -> bool {
        (self.matrix() - other.matrix()).amax() <= tolerance
    }

    /// Whether the transform is valid at `clock`'s current time.
    pub fn is_valid_now(&self, clock: &dyn Clock) -> bool {
        self.stamp.is_valid_at(clock.now_ms())
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Image frame delivered by a video imager tool.
///
/// Pixels are shared through an `Arc<[u8]>` so republishing a frame with a
/// fresh stamp does not copy the image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Interleaved channels per pixel (1 = mono, 3 = RGB).
    pub channels: u32,
    pixels: Arc<[u8]>,
    /// Validity window.
    pub stamp: TimeStamp,
}

impl Frame {
    /// Frame from owned pixel data.
    pub fn new(width: u32, height: u32, channels: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels: pixels.into(),
            stamp: TimeStamp::zero(),
        }
    }

    /// Pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Expected byte length for the geometry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Whether the buffer length matches the geometry.
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == self.expected_len()
    }

    /// Same pixels with a new stamp.
    pub fn with_stamp(&self, stamp: TimeStamp) -> Self {
        Self {
            width: self.width,
            height: self.height,
            channels: self.channels,
            pixels: Arc::clone(&self.pixels),
            stamp,
        }
    }

    /// Whether the frame is valid at `clock`'s current time.
    pub fn is_valid_now(&self, clock: &dyn Clock) -> bool {
        self.stamp.is_valid_at(clock.now_ms())
    }
}

/// Sample produced by a device strategy for one tool.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSample {
    /// Rigid-body pose from a tracker.
    Transform(Transform),
    /// Image from a video imager.
    Frame(Frame),
}

impl RawSample {
    /// Validity window of the sample.
    pub fn stamp(&self) -> TimeStamp {
        match self {
            RawSample::Transform(t) => t.stamp,
            RawSample::Frame(f) => f.stamp,
        }
    }

    /// Same payload with a new stamp.
    pub fn restamped(&self, stamp: TimeStamp) -> RawSample {
        match self {
            RawSample::Transform(t) => RawSample::Transform(t.with_stamp(stamp)),
            RawSample::Frame(f) => RawSample::Frame(f.with_stamp(stamp)),
        }
    }

    /// Whether the sample is valid at `clock`'s current time.
    pub fn is_valid_now(&self, clock: &dyn Clock) -> bool {
        self.stamp().is_valid_at(clock.now_ms())
    }

    /// Transform payload, if any.
    pub fn as_transform(&self) -> Option<&Transform> {
        match self {
            RawSample::Transform(t) => Some(t),
            RawSample::Frame(_) => None,
        }
    }

    /// Frame payload, if any.
    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            RawSample::Frame(f) => Some(f),
            RawSample::Transform(_) => None,
        }
    }
}

/// Compose a tool's reported transform.
///
/// `T' = P · R⁻¹ · T · C` where `T` is the raw device transform, `C` the
/// tool calibration, `R` the reference tool's raw transform from the same
/// batch and `P` the world transform. Absent `R` or `P` act as identity.
/// The result carries the raw transform's error; callers restamp it.
pub fn compose_tool_transform(
    raw: &Transform,
    calibration: &Transform,
    reference: Option<&Transform>,
    world: Option<&Transform>,
) -> Transform {
    let mut pose = raw.pose * calibration.pose;
    if let Some(reference) = reference {
        pose = reference.pose.inverse() * pose;
    }
    if let Some(world) = world {
        pose = world.pose * pose;
    }
    Transform {
        pose,
        error: raw.error,
        stamp: raw.stamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::f64::consts::FRAC_PI_2;
    use std::time::Duration;

    #[test]
    fn stamp_window_is_half_open() {
        let stamp = TimeStamp::starting_at(1000.0, 50.0);
        assert!(!stamp.is_valid_at(999.9));
        assert!(stamp.is_valid_at(1000.0));
        assert!(stamp.is_valid_at(1049.9));
        assert!(!stamp.is_valid_at(1050.0));
        assert_eq!(stamp.validity_ms(), 50.0);
    }

    #[test]
    fn sample_expires_with_injected_clock() {
        let clock = ManualClock::new(5_000.0);
        let stamp = TimeStamp::starting_at(clock.now_ms(), 50.0);
        let sample = RawSample::Transform(Transform::identity().with_stamp(stamp));

        assert!(sample.is_valid_now(&clock));
        clock.advance(Duration::from_millis(60));
        assert!(!sample.is_valid_now(&clock));
    }

    #[test]
    fn from_parts_normalizes_quaternion() {
        let t = Transform::from_parts([1.0, 2.0, 3.0], [2.0, 0.0, 0.0, 0.0]);
        assert_eq!(t.rotation_wxyz(), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(t.translation(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn inverse_composes_to_identity() {
        let t = Transform::from_axis_angle([1.0, -2.0, 0.5], [0.0, 0.0, FRAC_PI_2]);
        let id = t.compose(&t.inverse());
        assert!(id.approx_eq(&Transform::identity(), 1e-12));
    }

    #[test]
    fn compose_without_reference_or_world_is_raw_times_calibration() {
        let raw = Transform::from_axis_angle([10.0, 0.0, 0.0], [0.0, 0.0, FRAC_PI_2]);
        let cal = Transform::from_parts([0.0, 0.0, 5.0], [1.0, 0.0, 0.0, 0.0]);
        let out = compose_tool_transform(&raw, &cal, None, None);
        assert!(out.approx_eq(&raw.compose(&cal), 1e-12));
    }

    #[test]
    fn frame_restamp_shares_pixels() {
        let frame = Frame::new(2, 2, 1, vec![1, 2, 3, 4]);
        assert!(frame.is_consistent());
        let restamped = frame.with_stamp(TimeStamp::starting_at(10.0, 5.0));
        assert_eq!(restamped.pixels(), frame.pixels());
        assert_eq!(restamped.stamp.start_ms, 10.0);
    }
}
