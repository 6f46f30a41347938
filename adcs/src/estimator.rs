//! Single-axis yaw estimation from gyro and accelerometer samples.
//!
//! Two yaw feeds are maintained side by side on every update so the operator
//! can switch between them without a restart:
//!
//! - **Pure integration**: `yaw_pure += rate.z * dt`. Unbounded and drifting,
//!   but free of any pull toward the gravity null. This is the control feed.
//! - **Complementary filter**: `yaw_filtered = α (yaw_filtered + rate.z dt) +
//!   (1 - α) accel_angle`. Drift is bounded, at the cost of biasing the
//!   estimate toward the orientation where `accel_angle` reads zero. Useful for
//!   monitoring.
//!
//! Angles are degrees and are never wrapped here; the controller normalizes
//! the error it computes.

use hardware::imu::{AngularRate, GravityVector};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, trace};

/// Which estimator output drives the controller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ControlFeed {
    /// Gyro-only integral (`yaw_pure`)
    #[default]
    Pure,
    /// Complementary-filter output (`yaw_filtered`)
    Filtered,
}

/// Accelerometer axes used for the absolute yaw reference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GravityAxes {
    /// `atan2(g_y, g_z)`
    #[default]
    Yz,
    /// `atan2(g_y, g_x)`, for a board mounted on edge
    Xy,
}

impl GravityAxes {
    /// Gravity-derived reference angle in degrees.
    pub fn angle_deg(self, gravity: &GravityVector) -> f64 {
        match self {
            GravityAxes::Yz => gravity.y.atan2(gravity.z).to_degrees(),
            GravityAxes::Xy => gravity.y.atan2(gravity.x).to_degrees(),
        }
    }
}

/// Fused orientation, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrientationEstimate {
    /// Complementary-filter yaw
    pub yaw_filtered: f64,
    /// Gyro-only yaw integral
    pub yaw_pure: f64,
    /// Roll from the complementary filter
    pub roll: f64,
    /// Pitch from the complementary filter
    pub pitch: f64,
    /// Seconds of integrated time since construction
    pub timestamp: f64,
}

impl OrientationEstimate {
    /// Yaw for the selected feed.
    pub fn yaw(&self, feed: ControlFeed) -> f64 {
        match feed {
            ControlFeed::Pure => self.yaw_pure,
            ControlFeed::Filtered => self.yaw_filtered,
        }
    }
}

/// Complementary filter plus pure gyro integrator.
#[derive(Debug, Clone)]
pub struct OrientationEstimator {
    alpha: f64,
    axes: GravityAxes,
    estimate: OrientationEstimate,
}

impl OrientationEstimator {
    /// Create an estimator at zero orientation.
    ///
    /// `alpha` is the gyro weight of the complementary filter and is clamped
    /// to `[0, 1]`.
    pub fn new(alpha: f64, axes: GravityAxes) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            axes,
            estimate: OrientationEstimate::default(),
        }
    }

    /// Most recent estimate.
    pub fn estimate(&self) -> OrientationEstimate {
        self.estimate
    }

    /// Complementary filter gyro weight.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Advance by `dt` seconds.
    ///
    /// A non-positive or non-finite `dt`, or a non-finite rate, returns the
    /// previous estimate unchanged. A non-finite gravity vector skips the
    /// accelerometer correction for this step only.
    pub fn update(
        &mut self,
        rate: &AngularRate,
        gravity: &GravityVector,
        dt: f64,
    ) -> OrientationEstimate {
        if !dt.is_finite() || dt <= 0.0 || !rate.is_finite() {
            trace!("Skipping estimator update (dt={dt}, rate={rate:?})");
            return self.estimate;
        }

        let est = &mut self.estimate;
        est.yaw_pure += rate.z * dt;
        est.timestamp += dt;

        let gyro_yaw = est.yaw_filtered + rate.z * dt;
        let gyro_roll = est.roll + rate.x * dt;
        let gyro_pitch = est.pitch + rate.y * dt;

        if gravity.is_finite() {
            let a = self.alpha;
            let roll_ref = gravity.y.atan2(gravity.z).to_degrees();
            let pitch_ref = (-gravity.x)
                .atan2((gravity.y * gravity.y + gravity.z * gravity.z).sqrt())
                .to_degrees();
            est.yaw_filtered = a * gyro_yaw + (1.0 - a) * self.axes.angle_deg(gravity);
            est.roll = a * gyro_roll + (1.0 - a) * roll_ref;
            est.pitch = a * gyro_pitch + (1.0 - a) * pitch_ref;
        } else {
            est.yaw_filtered = gyro_yaw;
            est.roll = gyro_roll;
            est.pitch = gyro_pitch;
        }

        self.estimate
    }

    /// Take the current physical orientation as the zero reference.
    pub fn zero(&mut self) {
        debug!(
            "Zeroing orientation (was yaw_pure={:.2}, yaw_filtered={:.2})",
            self.estimate.yaw_pure, self.estimate.yaw_filtered
        );
        self.estimate.yaw_pure = 0.0;
        self.estimate.yaw_filtered = 0.0;
        self.estimate.roll = 0.0;
        self.estimate.pitch = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    fn level() -> GravityVector {
        GravityVector::level()
    }

    #[test]
    fn test_constant_rate_integrates_exactly() {
        let mut est = OrientationEstimator::new(0.98, GravityAxes::Yz);
        let rate = AngularRate::new(0.0, 0.0, 12.5);
        let dt = 0.05;
        for _ in 0..200 {
            est.update(&rate, &level(), dt);
        }
        let e = est.estimate();
        assert_relative_eq!(e.yaw_pure, 12.5 * 10.0, epsilon = 1e-9);
        assert_relative_eq!(e.timestamp, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pure_integral_independent_of_alpha() {
        let rate = AngularRate::new(0.0, 0.0, -3.0);
        let mut a = OrientationEstimator::new(0.5, GravityAxes::Yz);
        let mut b = OrientationEstimator::new(1.0, GravityAxes::Xy);
        for _ in 0..50 {
            a.update(&rate, &level(), 0.02);
            b.update(&rate, &GravityVector::new(0.3, 0.4, 0.8), 0.02);
        }
        assert_relative_eq!(a.estimate().yaw_pure, b.estimate().yaw_pure, epsilon = 1e-12);
        assert_relative_eq!(a.estimate().yaw_pure, -3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_filter_bounds_drift_toward_gravity_reference() {
        let mut est = OrientationEstimator::new(0.98, GravityAxes::Yz);
        let rate = AngularRate::new(0.0, 0.0, 1.0);
        for _ in 0..10_000 {
            est.update(&rate, &level(), 0.05);
        }
        let e = est.estimate();
        assert!(e.yaw_pure > 499.0);
        // Fixed point of y = a (y + r dt) with zero reference.
        let bound = 0.98 * 0.05 / (1.0 - 0.98);
        assert_relative_eq!(e.yaw_filtered, bound, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_dt_leaves_estimate_unchanged() {
        let mut est = OrientationEstimator::new(0.98, GravityAxes::Yz);
        let rate = AngularRate::new(1.0, 2.0, 3.0);
        let before = est.update(&rate, &level(), 0.1);

        assert_eq!(est.update(&rate, &level(), 0.0), before);
        assert_eq!(est.update(&rate, &level(), -0.1), before);
        assert_eq!(est.update(&rate, &level(), f64::NAN), before);
        assert_eq!(
            est.update(&AngularRate::new(0.0, 0.0, f64::NAN), &level(), 0.1),
            before
        );
    }

    #[test]
    fn test_nonfinite_gravity_integrates_gyro_only() {
        let mut est = OrientationEstimator::new(0.5, GravityAxes::Yz);
        let bad = GravityVector::new(f64::NAN, 0.0, 1.0);
        let e = est.update(&AngularRate::new(0.0, 0.0, 10.0), &bad, 0.1);
        assert_relative_eq!(e.yaw_filtered, 1.0, epsilon = 1e-12);
        assert_relative_eq!(e.yaw_pure, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_resets_angles() {
        let mut est = OrientationEstimator::new(0.98, GravityAxes::Yz);
        est.update(&AngularRate::new(5.0, 5.0, 5.0), &level(), 1.0);
        est.zero();
        let e = est.estimate();
        assert_eq!(e.yaw_pure, 0.0);
        assert_eq!(e.yaw_filtered, 0.0);
        assert_eq!(e.roll, 0.0);
        assert_eq!(e.pitch, 0.0);
        assert_relative_eq!(e.timestamp, 1.0);
    }

    #[test]
    fn test_gravity_axes() {
        let g = GravityVector::new(1.0, 1.0, 0.0);
        assert_relative_eq!(GravityAxes::Xy.angle_deg(&g), 45.0, epsilon = 1e-12);
        assert_relative_eq!(GravityAxes::Yz.angle_deg(&g), 90.0, epsilon = 1e-12);
        assert_eq!(GravityAxes::from_str("XY").unwrap(), GravityAxes::Xy);
    }

    #[test]
    fn test_feed_selection() {
        let e = OrientationEstimate {
            yaw_filtered: 1.0,
            yaw_pure: 2.0,
            ..Default::default()
        };
        assert_eq!(e.yaw(ControlFeed::Pure), 2.0);
        assert_eq!(e.yaw(ControlFeed::Filtered), 1.0);
        assert_eq!(ControlFeed::default(), ControlFeed::Pure);
        assert_eq!(ControlFeed::from_str("filtered").unwrap(), ControlFeed::Filtered);
    }
}
