//! Stepper axis geometry and step conversion

/// Moves below this threshold on both axes are treated as already on target
pub const NEGLIGIBLE_MOVE_DEG: f64 = 0.1;

/// Gimbal axis identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Horizontal rotation, positive counter-clockwise seen from above
    Pan,
    /// Vertical rotation, positive upward; carries the limit switch
    Tilt,
}

/// Stepping direction, taken from the sign of the commanded delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Positive angular direction
    Forward,
    /// Negative angular direction
    Reverse,
}

impl Direction {
    /// Direction for a signed angular delta
    pub fn from_delta(delta_deg: f64) -> Self {
        if delta_deg < 0.0 {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }

    /// The opposite direction
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// Signed unit factor (+1 forward, -1 reverse)
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }
}

/// Per-axis stepper geometry
#[derive(Debug, Clone, Copy)]
pub struct AxisConfig {
    /// Degrees of motor shaft rotation per full step
    pub step_angle_deg: f64,
    /// Gear reduction between motor and axis output
    pub reduction: f64,
}

impl AxisConfig {
    /// Create an axis configuration
    pub fn new(step_angle_deg: f64, reduction: f64) -> Self {
        AxisConfig {
            step_angle_deg,
            reduction,
        }
    }

    /// Pan axis as built: 0.9 degree steppers behind a 5:1 belt
    pub fn pan_default() -> Self {
        AxisConfig::new(0.9, 5.0)
    }

    /// Tilt axis as built: direct drive 0.9 degree stepper
    pub fn tilt_default() -> Self {
        AxisConfig::new(0.9, 1.0)
    }

    /// Motor steps per full motor revolution
    pub fn steps_per_rev(&self) -> f64 {
        360.0 / self.step_angle_deg
    }

    /// Whole motor steps needed to rotate the axis by `angle_deg` (sign ignored)
    pub fn steps_for(&self, angle_deg: f64) -> u32 {
        (angle_deg.abs() * self.reduction * self.steps_per_rev() / 360.0).round() as u32
    }

    /// Axis degrees traversed by a single motor step
    pub fn deg_per_step(&self) -> f64 {
        self.step_angle_deg / self.reduction
    }
}

/// True when both deltas fall below [`NEGLIGIBLE_MOVE_DEG`]
pub fn is_negligible(pan_deg: f64, tilt_deg: f64) -> bool {
    pan_deg.abs() < NEGLIGIBLE_MOVE_DEG && tilt_deg.abs() < NEGLIGIBLE_MOVE_DEG
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_step_counts_for_reference_move() {
        // 0.9 degree steppers: 400 steps per motor revolution
        let pan = AxisConfig::pan_default();
        let tilt = AxisConfig::tilt_default();

        // 10 * 5 * 400 / 360 = 55.56, 5 * 400 / 360 = 5.56
        assert_eq!(pan.steps_for(10.0), 56);
        assert_eq!(tilt.steps_for(-5.0), 6);
    }

    #[test]
    fn test_sub_step_angles_round_to_zero() {
        let pan = AxisConfig::pan_default();
        assert_eq!(pan.steps_for(0.05), 0);
        assert_eq!(pan.steps_for(0.0), 0);
    }

    #[test]
    fn test_deg_per_step_includes_reduction() {
        assert_relative_eq!(AxisConfig::pan_default().deg_per_step(), 0.18);
        assert_relative_eq!(AxisConfig::tilt_default().deg_per_step(), 0.9);
    }

    #[test]
    fn test_direction_from_delta_sign() {
        assert_eq!(Direction::from_delta(3.0), Direction::Forward);
        assert_eq!(Direction::from_delta(-0.2), Direction::Reverse);
        assert_eq!(Direction::from_delta(0.0), Direction::Forward);
        assert_eq!(Direction::Reverse.opposite(), Direction::Forward);
        assert_eq!(Direction::Reverse.sign(), -1);
    }

    #[test]
    fn test_negligible_needs_both_axes_small() {
        assert!(is_negligible(0.05, 0.02));
        assert!(!is_negligible(0.05, 0.2));
        assert!(!is_negligible(10.0, 0.0));
    }
}
