//! Optional joint sidecars: limits, motors, springs, and config overrides.
//!
//! Each is an optional field on the joint record. Attaching or detaching one
//! at runtime is a direct mutation under the deferred queue; the solver only
//! sees the state present when assembly runs.

use serde::{Deserialize, Serialize};

use crate::config::ConstraintConfigBlock;

/// Min/max bound on a joint's primary coordinate (translation along an axis,
/// angle about a hinge, rope length).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub min: f32,
    pub max: f32,
    pub active: bool,
}

impl JointLimit {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            active: true,
        }
    }
}

/// Which side of a limit the coordinate currently presses against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitState {
    #[default]
    Inactive,
    AtLower,
    AtUpper,
}

/// Drives a joint's primary coordinate toward a target speed, bounded by a
/// maximum impulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointMotor {
    pub target_speed: f32,
    pub max_impulse: f32,
    pub active: bool,
    /// Reverses the motor direction without touching the target speed.
    pub reverse: bool,
}

impl JointMotor {
    pub fn new(target_speed: f32, max_impulse: f32) -> Self {
        Self {
            target_speed,
            max_impulse,
            active: true,
            reverse: false,
        }
    }

    pub fn effective_speed(&self) -> f32 {
        if self.reverse {
            -self.target_speed
        } else {
            self.target_speed
        }
    }
}

/// Converts the joint's hard primary rows into soft constraints with the
/// given frequency and damping ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSpring {
    pub frequency_hz: f32,
    pub damping_ratio: f32,
}

impl Default for JointSpring {
    fn default() -> Self {
        Self {
            frequency_hz: 4.0,
            damping_ratio: 0.7,
        }
    }
}

/// Per-joint override of the solver configuration block.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointConfigOverride {
    pub block: ConstraintConfigBlock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_motor_flips_its_target() {
        let mut motor = JointMotor::new(2.0, 10.0);
        assert_eq!(motor.effective_speed(), 2.0);
        motor.reverse = true;
        assert_eq!(motor.effective_speed(), -2.0);
    }
}
