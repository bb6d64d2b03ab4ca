//! Default constants and per-world configuration for the engine.

use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, Result};

/// Collision margin given to polyhedral shapes unless overridden.
pub const CONVEX_DISTANCE_MARGIN: f32 = 0.04;

/// Distance at which cached contact points are discarded.
pub const CONTACT_BREAKING_THRESHOLD: f32 = 0.02;

/// Seconds a body must stay below its sleeping thresholds before it may sleep.
pub const DEACTIVATION_TIME: f32 = 2.0;

/// Default gravity vector applied in the physics world (Y-up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, -10.0, 0.0];

/// Default fixed sub-step length (in seconds).
pub const DEFAULT_FIXED_TIME_STEP: f32 = 1.0 / 60.0;

/// Default cap on fixed sub-steps taken per `step_simulation` call.
pub const DEFAULT_MAX_SUB_STEPS: u32 = 1;

/// Number of constraint solver iterations performed per island.
pub const DEFAULT_SOLVER_ITERATIONS: u32 = 10;

/// Baumgarte error reduction for the velocity solve.
pub const DEFAULT_ERP: f32 = 0.2;

/// Error reduction used by the split-impulse position pass.
pub const DEFAULT_ERP2: f32 = 0.1;

/// Contacts shallower than this are left to the velocity solve when split impulse is on.
pub const DEFAULT_SPLIT_IMPULSE_PENETRATION_THRESHOLD: f32 = -0.02;

/// Scale applied to last step's impulses when warm starting.
pub const DEFAULT_WARM_STARTING_FACTOR: f32 = 0.85;

/// Fattening margin added to broadphase leaf volumes.
pub const DBVT_BP_MARGIN: f32 = 0.05;

/// Linear speed below which a body counts as resting.
pub const DEFAULT_LINEAR_SLEEPING_THRESHOLD: f32 = 0.8;

/// Angular speed below which a body counts as resting.
pub const DEFAULT_ANGULAR_SLEEPING_THRESHOLD: f32 = 1.0;

/// Settings owned by one world. Replaces process-wide mutable globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub gravity: [f32; 3],
    pub contact_breaking_threshold: f32,
    pub deactivation_time: f32,
    pub disable_deactivation: bool,
    /// Margin added around moved broadphase leaves.
    pub dbvt_margin: f32,
    /// Frames of motion the broadphase predicts when fattening a moving leaf.
    pub predicted_frames: f32,
    /// Percentage of dynamic-tree leaves re-inserted per broadphase update.
    pub dynamic_update_percent: u32,
    /// Percentage of fixed-tree leaves re-inserted per broadphase update.
    pub fixed_update_percent: u32,
    pub allowed_ccd_penetration: f32,
    /// Logs a warning when a step takes longer than this many milliseconds.
    pub frame_budget_ms: Option<f32>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: DEFAULT_GRAVITY,
            contact_breaking_threshold: CONTACT_BREAKING_THRESHOLD,
            deactivation_time: DEACTIVATION_TIME,
            disable_deactivation: false,
            dbvt_margin: DBVT_BP_MARGIN,
            predicted_frames: 2.0,
            dynamic_update_percent: 1,
            fixed_update_percent: 1,
            allowed_ccd_penetration: 0.0,
            frame_budget_ms: None,
        }
    }
}

fn check_non_negative(field: &'static str, value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(PhysicsError::InvalidConfig {
            field,
            reason: format!("must be finite, got {value}"),
        });
    }
    if value < 0.0 {
        return Err(PhysicsError::InvalidConfig {
            field,
            reason: format!("must not be negative, got {value}"),
        });
    }
    Ok(())
}

impl WorldConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(PhysicsError::InvalidConfig {
                field: "gravity",
                reason: format!("components must be finite, got {:?}", self.gravity),
            });
        }
        check_non_negative("contact_breaking_threshold", self.contact_breaking_threshold)?;
        check_non_negative("deactivation_time", self.deactivation_time)?;
        check_non_negative("dbvt_margin", self.dbvt_margin)?;
        check_non_negative("predicted_frames", self.predicted_frames)?;
        check_non_negative("allowed_ccd_penetration", self.allowed_ccd_penetration)?;
        if let Some(budget) = self.frame_budget_ms {
            check_non_negative("frame_budget_ms", budget)?;
        }
        Ok(())
    }
}

/// Knobs of the sequential impulse solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactSolverInfo {
    /// Length of the sub-step being solved; set by the world before each solve.
    pub time_step: f32,
    pub num_iterations: u32,
    pub erp: f32,
    pub erp2: f32,
    pub split_impulse: bool,
    pub split_impulse_penetration_threshold: f32,
    pub linear_slop: f32,
    pub warm_starting: bool,
    pub warm_starting_factor: f32,
}

impl Default for ContactSolverInfo {
    fn default() -> Self {
        Self {
            time_step: DEFAULT_FIXED_TIME_STEP,
            num_iterations: DEFAULT_SOLVER_ITERATIONS,
            erp: DEFAULT_ERP,
            erp2: DEFAULT_ERP2,
            split_impulse: false,
            split_impulse_penetration_threshold: DEFAULT_SPLIT_IMPULSE_PENETRATION_THRESHOLD,
            linear_slop: 0.0,
            warm_starting: true,
            warm_starting_factor: DEFAULT_WARM_STARTING_FACTOR,
        }
    }
}

impl ContactSolverInfo {
    pub fn validate(&self) -> Result<()> {
        check_non_negative("erp", self.erp)?;
        check_non_negative("erp2", self.erp2)?;
        check_non_negative("linear_slop", self.linear_slop)?;
        check_non_negative("warm_starting_factor", self.warm_starting_factor)?;
        if !self.split_impulse_penetration_threshold.is_finite() {
            return Err(PhysicsError::InvalidConfig {
                field: "split_impulse_penetration_threshold",
                reason: "must be finite".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(WorldConfig::default().validate().is_ok());
        assert!(ContactSolverInfo::default().validate().is_ok());
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let config = WorldConfig {
            contact_breaking_threshold: -1.0,
            ..WorldConfig::default()
        };
        match config.validate() {
            Err(PhysicsError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "contact_breaking_threshold")
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_gravity_is_rejected() {
        let config = WorldConfig {
            gravity: [0.0, f32::NAN, 0.0],
            ..WorldConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
