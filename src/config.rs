//! World and solver configuration.
//!
//! Everything here is plain data injected into the pipeline; there is no
//! process-wide physics state. The solver configuration is a serializable
//! resource so projects can tune constraint behavior per joint type.

use glam::Vec3;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::constraints::joints::JointKindId;

/// Default gravity vector applied in a physics world (Y-up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];

/// Default fixed timestep (in seconds).
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

/// Smallest timestep accepted before clamping kicks in.
pub const MIN_TIME_STEP: f32 = 1e-6;

/// Velocity setters clamp each component into this range to stop NaN/infinity
/// intrusion from user scripts.
pub const MAX_VELOCITY: f32 = 1e10;

/// Linear speed (units/sec) below which a body counts as not moving.
pub const LINEAR_SLEEP_EPSILON: f32 = 0.02;

/// Angular speed (radians/sec) below which a body counts as not rotating.
pub const ANGULAR_SLEEP_EPSILON: f32 = 0.02;

/// How long a body must stay below the sleep thresholds before it sleeps.
pub const TIME_TO_SLEEP: f32 = 0.5;

/// Maximum number of contact points kept per manifold.
pub const MAX_MANIFOLD_POINTS: usize = 4;

/// Contact points within this body-space distance of a cached point inherit
/// its accumulated impulses during point matching.
pub const CONTACT_MATCH_SLOP: f32 = 0.05;

/// Approach speed below which restitution is ignored, so resting contacts
/// don't jitter.
pub const RESTITUTION_THRESHOLD: f32 = 0.5;

/// Which integration scheme advances body state.
///
/// Contact solving requires a single velocity per step, so the multi-stage
/// schemes exist for parity and ballistic-only worlds, not for stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntegrationMethod {
    #[default]
    SemiImplicitEuler,
    Verlet,
    Rk2,
    Rk4,
}

/// How position error gets corrected after the velocity solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionCorrectionMode {
    /// Mix error into the velocity solve through a penalty bias.
    #[default]
    Baumgarte,
    /// Directly translate/rotate bodies in a second solve phase.
    PostStabilization,
}

/// Per-constraint override of the world correction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConstraintCorrectionMode {
    Baumgarte,
    PostStabilization,
    #[default]
    Inherit,
}

/// Row-at-a-time or per-constraint block solving during position correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionSolveKind {
    #[default]
    Basic,
    Block,
}

/// How contact tangents are generated for friction rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContactTangentMode {
    /// Gram-Schmidt pair from the contact normal.
    #[default]
    Orthonormal,
    /// First tangent aligned with the relative velocity projected onto the
    /// contact plane; falls back to orthonormal when the bodies are at rest.
    VelocityAligned,
    /// Pseudo-random tangents, for shaking out numerical-stability issues.
    Random,
}

/// Which constraint solver an island uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverKind {
    /// One flat constraint list, solved in order.
    Basic,
    /// Constraints split by type into separate lists.
    Normal,
    /// Flat SoA body arrays keyed by a per-island index map. Default.
    #[default]
    GenericBasic,
    /// Rows partitioned into phases of body-disjoint batches.
    Threaded,
}

/// Optional merging of small islands before solving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IslandMergeMode {
    #[default]
    None,
    ColliderCount,
    ConstraintCount,
}

/// Per-world simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub gravity: Vec3,
    pub time_step: f32,
    /// Whether new bodies set to `InheritFromSpace` behave as 2D.
    pub mode_2d: bool,
    pub integration: IntegrationMethod,
    pub tangent_mode: ContactTangentMode,
    pub warm_starting: bool,
    pub allow_sleeping: bool,
    /// Whether skip-resolution contacts still connect islands for sleeping.
    pub sleep_through_skipped_contacts: bool,
    pub island_merge: IslandMergeMode,
    /// Islands below this size get merged when `island_merge` is active.
    pub island_merge_threshold: usize,
    pub solver_kind: SolverKind,
    /// Upper bound on live contact-pair records. Excess pairs degrade to
    /// "no contact" with an immediate ended event.
    pub max_contacts: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::from_slice(&DEFAULT_GRAVITY),
            time_step: DEFAULT_TIME_STEP,
            mode_2d: false,
            integration: IntegrationMethod::SemiImplicitEuler,
            tangent_mode: ContactTangentMode::Orthonormal,
            warm_starting: true,
            allow_sleeping: true,
            sleep_through_skipped_contacts: true,
            island_merge: IslandMergeMode::None,
            island_merge_threshold: 8,
            solver_kind: SolverKind::GenericBasic,
            max_contacts: 4096,
        }
    }
}

impl WorldConfig {
    /// Clamps out-of-range values, warning once per offending field.
    pub fn sanitize(&mut self) {
        if self.time_step < MIN_TIME_STEP {
            warn!(
                "time_step {} below minimum, clamping to {}",
                self.time_step, MIN_TIME_STEP
            );
            self.time_step = MIN_TIME_STEP;
        }
        if self.max_contacts == 0 {
            warn!("max_contacts of 0 would drop every pair, clamping to 1");
            self.max_contacts = 1;
        }
    }
}

/// Tunables for solving one constraint type.
///
/// `Inherit` fields resolve against the global block at assembly time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfigBlock {
    /// Error allowed before position correction takes effect.
    pub slop: f32,
    pub linear_baumgarte: f32,
    pub angular_baumgarte: f32,
    /// Max linear error corrected in one frame (post-stabilization only).
    pub linear_error_correction: f32,
    /// Max angular error corrected in one frame (post-stabilization only).
    pub angular_error_correction: f32,
    pub correction_mode: ConstraintCorrectionMode,
}

impl Default for ConstraintConfigBlock {
    fn default() -> Self {
        Self {
            slop: 0.02,
            linear_baumgarte: 0.2,
            angular_baumgarte: 0.2,
            linear_error_correction: 0.2,
            angular_error_correction: 0.2,
            correction_mode: ConstraintCorrectionMode::Inherit,
        }
    }
}

/// Serializable solver configuration resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    pub position_correction: PositionCorrectionMode,
    pub position_solve_kind: PositionSolveKind,
    /// Contacts solved before joints when true.
    pub contacts_before_joints: bool,
    /// Global defaults for any joint type without an override block.
    pub global_block: ConstraintConfigBlock,
    /// The block used for contact constraints.
    pub contact_block: ConstraintConfigBlock,
    /// Per-joint-type overrides, keyed by the joint's kind id.
    pub joint_blocks: Vec<(JointKindId, ConstraintConfigBlock)>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_iterations: 10,
            position_iterations: 4,
            position_correction: PositionCorrectionMode::Baumgarte,
            position_solve_kind: PositionSolveKind::Basic,
            contacts_before_joints: true,
            global_block: ConstraintConfigBlock::default(),
            contact_block: ConstraintConfigBlock::default(),
            joint_blocks: Vec::new(),
        }
    }
}

impl SolverConfig {
    pub fn sanitize(&mut self) {
        if self.velocity_iterations == 0 {
            warn!("velocity_iterations of 0 clamped to 1");
            self.velocity_iterations = 1;
        }
        if self.position_iterations == 0 {
            warn!("position_iterations of 0 clamped to 1");
            self.position_iterations = 1;
        }
    }

    /// The effective block for a joint kind, falling back to the global block.
    pub fn block_for(&self, kind: JointKindId) -> ConstraintConfigBlock {
        self.joint_blocks
            .iter()
            .find(|(id, _)| *id == kind)
            .map(|(_, block)| *block)
            .unwrap_or(self.global_block)
    }

    /// Resolves a block's correction mode against the world default.
    pub fn correction_for(&self, block: &ConstraintConfigBlock) -> PositionCorrectionMode {
        match block.correction_mode {
            ConstraintCorrectionMode::Baumgarte => PositionCorrectionMode::Baumgarte,
            ConstraintCorrectionMode::PostStabilization => PositionCorrectionMode::PostStabilization,
            ConstraintCorrectionMode::Inherit => self.position_correction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_degenerate_values() {
        let mut config = WorldConfig {
            time_step: 0.0,
            max_contacts: 0,
            ..WorldConfig::default()
        };
        config.sanitize();
        assert_eq!(config.time_step, MIN_TIME_STEP);
        assert_eq!(config.max_contacts, 1);

        let mut solver = SolverConfig {
            velocity_iterations: 0,
            position_iterations: 0,
            ..SolverConfig::default()
        };
        solver.sanitize();
        assert_eq!(solver.velocity_iterations, 1);
        assert_eq!(solver.position_iterations, 1);
    }

    #[test]
    fn joint_blocks_override_the_global_block() {
        let mut config = SolverConfig::default();
        let mut block = ConstraintConfigBlock::default();
        block.slop = 0.5;
        config.joint_blocks.push((JointKindId::Revolute, block));

        assert_eq!(config.block_for(JointKindId::Revolute).slop, 0.5);
        assert_eq!(
            config.block_for(JointKindId::Prismatic).slop,
            config.global_block.slop
        );
    }
}
