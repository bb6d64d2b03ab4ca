//! Simulation dynamics: islands, the sequential impulse solver and the
//! discrete dynamics world that drives a step.

pub mod action;
pub mod island;
pub mod solver;
pub mod world;

pub use action::ActionInterface;
pub use island::{SimulationIslandManager, UnionFind};
pub use solver::{
    SequentialImpulseConstraintSolver, SolverBody, SolverConstraint, SolverConstraintType,
    SolverStepMetrics,
};
pub use world::{DiscreteDynamicsWorld, InternalTickCallback};
