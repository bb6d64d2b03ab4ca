use std::fmt;

use crate::utils::allocator::EntityId;

/// Errors surfaced by the world-facing API.
///
/// Simulation steps never fail: degenerate geometry and iteration
/// exhaustion inside GJK/EPA or the solver resolve to "no interaction".
/// Only calls made by the host between steps can report an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsError {
    /// The handle does not refer to a live body in this world.
    UnknownBody(EntityId),

    /// A configuration value is out of range.
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// A shape was constructed from unusable data.
    InvalidShape(String),

    /// The body is in the world but has no broadphase proxy.
    MissingProxy(EntityId),
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicsError::UnknownBody(id) => {
                write!(f, "unknown body {}:{}", id.index(), id.generation())
            }
            PhysicsError::InvalidConfig { field, reason } => {
                write!(f, "invalid config `{field}`: {reason}")
            }
            PhysicsError::InvalidShape(msg) => write!(f, "invalid shape: {msg}"),
            PhysicsError::MissingProxy(id) => write!(
                f,
                "body {}:{} has no broadphase proxy",
                id.index(),
                id.generation()
            ),
        }
    }
}

impl std::error::Error for PhysicsError {}

/// Result alias used by fallible world operations.
pub type Result<T> = std::result::Result<T, PhysicsError>;
