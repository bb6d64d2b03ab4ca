//! Collision detection: shapes, DBVT broadphase, GJK/EPA narrowphase,
//! persistent manifolds, convex sweeps and the collision world.

pub mod aabb;
pub mod broadphase;
pub mod ccd;
pub mod contact;
pub mod dbvt;
pub mod dispatcher;
pub mod epa;
pub mod gjk;
pub mod pair_cache;
pub mod queries;
pub mod shapes;
pub mod simplex;
pub mod world;

pub use aabb::Aabb;
pub use broadphase::{Broadphase, BroadphaseProxy, DbvtBroadphase, ProxyId};
pub use ccd::ClosestNotMeConvexResultCallback;
pub use contact::{ManifoldPoint, PersistentManifold, MANIFOLD_CACHE_SIZE};
pub use dispatcher::{CollisionDispatcher, ConvexConvexAlgorithm};
pub use epa::{GjkEpaResults, GjkEpaSolver, GjkEpaStatus};
pub use gjk::{ClosestPointInput, DiscreteCollisionResult, GjkPairDetector, PointCollector};
pub use pair_cache::{BroadphasePair, HashedOverlappingPairCache};
pub use queries::{
    CastResult, ClosestConvexResultCallback, ConvexResultCallback, GjkConvexCast,
    LocalConvexResult,
};
pub use shapes::{BoxShape, CollisionShape, ConvexHullShape, ConvexShape, SphereShape};
pub use simplex::VoronoiSimplexSolver;
pub use world::CollisionWorld;
