//! Closest points between two convex shapes.
//!
//! [`GjkPairDetector`] runs GJK on the margin-free cores of both shapes and
//! adds the margins back onto the result. When the cores overlap it falls
//! back to [`GjkEpaSolver`] for the penetration depth.

use glam::Vec3;

use super::epa::GjkEpaSolver;
use super::shapes::ConvexShape;
use super::simplex::VoronoiSimplexSolver;
use crate::core::types::Transform;

/// Placement of the two shapes for one closest-point query.
#[derive(Debug, Clone, Copy)]
pub struct ClosestPointInput {
    pub transform_a: Transform,
    pub transform_b: Transform,
    /// Queries stop early once the shapes are provably further apart than this.
    pub maximum_distance_squared: f32,
}

impl ClosestPointInput {
    pub fn new(transform_a: Transform, transform_b: Transform) -> Self {
        Self {
            transform_a,
            transform_b,
            maximum_distance_squared: f32::MAX,
        }
    }
}

/// Receives contact points from a discrete collision query.
pub trait DiscreteCollisionResult {
    /// `normal_on_b` points from B towards A; `point_in_world` lies on B;
    /// `depth` is the signed distance, negative when penetrating.
    fn add_contact_point(&mut self, normal_on_b: Vec3, point_in_world: Vec3, depth: f32);
}

/// Keeps the single closest point reported to it.
#[derive(Debug, Clone, Copy)]
pub struct PointCollector {
    pub normal_on_b: Vec3,
    pub point_in_world: Vec3,
    pub distance: f32,
    pub has_result: bool,
}

impl Default for PointCollector {
    fn default() -> Self {
        Self {
            normal_on_b: Vec3::ZERO,
            point_in_world: Vec3::ZERO,
            distance: 1e30,
            has_result: false,
        }
    }
}

impl DiscreteCollisionResult for PointCollector {
    fn add_contact_point(&mut self, normal_on_b: Vec3, point_in_world: Vec3, depth: f32) {
        if depth < self.distance {
            self.has_result = true;
            self.normal_on_b = normal_on_b;
            self.point_in_world = point_in_world;
            self.distance = depth;
        }
    }
}

/// Which branch produced the last result, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GjkMethod {
    #[default]
    None,
    /// Separated cores; distance from GJK.
    Gjk,
    /// Cores touching with a degenerate separating axis.
    GjkDegenerate,
    /// Penetration depth from EPA.
    Epa,
    /// EPA ran but GJK's answer was kept.
    EpaRejected,
}

pub struct GjkPairDetector<'a> {
    shape_a: &'a dyn ConvexShape,
    shape_b: &'a dyn ConvexShape,
    penetration_solver: Option<&'a GjkEpaSolver>,
    simplex: VoronoiSimplexSolver,
    cached_separating_axis: Vec3,
    ignore_margin: bool,
    degenerate_simplex: u32,
    last_method: GjkMethod,
    iterations: usize,
}

impl<'a> GjkPairDetector<'a> {
    const REL_ERROR2: f32 = 1.0e-6;
    const MAX_ITERATIONS: usize = 1000;

    pub fn new(
        shape_a: &'a dyn ConvexShape,
        shape_b: &'a dyn ConvexShape,
        penetration_solver: Option<&'a GjkEpaSolver>,
    ) -> Self {
        Self {
            shape_a,
            shape_b,
            penetration_solver,
            simplex: VoronoiSimplexSolver::new(),
            cached_separating_axis: Vec3::Y,
            ignore_margin: false,
            degenerate_simplex: 0,
            last_method: GjkMethod::None,
            iterations: 0,
        }
    }

    /// Treats both shapes as their cores. Used by sweeps that inflate the
    /// shapes themselves.
    pub fn set_ignore_margin(&mut self, ignore: bool) {
        self.ignore_margin = ignore;
    }

    pub fn cached_separating_axis(&self) -> Vec3 {
        self.cached_separating_axis
    }

    pub fn last_method(&self) -> GjkMethod {
        self.last_method
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Reports at most one point to `output`: the closest pair when the
    /// shapes are apart, or the deepest penetration when they overlap.
    pub fn get_closest_points(
        &mut self,
        input: &ClosestPointInput,
        output: &mut dyn DiscreteCollisionResult,
    ) {
        let mut transform_a = input.transform_a;
        let mut transform_b = input.transform_b;
        let position_offset = (transform_a.position + transform_b.position) * 0.5;
        transform_a.position -= position_offset;
        transform_b.position -= position_offset;

        let (margin_a, margin_b) = if self.ignore_margin {
            (0.0, 0.0)
        } else {
            (self.shape_a.margin(), self.shape_b.margin())
        };
        let margin = margin_a + margin_b;

        self.iterations = 0;
        self.cached_separating_axis = Vec3::Y;
        self.degenerate_simplex = 0;
        self.last_method = GjkMethod::None;
        self.simplex.reset();

        let mut normal_on_b = Vec3::ZERO;
        let mut point_on_b = Vec3::ZERO;
        let mut distance = 0.0;
        let mut is_valid = false;
        let mut check_simplex = false;
        let mut check_penetration = true;
        let mut squared_distance = f32::MAX;

        loop {
            let axis = self.cached_separating_axis;
            let p_local = self
                .shape_a
                .local_support_without_margin(transform_a.inverse_transform_vector(-axis));
            let q_local = self
                .shape_b
                .local_support_without_margin(transform_b.inverse_transform_vector(axis));
            let p = transform_a.transform_point(p_local);
            let q = transform_b.transform_point(q_local);
            let w = p - q;
            let delta = axis.dot(w);

            if delta > 0.0 && delta * delta > squared_distance * input.maximum_distance_squared {
                check_penetration = false;
                break;
            }
            if self.simplex.in_simplex(w) {
                self.degenerate_simplex = 1;
                check_simplex = true;
                break;
            }
            let f0 = squared_distance - delta;
            if f0 <= squared_distance * Self::REL_ERROR2 {
                if f0 <= 0.0 {
                    self.degenerate_simplex = 2;
                }
                check_simplex = true;
                break;
            }

            self.simplex.add_vertex(w, p, q);
            match self.simplex.closest() {
                Some(v) => self.cached_separating_axis = v,
                None => {
                    self.cached_separating_axis = self.simplex.backup_closest();
                    self.degenerate_simplex = 3;
                    check_simplex = true;
                    break;
                }
            }
            if self.cached_separating_axis.length_squared() < Self::REL_ERROR2 {
                self.degenerate_simplex = 6;
                check_simplex = true;
                break;
            }

            let previous = squared_distance;
            squared_distance = self.cached_separating_axis.length_squared();
            if previous - squared_distance <= f32::EPSILON * previous {
                self.cached_separating_axis = self.simplex.backup_closest();
                check_simplex = true;
                break;
            }

            self.iterations += 1;
            if self.iterations > Self::MAX_ITERATIONS {
                log::debug!(
                    "gjk: no convergence after {} iterations, squared distance {squared_distance}",
                    self.iterations
                );
                break;
            }
            if self.simplex.full_simplex() {
                self.cached_separating_axis = self.simplex.backup_closest();
                break;
            }
        }

        if check_simplex {
            let (_, pb) = self.simplex.compute_points();
            point_on_b = pb;
            let axis = self.cached_separating_axis;
            let len_sqr = axis.length_squared();
            if len_sqr < 1.0e-4 {
                self.degenerate_simplex = 5;
            }
            if len_sqr > f32::EPSILON * f32::EPSILON {
                let rlen = 1.0 / len_sqr.sqrt();
                normal_on_b = axis * rlen;
                point_on_b += axis * (margin_b / squared_distance.sqrt());
                distance = 1.0 / rlen - margin;
                is_valid = true;
                self.last_method = GjkMethod::Gjk;
            } else {
                self.last_method = GjkMethod::GjkDegenerate;
            }
        }

        if let Some(solver) = self.penetration_solver {
            let catch_degenerate = self.degenerate_simplex != 0 && distance + margin < 0.01;
            if check_penetration && (!is_valid || catch_degenerate) {
                match solver.penetration_depth(self.shape_a, &transform_a, self.shape_b, &transform_b)
                {
                    Some((pa, pb)) => {
                        let n = pb - pa;
                        let len_sqr = n.length_squared();
                        if len_sqr > f32::EPSILON * f32::EPSILON {
                            let distance2 = -(pa - pb).length();
                            if !is_valid || distance2 < distance {
                                distance = distance2;
                                point_on_b = pb;
                                normal_on_b = n / len_sqr.sqrt();
                                is_valid = true;
                                self.last_method = GjkMethod::Epa;
                            } else {
                                self.last_method = GjkMethod::EpaRejected;
                            }
                        }
                    }
                    None => log::trace!("gjk: penetration solver found no depth"),
                }
            }
        }

        if is_valid {
            output.add_contact_point(normal_on_b, point_on_b + position_offset, distance);
        }
    }
}
