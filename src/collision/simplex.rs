//! Voronoi-region simplex solver used by GJK.
//!
//! Keeps up to four Minkowski-difference vertices `w = p - q` together with
//! the support points `p` and `q` that produced them, and finds the point of
//! the simplex closest to the origin with closed-form sub-cases.

use glam::Vec3;

const MAX_VERTS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UsedVertices([bool; 4]);

impl UsedVertices {
    fn set(a: bool, b: bool, c: bool, d: bool) -> Self {
        Self([a, b, c, d])
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SubSimplexResult {
    closest_point: Vec3,
    used: UsedVertices,
    barycentric: [f32; 4],
    degenerate: bool,
}

impl SubSimplexResult {
    fn is_valid(&self) -> bool {
        self.barycentric.iter().all(|&c| c >= 0.0)
    }

    fn found(point: Vec3, used: UsedVertices, barycentric: [f32; 4]) -> Self {
        Self {
            closest_point: point,
            used,
            barycentric,
            degenerate: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoronoiSimplexSolver {
    num_vertices: usize,
    simplex_w: [Vec3; MAX_VERTS],
    simplex_p: [Vec3; MAX_VERTS],
    simplex_q: [Vec3; MAX_VERTS],
    cached_p1: Vec3,
    cached_p2: Vec3,
    cached_v: Vec3,
    last_w: Vec3,
    cached_valid_closest: bool,
    cached_bc: SubSimplexResult,
    needs_update: bool,
}

impl Default for VoronoiSimplexSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl VoronoiSimplexSolver {
    pub fn new() -> Self {
        Self {
            num_vertices: 0,
            simplex_w: [Vec3::ZERO; MAX_VERTS],
            simplex_p: [Vec3::ZERO; MAX_VERTS],
            simplex_q: [Vec3::ZERO; MAX_VERTS],
            cached_p1: Vec3::ZERO,
            cached_p2: Vec3::ZERO,
            cached_v: Vec3::ZERO,
            last_w: Vec3::splat(1e30),
            cached_valid_closest: false,
            cached_bc: SubSimplexResult::default(),
            needs_update: true,
        }
    }

    pub fn reset(&mut self) {
        self.cached_valid_closest = false;
        self.num_vertices = 0;
        self.needs_update = true;
        self.last_w = Vec3::splat(1e30);
        self.cached_bc = SubSimplexResult::default();
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn full_simplex(&self) -> bool {
        self.num_vertices == 4
    }

    /// Vertices `(w, p, q)` currently kept.
    pub fn vertices(&self) -> impl Iterator<Item = (Vec3, Vec3, Vec3)> + '_ {
        (0..self.num_vertices).map(|i| (self.simplex_w[i], self.simplex_p[i], self.simplex_q[i]))
    }

    pub fn add_vertex(&mut self, w: Vec3, p: Vec3, q: Vec3) {
        self.last_w = w;
        self.needs_update = true;
        let n = self.num_vertices;
        self.simplex_w[n] = w;
        self.simplex_p[n] = p;
        self.simplex_q[n] = q;
        self.num_vertices += 1;
    }

    /// True when `w` is already a vertex or was the last one added.
    pub fn in_simplex(&self, w: Vec3) -> bool {
        w == self.last_w || self.simplex_w[..self.num_vertices].iter().any(|&v| v == w)
    }

    /// Closest point of the simplex to the origin, or `None` when the
    /// simplex became degenerate.
    pub fn closest(&mut self) -> Option<Vec3> {
        self.update_closest_vector_and_points()
            .then_some(self.cached_v)
    }

    /// Last computed closest vector, valid or not.
    pub fn backup_closest(&self) -> Vec3 {
        self.cached_v
    }

    /// Witness points on the two shapes for the current closest vector.
    pub fn compute_points(&mut self) -> (Vec3, Vec3) {
        self.update_closest_vector_and_points();
        (self.cached_p1, self.cached_p2)
    }

    fn remove_vertex(&mut self, index: usize) {
        self.num_vertices -= 1;
        let last = self.num_vertices;
        self.simplex_w[index] = self.simplex_w[last];
        self.simplex_p[index] = self.simplex_p[last];
        self.simplex_q[index] = self.simplex_q[last];
    }

    fn reduce_vertices(&mut self, used: UsedVertices) {
        for index in (0..4).rev() {
            if self.num_vertices > index && !used.0[index] {
                self.remove_vertex(index);
            }
        }
    }

    fn blend(points: &[Vec3; MAX_VERTS], bc: &[f32; 4], count: usize) -> Vec3 {
        (0..count).fold(Vec3::ZERO, |acc, i| acc + points[i] * bc[i])
    }

    fn update_closest_vector_and_points(&mut self) -> bool {
        if !self.needs_update {
            return self.cached_valid_closest;
        }
        self.cached_bc = SubSimplexResult::default();
        self.needs_update = false;

        match self.num_vertices {
            1 => {
                self.cached_p1 = self.simplex_p[0];
                self.cached_p2 = self.simplex_q[0];
                self.cached_v = self.cached_p1 - self.cached_p2;
                self.cached_bc.barycentric = [1.0, 0.0, 0.0, 0.0];
                self.cached_valid_closest = self.cached_bc.is_valid();
            }
            2 => {
                let from = self.simplex_w[0];
                let to = self.simplex_w[1];
                let v = to - from;
                let mut t = v.dot(-from);
                if t > 0.0 {
                    let dot_vv = v.dot(v);
                    if t < dot_vv {
                        t /= dot_vv;
                        self.cached_bc.used = UsedVertices::set(true, true, false, false);
                    } else {
                        t = 1.0;
                        self.cached_bc.used = UsedVertices::set(false, true, false, false);
                    }
                } else {
                    t = 0.0;
                    self.cached_bc.used = UsedVertices::set(true, false, false, false);
                }
                self.cached_bc.barycentric = [1.0 - t, t, 0.0, 0.0];
                self.cached_p1 = self.simplex_p[0] + (self.simplex_p[1] - self.simplex_p[0]) * t;
                self.cached_p2 = self.simplex_q[0] + (self.simplex_q[1] - self.simplex_q[0]) * t;
                self.cached_v = self.cached_p1 - self.cached_p2;
                self.reduce_vertices(self.cached_bc.used);
                self.cached_valid_closest = self.cached_bc.is_valid();
            }
            3 => {
                let [a, b, c, ..] = self.simplex_w;
                self.cached_bc = closest_point_triangle(Vec3::ZERO, a, b, c);
                self.cached_p1 = Self::blend(&self.simplex_p, &self.cached_bc.barycentric, 3);
                self.cached_p2 = Self::blend(&self.simplex_q, &self.cached_bc.barycentric, 3);
                self.cached_v = self.cached_p1 - self.cached_p2;
                self.reduce_vertices(self.cached_bc.used);
                self.cached_valid_closest = self.cached_bc.is_valid();
            }
            4 => {
                let [a, b, c, d, _] = self.simplex_w;
                let (separated, result) = closest_point_tetrahedron(Vec3::ZERO, a, b, c, d);
                self.cached_bc = result;
                if separated {
                    self.cached_p1 = Self::blend(&self.simplex_p, &self.cached_bc.barycentric, 4);
                    self.cached_p2 = Self::blend(&self.simplex_q, &self.cached_bc.barycentric, 4);
                    self.cached_v = self.cached_p1 - self.cached_p2;
                    self.reduce_vertices(self.cached_bc.used);
                    self.cached_valid_closest = self.cached_bc.is_valid();
                } else if self.cached_bc.degenerate {
                    self.cached_valid_closest = false;
                } else {
                    // Origin is inside the tetrahedron.
                    self.cached_valid_closest = true;
                    self.cached_v = Vec3::ZERO;
                }
            }
            _ => self.cached_valid_closest = false,
        }
        self.cached_valid_closest
    }
}

fn closest_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> SubSimplexResult {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return SubSimplexResult::found(a, UsedVertices::set(true, false, false, false), [1.0, 0.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return SubSimplexResult::found(b, UsedVertices::set(false, true, false, false), [0.0, 1.0, 0.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return SubSimplexResult::found(
            a + ab * v,
            UsedVertices::set(true, true, false, false),
            [1.0 - v, v, 0.0, 0.0],
        );
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return SubSimplexResult::found(c, UsedVertices::set(false, false, true, false), [0.0, 0.0, 1.0, 0.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return SubSimplexResult::found(
            a + ac * w,
            UsedVertices::set(true, false, true, false),
            [1.0 - w, 0.0, w, 0.0],
        );
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && d4 - d3 >= 0.0 && d5 - d6 >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return SubSimplexResult::found(
            b + (c - b) * w,
            UsedVertices::set(false, true, true, false),
            [0.0, 1.0 - w, w, 0.0],
        );
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    SubSimplexResult::found(
        a + ab * v + ac * w,
        UsedVertices::set(true, true, true, false),
        [1.0 - v - w, v, w, 0.0],
    )
}

/// 1 when `p` and `d` lie on opposite sides of plane `abc`, 0 when on the
/// same side, -1 when the tetrahedron is flat.
fn point_outside_of_plane(p: Vec3, a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> i32 {
    let normal = (b - a).cross(c - a);
    let sign_p = (p - a).dot(normal);
    let sign_d = (d - a).dot(normal);
    if sign_d * sign_d < 1e-4 * 1e-4 {
        return -1;
    }
    i32::from(sign_p * sign_d < 0.0)
}

/// Returns `(separated, result)`. `separated` is false when the point is
/// inside the tetrahedron or the tetrahedron is degenerate.
fn closest_point_tetrahedron(p: Vec3, a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> (bool, SubSimplexResult) {
    let mut result = SubSimplexResult::found(p, UsedVertices::set(true, true, true, true), [0.0; 4]);

    let outside_abc = point_outside_of_plane(p, a, b, c, d);
    let outside_acd = point_outside_of_plane(p, a, c, d, b);
    let outside_adb = point_outside_of_plane(p, a, d, b, c);
    let outside_bdc = point_outside_of_plane(p, b, d, c, a);

    if outside_abc < 0 || outside_acd < 0 || outside_adb < 0 || outside_bdc < 0 {
        result.degenerate = true;
        return (false, result);
    }
    if outside_abc == 0 && outside_acd == 0 && outside_adb == 0 && outside_bdc == 0 {
        return (false, result);
    }

    let mut best_sq_dist = f32::MAX;
    let mut consider = |face: SubSimplexResult, used: UsedVertices, bc: [f32; 4]| {
        let sq_dist = (face.closest_point - p).length_squared();
        if sq_dist < best_sq_dist {
            best_sq_dist = sq_dist;
            result = SubSimplexResult::found(face.closest_point, used, bc);
        }
    };

    if outside_abc != 0 {
        let r = closest_point_triangle(p, a, b, c);
        let [ua, ub, uc, _] = r.used.0;
        let [ba, bb, bc, _] = r.barycentric;
        consider(r, UsedVertices::set(ua, ub, uc, false), [ba, bb, bc, 0.0]);
    }
    if outside_acd != 0 {
        let r = closest_point_triangle(p, a, c, d);
        let [ua, uc, ud, _] = r.used.0;
        let [ba, bc, bd, _] = r.barycentric;
        consider(r, UsedVertices::set(ua, false, uc, ud), [ba, 0.0, bc, bd]);
    }
    if outside_adb != 0 {
        let r = closest_point_triangle(p, a, d, b);
        let [ua, ud, ub, _] = r.used.0;
        let [ba, bd, bb, _] = r.barycentric;
        consider(r, UsedVertices::set(ua, ub, false, ud), [ba, bb, 0.0, bd]);
    }
    if outside_bdc != 0 {
        let r = closest_point_triangle(p, b, d, c);
        let [ub, ud, uc, _] = r.used.0;
        let [bb, bd, bc, _] = r.barycentric;
        consider(r, UsedVertices::set(false, ub, uc, ud), [0.0, bb, bc, bd]);
    }

    (true, result)
}
