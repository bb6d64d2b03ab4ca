//! Penetration depth between two overlapping convex shapes.
//!
//! A dedicated GJK pass first grows a simplex around the origin of the
//! Minkowski difference. The expanding polytope algorithm then pushes the
//! polytope face nearest to the origin outwards until it reaches the
//! boundary; that face gives the penetration normal, the depth and, through
//! its barycentric coordinates, the witness points on both shapes.

use std::collections::HashSet;
use std::f32::consts::TAU;

use glam::{Quat, Vec3};
use log::debug;

use super::shapes::ConvexShape;
use crate::core::types::Transform;

/// Outcome of a [`GjkEpaSolver::collide`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GjkEpaStatus {
    #[default]
    Separated,
    Penetrating,
    /// GJK ran out of iterations before deciding.
    GjkFailed,
    /// The polytope could not be built or expanded.
    EpaFailed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GjkEpaResults {
    pub status: GjkEpaStatus,
    /// Deepest point of each shape inside the other.
    pub witnesses: [Vec3; 2],
    pub normal: Vec3,
    pub depth: f32,
    pub gjk_iterations: usize,
    pub epa_iterations: usize,
}

const GJK_MAX_ITERATIONS: usize = 128;
const GJK_IN_SIMPLEX_EPS: f32 = 0.0001;
const GJK_SQ_IN_SIMPLEX_EPS: f32 = GJK_IN_SIMPLEX_EPS * GJK_IN_SIMPLEX_EPS;
const EPA_MAX_ITERATIONS: usize = 256;
const EPA_IN_FACE_EPS: f32 = 0.01;
const EPA_ACCURACY: f32 = 0.001;

const MOD3: [usize; 5] = [0, 1, 2, 0, 1];
const TETRAHEDRON_FACES: [[usize; 3]; 4] = [[2, 1, 0], [3, 0, 1], [3, 1, 2], [3, 2, 0]];
const TETRAHEDRON_EDGES: [[usize; 4]; 6] = [
    [0, 0, 2, 1],
    [0, 1, 1, 1],
    [0, 2, 3, 1],
    [1, 0, 3, 2],
    [2, 0, 1, 2],
    [3, 0, 2, 2],
];
const HEXAHEDRON_FACES: [[usize; 3]; 6] = [
    [2, 0, 4],
    [4, 1, 2],
    [1, 4, 0],
    [0, 3, 1],
    [0, 2, 3],
    [1, 3, 2],
];
const HEXAHEDRON_EDGES: [[usize; 4]; 9] = [
    [0, 0, 4, 0],
    [0, 1, 2, 1],
    [0, 2, 1, 2],
    [1, 1, 5, 2],
    [1, 0, 2, 0],
    [2, 2, 3, 2],
    [3, 1, 5, 0],
    [3, 0, 4, 2],
    [5, 1, 4, 1],
];

/// Minkowski vertex: `w` is the support point of the difference along `r`.
#[derive(Debug, Clone, Copy, Default)]
struct Mkv {
    w: Vec3,
    r: Vec3,
}

/// The two shapes as seen by the GJK/EPA pair.
struct MinkowskiPair<'a> {
    shapes: [&'a dyn ConvexShape; 2],
    transforms: [Transform; 2],
    margin: f32,
}

impl MinkowskiPair<'_> {
    fn local_support(&self, d: Vec3, i: usize) -> Vec3 {
        let t = &self.transforms[i];
        let local = t.rotation.inverse() * d;
        t.rotation * self.shapes[i].local_support(local) + t.position
    }

    fn support(&self, d: Vec3) -> Mkv {
        let w = self.local_support(d, 0) - self.local_support(-d, 1) + d * self.margin;
        Mkv { w, r: d }
    }
}

struct Gjk<'a> {
    pair: MinkowskiPair<'a>,
    visited: HashSet<[u32; 3]>,
    simplex: [Mkv; 5],
    ray: Vec3,
    order: i32,
    iterations: usize,
    failed: bool,
}

impl<'a> Gjk<'a> {
    fn new(pair: MinkowskiPair<'a>) -> Self {
        Self {
            pair,
            visited: HashSet::new(),
            simplex: [Mkv::default(); 5],
            ray: Vec3::ZERO,
            order: -1,
            iterations: 0,
            failed: false,
        }
    }

    /// Adds the support point along the current ray. Returns false when the
    /// ray was already probed or the new point does not pass the origin.
    fn fetch_support(&mut self) -> bool {
        let key = self.ray.to_array().map(f32::to_bits);
        if !self.visited.insert(key) {
            self.order -= 1;
            return false;
        }
        self.order += 1;
        let v = self.pair.support(self.ray);
        self.simplex[self.order as usize] = v;
        self.ray.dot(v.w) > 0.0
    }

    fn solve_simplex2(&mut self, ao: Vec3, ab: Vec3) -> bool {
        if ab.dot(ao) >= 0.0 {
            let cabo = ab.cross(ao);
            if cabo.length_squared() > GJK_SQ_IN_SIMPLEX_EPS {
                self.ray = cabo.cross(ab);
            } else {
                return true;
            }
        } else {
            self.order = 0;
            self.simplex[0] = self.simplex[1];
            self.ray = ao;
        }
        false
    }

    fn solve_simplex3(&mut self, ao: Vec3, ab: Vec3, ac: Vec3) -> bool {
        self.solve_simplex3a(ao, ab, ac, ab.cross(ac))
    }

    fn solve_simplex3a(&mut self, ao: Vec3, ab: Vec3, ac: Vec3, cabc: Vec3) -> bool {
        if cabc.cross(ab).dot(ao) < -GJK_IN_SIMPLEX_EPS {
            self.order = 1;
            self.simplex[0] = self.simplex[1];
            self.simplex[1] = self.simplex[2];
            self.solve_simplex2(ao, ab)
        } else if cabc.cross(ac).dot(ao) > GJK_IN_SIMPLEX_EPS {
            self.order = 1;
            self.simplex[1] = self.simplex[2];
            self.solve_simplex2(ao, ac)
        } else {
            let d = cabc.dot(ao);
            if d.abs() > GJK_IN_SIMPLEX_EPS {
                if d > 0.0 {
                    self.ray = cabc;
                } else {
                    self.ray = -cabc;
                    self.simplex.swap(0, 1);
                }
                false
            } else {
                true
            }
        }
    }

    fn solve_simplex4(&mut self, ao: Vec3, ab: Vec3, ac: Vec3, ad: Vec3) -> bool {
        let abc = ab.cross(ac);
        let acd = ac.cross(ad);
        let adb = ad.cross(ab);
        if abc.dot(ao) > GJK_IN_SIMPLEX_EPS {
            self.order = 2;
            self.simplex[0] = self.simplex[1];
            self.simplex[1] = self.simplex[2];
            self.simplex[2] = self.simplex[3];
            self.solve_simplex3a(ao, ab, ac, abc)
        } else if acd.dot(ao) > GJK_IN_SIMPLEX_EPS {
            self.order = 2;
            self.simplex[2] = self.simplex[3];
            self.solve_simplex3a(ao, ac, ad, acd)
        } else if adb.dot(ao) > GJK_IN_SIMPLEX_EPS {
            self.order = 2;
            self.simplex[1] = self.simplex[0];
            self.simplex[0] = self.simplex[2];
            self.simplex[2] = self.simplex[3];
            self.solve_simplex3a(ao, ad, ab, adb)
        } else {
            true
        }
    }

    /// Grows a simplex until it contains the origin (true), proves the
    /// shapes apart (false) or exhausts its iterations (false, `failed`).
    fn search_origin(&mut self, initial_ray: Vec3) -> bool {
        self.iterations = 0;
        self.order = -1;
        self.failed = false;
        self.ray = initial_ray.normalize();
        self.visited.clear();
        self.fetch_support();
        self.ray = -self.simplex[0].w;

        while self.iterations < GJK_MAX_ITERATIONS {
            let rl = self.ray.length();
            self.ray /= if rl > 0.0 { rl } else { 1.0 };
            if !self.fetch_support() {
                return false;
            }
            let s = self.simplex;
            let found = match self.order {
                1 => self.solve_simplex2(-s[1].w, s[0].w - s[1].w),
                2 => self.solve_simplex3(-s[2].w, s[1].w - s[2].w, s[0].w - s[2].w),
                3 => self.solve_simplex4(
                    -s[3].w,
                    s[2].w - s[3].w,
                    s[1].w - s[3].w,
                    s[0].w - s[3].w,
                ),
                _ => false,
            };
            if found {
                return true;
            }
            self.iterations += 1;
        }
        self.failed = true;
        false
    }

    /// Completes the simplex into a tetrahedron or a triangular bipyramid.
    fn enclose_origin(&mut self) -> bool {
        match self.order {
            1 => {
                let ab = self.simplex[1].w - self.simplex[0].w;
                let candidates = [ab.cross(Vec3::X), ab.cross(Vec3::Y), ab.cross(Vec3::Z)];
                let m = candidates.map(Vec3::length_squared);
                let best = if m[0] > m[1] {
                    if m[0] > m[2] {
                        0
                    } else {
                        2
                    }
                } else if m[1] > m[2] {
                    1
                } else {
                    2
                };
                let rotation = Quat::from_axis_angle(ab.normalize(), TAU / 3.0);
                let mut w = candidates[best];
                self.simplex[4] = self.pair.support(w.normalize());
                w = rotation * w;
                self.simplex[2] = self.pair.support(w.normalize());
                w = rotation * w;
                self.simplex[3] = self.pair.support(w.normalize());
                self.order = 4;
                true
            }
            2 => {
                let n = (self.simplex[1].w - self.simplex[0].w)
                    .cross(self.simplex[2].w - self.simplex[0].w)
                    .normalize();
                self.simplex[3] = self.pair.support(n);
                self.simplex[4] = self.pair.support(-n);
                self.order = 4;
                true
            }
            3 | 4 => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Face {
    v: [Mkv; 3],
    f: [usize; 3],
    e: [usize; 3],
    n: Vec3,
    d: f32,
    mark: u32,
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

struct Epa<'g, 'a> {
    gjk: &'g Gjk<'a>,
    faces: Vec<Face>,
    root: Option<usize>,
    face_count: usize,
    iterations: usize,
    nearest: [Vec3; 2],
    normal: Vec3,
    depth: f32,
    failed: bool,
}

impl<'g, 'a> Epa<'g, 'a> {
    fn new(gjk: &'g Gjk<'a>) -> Self {
        Self {
            gjk,
            faces: Vec::with_capacity(64),
            root: None,
            face_count: 0,
            iterations: 0,
            nearest: [Vec3::ZERO; 2],
            normal: Vec3::ZERO,
            depth: 0.0,
            failed: false,
        }
    }

    /// Barycentric coordinates of the projected origin on `face`.
    fn coordinates(face: &Face) -> Vec3 {
        let o = face.n * -face.d;
        let a = [
            (face.v[0].w - o).cross(face.v[1].w - o).length(),
            (face.v[1].w - o).cross(face.v[2].w - o).length(),
            (face.v[2].w - o).cross(face.v[0].w - o).length(),
        ];
        let sum = a[0] + a[1] + a[2];
        Vec3::new(a[1], a[2], a[0]) / if sum > 0.0 { sum } else { 1.0 }
    }

    fn find_best(&self) -> Option<usize> {
        let mut best = None;
        let mut best_d = f32::MAX;
        let mut current = self.root;
        while let Some(id) = current {
            let face = &self.faces[id];
            if face.d < best_d {
                best_d = face.d;
                best = Some(id);
            }
            current = face.next;
        }
        best
    }

    /// Builds a face and links it into the candidate list when the origin
    /// projects inside it.
    fn new_face(&mut self, a: Mkv, b: Mkv, c: Mkv) -> usize {
        let nrm = (b.w - a.w).cross(c.w - a.w);
        let len = nrm.length();
        let valid = a.w.cross(b.w).dot(nrm) >= -EPA_IN_FACE_EPS
            && b.w.cross(c.w).dot(nrm) >= -EPA_IN_FACE_EPS
            && c.w.cross(a.w).dot(nrm) >= -EPA_IN_FACE_EPS;
        let n = nrm * (1.0 / if len > 0.0 { len } else { f32::MAX });
        let id = self.faces.len();
        self.faces.push(Face {
            v: [a, b, c],
            f: [0; 3],
            e: [0; 3],
            n,
            d: (-n.dot(a.w)).max(0.0),
            mark: 0,
            prev: None,
            next: None,
            linked: false,
        });
        if valid {
            if let Some(root) = self.root {
                self.faces[root].prev = Some(id);
            }
            self.faces[id].next = self.root;
            self.faces[id].linked = true;
            self.root = Some(id);
            self.face_count += 1;
        }
        id
    }

    fn detach(&mut self, id: usize) {
        if !self.faces[id].linked {
            return;
        }
        self.face_count -= 1;
        let (prev, next) = (self.faces[id].prev, self.faces[id].next);
        match prev {
            Some(prev) => self.faces[prev].next = next,
            None => self.root = next,
        }
        if let Some(next) = next {
            self.faces[next].prev = prev;
        }
        let face = &mut self.faces[id];
        face.prev = None;
        face.next = None;
        face.linked = false;
    }

    fn link(&mut self, f0: usize, e0: usize, f1: usize, e1: usize) {
        self.faces[f0].f[e0] = f1;
        self.faces[f1].e[e1] = e0;
        self.faces[f1].f[e1] = f0;
        self.faces[f0].e[e0] = e1;
    }

    /// Removes every face visible from `w` starting at edge `e` of face `f`
    /// and stitches new faces to the horizon. Returns the number of faces added.
    fn build_horizon(
        &mut self,
        mark: u32,
        w: Mkv,
        f: usize,
        e: usize,
        current: &mut Option<usize>,
        first: &mut Option<usize>,
    ) -> usize {
        if self.faces[f].mark == mark {
            return 0;
        }
        let e1 = MOD3[e + 1];
        let face = self.faces[f];
        if face.n.dot(w.w) + face.d > 0.0 {
            let nf = self.new_face(face.v[e1], face.v[e], w);
            self.link(nf, 0, f, e);
            match *current {
                Some(cf) => self.link(cf, 1, nf, 2),
                None => *first = Some(nf),
            }
            *current = Some(nf);
            1
        } else {
            let e2 = MOD3[e + 2];
            self.detach(f);
            self.faces[f].mark = mark;
            self.build_horizon(mark, w, face.f[e1], face.e[e1], current, first)
                + self.build_horizon(mark, w, face.f[e2], face.e[e2], current, first)
        }
    }

    fn evaluate_pd(&mut self, order: i32, simplex: &[Mkv; 5]) -> f32 {
        let mut best_face = None;
        let mut mark = 1;
        self.depth = f32::MIN;
        self.normal = Vec3::ZERO;
        self.iterations = 0;
        self.failed = false;

        let (face_idx, edge_idx): (&[[usize; 3]], &[[usize; 4]]) = match order {
            3 => (&TETRAHEDRON_FACES, &TETRAHEDRON_EDGES),
            4 => (&HEXAHEDRON_FACES, &HEXAHEDRON_EDGES),
            _ => (&[], &[]),
        };
        let base: Vec<usize> = face_idx
            .iter()
            .map(|&[a, b, c]| self.new_face(simplex[a], simplex[b], simplex[c]))
            .collect();
        for &[f0, e0, f1, e1] in edge_idx {
            self.link(base[f0], e0, base[f1], e1);
        }
        if self.face_count == 0 {
            self.failed = true;
            return self.depth;
        }

        while self.iterations < EPA_MAX_ITERATIONS {
            let Some(bf) = self.find_best() else {
                break;
            };
            let face = self.faces[bf];
            let w = self.gjk.pair.support(-face.n);
            let d = face.n.dot(w.w) + face.d;
            best_face = Some(bf);
            if d >= -EPA_ACCURACY {
                break;
            }
            let mut current = None;
            let mut first = None;
            self.detach(bf);
            mark += 1;
            self.faces[bf].mark = mark;
            let mut added = 0;
            for i in 0..3 {
                added += self.build_horizon(mark, w, face.f[i], face.e[i], &mut current, &mut first);
            }
            if added <= 2 {
                break;
            }
            if let (Some(cf), Some(ff)) = (current, first) {
                self.link(cf, 1, ff, 2);
            }
            self.iterations += 1;
        }

        match best_face {
            Some(bf) => {
                let face = self.faces[bf];
                let b = Self::coordinates(&face);
                self.normal = face.n;
                self.depth = face.d.max(0.0);
                for (i, sign) in [(0, 1.0), (1, -1.0)] {
                    let features = face.v.map(|v| self.gjk.pair.local_support(v.r * sign, i));
                    self.nearest[i] = features[0] * b.x + features[1] * b.y + features[2] * b.z;
                }
            }
            None => self.failed = true,
        }
        self.depth
    }
}

/// GJK + EPA penetration solver.
#[derive(Debug, Default, Clone)]
pub struct GjkEpaSolver;

impl GjkEpaSolver {
    pub fn new() -> Self {
        Self
    }

    /// Tests two placed shapes. Returns results with
    /// [`GjkEpaStatus::Penetrating`] and a positive depth when they overlap.
    pub fn collide(
        &self,
        shape0: &dyn ConvexShape,
        transform0: &Transform,
        shape1: &dyn ConvexShape,
        transform1: &Transform,
        radial_margin: f32,
    ) -> GjkEpaResults {
        let mut results = GjkEpaResults::default();
        let mut gjk = Gjk::new(MinkowskiPair {
            shapes: [shape0, shape1],
            transforms: [*transform0, *transform1],
            margin: radial_margin + EPA_ACCURACY,
        });

        let collide = gjk.search_origin(Vec3::X);
        results.gjk_iterations = gjk.iterations + 1;
        if !collide {
            if gjk.failed {
                results.status = GjkEpaStatus::GjkFailed;
            }
            return results;
        }

        if !gjk.enclose_origin() {
            results.status = GjkEpaStatus::EpaFailed;
            return results;
        }
        let order = gjk.order;
        let simplex = gjk.simplex;
        let mut epa = Epa::new(&gjk);
        let depth = epa.evaluate_pd(order, &simplex);
        results.epa_iterations = epa.iterations + 1;
        if depth > 0.0 {
            results.status = GjkEpaStatus::Penetrating;
            results.normal = epa.normal;
            results.depth = depth;
            results.witnesses = epa.nearest;
        } else if epa.failed {
            results.status = GjkEpaStatus::EpaFailed;
        }
        results
    }

    /// Witness points `(on_a, on_b)` of the penetration between two shapes,
    /// or `None` when EPA could not resolve it.
    pub fn penetration_depth(
        &self,
        shape_a: &dyn ConvexShape,
        transform_a: &Transform,
        shape_b: &dyn ConvexShape,
        transform_b: &Transform,
    ) -> Option<(Vec3, Vec3)> {
        let results = self.collide(shape_a, transform_a, shape_b, transform_b, 0.0);
        match results.status {
            GjkEpaStatus::Penetrating => Some((results.witnesses[0], results.witnesses[1])),
            GjkEpaStatus::Separated => None,
            status => {
                debug!(
                    "epa: {:?} after {} gjk / {} epa iterations",
                    status, results.gjk_iterations, results.epa_iterations
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::{BoxShape, SphereShape};
    use approx::assert_relative_eq;

    #[test]
    fn overlapping_boxes_report_depth_along_x() {
        let a = BoxShape::new(Vec3::splat(0.5));
        let b = BoxShape::new(Vec3::splat(0.5));
        let ta = Transform::IDENTITY;
        let tb = Transform::from_position(Vec3::new(0.5, 0.0, 0.0));

        let results = GjkEpaSolver::new().collide(&a, &ta, &b, &tb, 0.0);
        assert_eq!(results.status, GjkEpaStatus::Penetrating);
        // Overlap along x is 0.5; the solver inflates both shapes by its accuracy.
        assert_relative_eq!(results.depth, 0.5, epsilon = 5e-3);
        assert_relative_eq!(results.normal.x.abs(), 1.0, epsilon = 1e-3);

        let gap = results.witnesses[0] - results.witnesses[1];
        assert_relative_eq!(gap.x.abs(), 0.5, epsilon = 5e-3);
    }

    #[test]
    fn separated_spheres_are_not_penetrating() {
        let a = SphereShape::new(1.0);
        let b = SphereShape::new(1.0);
        let results = GjkEpaSolver::new().collide(
            &a,
            &Transform::IDENTITY,
            &b,
            &Transform::from_position(Vec3::new(5.0, 0.0, 0.0)),
            0.0,
        );
        assert_eq!(results.status, GjkEpaStatus::Separated);
        assert_eq!(results.depth, 0.0);
    }

    #[test]
    fn deep_sphere_overlap_depth() {
        let a = SphereShape::new(1.0);
        let b = SphereShape::new(1.0);
        let tb = Transform::from_position(Vec3::new(0.0, 1.5, 0.0));
        let (on_a, on_b) = GjkEpaSolver::new()
            .penetration_depth(&a, &Transform::IDENTITY, &b, &tb)
            .expect("spheres overlap");
        assert_relative_eq!((on_a - on_b).length(), 0.5, epsilon = 2e-2);
        assert!(on_a.y > on_b.y);
    }
}
