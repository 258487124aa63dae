// src/primitives.rs
use glam::Vec3;

/// Minimum ray extent used when none is given. Keeps secondary rays from
/// re-hitting the surface they started on.
pub const RAY_EPSILON: f32 = 1e-4;

// --- Ray ---

/// A ray segment: origin, direction and the `[mint, maxt]` range in which
/// intersections count.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub o: Vec3,
    pub d: Vec3,
    pub mint: f32,
    pub maxt: f32,
}

impl Ray {
    pub fn new(o: Vec3, d: Vec3) -> Self {
        Self {
            o,
            d,
            mint: RAY_EPSILON,
            maxt: f32::INFINITY,
        }
    }

    pub fn with_bounds(o: Vec3, d: Vec3, mint: f32, maxt: f32) -> Self {
        Self { o, d, mint, maxt }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.o + self.d * t
    }
}

// --- AABB ---

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// The inverted box: grows to anything it is unioned with, misses every
    /// ray, and reports itself invalid.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expand_by(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn surface_area(&self) -> f32 {
        let d = self.max - self.min;
        // Empty boxes have negative extents
        if d.x < 0.0 || d.y < 0.0 || d.z < 0.0 {
            0.0
        } else {
            2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Index of the longest axis (0 = x, 1 = y, 2 = z).
    pub fn major_axis(&self) -> usize {
        let d = self.max - self.min;
        if d.y > d.x {
            if d.z > d.y {
                2
            } else {
                1
            }
        } else if d.z > d.x {
            2
        } else {
            0
        }
    }

    /// Overlap test with closed boundaries: boxes that merely touch count
    /// as overlapping.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    /// Slab test. Returns the `(t_near, t_far)` parametric entry/exit
    /// distances when the ray's `[mint, maxt]` segment passes through the
    /// box. `t_near` may be negative if the origin is inside. An axis with
    /// zero direction passes iff the origin lies within that slab,
    /// boundaries included, so rays grazing a face are not lost.
    pub fn ray_intersect(&self, ray: &Ray) -> Option<(f32, f32)> {
        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;

        for i in 0..3 {
            let o = ray.o[i];
            let d = ray.d[i];
            if d == 0.0 {
                if o < self.min[i] || o > self.max[i] {
                    return None;
                }
            } else {
                let inv = 1.0 / d;
                let (t0, t1) = if inv >= 0.0 {
                    ((self.min[i] - o) * inv, (self.max[i] - o) * inv)
                } else {
                    ((self.max[i] - o) * inv, (self.min[i] - o) * inv)
                };
                t_near = t_near.max(t0);
                t_far = t_far.min(t1);
                if t_near > t_far {
                    return None;
                }
            }
        }

        (ray.mint <= t_far && t_near <= ray.maxt).then_some((t_near, t_far))
    }
}

// --- Frame ---

/// Orthonormal shading basis around a normal.
#[derive(Clone, Copy, Debug, Default)]
pub struct Frame {
    pub s: Vec3,
    pub t: Vec3,
    pub n: Vec3,
}

impl Frame {
    pub fn from_normal(n: Vec3) -> Self {
        let (s, t) = n.any_orthonormal_pair();
        Self { s, t, n }
    }

    pub fn to_world(&self, v: Vec3) -> Vec3 {
        self.s * v.x + self.t * v.y + self.n * v.z
    }

    pub fn to_local(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.s), v.dot(self.t), v.dot(self.n))
    }
}
