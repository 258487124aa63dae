// src/lib.rs
//! Spatial acceleration structures for triangle-mesh ray tracing.
//!
//! Meshes are registered with one of the three indices (octree, kd-tree,
//! BVH), `build()` constructs the tree, and `ray_intersect` queries walk
//! it front to back. The [`Accel`] facade wraps an index and turns raw
//! hits into shading-ready [`Intersection`] records.

pub mod accel;
pub mod mesh;
pub mod primitives;
pub mod shapes;

#[cfg(test)]
mod test_util;

use glam::{vec3, Vec2, Vec3};

pub use accel::{
    AccelStructure, AccelTree, Bvh, BvhConfig, BvhSplitMethod, KdConfig, KdSplitMethod, KdTree,
    Octree, OctreeConfig, TriRef,
};
pub use mesh::{Mesh, ObjError};
pub use primitives::{Aabb, Frame, Ray, RAY_EPSILON};

/// Surface hit record. The index fills `t`, `uv` (the primitive test's
/// barycentric `(u, v)`) and `mesh`; the facade derives the position,
/// interpolated UVs and the geometry/shading frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct Intersection {
    /// Distance along the ray.
    pub t: f32,
    /// Hit position.
    pub p: Vec3,
    /// Texture coordinates (barycentric `(u, v)` until the facade
    /// interpolates the mesh's own UVs, when it has any).
    pub uv: Vec2,
    /// Frame around the geometric normal.
    pub geo_frame: Frame,
    /// Frame around the interpolated shading normal; equals `geo_frame`
    /// for meshes without vertex normals.
    pub sh_frame: Frame,
    /// Index of the hit mesh within the structure's mesh list.
    pub mesh: Option<u32>,
}

/// Facade over one concrete spatial index. Dispatches `add_mesh`, `build`
/// and queries, and reconstructs full shading data after a hit.
pub struct Accel {
    tree: AccelStructure,
}

impl Default for Accel {
    fn default() -> Self {
        Self::bvh()
    }
}

impl Accel {
    pub fn new(tree: AccelStructure) -> Self {
        Self { tree }
    }

    pub fn octree() -> Self {
        Self::new(AccelStructure::Octree(Octree::new()))
    }

    pub fn kd_tree() -> Self {
        Self::new(AccelStructure::KdTree(KdTree::new()))
    }

    pub fn bvh() -> Self {
        Self::new(AccelStructure::Bvh(Bvh::new()))
    }

    pub fn add_mesh(&mut self, mesh: Mesh) {
        self.tree.add_mesh(mesh);
    }

    pub fn build(&mut self) {
        self.tree.build();
    }

    pub fn bounding_box(&self) -> &Aabb {
        self.tree.bounding_box()
    }

    /// Intersect a ray against the scene. Returns `true` on a hit. Shadow
    /// queries stop there; for everything else `its` is filled with the
    /// interpolated position, UVs and frames of the closest hit.
    pub fn ray_intersect(&self, ray: &Ray, its: &mut Intersection, shadow_ray: bool) -> bool {
        let Some(hit) = self.tree.ray_intersect(ray, its, shadow_ray) else {
            return false;
        };
        if shadow_ray {
            return true;
        }

        let mesh = &self.tree.meshes()[hit.mesh as usize];
        let [i0, i1, i2] = mesh.tri_vertex_indices(hit.tri);

        // Barycentric weights from the primitive test's (u, v)
        let bary = vec3(1.0 - its.uv.x - its.uv.y, its.uv.x, its.uv.y);

        let positions = mesh.positions();
        let (p0, p1, p2) = (positions[i0], positions[i1], positions[i2]);

        its.p = bary.x * p0 + bary.y * p1 + bary.z * p2;

        if mesh.has_uvs() {
            let uvs = mesh.uvs();
            its.uv = bary.x * uvs[i0] + bary.y * uvs[i1] + bary.z * uvs[i2];
        }

        its.geo_frame = Frame::from_normal((p1 - p0).cross(p2 - p0).normalize_or_zero());

        its.sh_frame = if mesh.has_normals() {
            let normals = mesh.normals();
            let n = bary.x * normals[i0] + bary.y * normals[i1] + bary.z * normals[i2];
            Frame::from_normal(n.normalize_or_zero())
        } else {
            its.geo_frame
        };

        true
    }
}
