// src/accel/mod.rs
pub mod bvh;
pub mod kdtree;
pub mod octree;

use glam::{vec2, Vec3};

use crate::mesh::Mesh;
use crate::primitives::{Aabb, Ray};
use crate::Intersection;

pub use bvh::{Bvh, BvhConfig, BvhSplitMethod};
pub use kdtree::{KdConfig, KdSplitMethod, KdTree};
pub use octree::{Octree, OctreeConfig};

/// Names one triangle across a multi-mesh scene: the mesh's index in the
/// structure's mesh list and the triangle's index within that mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TriRef {
    pub mesh: u32,
    pub tri: u32,
}

/// Common interface of the three spatial indices.
///
/// `add_mesh` is only accepted before `build`; `build` is idempotent.
/// `ray_intersect` returns the hit triangle and fills `its.t`, `its.uv` and
/// `its.mesh` with the raw hit data; the facade derives the remaining
/// shading fields.
pub trait AccelTree {
    fn add_mesh(&mut self, mesh: Mesh);
    fn build(&mut self);
    fn bounding_box(&self) -> &Aabb;
    fn ray_intersect(&self, ray: &Ray, its: &mut Intersection, shadow_ray: bool)
        -> Option<TriRef>;
    fn meshes(&self) -> &[Mesh];
}

/// Mesh list, scene bounds and the build gate, shared by all tree variants.
pub(crate) struct AccelBase {
    meshes: Vec<Mesh>,
    bbox: Aabb,
    built: bool,
}

impl AccelBase {
    pub(crate) fn new() -> Self {
        Self {
            meshes: Vec::new(),
            bbox: Aabb::empty(),
            built: false,
        }
    }

    /// Register a mesh and expand the scene bounds. Silently ignored once
    /// the structure has been built.
    pub(crate) fn add_mesh(&mut self, mesh: Mesh) {
        if self.built {
            return;
        }
        self.bbox.expand_by(mesh.bounding_box());
        self.meshes.push(mesh);
    }

    /// Flip the build gate. Returns `false` if the structure was already
    /// built (callers then skip the build entirely).
    pub(crate) fn start_build(&mut self) -> bool {
        if self.built {
            return false;
        }
        self.built = true;
        true
    }

    pub(crate) fn bounding_box(&self) -> &Aabb {
        &self.bbox
    }

    pub(crate) fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// One reference per triangle of every registered mesh, in mesh order.
    pub(crate) fn collect_tris(&self) -> Vec<TriRef> {
        let total: usize = self.meshes.iter().map(|m| m.triangle_count() as usize).sum();
        let mut tris = Vec::with_capacity(total);
        for (mi, mesh) in self.meshes.iter().enumerate() {
            for t in 0..mesh.triangle_count() {
                tris.push(TriRef {
                    mesh: mi as u32,
                    tri: t,
                });
            }
        }
        tris
    }

    pub(crate) fn tri_bbox(&self, tri: TriRef) -> Aabb {
        self.meshes[tri.mesh as usize].tri_bounding_box(tri.tri)
    }

    pub(crate) fn centroid(&self, tri: TriRef) -> Vec3 {
        self.meshes[tri.mesh as usize].centroid(tri.tri)
    }

    /// True iff the triangle's bounding box overlaps `bb` (closed
    /// boundaries).
    pub(crate) fn tri_overlaps(&self, bb: &Aabb, tri: TriRef) -> bool {
        bb.overlaps(&self.tri_bbox(tri))
    }

    /// Brute-force scan of a leaf's triangle list. Shrinks `ray.maxt` on
    /// every hit so later tests are pruned, records the raw hit data in
    /// `its`, and returns the closest triangle. Shadow queries return the
    /// first hit immediately.
    pub(crate) fn leaf_intersect(
        &self,
        tris: &[TriRef],
        ray: &mut Ray,
        its: &mut Intersection,
        shadow_ray: bool,
    ) -> Option<TriRef> {
        let mut found = None;
        for &tri in tris {
            if let Some((u, v, t)) = self.meshes[tri.mesh as usize].ray_intersect(tri.tri, ray) {
                if shadow_ray {
                    return Some(tri);
                }
                ray.maxt = t;
                its.t = t;
                its.uv = vec2(u, v);
                its.mesh = Some(tri.mesh);
                found = Some(tri);
            }
        }
        found
    }
}

/// The three index variants behind one type, so the traversal hot path is
/// a match instead of a virtual call.
pub enum AccelStructure {
    Octree(Octree),
    KdTree(KdTree),
    Bvh(Bvh),
}

impl AccelTree for AccelStructure {
    fn add_mesh(&mut self, mesh: Mesh) {
        match self {
            AccelStructure::Octree(t) => t.add_mesh(mesh),
            AccelStructure::KdTree(t) => t.add_mesh(mesh),
            AccelStructure::Bvh(t) => t.add_mesh(mesh),
        }
    }

    fn build(&mut self) {
        match self {
            AccelStructure::Octree(t) => t.build(),
            AccelStructure::KdTree(t) => t.build(),
            AccelStructure::Bvh(t) => t.build(),
        }
    }

    fn bounding_box(&self) -> &Aabb {
        match self {
            AccelStructure::Octree(t) => t.bounding_box(),
            AccelStructure::KdTree(t) => t.bounding_box(),
            AccelStructure::Bvh(t) => t.bounding_box(),
        }
    }

    fn ray_intersect(
        &self,
        ray: &Ray,
        its: &mut Intersection,
        shadow_ray: bool,
    ) -> Option<TriRef> {
        match self {
            AccelStructure::Octree(t) => t.ray_intersect(ray, its, shadow_ray),
            AccelStructure::KdTree(t) => t.ray_intersect(ray, its, shadow_ray),
            AccelStructure::Bvh(t) => t.ray_intersect(ray, its, shadow_ray),
        }
    }

    fn meshes(&self) -> &[Mesh] {
        match self {
            AccelStructure::Octree(t) => t.meshes(),
            AccelStructure::KdTree(t) => t.meshes(),
            AccelStructure::Bvh(t) => t.meshes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes;
    use glam::vec3;

    #[test]
    fn collect_tris_spans_all_meshes() {
        let mut base = AccelBase::new();
        base.add_mesh(shapes::cube(Vec3::ZERO, 1.0));
        base.add_mesh(shapes::triangle(
            Vec3::ZERO,
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        ));

        let tris = base.collect_tris();
        assert_eq!(tris.len(), 13);
        assert_eq!(tris[0], TriRef { mesh: 0, tri: 0 });
        assert_eq!(tris[12], TriRef { mesh: 1, tri: 0 });
    }

    #[test]
    fn add_mesh_expands_scene_bbox() {
        let mut base = AccelBase::new();
        assert!(!base.bounding_box().is_valid());

        base.add_mesh(shapes::cube(Vec3::ZERO, 1.0));
        base.add_mesh(shapes::cube(vec3(5.0, 0.0, 0.0), 1.0));

        let bb = base.bounding_box();
        assert!(bb.is_valid());
        assert!(bb.max.x >= 5.5 && bb.min.x <= -0.5);
    }

    #[test]
    fn add_mesh_after_build_is_ignored() {
        let mut base = AccelBase::new();
        base.add_mesh(shapes::cube(Vec3::ZERO, 1.0));
        assert!(base.start_build());
        assert!(!base.start_build());

        base.add_mesh(shapes::cube(vec3(9.0, 0.0, 0.0), 1.0));
        assert_eq!(base.meshes().len(), 1);
        assert!(base.bounding_box().max.x < 2.0);
    }

    #[test]
    fn tri_overlap_uses_closed_boundaries() {
        let mut base = AccelBase::new();
        base.add_mesh(shapes::triangle(
            Vec3::ZERO,
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        ));
        let tri = TriRef { mesh: 0, tri: 0 };

        // Box touching the triangle's bbox edge-on still overlaps
        let touching = Aabb::new(vec3(1.0, 0.0, -1.0), vec3(2.0, 1.0, 1.0));
        assert!(base.tri_overlaps(&touching, tri));

        let apart = Aabb::new(vec3(2.0, 0.0, -1.0), vec3(3.0, 1.0, 1.0));
        assert!(!base.tri_overlaps(&apart, tri));
    }
}
