// src/accel/octree.rs
use std::time::Instant;

use glam::vec3;
use rayon::prelude::*;

use super::{AccelBase, AccelTree, TriRef};
use crate::mesh::Mesh;
use crate::primitives::{Aabb, Ray};
use crate::Intersection;

pub struct OctreeConfig {
    /// Leaves stop subdividing at or below this triangle count.
    pub few_tris: usize,
    /// Hard recursion cap.
    pub max_depth: usize,
    /// Dispatch the 8-way partition and recursion on the rayon pool.
    pub parallel: bool,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            few_tris: 10,
            max_depth: 10,
            parallel: true,
        }
    }
}

struct OctNode {
    bbox: Aabb,
    children: [Option<Box<OctNode>>; 8],
    /// `Some` for leaves; triangles may appear in several leaves.
    tris: Option<Vec<TriRef>>,
}

impl OctNode {
    fn leaf(bbox: Aabb, tris: Vec<TriRef>) -> Box<Self> {
        Box::new(Self {
            bbox,
            children: Default::default(),
            tris: Some(tris),
        })
    }

    fn node_count(&self) -> u32 {
        1 + self
            .children
            .iter()
            .flatten()
            .map(|c| c.node_count())
            .sum::<u32>()
    }

    fn tri_count(&self) -> u32 {
        match &self.tris {
            Some(tris) => tris.len() as u32,
            None => self.children.iter().flatten().map(|c| c.tri_count()).sum(),
        }
    }
}

/// 8-way midpoint subdivision. Triangles are assigned to every child whose
/// box their bounding box overlaps, so duplicates across leaves are
/// expected; traversal visits children front to back and stops at the
/// first leaf hit.
pub struct Octree {
    base: AccelBase,
    config: OctreeConfig,
    root: Option<Box<OctNode>>,
}

impl Default for Octree {
    fn default() -> Self {
        Self::new()
    }
}

impl Octree {
    pub fn new() -> Self {
        Self::with_config(OctreeConfig::default())
    }

    pub fn with_config(config: OctreeConfig) -> Self {
        Self {
            base: AccelBase::new(),
            config,
            root: None,
        }
    }

    /// Child `i` covers the `(i & 1, (i >> 1) & 1, (i >> 2) & 1)` octant
    /// between the parent's min corner and its centroid.
    fn child_bbox(bb: &Aabb, i: usize) -> Aabb {
        let mid = bb.center();
        let diff = mid - bb.min;
        let off = vec3(
            (i & 1) as f32 * diff.x,
            ((i >> 1) & 1) as f32 * diff.y,
            ((i >> 2) & 1) as f32 * diff.z,
        );
        Aabb::new(bb.min + off, mid + off)
    }

    fn build_node(
        base: &AccelBase,
        config: &OctreeConfig,
        bbox: Aabb,
        tris: Vec<TriRef>,
        depth: usize,
    ) -> Option<Box<OctNode>> {
        if tris.is_empty() {
            return None;
        }
        if tris.len() <= config.few_tris || depth >= config.max_depth {
            return Some(OctNode::leaf(bbox, tris));
        }

        let child_boxes: Vec<Aabb> = (0..8).map(|i| Self::child_bbox(&bbox, i)).collect();

        let partition = |bb: &Aabb| -> Vec<TriRef> {
            tris.iter()
                .copied()
                .filter(|&t| base.tri_overlaps(bb, t))
                .collect()
        };
        let buckets: Vec<Vec<TriRef>> = if config.parallel {
            child_boxes.par_iter().map(partition).collect()
        } else {
            child_boxes.iter().map(partition).collect()
        };

        // If every child received the full list, subdividing further cannot
        // make progress; collapse into a leaf.
        if buckets.iter().all(|b| b.len() == tris.len()) {
            return Some(OctNode::leaf(bbox, tris));
        }

        let build_child = |(i, bucket): (usize, Vec<TriRef>)| {
            Self::build_node(base, config, child_boxes[i], bucket, depth + 1)
        };
        let built: Vec<Option<Box<OctNode>>> = if config.parallel {
            buckets.into_par_iter().enumerate().map(build_child).collect()
        } else {
            buckets.into_iter().enumerate().map(build_child).collect()
        };

        let mut children: [Option<Box<OctNode>>; 8] = Default::default();
        for (slot, child) in children.iter_mut().zip(built) {
            *slot = child;
        }

        Some(Box::new(OctNode {
            bbox,
            children,
            tris: None,
        }))
    }

    /// Front-to-back recursive descent: children the ray hits are visited
    /// in order of entry distance, and the first leaf hit wins (the octants
    /// are disjoint).
    fn node_intersect(
        &self,
        node: &OctNode,
        ray: &mut Ray,
        its: &mut Intersection,
        shadow_ray: bool,
    ) -> Option<TriRef> {
        if let Some(tris) = &node.tris {
            return self.base.leaf_intersect(tris, ray, its, shadow_ray);
        }

        let mut order = [(0.0f32, 0usize); 8];
        let mut count = 0;
        for (i, child) in node.children.iter().enumerate() {
            if let Some(c) = child {
                if let Some((t_near, _)) = c.bbox.ray_intersect(ray) {
                    order[count] = (t_near, i);
                    count += 1;
                }
            }
        }
        order[..count].sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        for &(_, i) in &order[..count] {
            if let Some(c) = &node.children[i] {
                if let Some(hit) = self.node_intersect(c, ray, its, shadow_ray) {
                    return Some(hit);
                }
            }
        }
        None
    }
}

impl AccelTree for Octree {
    fn add_mesh(&mut self, mesh: Mesh) {
        self.base.add_mesh(mesh);
    }

    fn build(&mut self) {
        if !self.base.start_build() {
            return;
        }

        let tris = self.base.collect_tris();
        let mesh_tris = tris.len();

        let tt = Instant::now();
        self.root = Self::build_node(&self.base, &self.config, *self.base.bounding_box(), tris, 0);
        let (nodes, stored) = match &self.root {
            Some(root) => (root.node_count(), root.tri_count()),
            None => (0, 0),
        };
        log::info!(
            "octree built; nodes = {}, stored tris = {}, mesh tris = {}, tt = {:?}",
            nodes,
            stored,
            mesh_tris,
            tt.elapsed(),
        );
    }

    fn bounding_box(&self) -> &Aabb {
        self.base.bounding_box()
    }

    fn ray_intersect(
        &self,
        ray: &Ray,
        its: &mut Intersection,
        shadow_ray: bool,
    ) -> Option<TriRef> {
        let root = self.root.as_deref()?;
        let mut ray = *ray;
        self.node_intersect(root, &mut ray, its, shadow_ray)
    }

    fn meshes(&self) -> &[Mesh] {
        self.base.meshes()
    }
}
