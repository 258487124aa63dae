// src/accel/bvh.rs
use std::cmp::Ordering;
use std::time::Instant;

use super::{AccelBase, AccelTree, TriRef};
use crate::mesh::Mesh;
use crate::primitives::{Aabb, Ray};
use crate::Intersection;

/// Hard recursion cap; also sizes the fixed traversal stack.
const MAX_DEPTH: usize = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BvhSplitMethod {
    /// Sort by centroid on every axis and sweep all n-1 partition points.
    SahFull,
    /// Bucket centroids into equal slabs and sweep the bucket boundaries.
    SahBuckets,
    /// Reserved. Selecting it logs a warning and builds a single leaf.
    Hlbvh,
}

#[derive(Clone)]
pub struct BvhConfig {
    /// Leaves stop subdividing at or below this triangle count.
    pub few_tris: usize,
    /// Recursion cap; clamped to 25 so the traversal stack cannot
    /// overflow.
    pub max_depth: usize,
    /// SAH cost of traversing one node.
    pub traversal_time: f32,
    /// SAH cost of one triangle intersection test.
    pub tri_int_cost: f32,
    /// Bucket count for `SahBuckets`.
    pub buckets: usize,
    pub split_method: BvhSplitMethod,
    /// Return the first leaf hit instead of continuing the walk. This is an
    /// approximation: a closer triangle in a later leaf can be missed, so
    /// it trades accuracy for speed. Off by default.
    pub quick_return: bool,
    pub parallel: bool,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            few_tris: 10,
            max_depth: MAX_DEPTH,
            traversal_time: 1.0,
            tri_int_cost: 2.0,
            buckets: 12,
            split_method: BvhSplitMethod::SahBuckets,
            quick_return: false,
            parallel: true,
        }
    }
}

struct BvhNode {
    bbox: Aabb,
    children: [Option<Box<BvhNode>>; 2],
    /// `Some` for leaves; every triangle lives in exactly one leaf.
    tris: Option<Vec<TriRef>>,
    /// Split axis, used to order the children during traversal.
    dim: usize,
}

impl BvhNode {
    fn leaf(bbox: Aabb, tris: Vec<TriRef>) -> Box<Self> {
        Box::new(Self {
            bbox,
            children: Default::default(),
            tris: Some(tris),
            dim: 0,
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

/// Everything a chosen split hands back: the axis, the two tight child
/// boxes, and the two halves of the triangle list.
struct SplitData {
    dim: usize,
    boxes: [Aabb; 2],
    parts: [Vec<TriRef>; 2],
}

/// Object-partitioning bounding volume hierarchy. Triangles are divided by
/// centroid, each ends up in exactly one leaf, and every node's box tightly
/// covers its triangles.
pub struct Bvh {
    base: AccelBase,
    config: BvhConfig,
    root: Option<Box<BvhNode>>,
}

impl Default for Bvh {
    fn default() -> Self {
        Self::new()
    }
}

impl Bvh {
    pub fn new() -> Self {
        Self::with_config(BvhConfig::default())
    }

    pub fn with_method(split_method: BvhSplitMethod) -> Self {
        Self::with_config(BvhConfig {
            split_method,
            ..Default::default()
        })
    }

    pub fn with_config(mut config: BvhConfig) -> Self {
        config.few_tris = config.few_tris.max(1);
        config.max_depth = config.max_depth.min(MAX_DEPTH);
        config.buckets = config.buckets.max(2);
        Self {
            base: AccelBase::new(),
            config,
            root: None,
        }
    }

    fn good_split(
        base: &AccelBase,
        config: &BvhConfig,
        bb: &Aabb,
        tris: &[TriRef],
    ) -> Option<SplitData> {
        match config.split_method {
            BvhSplitMethod::SahFull => Self::sah_full_split(base, config, bb, tris),
            BvhSplitMethod::SahBuckets => Self::sah_bucket_split(base, config, bb, tris),
            BvhSplitMethod::Hlbvh => {
                log::warn!("HLBVH split method is not implemented; building a single leaf");
                None
            }
        }
    }

    /// Full sweep: per axis, sort by centroid, precompute suffix boxes from
    /// the right, then walk left to right growing the prefix box and
    /// scoring
    ///
    /// `SAH = T + cost_tri * (SA_l * N_l + SA_h * N_h) / SA(bbox)`
    ///
    /// at each of the n-1 partition points. A split only wins if it beats
    /// the cost of leaving the node as a leaf.
    fn sah_full_split(
        base: &AccelBase,
        config: &BvhConfig,
        bb: &Aabb,
        tris: &[TriRef],
    ) -> Option<SplitData> {
        let n = tris.len();
        let leaf_cost = config.tri_int_cost * n as f32;
        let mut min_sah = leaf_cost + 1.0;
        let bb_sa = bb.surface_area();

        let mut best: Option<(usize, usize, Aabb, Aabb)> = None;
        let mut best_order: Vec<TriRef> = Vec::new();
        let mut order = tris.to_vec();
        let mut back = vec![Aabb::empty(); n - 1];

        for d in 0..3 {
            // Stable sort: equal centroids keep their order, so the result
            // is reproducible
            order.sort_by(|a, b| {
                base.centroid(*a)[d]
                    .partial_cmp(&base.centroid(*b)[d])
                    .unwrap_or(Ordering::Equal)
            });

            // back[i] covers order[i + 1 ..]
            back[n - 2] = base.tri_bbox(order[n - 1]);
            for i in (0..n.saturating_sub(2)).rev() {
                back[i] = back[i + 1].union(&base.tri_bbox(order[i + 1]));
            }

            let mut cur = Aabb::empty();
            let mut improved = false;
            for i in 0..n - 1 {
                cur.expand_by(&base.tri_bbox(order[i]));
                let n_l = (i + 1) as f32;
                let n_h = (n - i - 1) as f32;
                let sah = config.traversal_time
                    + config.tri_int_cost
                        * (cur.surface_area() * n_l + back[i].surface_area() * n_h)
                        / bb_sa;
                if sah <= min_sah {
                    min_sah = sah;
                    best = Some((d, i, cur, back[i]));
                    improved = true;
                }
            }
            if improved {
                best_order.clone_from(&order);
            }
        }

        if min_sah < leaf_cost {
            let (dim, i, bb_low, bb_high) = best?;
            let high = best_order.split_off(i + 1);
            Some(SplitData {
                dim,
                boxes: [bb_low, bb_high],
                parts: [best_order, high],
            })
        } else {
            None
        }
    }

    /// Bucketed sweep: slab each axis into `buckets` equal intervals
    /// indexed by centroid, then score the bucket boundaries with the same
    /// cost formula as the full sweep. O(n) instead of O(n log n) per node.
    fn sah_bucket_split(
        base: &AccelBase,
        config: &BvhConfig,
        bb: &Aabb,
        tris: &[TriRef],
    ) -> Option<SplitData> {
        let n = tris.len();
        let buckets = config.buckets;
        let leaf_cost = config.tri_int_cost * n as f32;
        let bb_sa = bb.surface_area();
        let sz = bb.max - bb.min;

        let mut dim_buckets: [Vec<Vec<TriRef>>; 3] =
            std::array::from_fn(|_| vec![Vec::new(); buckets]);
        let mut dim_bbox: [Vec<Aabb>; 3] = std::array::from_fn(|_| vec![Aabb::empty(); buckets]);

        for &t in tris {
            let rel = (base.centroid(t) - bb.min) * buckets as f32;
            let tb = base.tri_bbox(t);
            for d in 0..3 {
                let ind = if sz[d] > 0.0 {
                    ((rel[d] / sz[d]) as usize).min(buckets - 1)
                } else {
                    0
                };
                dim_buckets[d][ind].push(t);
                dim_bbox[d][ind].expand_by(&tb);
            }
        }

        let mut min_sah = leaf_cost + 1.0;
        let mut best: Option<(usize, usize, Aabb, Aabb)> = None;
        let mut back = vec![Aabb::empty(); buckets - 1];

        for d in 0..3 {
            // back[i] covers buckets i + 1 ..
            back[buckets - 2] = dim_bbox[d][buckets - 1];
            for i in (0..buckets - 2).rev() {
                back[i] = back[i + 1].union(&dim_bbox[d][i + 1]);
            }

            let mut cur = Aabb::empty();
            let mut n_l = 0usize;
            for i in 0..buckets - 1 {
                cur.expand_by(&dim_bbox[d][i]);
                n_l += dim_buckets[d][i].len();
                let n_h = n - n_l;
                let sah = config.traversal_time
                    + config.tri_int_cost
                        * (cur.surface_area() * n_l as f32 + back[i].surface_area() * n_h as f32)
                        / bb_sa;
                if sah <= min_sah {
                    min_sah = sah;
                    best = Some((d, i, cur, back[i]));
                }
            }
        }

        if min_sah < leaf_cost {
            let (dim, i, bb_low, bb_high) = best?;
            let mut low = Vec::new();
            let mut high = Vec::new();
            for (b, bucket) in dim_buckets[dim].iter_mut().enumerate() {
                if b <= i {
                    low.append(bucket);
                } else {
                    high.append(bucket);
                }
            }
            Some(SplitData {
                dim,
                boxes: [bb_low, bb_high],
                parts: [low, high],
            })
        } else {
            None
        }
    }

    fn build_node(
        base: &AccelBase,
        config: &BvhConfig,
        bbox: Aabb,
        tris: Vec<TriRef>,
        depth: usize,
    ) -> Option<Box<BvhNode>> {
        if tris.is_empty() {
            return None;
        }
        if tris.len() <= config.few_tris || depth >= config.max_depth {
            return Some(BvhNode::leaf(bbox, tris));
        }

        let Some(split) = Self::good_split(base, config, &bbox, &tris) else {
            // No split beats the leaf cost
            return Some(BvhNode::leaf(bbox, tris));
        };

        let SplitData {
            dim,
            boxes: [b0, b1],
            parts: [t0, t1],
        } = split;

        let (c0, c1) = if config.parallel {
            rayon::join(
                || Self::build_node(base, config, b0, t0, depth + 1),
                || Self::build_node(base, config, b1, t1, depth + 1),
            )
        } else {
            (
                Self::build_node(base, config, b0, t0, depth + 1),
                Self::build_node(base, config, b1, t1, depth + 1),
            )
        };

        Some(Box::new(BvhNode {
            bbox,
            children: [c0, c1],
            tris: None,
            dim,
        }))
    }
}

impl AccelTree for Bvh {
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
            "bvh built; nodes = {}, stored tris = {}, mesh tris = {}, tt = {:?}",
            nodes,
            stored,
            mesh_tris,
            tt.elapsed(),
        );
    }

    fn bounding_box(&self) -> &Aabb {
        self.base.bounding_box()
    }

    /// Iterative traversal over a fixed-size stack. Children are pushed
    /// far-then-near by the sign of the ray direction along the split axis.
    /// Leaf hits shrink `ray.maxt` and the walk continues; later subtrees
    /// whose boxes start beyond the current best are pruned by the bbox
    /// test. Shadow rays (and the opt-in quick-return mode) stop at the
    /// first hit.
    fn ray_intersect(
        &self,
        ray: &Ray,
        its: &mut Intersection,
        shadow_ray: bool,
    ) -> Option<TriRef> {
        let root = self.root.as_deref()?;

        let mut stack: [Option<&BvhNode>; MAX_DEPTH + 1] = [None; MAX_DEPTH + 1];
        let mut sp = 0;
        stack[sp] = Some(root);
        sp += 1;

        let mut ray = *ray;
        let mut closest = None;

        while sp > 0 {
            sp -= 1;
            let Some(cur) = stack[sp] else { continue };
            if cur.bbox.ray_intersect(&ray).is_none() {
                continue;
            }

            if let Some(tris) = &cur.tris {
                if let Some(hit) = self.base.leaf_intersect(tris, &mut ray, its, shadow_ray) {
                    if shadow_ray || self.config.quick_return {
                        return Some(hit);
                    }
                    closest = Some(hit);
                }
            } else if ray.d[cur.dim] >= 0.0 {
                stack[sp] = cur.children[1].as_deref();
                sp += 1;
                stack[sp] = cur.children[0].as_deref();
                sp += 1;
            } else {
                stack[sp] = cur.children[0].as_deref();
                sp += 1;
                stack[sp] = cur.children[1].as_deref();
                sp += 1;
            }
        }

        closest
    }

    fn meshes(&self) -> &[Mesh] {
        self.base.meshes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes;
    use crate::test_util;
    use glam::{vec3, Vec3};
    use std::collections::HashMap;

    fn visit_leaves(node: &BvhNode, depth: usize, f: &mut impl FnMut(&BvhNode, usize)) {
        match &node.tris {
            Some(_) => f(node, depth),
            None => {
                for child in node.children.iter().flatten() {
                    visit_leaves(child, depth + 1, f);
                }
            }
        }
    }

    fn visit_nodes(node: &BvhNode, f: &mut impl FnMut(&BvhNode)) {
        f(node);
        for child in node.children.iter().flatten() {
            visit_nodes(child, f);
        }
    }

    fn built_tree(method: BvhSplitMethod) -> Bvh {
        let mut tree = Bvh::with_method(method);
        tree.add_mesh(shapes::sphere(Vec3::ZERO, 1.0, 16, 8));
        tree.add_mesh(shapes::cube(vec3(3.0, 0.0, 0.0), 1.0));
        tree.build();
        tree
    }

    #[test]
    fn every_triangle_in_exactly_one_leaf() {
        for method in [BvhSplitMethod::SahFull, BvhSplitMethod::SahBuckets] {
            let tree = built_tree(method);
            let mut counts: HashMap<TriRef, usize> = HashMap::new();
            visit_leaves(tree.root.as_ref().unwrap(), 0, &mut |leaf, _| {
                for &t in leaf.tris.as_ref().unwrap() {
                    *counts.entry(t).or_default() += 1;
                }
            });
            for t in tree.base.collect_tris() {
                assert_eq!(counts.get(&t), Some(&1), "{t:?} with method {method:?}");
            }
        }
    }

    #[test]
    fn leaf_boxes_contain_their_triangles() {
        for method in [BvhSplitMethod::SahFull, BvhSplitMethod::SahBuckets] {
            let tree = built_tree(method);
            visit_leaves(tree.root.as_ref().unwrap(), 0, &mut |leaf, _| {
                for &t in leaf.tris.as_ref().unwrap() {
                    assert!(leaf.bbox.contains(&tree.base.tri_bbox(t)));
                }
            });
        }
    }

    #[test]
    fn interior_boxes_tightly_cover_children() {
        for method in [BvhSplitMethod::SahFull, BvhSplitMethod::SahBuckets] {
            let tree = built_tree(method);
            visit_nodes(tree.root.as_ref().unwrap(), &mut |node| {
                if node.tris.is_none() {
                    let mut union = Aabb::empty();
                    for child in node.children.iter().flatten() {
                        union.expand_by(&child.bbox);
                    }
                    assert_eq!(union, node.bbox);
                }
            });
        }
    }

    #[test]
    fn leaves_respect_size_depth_or_rejection() {
        let tree = built_tree(BvhSplitMethod::SahBuckets);
        let cfg = &tree.config;
        visit_leaves(tree.root.as_ref().unwrap(), 0, &mut |leaf, depth| {
            let tris = leaf.tris.as_ref().unwrap();
            if tris.len() > cfg.few_tris && depth < cfg.max_depth {
                assert!(Bvh::good_split(&tree.base, cfg, &leaf.bbox, tris).is_none());
            }
        });
    }

    #[test]
    fn full_and_bucketed_agree_with_brute_force() {
        for method in [BvhSplitMethod::SahFull, BvhSplitMethod::SahBuckets] {
            let tree = built_tree(method);
            test_util::assert_matches_brute_force(&tree, 0xB0B, 200);
        }
    }

    #[test]
    fn hlbvh_falls_back_to_root_leaf() {
        let tree = built_tree(BvhSplitMethod::Hlbvh);
        let root = tree.root.as_ref().unwrap();
        assert_eq!(root.node_count(), 1);

        let ray = Ray::new(vec3(3.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));
        let mut its = Intersection::default();
        assert!(tree.ray_intersect(&ray, &mut its, false).is_some());
    }

    #[test]
    fn quick_return_still_reports_a_hit() {
        let mut tree = Bvh::with_config(BvhConfig {
            quick_return: true,
            ..Default::default()
        });
        tree.add_mesh(shapes::cube(Vec3::ZERO, 1.0));
        tree.build();

        let ray = Ray::new(vec3(0.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));
        let mut its = Intersection::default();
        assert!(tree.ray_intersect(&ray, &mut its, false).is_some());
    }

    #[test]
    fn sequential_and_parallel_builds_agree() {
        let mut seq = Bvh::with_config(BvhConfig {
            parallel: false,
            ..Default::default()
        });
        let mut par = Bvh::new();
        for tree in [&mut seq, &mut par] {
            tree.add_mesh(shapes::sphere(Vec3::ZERO, 1.0, 16, 8));
            tree.build();
        }
        assert_eq!(
            seq.root.as_ref().unwrap().node_count(),
            par.root.as_ref().unwrap().node_count()
        );
        test_util::assert_same_answers(&seq, &par);
    }

    #[test]
    fn rebuild_is_a_no_op() {
        let mut tree = built_tree(BvhSplitMethod::SahBuckets);
        let nodes = tree.root.as_ref().unwrap().node_count();
        tree.build();
        assert_eq!(tree.root.as_ref().unwrap().node_count(), nodes);
    }
}
