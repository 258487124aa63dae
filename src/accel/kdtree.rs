// src/accel/kdtree.rs
use std::cmp::Ordering;
use std::time::Instant;

use glam::Vec3;

use super::{AccelBase, AccelTree, TriRef};
use crate::mesh::Mesh;
use crate::primitives::{Aabb, Ray};
use crate::Intersection;

/// Hard recursion cap; also sizes the fixed traversal stack.
const MAX_DEPTH: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KdSplitMethod {
    /// Split the longest axis at its midpoint.
    Midpoint,
    /// Full SAH event sweep over both triangle-bbox extents per axis.
    SahFull,
    /// Never split: a single brute-force leaf at the root.
    BruteForce,
}

#[derive(Clone)]
pub struct KdConfig {
    /// Leaves stop subdividing at or below this triangle count.
    pub few_tris: usize,
    /// Recursion cap; clamped to 100 so the traversal stack cannot
    /// overflow.
    pub max_depth: usize,
    /// SAH cost of traversing one node.
    pub traversal_time: f32,
    /// SAH cost of one triangle intersection test.
    pub tri_int_cost: f32,
    /// Multiplier in `(0, 1]` applied when one side of a candidate split is
    /// empty, favouring splits that clip away empty space.
    pub empty_modifier: f32,
    pub split_method: KdSplitMethod,
    pub parallel: bool,
}

impl Default for KdConfig {
    fn default() -> Self {
        Self {
            few_tris: 10,
            max_depth: MAX_DEPTH,
            traversal_time: 1.0,
            tri_int_cost: 2.0,
            empty_modifier: 0.8,
            split_method: KdSplitMethod::SahFull,
            parallel: true,
        }
    }
}

/// Splitting plane: an offset along `dim`, relative to the node's
/// `bbox.min[dim]`.
#[derive(Clone, Copy, Debug)]
struct Split {
    dim: usize,
    offset: f32,
}

/// One endpoint of a triangle's bbox extent, relative to the node's min
/// corner. `enter` marks the low end.
struct SweepEvent {
    pt: Vec3,
    enter: bool,
}

struct KdNode {
    bbox: Aabb,
    children: [Option<Box<KdNode>>; 2],
    /// `Some` for leaves; straddling triangles are duplicated into both
    /// subtrees, so the same reference can occur in several leaves.
    tris: Option<Vec<TriRef>>,
    split: Option<Split>,
}

impl KdNode {
    fn leaf(bbox: Aabb, tris: Vec<TriRef>) -> Box<Self> {
        Box::new(Self {
            bbox,
            children: Default::default(),
            tris: Some(tris),
            split: None,
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

/// Axis-aligned binary space partition. Triangles are assigned to children
/// by bounding-box overlap, duplicating those that straddle the plane, so
/// the traversal must keep going after a leaf hit and let the shrunken ray
/// range prune the rest.
pub struct KdTree {
    base: AccelBase,
    config: KdConfig,
    root: Option<Box<KdNode>>,
}

impl Default for KdTree {
    fn default() -> Self {
        Self::new()
    }
}

impl KdTree {
    pub fn new() -> Self {
        Self::with_config(KdConfig::default())
    }

    pub fn with_method(split_method: KdSplitMethod) -> Self {
        Self::with_config(KdConfig {
            split_method,
            ..Default::default()
        })
    }

    pub fn with_config(mut config: KdConfig) -> Self {
        config.max_depth = config.max_depth.min(MAX_DEPTH);
        Self {
            base: AccelBase::new(),
            config,
            root: None,
        }
    }

    /// The half of `bb` below the split plane.
    fn low_bb(bb: &Aabb, s: Split) -> Aabb {
        let mut max = bb.max;
        max[s.dim] = bb.min[s.dim] + s.offset;
        Aabb::new(bb.min, max)
    }

    /// The half of `bb` above the split plane.
    fn high_bb(bb: &Aabb, s: Split) -> Aabb {
        let mut min = bb.min;
        min[s.dim] += s.offset;
        Aabb::new(min, bb.max)
    }

    fn good_split(
        base: &AccelBase,
        config: &KdConfig,
        bb: &Aabb,
        tris: &[TriRef],
    ) -> Option<Split> {
        match config.split_method {
            KdSplitMethod::SahFull => Self::sah_full_split(base, config, bb, tris),
            KdSplitMethod::Midpoint => {
                let sz = bb.max - bb.min;
                let dim = bb.major_axis();
                Some(Split {
                    dim,
                    offset: sz[dim] / 2.0,
                })
            }
            KdSplitMethod::BruteForce => None,
        }
    }

    /// Full event sweep: for each axis, walk the sorted bbox endpoints and
    /// evaluate
    ///
    /// `SAH = T + (P_l * N_l + P_h * N_h) * cost_tri / SA(bbox)`
    ///
    /// at every candidate offset strictly inside the node, where the
    /// sub-box areas come from the closed forms `P_l = axSA + x * axDist`
    /// and `P_h = (axSA + size * axDist) - x * axDist`. A split only wins
    /// if it beats the cost of leaving the node as a leaf.
    fn sah_full_split(
        base: &AccelBase,
        config: &KdConfig,
        bb: &Aabb,
        tris: &[TriRef],
    ) -> Option<Split> {
        let leaf_cost = config.tri_int_cost * tris.len() as f32;
        let mut min_sah = leaf_cost + 1.0;
        let mut best: Option<Split> = None;

        let sz = bb.max - bb.min;
        let bb_sa = bb.surface_area();

        // Two events per triangle, both ends of its bbox, relative to the
        // node's min corner.
        let mut events = Vec::with_capacity(tris.len() * 2);
        for &t in tris {
            let tb = base.tri_bbox(t);
            events.push(SweepEvent {
                pt: tb.min - bb.min,
                enter: true,
            });
            events.push(SweepEvent {
                pt: tb.max - bb.min,
                enter: false,
            });
        }

        for d in 0..3 {
            let d2 = (d + 1) % 3;
            let d3 = (d + 2) % 3;

            // Area of the face orthogonal to the axis, and the rate at
            // which the lateral area grows with the split offset
            let ax_sa = 2.0 * sz[d2] * sz[d3];
            let ax_dist = 2.0 * (sz[d2] + sz[d3]);
            let ax_max_const = ax_sa + sz[d] * ax_dist;

            // Stable sort: equal-position events keep their order, so the
            // `<=` acceptance below picks a deterministic candidate.
            events.sort_by(|a, b| a.pt[d].partial_cmp(&b.pt[d]).unwrap_or(Ordering::Equal));

            let mut l_cost = 0.0;
            let mut h_cost = leaf_cost;
            for e in &events {
                // A triangle leaves the right side before its exit point is
                // considered as a split position
                if !e.enter {
                    h_cost -= config.tri_int_cost;
                }

                let x = e.pt[d];
                if 0.0 < x && x < sz[d] {
                    let p_l = ax_sa + x * ax_dist;
                    let p_h = ax_max_const - x * ax_dist;

                    let mut sah = config.traversal_time + (p_l * l_cost + p_h * h_cost) / bb_sa;
                    if l_cost == 0.0 || h_cost == 0.0 {
                        sah *= config.empty_modifier;
                    }

                    if sah <= min_sah {
                        min_sah = sah;
                        best = Some(Split { dim: d, offset: x });
                    }
                }

                if e.enter {
                    l_cost += config.tri_int_cost;
                }
            }
        }

        if min_sah < leaf_cost {
            best
        } else {
            None
        }
    }

    fn build_node(
        base: &AccelBase,
        config: &KdConfig,
        bbox: Aabb,
        tris: Vec<TriRef>,
        depth: usize,
    ) -> Option<Box<KdNode>> {
        if tris.is_empty() {
            return None;
        }
        if tris.len() <= config.few_tris || depth >= config.max_depth {
            return Some(KdNode::leaf(bbox, tris));
        }

        let Some(split) = Self::good_split(base, config, &bbox, &tris) else {
            // No split beats the leaf cost
            return Some(KdNode::leaf(bbox, tris));
        };

        let boxes = [Self::low_bb(&bbox, split), Self::high_bb(&bbox, split)];

        let partition = |bb: &Aabb| -> Vec<TriRef> {
            tris.iter()
                .copied()
                .filter(|&t| base.tri_overlaps(bb, t))
                .collect()
        };
        let (low, high) = if config.parallel {
            rayon::join(|| partition(&boxes[0]), || partition(&boxes[1]))
        } else {
            (partition(&boxes[0]), partition(&boxes[1]))
        };

        // Both sides received the full list: the plane separated nothing,
        // so recursing would never terminate. Collapse into a leaf.
        if low.len() == tris.len() && high.len() == tris.len() {
            return Some(KdNode::leaf(bbox, tris));
        }

        let [lo_box, hi_box] = boxes;
        let (c0, c1) = if config.parallel {
            rayon::join(
                || Self::build_node(base, config, lo_box, low, depth + 1),
                || Self::build_node(base, config, hi_box, high, depth + 1),
            )
        } else {
            (
                Self::build_node(base, config, lo_box, low, depth + 1),
                Self::build_node(base, config, hi_box, high, depth + 1),
            )
        };

        Some(Box::new(KdNode {
            bbox,
            children: [c0, c1],
            tris: None,
            split: Some(split),
        }))
    }
}

impl AccelTree for KdTree {
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
            "kd-tree built; nodes = {}, stored tris = {}, mesh tris = {}, tt = {:?}",
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
    /// far-then-near by the sign of the ray direction along the split axis;
    /// a leaf hit shrinks `ray.maxt`, and the bbox test against the shrunk
    /// ray prunes everything that starts beyond the current best. Because
    /// of duplication, a leaf hit alone never ends the walk; shadow rays do
    /// return on the first hit.
    fn ray_intersect(
        &self,
        ray: &Ray,
        its: &mut Intersection,
        shadow_ray: bool,
    ) -> Option<TriRef> {
        let root = self.root.as_deref()?;

        let mut stack: [Option<&KdNode>; MAX_DEPTH + 1] = [None; MAX_DEPTH + 1];
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
                    if shadow_ray {
                        return Some(hit);
                    }
                    closest = Some(hit);
                }
            } else if let Some(s) = cur.split {
                if ray.d[s.dim] >= 0.0 {
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
        }

        closest
    }

    fn meshes(&self) -> &[Mesh] {
        self.base.meshes()
    }
}
