// src/test_util.rs
//! Seeded helpers shared by the test modules.

use glam::{vec3, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::accel::{AccelTree, TriRef};
use crate::mesh::Mesh;
use crate::primitives::{Aabb, Ray};
use crate::Intersection;

/// A deterministic soup of `count` random triangles: centers uniform in a
/// `space`-sized cube, vertices jittered within `size` of the center.
pub fn random_soup(seed: u64, count: usize, space: f32, size: f32) -> Mesh {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut positions = Vec::with_capacity(count * 3);
    let mut indices = Vec::with_capacity(count * 3);

    for i in 0..count {
        let center = vec3(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()) * space;
        for _ in 0..3 {
            let jitter =
                vec3(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()) - Vec3::splat(0.5);
            positions.push(center + jitter * size);
        }
        let base = (i * 3) as u32;
        indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    Mesh::new(positions, vec![], vec![], indices)
}

/// A ray aimed from outside the box at a random interior point.
pub fn random_ray(rng: &mut ChaCha8Rng, bb: &Aabb) -> Ray {
    let extent = bb.max - bb.min;
    let target = bb.min
        + vec3(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()) * extent;
    let mut d = vec3(
        rng.gen::<f32>() - 0.5,
        rng.gen::<f32>() - 0.5,
        rng.gen::<f32>() - 0.5,
    );
    if d.length_squared() < 1e-8 {
        d = Vec3::X;
    }
    let d = d.normalize();
    Ray::new(target - d * extent.length(), d)
}

/// Linear scan over every triangle with the same shrinking-`maxt`
/// semantics the trees use.
pub fn brute_force(meshes: &[Mesh], ray: &Ray) -> Option<(TriRef, f32)> {
    let mut r = *ray;
    let mut best = None;
    for (mi, mesh) in meshes.iter().enumerate() {
        for t in 0..mesh.triangle_count() {
            if let Some((_, _, tt)) = mesh.ray_intersect(t, &r) {
                r.maxt = tt;
                best = Some((
                    TriRef {
                        mesh: mi as u32,
                        tri: t,
                    },
                    tt,
                ));
            }
        }
    }
    best
}

/// Fires `count` seeded rays and checks the index returns the same
/// triangle as the linear scan, with `t` within relative tolerance.
pub fn assert_matches_brute_force(tree: &impl AccelTree, seed: u64, count: usize) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let bb = *tree.bounding_box();

    for i in 0..count {
        let ray = random_ray(&mut rng, &bb);
        let mut its = Intersection::default();
        let hit = tree.ray_intersect(&ray, &mut its, false);
        let reference = brute_force(tree.meshes(), &ray);

        match (hit, reference) {
            (None, None) => {}
            (Some(h), Some((r, t))) => {
                assert_eq!(h, r, "ray {i}: wrong triangle");
                assert!(
                    (its.t - t).abs() <= 1e-4 * t.abs().max(1.0),
                    "ray {i}: t = {} vs reference {t}",
                    its.t,
                );
            }
            other => panic!("ray {i}: hit mismatch {other:?}"),
        }
    }
}

/// A shadow query reports a hit iff the linear scan finds any triangle in
/// range.
pub fn assert_shadow_consistent(tree: &impl AccelTree, seed: u64, count: usize) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let bb = *tree.bounding_box();

    for i in 0..count {
        let ray = random_ray(&mut rng, &bb);
        let mut its = Intersection::default();
        let shadowed = tree.ray_intersect(&ray, &mut its, true).is_some();
        let reference = brute_force(tree.meshes(), &ray).is_some();
        assert_eq!(shadowed, reference, "ray {i}");
    }
}

/// Two structures answer a fixed ray battery identically (observational
/// equality; the trees need not be structurally equal).
pub fn assert_same_answers(a: &impl AccelTree, b: &impl AccelTree) {
    let mut rng = ChaCha8Rng::seed_from_u64(0x0BB1);
    let bb = *a.bounding_box();

    for i in 0..100 {
        let ray = random_ray(&mut rng, &bb);
        let mut its_a = Intersection::default();
        let mut its_b = Intersection::default();
        let hit_a = a.ray_intersect(&ray, &mut its_a, false);
        let hit_b = b.ray_intersect(&ray, &mut its_b, false);
        assert_eq!(hit_a, hit_b, "ray {i}");
        if hit_a.is_some() {
            assert_eq!(its_a.t, its_b.t, "ray {i}");
        }
    }
}
