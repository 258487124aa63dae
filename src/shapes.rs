// src/shapes.rs
//! Procedural meshes used by tests, benches and demo scenes.

use glam::{vec2, vec3, Vec2, Vec3};
use std::f32::consts::PI;

use crate::mesh::Mesh;

/// A single triangle with no vertex attributes.
pub fn triangle(v0: Vec3, v1: Vec3, v2: Vec3) -> Mesh {
    Mesh::new(vec![v0, v1, v2], vec![], vec![], vec![0, 1, 2])
}

/// An axis-aligned quad in the XY plane, spanning `[min, max]` at `z = 0`,
/// with UVs over `[0, 1]²` and +Z normals.
pub fn quad(min: Vec2, max: Vec2) -> Mesh {
    let positions = vec![
        vec3(min.x, min.y, 0.0),
        vec3(max.x, min.y, 0.0),
        vec3(max.x, max.y, 0.0),
        vec3(min.x, max.y, 0.0),
    ];
    let normals = vec![Vec3::Z; 4];
    let uvs = vec![vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(1.0, 1.0), vec2(0.0, 1.0)];
    Mesh::new(positions, normals, uvs, vec![0, 1, 2, 0, 2, 3])
}

/// An `nx` by `ny` grid of unit quads in the XY plane at `z = 0`, covering
/// `[0, nx] x [0, ny]`. Two triangles per cell, vertices shared.
pub fn quad_grid(nx: u32, ny: u32) -> Mesh {
    let mut positions = Vec::with_capacity(((nx + 1) * (ny + 1)) as usize);
    for j in 0..=ny {
        for i in 0..=nx {
            positions.push(vec3(i as f32, j as f32, 0.0));
        }
    }

    let mut indices = Vec::with_capacity((nx * ny * 6) as usize);
    for j in 0..ny {
        for i in 0..nx {
            let k0 = j * (nx + 1) + i;
            let k1 = k0 + 1;
            let k2 = k0 + nx + 1;
            let k3 = k2 + 1;
            indices.extend_from_slice(&[k0, k1, k3]);
            indices.extend_from_slice(&[k0, k3, k2]);
        }
    }

    Mesh::new(positions, vec![], vec![], indices)
}

/// An axis-aligned cube of edge length `size` centred at `center`,
/// triangulated with per-face normals (24 vertices, 12 triangles).
pub fn cube(center: Vec3, size: f32) -> Mesh {
    let h = size * 0.5;
    let face_axes: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];

    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (n, u, v) in face_axes {
        let base = positions.len() as u32;
        positions.push(center + (n - u - v) * h);
        positions.push(center + (n + u - v) * h);
        positions.push(center + (n + u + v) * h);
        positions.push(center + (n - u + v) * h);
        normals.extend_from_slice(&[n; 4]);
        indices.extend_from_slice(&[base, base + 1, base + 2]);
        indices.extend_from_slice(&[base, base + 2, base + 3]);
    }

    Mesh::new(positions, normals, vec![], indices)
}

/// A UV sphere with `sectors` longitudinal and `stacks` latitudinal
/// divisions; outward normals.
pub fn sphere(center: Vec3, radius: f32, sectors: u32, stacks: u32) -> Mesh {
    let mut positions = Vec::new();
    let mut normals = Vec::new();

    for i in 0..=stacks {
        let stack_angle = PI / 2.0 - PI * (i as f32) / (stacks as f32);
        let xy = radius * stack_angle.cos();
        let z = radius * stack_angle.sin();
        for j in 0..=sectors {
            let sector_angle = 2.0 * PI * (j as f32) / (sectors as f32);
            let x = xy * sector_angle.cos();
            let y = xy * sector_angle.sin();
            let p = vec3(x, y, z);
            positions.push(p + center);
            normals.push(p.normalize_or_zero());
        }
    }

    let mut indices = Vec::new();
    for i in 0..stacks {
        let k1 = i * (sectors + 1);
        let k2 = k1 + sectors + 1;
        for j in 0..sectors {
            if i != 0 {
                indices.extend_from_slice(&[k1 + j, k2 + j, k1 + j + 1]);
            }
            if i != stacks - 1 {
                indices.extend_from_slice(&[k1 + j + 1, k2 + j, k2 + j + 1]);
            }
        }
    }

    Mesh::new(positions, normals, vec![], indices)
}
