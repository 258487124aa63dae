// src/mesh.rs
use glam::{vec2, vec3, Vec2, Vec3};
use thiserror::Error;

use crate::primitives::{Aabb, Ray};

/// Triangle bounding boxes are padded on axes thinner than this, so
/// axis-aligned geometry never produces zero-thickness slabs.
const BBOX_EPSILON: f32 = 1e-5;

#[derive(Debug, Error)]
pub enum ObjError {
    #[error("line {line}: malformed `{directive}` directive")]
    Malformed { line: usize, directive: &'static str },
    #[error("line {line}: face index out of range")]
    IndexOutOfRange { line: usize },
}

/// An indexed triangle mesh. `normals` and `uvs` are either empty or
/// parallel to `positions`; `indices` holds three entries per triangle.
#[derive(Clone, Debug)]
pub struct Mesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    uvs: Vec<Vec2>,
    indices: Vec<u32>,
    bbox: Aabb,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, normals: Vec<Vec3>, uvs: Vec<Vec2>, indices: Vec<u32>) -> Self {
        debug_assert!(indices.len() % 3 == 0);
        debug_assert!(normals.is_empty() || normals.len() == positions.len());
        debug_assert!(uvs.is_empty() || uvs.len() == positions.len());

        let mut mesh = Self {
            positions,
            normals,
            uvs,
            indices,
            bbox: Aabb::empty(),
        };
        for tri in 0..mesh.triangle_count() {
            let bb = mesh.tri_bounding_box(tri);
            mesh.bbox.expand_by(&bb);
        }
        mesh
    }

    /// Parse a Wavefront OBJ source. Handles `v`/`vt`/`vn`/`f` directives,
    /// deduplicates `p/t/n` vertex triples and fan-triangulates polygons.
    pub fn from_obj(source: &str) -> Result<Self, ObjError> {
        let mut raw_positions = Vec::new();
        let mut raw_normals = Vec::new();
        let mut raw_uvs = Vec::new();

        let mut unique_vertices: Vec<(usize, Option<usize>, Option<usize>)> = Vec::new();
        let mut indices = Vec::new();

        let mut final_positions = Vec::new();
        let mut final_normals = Vec::new();
        let mut final_uvs = Vec::new();
        let mut any_normal = false;
        let mut any_uv = false;

        for (i, text) in source.lines().enumerate() {
            let line = i + 1;
            let parts: Vec<&str> = text.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }

            match parts[0] {
                "v" => {
                    raw_positions.push(parse_vec3(&parts, line, "v")?);
                }
                "vt" => {
                    if parts.len() < 3 {
                        return Err(ObjError::Malformed { line, directive: "vt" });
                    }
                    let u = parse_float(parts[1], line, "vt")?;
                    let v = parse_float(parts[2], line, "vt")?;
                    raw_uvs.push(vec2(u, v));
                }
                "vn" => {
                    raw_normals.push(parse_vec3(&parts, line, "vn")?);
                }
                "f" => {
                    let mut face_indices = Vec::new();
                    for part in parts.iter().skip(1) {
                        let segs: Vec<&str> = part.split('/').collect();
                        let p_idx = parse_index(segs[0], line, "f")?;

                        let t_idx = match segs.get(1) {
                            Some(s) if !s.is_empty() => Some(parse_index(s, line, "f")?),
                            _ => None,
                        };
                        let n_idx = match segs.get(2) {
                            Some(s) if !s.is_empty() => Some(parse_index(s, line, "f")?),
                            _ => None,
                        };

                        let key = (p_idx, t_idx, n_idx);
                        if let Some(idx) = unique_vertices.iter().position(|&k| k == key) {
                            face_indices.push(idx as u32);
                        } else {
                            let idx = unique_vertices.len() as u32;
                            unique_vertices.push(key);

                            let p = *raw_positions
                                .get(p_idx)
                                .ok_or(ObjError::IndexOutOfRange { line })?;
                            final_positions.push(p);

                            match t_idx {
                                Some(ti) => {
                                    let uv = *raw_uvs
                                        .get(ti)
                                        .ok_or(ObjError::IndexOutOfRange { line })?;
                                    final_uvs.push(uv);
                                    any_uv = true;
                                }
                                None => final_uvs.push(Vec2::ZERO),
                            }

                            match n_idx {
                                Some(ni) => {
                                    let n = *raw_normals
                                        .get(ni)
                                        .ok_or(ObjError::IndexOutOfRange { line })?;
                                    final_normals.push(n);
                                    any_normal = true;
                                }
                                None => final_normals.push(Vec3::Y),
                            }

                            face_indices.push(idx);
                        }
                    }
                    if face_indices.len() < 3 {
                        return Err(ObjError::Malformed { line, directive: "f" });
                    }
                    for i in 1..face_indices.len() - 1 {
                        indices.push(face_indices[0]);
                        indices.push(face_indices[i]);
                        indices.push(face_indices[i + 1]);
                    }
                }
                _ => {}
            }
        }

        if !any_normal {
            final_normals.clear();
        }
        if !any_uv {
            final_uvs.clear();
        }

        Ok(Self::new(final_positions, final_normals, final_uvs, indices))
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn uvs(&self) -> &[Vec2] {
        &self.uvs
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }

    /// Bounding box of the whole mesh (union of the padded triangle boxes).
    pub fn bounding_box(&self) -> &Aabb {
        &self.bbox
    }

    pub fn tri_vertex_indices(&self, tri: u32) -> [usize; 3] {
        let base = tri as usize * 3;
        [
            self.indices[base] as usize,
            self.indices[base + 1] as usize,
            self.indices[base + 2] as usize,
        ]
    }

    /// Bounding box of one triangle, padded on near-degenerate axes.
    pub fn tri_bounding_box(&self, tri: u32) -> Aabb {
        let [i0, i1, i2] = self.tri_vertex_indices(tri);
        let v0 = self.positions[i0];
        let v1 = self.positions[i1];
        let v2 = self.positions[i2];

        let min = v0.min(v1).min(v2);
        let max = v0.max(v1).max(v2);

        let size = max - min;
        let pad = vec3(
            if size.x < BBOX_EPSILON { BBOX_EPSILON } else { 0.0 },
            if size.y < BBOX_EPSILON { BBOX_EPSILON } else { 0.0 },
            if size.z < BBOX_EPSILON { BBOX_EPSILON } else { 0.0 },
        );

        Aabb {
            min: min - pad * 0.5,
            max: max + pad * 0.5,
        }
    }

    pub fn centroid(&self, tri: u32) -> Vec3 {
        let [i0, i1, i2] = self.tri_vertex_indices(tri);
        (self.positions[i0] + self.positions[i1] + self.positions[i2]) * (1.0 / 3.0)
    }

    /// Möller–Trumbore. A hit counts only when `t` falls within the ray's
    /// `[mint, maxt]` range; returns the barycentric `(u, v)` and `t`.
    pub fn ray_intersect(&self, tri: u32, ray: &Ray) -> Option<(f32, f32, f32)> {
        let [i0, i1, i2] = self.tri_vertex_indices(tri);
        let p0 = self.positions[i0];
        let p1 = self.positions[i1];
        let p2 = self.positions[i2];

        let edge1 = p1 - p0;
        let edge2 = p2 - p0;

        let pvec = ray.d.cross(edge2);
        let det = edge1.dot(pvec);
        if det.abs() < 1e-8 {
            return None;
        }
        let inv_det = 1.0 / det;

        let tvec = ray.o - p0;
        let u = tvec.dot(pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let qvec = tvec.cross(edge1);
        let v = ray.d.dot(qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(qvec) * inv_det;
        (t >= ray.mint && t <= ray.maxt).then_some((u, v, t))
    }
}

fn parse_float(s: &str, line: usize, directive: &'static str) -> Result<f32, ObjError> {
    s.parse().map_err(|_| ObjError::Malformed { line, directive })
}

fn parse_vec3(parts: &[&str], line: usize, directive: &'static str) -> Result<Vec3, ObjError> {
    if parts.len() < 4 {
        return Err(ObjError::Malformed { line, directive });
    }
    Ok(vec3(
        parse_float(parts[1], line, directive)?,
        parse_float(parts[2], line, directive)?,
        parse_float(parts[3], line, directive)?,
    ))
}

fn parse_index(s: &str, line: usize, directive: &'static str) -> Result<usize, ObjError> {
    let i: usize = s.parse().map_err(|_| ObjError::Malformed { line, directive })?;
    if i == 0 {
        // OBJ indices are one-based
        return Err(ObjError::Malformed { line, directive });
    }
    Ok(i - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> Mesh {
        Mesh::new(
            vec![Vec3::ZERO, vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)],
            vec![],
            vec![],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn moller_trumbore_hit() {
        let mesh = unit_triangle();
        let ray = Ray::new(vec3(0.25, 0.25, 1.0), vec3(0.0, 0.0, -1.0));
        let (u, v, t) = mesh.ray_intersect(0, &ray).unwrap();
        assert!((t - 1.0).abs() < 1e-6);
        assert!((u - 0.25).abs() < 1e-6);
        assert!((v - 0.25).abs() < 1e-6);
    }

    #[test]
    fn moller_trumbore_outside() {
        let mesh = unit_triangle();
        // u + v > 1 on the far side of the hypotenuse
        let ray = Ray::new(vec3(0.75, 0.75, 1.0), vec3(0.0, 0.0, -1.0));
        assert!(mesh.ray_intersect(0, &ray).is_none());
    }

    #[test]
    fn moller_trumbore_respects_clip_range() {
        let mesh = unit_triangle();
        let short = Ray::with_bounds(vec3(0.25, 0.25, 1.0), vec3(0.0, 0.0, -1.0), 1e-4, 0.5);
        assert!(mesh.ray_intersect(0, &short).is_none());

        let late = Ray::with_bounds(vec3(0.25, 0.25, 1.0), vec3(0.0, 0.0, -1.0), 1.5, 2.0);
        assert!(mesh.ray_intersect(0, &late).is_none());
    }

    #[test]
    fn moller_trumbore_parallel_ray() {
        let mesh = unit_triangle();
        let ray = Ray::new(vec3(0.25, 0.25, 1.0), vec3(1.0, 0.0, 0.0));
        assert!(mesh.ray_intersect(0, &ray).is_none());
    }

    #[test]
    fn flat_triangle_bbox_is_padded() {
        let mesh = unit_triangle();
        let bb = mesh.tri_bounding_box(0);
        // The triangle lies in z = 0; the box must still have z extent
        assert!(bb.max.z > bb.min.z);
        assert!(bb.min.z < 0.0 && bb.max.z > 0.0);
    }

    #[test]
    fn centroid_is_vertex_mean() {
        let mesh = unit_triangle();
        let c = mesh.centroid(0);
        assert!((c - vec3(1.0 / 3.0, 1.0 / 3.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn obj_quad_triangulates_and_dedups() {
        let src = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";
        let mesh = Mesh::from_obj(src).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        // Four corners shared between the two fan triangles
        assert_eq!(mesh.positions().len(), 4);
        assert!(!mesh.has_normals());
        assert!(!mesh.has_uvs());
    }

    #[test]
    fn obj_with_uv_and_normals() {
        let src = "\
v 0 0 0
v 1 0 0
v 0 1 0
vt 0 0
vt 1 0
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1
";
        let mesh = Mesh::from_obj(src).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert!(mesh.has_uvs());
        assert!(mesh.has_normals());
        assert_eq!(mesh.normals()[0], Vec3::Z);
    }

    #[test]
    fn obj_malformed_vertex() {
        let err = Mesh::from_obj("v 1 nope 3\n").unwrap_err();
        assert!(matches!(err, ObjError::Malformed { line: 1, .. }));
    }

    #[test]
    fn obj_face_index_out_of_range() {
        let src = "\
v 0 0 0
v 1 0 0
f 1 2 7
";
        let err = Mesh::from_obj(src).unwrap_err();
        assert!(matches!(err, ObjError::IndexOutOfRange { line: 3 }));
    }

    #[test]
    fn mesh_bbox_covers_all_triangles() {
        let mesh = Mesh::from_obj("v 0 0 0\nv 1 0 0\nv 1 1 2\nv -3 1 0\nf 1 2 3\nf 1 3 4\n").unwrap();
        let bb = mesh.bounding_box();
        for tri in 0..mesh.triangle_count() {
            assert!(bb.contains(&mesh.tri_bounding_box(tri)));
        }
    }
}
