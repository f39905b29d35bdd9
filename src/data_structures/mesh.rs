//! Geometry independent of any GPU buffers created from it.

use anyhow::{bail, ensure};
use cgmath::{InnerSpace, Vector3, Zero};

use crate::data_structures::keys::MeshKey;

/// Vertex positions, triangle indices, UVs and normals of one mesh.
///
/// All per-vertex attribute lists have the same length, which is checked on
/// construction so backends can upload them as parallel buffers.
#[derive(Clone, Debug)]
pub struct MeshData {
    key: MeshKey,
    pub label: String,
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
    uvs: Vec<[f32; 2]>,
    normals: Vec<[f32; 3]>,
}

impl MeshData {
    /// Validate and assemble a mesh.
    ///
    /// Empty `uvs` are filled with zeros. Empty `normals` are derived from the
    /// faces: every vertex gets the average of the normals of the triangles it
    /// belongs to.
    pub fn new(
        label: impl Into<String>,
        positions: Vec<[f32; 3]>,
        indices: Vec<u32>,
        uvs: Vec<[f32; 2]>,
        normals: Vec<[f32; 3]>,
    ) -> anyhow::Result<Self> {
        let label = label.into();
        ensure!(!positions.is_empty(), "mesh {label:?} has no vertices");
        ensure!(
            !indices.is_empty() && indices.len() % 3 == 0,
            "mesh {label:?} needs a non-empty triangle list, got {} indices",
            indices.len()
        );
        if let Some(&out_of_bounds) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            bail!(
                "mesh {label:?} references vertex {out_of_bounds} but only has {} vertices",
                positions.len()
            );
        }
        let uvs = if uvs.is_empty() {
            vec![[0.0; 2]; positions.len()]
        } else {
            ensure!(
                uvs.len() == positions.len(),
                "mesh {label:?} has {} uvs for {} vertices",
                uvs.len(),
                positions.len()
            );
            uvs
        };
        let normals = if normals.is_empty() {
            face_normals(&positions, &indices)
        } else {
            ensure!(
                normals.len() == positions.len(),
                "mesh {label:?} has {} normals for {} vertices",
                normals.len(),
                positions.len()
            );
            normals
        };

        Ok(Self {
            key: MeshKey::next(),
            label,
            positions,
            indices,
            uvs,
            normals,
        })
    }

    /// An axis-aligned quad facing +z, centred on the origin at depth `z`.
    pub fn quad(label: impl Into<String>, half_extent: f32, z: f32) -> Self {
        let e = half_extent;
        Self {
            key: MeshKey::next(),
            label: label.into(),
            positions: vec![[-e, -e, z], [e, -e, z], [e, e, z], [-e, e, z]],
            indices: vec![0, 1, 2, 0, 2, 3],
            uvs: vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 4],
        }
    }

    pub fn key(&self) -> MeshKey {
        self.key
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn uvs(&self) -> &[[f32; 2]] {
        &self.uvs
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

fn face_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut sums = vec![Vector3::<f32>::zero(); positions.len()];
    let mut faces_included = vec![0u32; positions.len()];

    for c in indices.chunks(3) {
        let p0: Vector3<f32> = positions[c[0] as usize].into();
        let p1: Vector3<f32> = positions[c[1] as usize].into();
        let p2: Vector3<f32> = positions[c[2] as usize].into();
        let normal = (p1 - p0).cross(p2 - p0);
        // Degenerate triangles contribute nothing.
        if normal.magnitude2() <= f32::EPSILON {
            continue;
        }
        let normal = normal.normalize();
        for &i in c {
            sums[i as usize] += normal;
            faces_included[i as usize] += 1;
        }
    }

    sums.into_iter()
        .zip(faces_included)
        .map(|(sum, n)| {
            if n == 0 || sum.magnitude2() <= f32::EPSILON {
                [0.0, 0.0, 0.0]
            } else {
                sum.normalize().into()
            }
        })
        .collect()
}
