//! Raw mesh geometry as produced by mesh generators,
//! before any adjacency information is known.

use crate::{
    element::{Index, BAD_INDEX},
    mesh::{TetMesh, TET_FACE_VERTICES},
    MeshElement,
};

use std::collections::{hash_map::Entry, HashMap};

/// Source of raw tetrahedral mesh geometry.
///
/// Implementors expose flat lists of vertices, tetrahedra and boundary triangles.
/// Vertex indices are 0-based.
/// Tetrahedron vertex order matters: it must produce a positive volume
/// under the convention described on [`Tetrahedron`][crate::mesh::Tetrahedron].
/// Boundary triangles must be oriented with their normal pointing out of the mesh.
pub trait SimpleMesh {
    /// Number of vertices.
    fn num_vertices(&self) -> usize;
    /// Number of tetrahedra.
    fn num_tetrahedra(&self) -> usize;
    /// Number of boundary faces.
    fn num_boundary_faces(&self) -> usize;
    /// Coordinates of the `i`th vertex.
    fn vertex_coord(&self, i: usize) -> [f64; 3];
    /// Vertex indices of the `i`th tetrahedron.
    fn tet_vertices(&self, i: usize) -> [usize; 4];
    /// Vertex indices of the `i`th boundary face.
    fn boundary_vertices(&self, i: usize) -> [usize; 3];
    /// Material of the `i`th tetrahedron.
    fn tet_material(&self, i: usize) -> Index;
    /// Material of the `i`th boundary face.
    fn boundary_material(&self, i: usize) -> Index;
}

/// A [`SimpleMesh`] stored in plain vectors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMesh {
    /// Vertex coordinates.
    pub vertices: Vec<[f64; 3]>,
    /// Tetrahedron vertex indices.
    pub tets: Vec<[usize; 4]>,
    /// Tetrahedron materials, one per entry in `tets`.
    pub tet_materials: Vec<Index>,
    /// Boundary face vertex indices.
    pub boundary_faces: Vec<[usize; 3]>,
    /// Boundary face materials, one per entry in `boundary_faces`.
    pub boundary_materials: Vec<Index>,
}

impl RawMesh {
    /// Create a raw mesh from its parts.
    ///
    /// Panics if the material lists don't match the element lists in length.
    pub fn new(
        vertices: Vec<[f64; 3]>,
        tets: Vec<[usize; 4]>,
        tet_materials: Vec<Index>,
        boundary_faces: Vec<[usize; 3]>,
        boundary_materials: Vec<Index>,
    ) -> Self {
        assert_eq!(
            tets.len(),
            tet_materials.len(),
            "every tetrahedron needs a material"
        );
        assert_eq!(
            boundary_faces.len(),
            boundary_materials.len(),
            "every boundary face needs a material"
        );
        Self {
            vertices,
            tets,
            tet_materials,
            boundary_faces,
            boundary_materials,
        }
    }

    /// Create a raw mesh from tetrahedra alone,
    /// deriving the boundary faces from the tetrahedra's faces.
    ///
    /// A triangle appearing in exactly one tetrahedron is on the boundary.
    /// It is emitted with the opposite orientation to the tetrahedron's face
    /// (so its normal points out of the mesh), with color [`BAD_INDEX`],
    /// in the order the tetrahedra list them.
    pub fn from_tets(
        vertices: Vec<[f64; 3]>,
        tets: Vec<[usize; 4]>,
        tet_materials: Vec<Index>,
    ) -> Self {
        let boundary_faces = derive_boundary_faces(&tets);
        let boundary_materials = vec![BAD_INDEX; boundary_faces.len()];
        Self::new(
            vertices,
            tets,
            tet_materials,
            boundary_faces,
            boundary_materials,
        )
    }
}

/// Find the triangles that belong to only one of the given tetrahedra,
/// oriented opposite to that tetrahedron's face.
pub(crate) fn derive_boundary_faces(tets: &[[usize; 4]]) -> Vec<[usize; 3]> {
    // candidates in first-seen order, knocked out when seen a second time
    let mut candidates: Vec<Option<[usize; 3]>> = Vec::new();
    let mut seen: HashMap<[usize; 3], usize> = HashMap::new();

    for tet in tets {
        for local in TET_FACE_VERTICES {
            let face = local.map(|li| tet[li]);
            let mut key = face;
            key.sort_unstable();
            match seen.entry(key) {
                Entry::Occupied(e) => candidates[*e.get()] = None,
                Entry::Vacant(e) => {
                    e.insert(candidates.len());
                    // reversed orientation points away from the tetrahedron
                    candidates.push(Some([face[0], face[2], face[1]]));
                }
            }
        }
    }

    candidates.into_iter().flatten().collect()
}

impl SimpleMesh for RawMesh {
    #[inline]
    fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    fn num_tetrahedra(&self) -> usize {
        self.tets.len()
    }

    #[inline]
    fn num_boundary_faces(&self) -> usize {
        self.boundary_faces.len()
    }

    #[inline]
    fn vertex_coord(&self, i: usize) -> [f64; 3] {
        self.vertices[i]
    }

    #[inline]
    fn tet_vertices(&self, i: usize) -> [usize; 4] {
        self.tets[i]
    }

    #[inline]
    fn boundary_vertices(&self, i: usize) -> [usize; 3] {
        self.boundary_faces[i]
    }

    #[inline]
    fn tet_material(&self, i: usize) -> Index {
        self.tet_materials[i]
    }

    #[inline]
    fn boundary_material(&self, i: usize) -> Index {
        self.boundary_materials[i]
    }
}

impl From<&TetMesh> for RawMesh {
    /// Strip an assembled mesh back down to its raw geometry.
    ///
    /// Boundary faces keep their vertex order and color,
    /// so assembling the result reproduces the same mesh.
    fn from(mesh: &TetMesh) -> Self {
        let vertices = mesh
            .vertices()
            .iter()
            .map(|v| [v.r().x, v.r().y, v.r().z])
            .collect();
        let tets = mesh.tets().iter().map(|t| *t.vertices()).collect();
        let tet_materials = mesh.tets().iter().map(|t| t.color()).collect();
        let boundary = &mesh.faces()[mesh.boundary_face_range()];
        let boundary_faces = boundary.iter().map(|f| *f.vertices()).collect();
        let boundary_materials = boundary.iter().map(|f| f.color()).collect();

        Self {
            vertices,
            tets,
            tet_materials,
            boundary_faces,
            boundary_materials,
        }
    }
}
