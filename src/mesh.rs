//! The core data structure, an indexed tetrahedral mesh
//! where every face knows the face on its other side.

/// Low-level mesh construction, flip resolution and corresponding tests.
mod mesh_construction;
pub use mesh_construction::MeshBuilder;
/// re-export the testing meshes for use in other modules' tests
#[doc(hidden)]
pub use mesh_construction::{cube_mesh, two_tet_mesh};

/// Structural consistency checks.
pub mod validation;
pub use validation::{ValidationFailure, ValidationReport, ValidationTolerances};

//

use crate::element::{impl_mesh_element, Element, Index, MeshElement};
use crate::Vec3;

use itertools::Itertools;
use std::ops::Range;

/// Vertices of the face opposite each local vertex of a tetrahedron.
///
/// Face `j` excludes vertex `j` and is ordered
/// so that its normal points into the tetrahedron.
pub const TET_FACE_VERTICES: [[usize; 3]; 4] = [[1, 2, 3], [0, 3, 2], [0, 1, 3], [0, 2, 1]];

/// A mesh made of tetrahedra.
///
/// All cross references between entities are indices
/// into the collections owned by the mesh.
/// Faces owned by tetrahedron `t` are stored at indices `4 * t..4 * t + 4`
/// and followed by the boundary faces.
///
/// Topology is fixed once the mesh is built;
/// only colors can be changed afterwards.
#[derive(Clone, Debug)]
pub struct TetMesh {
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) faces: Vec<Face>,
    pub(crate) tets: Vec<Tetrahedron>,
    pub(crate) domain: usize,
    pub(crate) domain_count: usize,
}

/// A tetrahedron incident to a vertex,
/// with the vertex's position in that tetrahedron.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TetVertex {
    /// Index of the tetrahedron.
    pub tet: usize,
    /// Local index of the vertex in the tetrahedron.
    pub local: usize,
}

/// A face incident to a vertex,
/// with the vertex's position in that face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FaceVertex {
    /// Index of the face.
    pub face: usize,
    /// Local index of the vertex in the face.
    pub local: usize,
}

/// The copy of a vertex in another domain of a decomposed mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias {
    /// Id of the other domain.
    pub domain: usize,
    /// Index of the vertex in the other domain's mesh.
    pub index: usize,
}

/// A single vertex of the mesh.
#[derive(Clone, Debug)]
pub struct Vertex {
    element: Element,
    r: Vec3,
    tets: Vec<TetVertex>,
    faces: Vec<FaceVertex>,
    aliases: Vec<Alias>,
}
impl_mesh_element!(Vertex);

impl Vertex {
    pub(crate) fn new(r: Vec3, color: Index) -> Self {
        Self {
            element: Element::with_color(color),
            r,
            tets: Vec::new(),
            faces: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// Position of the vertex.
    #[inline]
    pub fn r(&self) -> &Vec3 {
        &self.r
    }

    /// Tetrahedra containing this vertex.
    #[inline]
    pub fn tets(&self) -> &[TetVertex] {
        &self.tets
    }

    /// Faces containing this vertex.
    #[inline]
    pub fn faces(&self) -> &[FaceVertex] {
        &self.faces
    }

    /// Copies of this vertex in other domains, sorted by domain.
    ///
    /// Empty unless the mesh is one domain of a decomposition
    /// and the vertex is shared with another domain.
    #[inline]
    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    pub(crate) fn add_tet(&mut self, tet: usize, local: usize) {
        self.tets.push(TetVertex { tet, local });
    }

    pub(crate) fn add_face(&mut self, face: usize, local: usize) {
        self.faces.push(FaceVertex { face, local });
    }

    pub(crate) fn add_alias(&mut self, alias: Alias) {
        self.aliases.push(alias);
    }

    /// Sort incidence lists by the referenced element
    /// and aliases by domain.
    pub(crate) fn sort_lists(&mut self) {
        self.tets.sort_unstable_by_key(|tv| tv.tet);
        self.faces.sort_unstable_by_key(|fv| fv.face);
        self.aliases.sort_unstable();
        self.aliases.dedup();
    }
}

/// The tetrahedron owning a face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FaceOwner {
    /// Index of the tetrahedron.
    pub tet: usize,
    /// Index of the face within the tetrahedron,
    /// equal to the local index of the vertex opposite it.
    pub local_face: usize,
}

/// A triangular face.
///
/// The vertex order defines the orientation:
/// the normal of a tetrahedron's face points into the tetrahedron,
/// and the normal of a boundary face points out of the mesh.
#[derive(Clone, Debug)]
pub struct Face {
    element: Element,
    vertices: [usize; 3],
    owner: Option<FaceOwner>,
    flip: usize,
    normal: Vec3,
    center: Vec3,
    surface: f64,
}
impl_mesh_element!(Face);

impl Face {
    /// Construct a face from three ordered vertices,
    /// computing its centroid, unit normal and area.
    pub(crate) fn new(
        vertices: [usize; 3],
        positions: [&Vec3; 3],
        owner: Option<FaceOwner>,
        color: Index,
    ) -> Self {
        let [p1, p2, p3] = positions;
        let center = (p1 + p2 + p3) / 3.0;
        let cross = (p2 - p1).cross(&(p3 - p1));
        let surface = 0.5 * cross.norm();
        let normal = cross * (0.5 / surface);

        Self {
            element: Element::with_color(color),
            vertices,
            owner,
            flip: usize::MAX,
            normal,
            center,
            surface,
        }
    }

    /// Indices of the three vertices of this face, in orientation order.
    #[inline]
    pub fn vertices(&self) -> &[usize; 3] {
        &self.vertices
    }

    /// Index of the `li`th vertex of this face.
    #[inline]
    pub fn vertex(&self, li: usize) -> usize {
        self.vertices[li]
    }

    /// The tetrahedron owning this face, or None for a boundary face.
    #[inline]
    pub fn owner(&self) -> Option<FaceOwner> {
        self.owner
    }

    /// Index of the tetrahedron owning this face, or None for a boundary face.
    #[inline]
    pub fn tet(&self) -> Option<usize> {
        self.owner.map(|o| o.tet)
    }

    /// Whether this face lies on the boundary of the mesh
    /// (including domain interfaces in a decomposed mesh).
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.owner.is_none()
    }

    /// Index of the face on the other side of the same triangle.
    #[inline]
    pub fn flip(&self) -> usize {
        self.flip
    }

    pub(crate) fn set_flip(&mut self, flip: usize) {
        self.flip = flip;
    }

    /// Unit normal of the face.
    #[inline]
    pub fn normal(&self) -> &Vec3 {
        &self.normal
    }

    /// Centroid of the face.
    #[inline]
    pub fn center(&self) -> &Vec3 {
        &self.center
    }

    /// Area of the face.
    #[inline]
    pub fn surface(&self) -> f64 {
        self.surface
    }
}

/// A tetrahedron.
///
/// The signed volume is computed as
/// `((p0 - p3) × (p1 - p3)) · (p2 - p3) / 6`
/// and must be positive,
/// which fixes the winding the vertices are expected to have.
#[derive(Clone, Debug)]
pub struct Tetrahedron {
    element: Element,
    vertices: [usize; 4],
    faces: [usize; 4],
    center: Vec3,
    volume: f64,
    quality: f64,
}
impl_mesh_element!(Tetrahedron);

impl Tetrahedron {
    /// Compute the centroid and signed volume of a tetrahedron with the given corners.
    pub(crate) fn geometry(p: [&Vec3; 4]) -> (Vec3, f64) {
        let center = (p[0] + p[1] + p[2] + p[3]) / 4.0;
        let e0 = p[0] - p[3];
        let e1 = p[1] - p[3];
        let e2 = p[2] - p[3];
        let volume = e0.cross(&e1).dot(&e2) / 6.0;
        (center, volume)
    }

    pub(crate) fn new(
        vertices: [usize; 4],
        faces: [usize; 4],
        center: Vec3,
        volume: f64,
        surface_sum: f64,
        color: Index,
    ) -> Self {
        // V / S^(3/2) relative to the same ratio for a regular tetrahedron
        let regular_ratio = 2.0 / 144.0 / 3.0 / f64::sqrt(3.0);
        let quality = f64::sqrt(volume * volume / surface_sum.powi(3) / regular_ratio);

        Self {
            element: Element::with_color(color),
            vertices,
            faces,
            center,
            volume,
            quality,
        }
    }

    /// Indices of the four vertices of this tetrahedron.
    #[inline]
    pub fn vertices(&self) -> &[usize; 4] {
        &self.vertices
    }

    /// Index of the `li`th vertex of this tetrahedron.
    #[inline]
    pub fn vertex(&self, li: usize) -> usize {
        self.vertices[li]
    }

    /// Indices of the four faces of this tetrahedron.
    /// Face `j` is opposite vertex `j`.
    #[inline]
    pub fn faces(&self) -> &[usize; 4] {
        &self.faces
    }

    /// Index of the face opposite the `j`th vertex.
    #[inline]
    pub fn face(&self, j: usize) -> usize {
        self.faces[j]
    }

    /// Centroid of the tetrahedron.
    #[inline]
    pub fn center(&self) -> &Vec3 {
        &self.center
    }

    /// Signed volume of the tetrahedron.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Shape quality in `[0, 1]`,
    /// 1 for a regular tetrahedron and approaching 0 for slivers.
    #[inline]
    pub fn quality(&self) -> f64 {
        self.quality
    }
}

impl TetMesh {
    /// Assemble a mesh from raw geometry, resolving the flip of every face.
    ///
    /// Fails if the input contains a non-positive tetrahedron,
    /// an out-of-range vertex index,
    /// or a triangle without a matching face on its other side.
    #[inline]
    pub fn from_simple_mesh<S>(source: &S) -> Result<Self, MeshError>
    where
        S: crate::SimpleMesh + ?Sized,
    {
        mesh_construction::build_mesh(source)
    }

    /// All vertices of the mesh.
    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// All faces of the mesh, tetrahedron faces first and boundary faces after.
    #[inline]
    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    /// All tetrahedra of the mesh.
    #[inline]
    pub fn tets(&self) -> &[Tetrahedron] {
        &self.tets
    }

    /// Get a vertex by index.
    #[inline]
    pub fn vertex(&self, idx: usize) -> &Vertex {
        &self.vertices[idx]
    }

    /// Get a face by index.
    #[inline]
    pub fn face(&self, idx: usize) -> &Face {
        &self.faces[idx]
    }

    /// Get a tetrahedron by index.
    #[inline]
    pub fn tet(&self, idx: usize) -> &Tetrahedron {
        &self.tets[idx]
    }

    /// Get the face on the other side of the given face.
    #[inline]
    pub fn flip_of(&self, face: &Face) -> &Face {
        &self.faces[face.flip]
    }

    /// Range of indices in [`faces`][Self::faces] holding boundary faces.
    #[inline]
    pub fn boundary_face_range(&self) -> Range<usize> {
        4 * self.tets.len()..self.faces.len()
    }

    /// Number of boundary faces, including domain interface faces.
    #[inline]
    pub fn boundary_face_count(&self) -> usize {
        self.faces.len() - 4 * self.tets.len()
    }

    /// Number of vertices that have copies in other domains.
    pub fn interface_vertex_count(&self) -> usize {
        self.vertices
            .iter()
            .filter(|v| !v.aliases.is_empty())
            .count()
    }

    /// Id of the domain this mesh represents (0 for an undecomposed mesh).
    #[inline]
    pub fn domain(&self) -> usize {
        self.domain
    }

    /// Number of domains in the decomposition this mesh belongs to
    /// (1 for an undecomposed mesh).
    #[inline]
    pub fn domain_count(&self) -> usize {
        self.domain_count
    }

    /// Quality of the worst-shaped tetrahedron in the mesh,
    /// see [`Tetrahedron::quality`].
    pub fn min_quality(&self) -> f64 {
        self.tets
            .iter()
            .map(|t| t.quality)
            .fold(1.0, f64::min)
    }

    /// Overwrite the colors of all tetrahedra, e.g. with a partitioner's output.
    ///
    /// Panics if the number of colors doesn't match the number of tetrahedra.
    pub fn recolor_tets(&mut self, colors: &[Index]) {
        assert_eq!(colors.len(), self.tets.len(), "one color per tetrahedron");
        for (tet, color) in self.tets.iter_mut().zip_eq(colors) {
            tet.set_color(*color);
        }
    }

    /// Overwrite the colors of all vertices, e.g. with a partitioner's output.
    ///
    /// Panics if the number of colors doesn't match the number of vertices.
    pub fn recolor_vertices(&mut self, colors: &[Index]) {
        assert_eq!(colors.len(), self.vertices.len(), "one color per vertex");
        for (vertex, color) in self.vertices.iter_mut().zip_eq(colors) {
            vertex.set_color(*color);
        }
    }

    /// Run every structural check with default tolerances.
    ///
    /// See [`validation`] for the list of checks.
    #[inline]
    pub fn check(&self) -> ValidationReport {
        validation::check(self, &ValidationTolerances::default())
    }

    /// Run every structural check with custom tolerances.
    #[inline]
    pub fn check_with(&self, tolerances: &ValidationTolerances) -> ValidationReport {
        validation::check(self, tolerances)
    }
}

/// Error in assembling a mesh from raw data.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// An element refers to a vertex that doesn't exist.
    #[error("Vertex index {index} out of range (mesh has {count} vertices)")]
    VertexOutOfRange {
        /// The offending vertex index.
        index: usize,
        /// Number of vertices in the mesh.
        count: usize,
    },
    /// A tetrahedron has zero or negative volume,
    /// usually meaning its vertices are wound the wrong way.
    #[error("Tetrahedron #{tet} has non-positive volume {volume}")]
    NonPositiveVolume {
        /// Index of the tetrahedron.
        tet: usize,
        /// The computed signed volume.
        volume: f64,
    },
    /// No face on the other side of a triangle exists,
    /// which indicates a non-manifold or incomplete input mesh.
    #[error("Flipped face not found for face #{face} with vertices {vertices:?}")]
    FlipNotFound {
        /// Index of the face without a flip.
        face: usize,
        /// Vertices of that face.
        vertices: [usize; 3],
    },
    /// More than one other face shares the vertices of a triangle.
    #[error("Face #{face} with vertices {vertices:?} has more than one candidate flip")]
    AmbiguousFlip {
        /// Index of the face.
        face: usize,
        /// Vertices of that face.
        vertices: [usize; 3],
    },
}
