//! Checks verifying the structural invariants of a [`TetMesh`].
//!
//! The validator never modifies the mesh and never stops early:
//! every check runs and every failure is reported,
//! each with the first offending element it found.
//! The checks are
//! 1. domain id is smaller than domain count,
//! 2. element indices match their position in their collection,
//! 3. the flip of a face's flip is the face itself,
//! 4. a face and its flip have opposite normals,
//! 5. face areas are positive,
//! 6. tetrahedron volumes are positive,
//! 7. each face of a tetrahedron reproduces its volume as `S h / 3`,
//! 8. vertex incidence lists point back at the vertex
//!    and have `4 * tets` and `3 * faces` entries in total.
//!
//! Optionally, boundary faces can also be required to carry a boundary condition color
//! and tetrahedron faces to carry none
//! (see [`ValidationTolerances::require_boundary_colors`]).
//! This is off by default, since derived boundaries
//! and the interface faces of domain meshes are uncolored.

use super::TetMesh;
use crate::element::{Index, MeshElement, BAD_INDEX};

use itertools::izip;
use std::fmt;

/// Tolerances used by the floating-point checks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidationTolerances {
    /// Allowed absolute deviation of `dot(n, flip(n))` from -1.
    pub flip_orientation: f64,
    /// Allowed deviation of a face's volume contribution
    /// from the tetrahedron volume, relative to the volume.
    pub divergence_relative: f64,
    /// Also check that exactly the boundary faces have a color.
    pub require_boundary_colors: bool,
}

impl Default for ValidationTolerances {
    fn default() -> Self {
        Self {
            flip_orientation: 1e-10,
            divergence_relative: 1e-12,
            require_boundary_colors: false,
        }
    }
}

/// A single violated invariant,
/// identified by the first offending element found.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum ValidationFailure {
    /// The mesh claims a domain id outside its decomposition.
    #[error("Domain id {domain} is not smaller than domain count {domain_count}")]
    DomainOutOfRange {
        /// Domain id of the mesh.
        domain: usize,
        /// Domain count of the mesh.
        domain_count: usize,
    },
    /// A vertex's index doesn't match its position.
    #[error("Vertex index is corrupted at vertex #{vertex} (found {found})")]
    VertexIndex {
        /// Position of the vertex.
        vertex: usize,
        /// Index stored in the vertex.
        found: Index,
    },
    /// A face's index doesn't match its position.
    #[error("Face index is corrupted at face #{face} (found {found})")]
    FaceIndex {
        /// Position of the face.
        face: usize,
        /// Index stored in the face.
        found: Index,
    },
    /// A tetrahedron's index doesn't match its position.
    #[error("Tetrahedron index is corrupted at tetrahedron #{tet} (found {found})")]
    TetIndex {
        /// Position of the tetrahedron.
        tet: usize,
        /// Index stored in the tetrahedron.
        found: Index,
    },
    /// The flip of a face's flip is some other face (or doesn't exist).
    #[error("Face #{face} twice flipped is not the same")]
    FlipNotInvolution {
        /// Index of the face.
        face: usize,
    },
    /// A face and its flip aren't oriented opposite to each other.
    #[error("Face #{face} flip not opposed to face (cosine {cosine}, probably wrongly oriented)")]
    FlipOrientation {
        /// Index of the face.
        face: usize,
        /// Dot product of the two unit normals.
        cosine: f64,
    },
    /// A face has zero, negative or NaN area.
    #[error("Face #{face} has non-positive surface {surface}")]
    FaceSurface {
        /// Index of the face.
        face: usize,
        /// The stored area.
        surface: f64,
    },
    /// A boundary face has no color, or a tetrahedron face has one.
    #[error("Face #{face} has wrong boundary condition (boundary: {boundary}, color {color})")]
    BoundaryColor {
        /// Index of the face.
        face: usize,
        /// Whether the face is a boundary face.
        boundary: bool,
        /// The color of the face.
        color: Index,
    },
    /// A tetrahedron has zero, negative or NaN volume.
    #[error("Tetrahedron #{tet} has non-positive volume {volume}")]
    TetVolume {
        /// Index of the tetrahedron.
        tet: usize,
        /// The stored volume.
        volume: f64,
    },
    /// A face's normal and area don't reproduce its tetrahedron's volume.
    #[error("Tetrahedron #{tet} has {local_face}-th face wrongly oriented")]
    TetFaceNormal {
        /// Index of the tetrahedron.
        tet: usize,
        /// Local index of the face in the tetrahedron.
        local_face: usize,
    },
    /// A tetrahedron incidence of a vertex doesn't point back at the vertex.
    #[error("Tetrahedron #{tet} has {local}-th vertex incorrectly listed in vertex #{vertex}")]
    VertexTetList {
        /// Index of the vertex.
        vertex: usize,
        /// Recorded tetrahedron.
        tet: usize,
        /// Recorded local slot in the tetrahedron.
        local: usize,
    },
    /// The tetrahedron incidences of all vertices don't add up to `4 * tets`.
    #[error("Vertex tetrahedron lists have {found} entries in total, expected {expected}")]
    VertexTetCount {
        /// Total number of entries.
        found: usize,
        /// Four times the number of tetrahedra.
        expected: usize,
    },
    /// A face incidence of a vertex doesn't point back at the vertex.
    #[error("Face #{face} has {local}-th vertex incorrectly listed in vertex #{vertex}")]
    VertexFaceList {
        /// Index of the vertex.
        vertex: usize,
        /// Recorded face.
        face: usize,
        /// Recorded local slot in the face.
        local: usize,
    },
    /// The face incidences of all vertices don't add up to `3 * faces`.
    #[error("Vertex face lists have {found} entries in total, expected {expected}")]
    VertexFaceCount {
        /// Total number of entries.
        found: usize,
        /// Three times the number of faces.
        expected: usize,
    },
}

/// The result of validating a mesh: every check that failed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    /// Whether every check passed.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// The checks that failed, in the order they were run.
    #[inline]
    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    fn push(&mut self, failure: Option<ValidationFailure>) {
        if let Some(failure) = failure {
            log::warn!("{failure}");
            self.failures.push(failure);
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "Mesh check: OK");
        }
        writeln!(f, "Mesh check: {} failures", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "  {failure}")?;
        }
        Ok(())
    }
}

/// Run every check on the mesh.
pub fn check(mesh: &TetMesh, tolerances: &ValidationTolerances) -> ValidationReport {
    let mut report = ValidationReport::default();

    report.push(check_domain(mesh));
    report.push(check_vertex_indices(mesh));
    report.push(check_face_indices(mesh));
    report.push(check_tet_indices(mesh));
    report.push(check_flip_involution(mesh));
    report.push(check_flip_orientation(mesh, tolerances.flip_orientation));
    if tolerances.require_boundary_colors {
        report.push(check_boundary_colors(mesh));
    }
    report.push(check_face_surface(mesh));
    report.push(check_tet_volume(mesh));
    report.push(check_tet_face_normals(mesh, tolerances.divergence_relative));
    let (list, count) = check_vertex_tet_lists(mesh);
    report.push(list);
    report.push(count);
    let (list, count) = check_vertex_face_lists(mesh);
    report.push(list);
    report.push(count);

    report
}

fn check_domain(mesh: &TetMesh) -> Option<ValidationFailure> {
    (mesh.domain >= mesh.domain_count).then_some(ValidationFailure::DomainOutOfRange {
        domain: mesh.domain,
        domain_count: mesh.domain_count,
    })
}

fn first_mismatch<'a, E: MeshElement + 'a>(
    elements: impl Iterator<Item = &'a E>,
) -> Option<(usize, Index)> {
    elements
        .enumerate()
        .find(|(i, e)| e.idx() != *i as Index)
        .map(|(i, e)| (i, e.idx()))
}

fn check_vertex_indices(mesh: &TetMesh) -> Option<ValidationFailure> {
    first_mismatch(mesh.vertices.iter())
        .map(|(vertex, found)| ValidationFailure::VertexIndex { vertex, found })
}

fn check_face_indices(mesh: &TetMesh) -> Option<ValidationFailure> {
    first_mismatch(mesh.faces.iter())
        .map(|(face, found)| ValidationFailure::FaceIndex { face, found })
}

fn check_tet_indices(mesh: &TetMesh) -> Option<ValidationFailure> {
    first_mismatch(mesh.tets.iter())
        .map(|(tet, found)| ValidationFailure::TetIndex { tet, found })
}

fn check_flip_involution(mesh: &TetMesh) -> Option<ValidationFailure> {
    let face_count = mesh.faces.len();
    mesh.faces
        .iter()
        .enumerate()
        .find(|(i, f)| f.flip >= face_count || mesh.faces[f.flip].flip != *i)
        .map(|(face, _)| ValidationFailure::FlipNotInvolution { face })
}

fn check_flip_orientation(mesh: &TetMesh, tolerance: f64) -> Option<ValidationFailure> {
    let face_count = mesh.faces.len();
    mesh.faces
        .iter()
        .enumerate()
        .filter(|(_, f)| f.flip < face_count)
        .map(|(i, f)| (i, f.normal.dot(&mesh.faces[f.flip].normal)))
        .find(|(_, cosine)| !((cosine + 1.0).abs() <= tolerance))
        .map(|(face, cosine)| ValidationFailure::FlipOrientation { face, cosine })
}

fn check_boundary_colors(mesh: &TetMesh) -> Option<ValidationFailure> {
    mesh.faces
        .iter()
        .enumerate()
        .find(|(_, f)| f.is_boundary() == (f.color() == BAD_INDEX))
        .map(|(face, f)| ValidationFailure::BoundaryColor {
            face,
            boundary: f.is_boundary(),
            color: f.color(),
        })
}

fn check_face_surface(mesh: &TetMesh) -> Option<ValidationFailure> {
    mesh.faces
        .iter()
        .enumerate()
        .find(|(_, f)| !(f.surface > 0.0))
        .map(|(face, f)| ValidationFailure::FaceSurface {
            face,
            surface: f.surface,
        })
}

fn check_tet_volume(mesh: &TetMesh) -> Option<ValidationFailure> {
    mesh.tets
        .iter()
        .enumerate()
        .find(|(_, t)| !(t.volume > 0.0))
        .map(|(tet, t)| ValidationFailure::TetVolume {
            tet,
            volume: t.volume,
        })
}

/// Each face's normal and area must be consistent with the tetrahedron volume:
/// the height from the face to the opposite vertex times the area over 3
/// gives the volume, with a positive sign since face normals point inward.
fn check_tet_face_normals(mesh: &TetMesh, rel_tolerance: f64) -> Option<ValidationFailure> {
    for (tet_idx, tet) in mesh.tets.iter().enumerate() {
        for (local_face, (&face_idx, &opposite)) in
            izip!(&tet.faces, &tet.vertices).enumerate()
        {
            let face = &mesh.faces[face_idx];
            let height = (mesh.vertices[opposite].r - face.center).dot(&face.normal);
            let face_volume = height * face.surface / 3.0;
            if !((face_volume - tet.volume).abs() <= rel_tolerance * tet.volume.abs()) {
                return Some(ValidationFailure::TetFaceNormal {
                    tet: tet_idx,
                    local_face,
                });
            }
        }
    }
    None
}

fn check_vertex_tet_lists(
    mesh: &TetMesh,
) -> (Option<ValidationFailure>, Option<ValidationFailure>) {
    let mut first_wrong = None;
    let mut count = 0;
    for (vertex_idx, vertex) in mesh.vertices.iter().enumerate() {
        for tv in &vertex.tets {
            count += 1;
            let points_back = mesh
                .tets
                .get(tv.tet)
                .and_then(|t| t.vertices.get(tv.local))
                .is_some_and(|&v| v == vertex_idx);
            if !points_back && first_wrong.is_none() {
                first_wrong = Some(ValidationFailure::VertexTetList {
                    vertex: vertex_idx,
                    tet: tv.tet,
                    local: tv.local,
                });
            }
        }
    }

    let expected = 4 * mesh.tets.len();
    let count_failure = (count != expected).then_some(ValidationFailure::VertexTetCount {
        found: count,
        expected,
    });
    (first_wrong, count_failure)
}

fn check_vertex_face_lists(
    mesh: &TetMesh,
) -> (Option<ValidationFailure>, Option<ValidationFailure>) {
    let mut first_wrong = None;
    let mut count = 0;
    for (vertex_idx, vertex) in mesh.vertices.iter().enumerate() {
        for fv in &vertex.faces {
            count += 1;
            let points_back = mesh
                .faces
                .get(fv.face)
                .and_then(|f| f.vertices.get(fv.local))
                .is_some_and(|&v| v == vertex_idx);
            if !points_back && first_wrong.is_none() {
                first_wrong = Some(ValidationFailure::VertexFaceList {
                    vertex: vertex_idx,
                    face: fv.face,
                    local: fv.local,
                });
            }
        }
    }

    let expected = 3 * mesh.faces.len();
    let count_failure = (count != expected).then_some(ValidationFailure::VertexFaceCount {
        found: count,
        expected,
    });
    (first_wrong, count_failure)
}
