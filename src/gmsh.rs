//! Utilities for loading meshes generated with [`gmsh`](https://www.gmsh.info/).
//!
//! Only version 4.1 of the MSH format is supported,
//! as per the [`mshio`] library.

use crate::element::{Index, BAD_INDEX};
use crate::mesh::{MeshError, TetMesh};
use crate::simple_mesh::{derive_boundary_faces, RawMesh};

use std::collections::HashMap;

/// Error in loading a mesh from a Gmsh .msh file.
#[derive(thiserror::Error, Debug)]
pub enum GmshError {
    /// Error parsing the .msh file.
    ///
    /// (Implementation note: parser error converted to string
    /// to avoid lifetime issues with the byte slices it contains)
    #[error("Parsing the .msh data failed: {0}")]
    ParseError(String),
    /// The given .msh file contains no nodes.
    #[error("Invalid .msh data: no nodes")]
    MissingNodes,
    /// The given .msh file contains no elements of the supported type.
    #[error("Invalid .msh data: no elements of the correct type")]
    MissingElements,
    /// An element refers to a node tag that doesn't exist.
    #[error("Invalid .msh data: node tag {0} out of range")]
    InvalidNodeTag(u64),
    /// The elements in the file don't form a valid mesh.
    #[error("Invalid mesh in .msh data")]
    Mesh(#[from] MeshError),
}

/// Load the raw geometry of a tetrahedral mesh from a `.msh` file.
///
/// First-order tetrahedron elements in the file are interpreted as the tetrahedra of the mesh.
/// These must be of type `Tet4` (see [`ElementType`][mshio::ElementType]).
/// Gmsh orders tetrahedron nodes with the opposite winding to this crate,
/// so the first two nodes of each tetrahedron are swapped.
///
/// Each tetrahedron gets the first physical tag of the volume it belongs to as its material,
/// or the volume's entity tag if it has no physical group.
/// Boundary faces are derived from the tetrahedra
/// and take their material the same way from a matching `Tri3` element if there is one.
/// Boundary faces without a matching triangle get [`BAD_INDEX`].
pub fn load_tetmesh(bytes: &[u8]) -> Result<RawMesh, GmshError> {
    let msh = mshio::parse_msh_bytes(bytes).map_err(|e| GmshError::ParseError(format!("{}", e)))?;
    let nodes = msh.data.nodes.ok_or(GmshError::MissingNodes)?;
    let elements = msh.data.elements.ok_or(GmshError::MissingElements)?;
    let entities = msh.data.entities.as_ref();

    let vertices: Vec<[f64; 3]> = nodes
        .node_blocks
        .iter()
        .flat_map(|block| block.nodes.iter())
        .map(|node| [node.x, node.y, node.z])
        .collect();
    if vertices.is_empty() {
        return Err(GmshError::MissingNodes);
    }

    // physical group of the entity if it has one, else the entity itself
    let volume_material = |tag: i32| -> Index {
        entities
            .and_then(|e| e.volumes.iter().find(|v| v.tag == tag))
            .and_then(|v| v.physical_tags.first().copied())
            .map_or(Index::from(tag), Index::from)
    };
    let surface_material = |tag: i32| -> Index {
        entities
            .and_then(|e| e.surfaces.iter().find(|s| s.tag == tag))
            .and_then(|s| s.physical_tags.first().copied())
            .map_or(Index::from(tag), Index::from)
    };

    let mut tets = Vec::new();
    let mut tet_materials = Vec::new();
    let mut triangle_materials: HashMap<[usize; 3], Index> = HashMap::new();
    for block in &elements.element_blocks {
        match block.element_type {
            mshio::ElementType::Tet4 => {
                let material = volume_material(block.entity_tag);
                for el in &block.elements {
                    let mut tet: [usize; 4] = node_indices(&el.nodes, vertices.len())?;
                    tet.swap(0, 1);
                    tets.push(tet);
                    tet_materials.push(material);
                }
            }
            mshio::ElementType::Tri3 => {
                let material = surface_material(block.entity_tag);
                for el in &block.elements {
                    let mut key: [usize; 3] = node_indices(&el.nodes, vertices.len())?;
                    key.sort_unstable();
                    triangle_materials.insert(key, material);
                }
            }
            _ => {}
        }
    }
    if tets.is_empty() {
        return Err(GmshError::MissingElements);
    }

    let boundary_faces = derive_boundary_faces(&tets);
    let boundary_materials = boundary_faces
        .iter()
        .map(|face| {
            let mut key = *face;
            key.sort_unstable();
            triangle_materials.get(&key).copied().unwrap_or(BAD_INDEX)
        })
        .collect();

    log::debug!(
        "loaded {} nodes, {} tetrahedra and {} tagged triangles from .msh data",
        vertices.len(),
        tets.len(),
        triangle_materials.len(),
    );

    Ok(RawMesh::new(
        vertices,
        tets,
        tet_materials,
        boundary_faces,
        boundary_materials,
    ))
}

/// Load a tetrahedral mesh from a `.msh` file and assemble it.
///
/// See [`load_tetmesh`] for how the file is interpreted.
pub fn load_mesh(bytes: &[u8]) -> Result<TetMesh, GmshError> {
    let raw = load_tetmesh(bytes)?;
    Ok(TetMesh::from_simple_mesh(&raw)?)
}

/// Convert the node tags of an element into vertex indices.
fn node_indices<const N: usize>(tags: &[u64], node_count: usize) -> Result<[usize; N], GmshError> {
    if tags.len() != N {
        return Err(GmshError::ParseError(format!(
            "expected {N} nodes per element, found {}",
            tags.len()
        )));
    }
    let mut indices = [0; N];
    for (index, &tag) in indices.iter_mut().zip(tags) {
        // gmsh tags start at 1, subtract 1 to get the index in the array.
        // (this assumes tags are sequential and in order,
        // which gmsh does unless tags are set manually)
        *index = usize::try_from(tag)
            .ok()
            .and_then(|t| t.checked_sub(1))
            .filter(|&i| i < node_count)
            .ok_or(GmshError::InvalidNodeTag(tag))?;
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MeshElement;

    const TWO_TETS: &[u8] = include_bytes!("gmsh/two_tets.msh");

    #[test]
    fn load_two_tets() {
        let raw = load_tetmesh(TWO_TETS).expect("valid .msh data");

        assert_eq!(raw.vertices.len(), 5);
        assert_eq!(raw.vertices[4], [1.0, 1.0, 1.0]);
        // winding converted, same as the hand-built fixture
        assert_eq!(raw.tets, vec![[1, 2, 3, 0], [2, 1, 3, 4]]);
        // physical groups of the two volumes
        assert_eq!(raw.tet_materials, vec![7, 8]);

        assert_eq!(raw.boundary_faces.len(), 6);
        // only the triangle on the x = 0 plane is tagged
        assert_eq!(raw.boundary_faces[0], [2, 0, 3]);
        assert_eq!(raw.boundary_materials[0], 3);
        assert!(raw.boundary_materials[1..].iter().all(|&m| m == BAD_INDEX));
    }

    #[test]
    fn assembled_mesh_matches_fixture() {
        let mesh = load_mesh(TWO_TETS).expect("valid .msh data");
        let fixture = crate::mesh::two_tet_mesh();

        assert!(mesh.check().is_ok());
        assert_eq!(mesh.faces().len(), fixture.faces().len());
        for (a, b) in mesh.tets().iter().zip(fixture.tets()) {
            assert_eq!(a.vertices(), b.vertices());
            approx::assert_relative_eq!(a.volume(), b.volume());
        }
        assert_eq!(mesh.tet(1).color(), 8);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = load_tetmesh(b"not a mesh").expect_err("invalid data");
        assert!(matches!(err, GmshError::ParseError(_)), "{err}");
    }

    #[test]
    fn node_tags_are_checked() {
        assert_eq!(node_indices::<3>(&[1, 2, 3], 3).ok(), Some([0, 1, 2]));
        assert!(matches!(
            node_indices::<3>(&[0, 1, 2], 3),
            Err(GmshError::InvalidNodeTag(0))
        ));
        assert!(matches!(
            node_indices::<3>(&[1, 2, 4], 3),
            Err(GmshError::InvalidNodeTag(4))
        ));
        assert!(matches!(
            node_indices::<4>(&[1, 2, 3], 3),
            Err(GmshError::ParseError(_))
        ));
    }
}
