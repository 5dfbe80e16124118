//! `tetmesh` is a library for assembling, decomposing and storing
//! indexed tetrahedral meshes.
//!
//! A [`TetMesh`] is assembled from raw geometry
//! (vertex coordinates, tetrahedra and boundary triangles, see [`SimpleMesh`]),
//! after which every face knows the face on the other side of the same triangle
//! and every vertex knows the tetrahedra and faces touching it.
//! Meshes can be loaded from [`gmsh`] files,
//! split into domains with [`graph`] and [`decompose`],
//! and written to disk with [`serialize`].
//! The structural invariants of any mesh can be verified with [`TetMesh::check`].
//!
//! ```
//! # use tetmesh::{graph, decompose, RawMesh, TetMesh};
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = RawMesh::from_tets(
//!     vec![
//!         [0.0, 0.0, 0.0],
//!         [1.0, 0.0, 0.0],
//!         [0.0, 1.0, 0.0],
//!         [0.0, 0.0, 1.0],
//!         [1.0, 1.0, 1.0],
//!     ],
//!     vec![[1, 2, 3, 0], [2, 1, 3, 4]],
//!     vec![0, 0],
//! );
//! let mesh = TetMesh::from_simple_mesh(&raw)?;
//! assert!(mesh.check().is_ok());
//!
//! let partition = graph::Partition::new(&mesh, &graph::RoundRobin, 2)?;
//! let domains = decompose::decompose(&mesh, &partition);
//! assert_eq!(domains[0].interface_vertex_count(), 3);
//! # Ok(())
//! # }
//! # run().expect("example failed");
//! ```

#![warn(missing_docs)]

pub mod element;
#[doc(inline)]
pub use element::{Element, Index, MeshElement, BAD_INDEX};

pub mod simple_mesh;
#[doc(inline)]
pub use simple_mesh::{RawMesh, SimpleMesh};

pub mod mesh;
#[doc(inline)]
pub use mesh::{Alias, Face, MeshBuilder, MeshError, TetMesh, Tetrahedron, Vertex};

pub mod graph;

pub mod decompose;

pub mod serialize;

pub mod gmsh;

// nalgebra re-exports of common types for convenience

pub use nalgebra as na;
/// Type alias for a 3D `nalgebra` vector.
pub type Vec3 = na::Vector3<f64>;
