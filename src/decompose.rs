//! Splitting a mesh into per-domain sub-meshes.
//!
//! Each domain mesh has its own dense numbering of vertices, faces and tetrahedra.
//! Where a tetrahedron's neighbor belongs to another domain,
//! the shared triangle becomes a boundary face of the domain mesh,
//! and vertices present in several domains carry [`Alias`]es
//! naming their copies in the other domains.

use crate::graph::Partition;
use crate::mesh::{Alias, MeshBuilder, TetMesh};
use crate::MeshElement;

/// Extract the sub-mesh of every domain of a partition.
pub fn decompose(mesh: &TetMesh, partition: &Partition) -> Vec<TetMesh> {
    (0..partition.domain_count())
        .map(|domain| extract_domain(mesh, partition, domain))
        .collect()
}

/// Extract the sub-mesh of a single domain.
///
/// The domain mesh contains the tetrahedra colored `domain` in the partition
/// and the vertices they touch, numbered in ascending global order.
/// Its boundary faces are the global boundary faces of those tetrahedra
/// followed by interface faces where a neighbor lies in another domain,
/// both listed in tetrahedron-major order.
/// Interface faces take the vertex order and color of the global face they replace.
///
/// Panics if `domain` is not a domain of the partition
/// or the partition was built for a different mesh.
pub fn extract_domain(mesh: &TetMesh, partition: &Partition, domain: usize) -> TetMesh {
    assert!(
        domain < partition.domain_count(),
        "domain {domain} out of range (partition has {} domains)",
        partition.domain_count()
    );
    assert_eq!(
        partition.tet_colors().len(),
        mesh.tets().len(),
        "partition doesn't match the mesh"
    );

    let vertex_map = partition.domain_vertices(domain);
    let local_tets = partition.domain_tets(domain);
    let to_local = |global: usize| -> usize {
        *vertex_map
            .get(&global)
            .expect("Vertex missing from domain map. This is a bug in tetmesh")
    };

    let mut builder = MeshBuilder::with_capacity(vertex_map.len(), local_tets.len(), 0);

    // vertices in local order, since locals follow global order
    for (&global, &local) in vertex_map {
        let vertex = mesh.vertex(global);
        let added = builder.add_vertex(*vertex.r(), vertex.color());
        debug_assert_eq!(added, local);
        for &copy in partition.vertex_copies(global) {
            if copy.domain != domain {
                builder.add_alias(local, copy);
            }
        }
    }

    for &global_tet in local_tets {
        let tet = mesh.tet(global_tet);
        builder
            .add_tet((*tet.vertices()).map(to_local), tet.color())
            .expect("Error in domain tetrahedron construction. This is a bug in tetmesh");
    }

    // cut faces first, so every boundary face exists before any flip is wired
    let mut interface_count = 0;
    for (local_tet, &global_tet) in local_tets.iter().enumerate() {
        for (local_face, &global_face) in mesh.tet(global_tet).faces().iter().enumerate() {
            let flip = mesh.flip_of(mesh.face(global_face));
            let stays_local = flip
                .tet()
                .is_some_and(|t| partition.tet_domain(t) == domain);
            if stays_local {
                continue;
            }
            if !flip.is_boundary() {
                interface_count += 1;
            }

            let boundary = builder
                .add_boundary_face((*flip.vertices()).map(to_local), flip.color())
                .expect("Error in domain boundary construction. This is a bug in tetmesh");
            builder.link_flips(4 * local_tet + local_face, boundary);
        }
    }

    for (local_tet, &global_tet) in local_tets.iter().enumerate() {
        for (local_face, &global_face) in mesh.tet(global_tet).faces().iter().enumerate() {
            let Some(owner) = mesh.flip_of(mesh.face(global_face)).owner() else {
                continue;
            };
            if partition.tet_domain(owner.tet) != domain {
                continue;
            }
            let flip = 4 * partition.local_tet(owner.tet) + owner.local_face;
            builder.set_flip(4 * local_tet + local_face, flip);
        }
    }

    let domain_mesh = builder
        .build(domain, partition.domain_count())
        .expect("Error in domain flip resolution. This is a bug in tetmesh");

    log::info!(
        "domain {}/{}: {} vertices ({} shared), {} tetrahedra, {} boundary faces ({} on interfaces)",
        domain,
        partition.domain_count(),
        domain_mesh.vertices().len(),
        domain_mesh.interface_vertex_count(),
        domain_mesh.tets().len(),
        domain_mesh.boundary_face_count(),
        interface_count,
    );
    domain_mesh
}

/// Find the copy of a domain vertex in another domain, if it has one.
pub fn alias_in(mesh: &TetMesh, vertex: usize, domain: usize) -> Option<Alias> {
    mesh.vertex(vertex)
        .aliases()
        .iter()
        .find(|a| a.domain == domain)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Index, BAD_INDEX};
    use crate::graph::{Contiguous, Partition, RoundRobin};
    use crate::mesh::{cube_mesh, two_tet_mesh};
    use crate::RawMesh;

    /// Cube mesh with every global boundary face colored,
    /// so that uncolored boundary faces in a domain are cuts.
    fn colored_cube(n: usize) -> TetMesh {
        let mut raw = RawMesh::from(&cube_mesh(n));
        raw.boundary_materials.fill(5);
        TetMesh::from_simple_mesh(&raw).expect("valid mesh")
    }

    fn interface_faces(mesh: &TetMesh) -> Vec<usize> {
        mesh.boundary_face_range()
            .filter(|&f| mesh.face(f).color() == BAD_INDEX)
            .collect()
    }

    #[test]
    fn two_tets_in_two_domains() {
        let mesh = two_tet_mesh();
        let partition = Partition::from_tet_colors(&mesh, vec![0, 1], 2).expect("valid coloring");
        let domains = decompose(&mesh, &partition);
        assert_eq!(domains.len(), 2);

        for (d, domain) in domains.iter().enumerate() {
            let other = 1 - d;
            assert_eq!(domain.domain(), d);
            assert_eq!(domain.domain_count(), 2);
            assert_eq!(domain.vertices().len(), 4);
            assert_eq!(domain.tets().len(), 1);
            // three original boundary faces and the cut
            assert_eq!(domain.boundary_face_count(), 4);
            assert_eq!(interface_faces(domain).len(), 1);

            assert_eq!(domain.interface_vertex_count(), 3);
            for vertex in domain.vertices() {
                assert!(vertex.aliases().len() <= 1);
                for alias in vertex.aliases() {
                    assert_eq!(alias.domain, other);
                    let copy = domains[other].vertex(alias.index);
                    assert_eq!(copy.r(), vertex.r());
                }
            }

            let report = domain.check();
            assert!(report.is_ok(), "domain {d}: {report}");
        }

        // shared global vertex 1 is local 1 in domain 0 and local 0 in domain 1
        assert_eq!(
            domains[0].vertex(1).aliases(),
            &[Alias {
                domain: 1,
                index: 0
            }]
        );
        assert_eq!(alias_in(&domains[1], 0, 0).map(|a| a.index), Some(1));
        assert!(domains[0].vertex(0).aliases().is_empty());
        assert_eq!(alias_in(&domains[0], 0, 1), None);

        // the cut face keeps the global flip's vertices and sits on the shared triangle
        let cut = interface_faces(&domains[0])[0];
        let mut cut_verts = *domains[0].face(cut).vertices();
        cut_verts.sort_unstable();
        assert_eq!(cut_verts, [1, 2, 3]);
        assert_eq!(domains[0].flip_of(domains[0].face(cut)).tet(), Some(0));

        // materials survive
        assert_eq!(domains[0].tet(0).color(), 1);
        assert_eq!(domains[1].tet(0).color(), 2);
    }

    #[test]
    fn single_domain_is_identity() {
        let mesh = colored_cube(2);
        let partition =
            Partition::from_tet_colors(&mesh, vec![0; mesh.tets().len()], 1).expect("valid coloring");
        let domain = extract_domain(&mesh, &partition, 0);

        assert_eq!(domain.vertices().len(), mesh.vertices().len());
        assert_eq!(domain.tets().len(), mesh.tets().len());
        assert_eq!(domain.faces().len(), mesh.faces().len());
        assert_eq!(domain.boundary_face_count(), mesh.boundary_face_count());
        assert_eq!(domain.interface_vertex_count(), 0);
        assert!(interface_faces(&domain).is_empty());

        for (a, b) in domain.tets().iter().zip(mesh.tets()) {
            assert_eq!(a.vertices(), b.vertices());
        }
        for (a, b) in domain.vertices().iter().zip(mesh.vertices()) {
            assert_eq!(a.r(), b.r());
        }
        // tet-owned faces and their interior flips are unchanged
        for f in 0..4 * mesh.tets().len() {
            assert_eq!(domain.face(f).vertices(), mesh.face(f).vertices());
            if !mesh.flip_of(mesh.face(f)).is_boundary() {
                assert_eq!(domain.face(f).flip(), mesh.face(f).flip());
            }
        }
        assert!(domain.check().is_ok());
    }

    #[test]
    fn decomposition_is_complete_and_consistent() {
        let mesh = colored_cube(2);
        for (partition, name) in [
            (Partition::new(&mesh, &Contiguous, 4), "contiguous"),
            (Partition::new(&mesh, &RoundRobin, 3), "round robin"),
        ] {
            let partition = partition.expect("valid partition");
            let domains = decompose(&mesh, &partition);

            let tet_total: usize = domains.iter().map(|d| d.tets().len()).sum();
            assert_eq!(tet_total, mesh.tets().len(), "{name}");
            let volume: f64 = domains.iter().flat_map(|d| d.tets()).map(|t| t.volume()).sum();
            approx::assert_relative_eq!(volume, 8.0, epsilon = 1e-10);

            for (a, domain) in domains.iter().enumerate() {
                let report = domain.check();
                assert!(report.is_ok(), "{name} domain {a}: {report}");

                for (v, vertex) in domain.vertices().iter().enumerate() {
                    for alias in vertex.aliases() {
                        assert_ne!(alias.domain, a);
                        let back = alias_in(&domains[alias.domain], alias.index, a);
                        assert_eq!(back, Some(Alias { domain: a, index: v }), "{name}");
                    }
                }

                // every vertex on a cut face is shared
                for f in interface_faces(domain) {
                    for &v in domain.face(f).vertices() {
                        assert!(!domain.vertex(v).aliases().is_empty(), "{name}");
                    }
                }
            }

            // every global tet ends up in exactly one domain
            let mut seen = vec![0; mesh.tets().len()];
            for d in 0..partition.domain_count() {
                for &t in partition.domain_tets(d) {
                    seen[t] += 1;
                }
            }
            assert!(seen.iter().all(|&n| n == 1));
        }
    }

    #[test]
    fn boundary_colors_are_kept() {
        let mesh = two_tet_mesh();
        let partition = Partition::from_tet_colors(&mesh, vec![1, 0], 2).expect("valid coloring");
        let domain = extract_domain(&mesh, &partition, 1);

        // the three original boundary faces of tet 0 carry their materials 10 + i
        let mut colors: Vec<Index> = domain
            .boundary_face_range()
            .map(|f| domain.face(f).color())
            .filter(|&c| c != BAD_INDEX)
            .collect();
        colors.sort_unstable();
        let mut expected: Vec<Index> = mesh
            .tet(0)
            .faces()
            .iter()
            .map(|&f| mesh.flip_of(mesh.face(f)).color())
            .filter(|&c| c != BAD_INDEX)
            .collect();
        expected.sort_unstable();
        assert_eq!(colors, expected);
        assert_eq!(colors.len(), 3);
    }

    #[test]
    #[should_panic]
    fn out_of_range_domain_panics() {
        let mesh = two_tet_mesh();
        let partition = Partition::from_tet_colors(&mesh, vec![0, 1], 2).expect("valid coloring");
        extract_domain(&mesh, &partition, 2);
    }
}
