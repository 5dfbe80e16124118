//! Adjacency graphs of a mesh in compressed sparse row (CSR) form,
//! and partitioning of their nodes into domains.
//!
//! The partitioning heuristic itself is pluggable through the [`Partitioner`] trait.
//! Two trivial strategies are provided for testing and small meshes;
//! for balanced partitions of real meshes, wrap a multilevel k-way partitioner.

use nalgebra_sparse as nas;

use crate::element::Index;
use crate::mesh::{Alias, TetMesh};

use itertools::Itertools;
use std::collections::BTreeMap;

/// An undirected graph stored as a CSR sparsity pattern.
///
/// Row `i` lists the neighbors of node `i` in ascending order,
/// without duplicates or self-loops.
/// Every edge appears in both endpoint rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrGraph {
    pattern: nas::pattern::SparsityPattern,
}

impl CsrGraph {
    /// Compact per-node neighbor lists into CSR form.
    ///
    /// Neighbor lists may contain duplicates and self-loops,
    /// which are dropped.
    /// Panics if a neighbor index is not a valid node.
    pub fn from_neighbor_lists(lists: Vec<Vec<usize>>) -> Self {
        let node_count = lists.len();
        let mut offsets = Vec::with_capacity(node_count + 1);
        offsets.push(0);
        let mut indices = Vec::new();
        for (node, list) in lists.into_iter().enumerate() {
            indices.extend(list.into_iter().filter(|&n| n != node).sorted().dedup());
            offsets.push(indices.len());
        }

        let pattern = nas::pattern::SparsityPattern::try_from_offsets_and_indices(
            node_count, node_count, offsets, indices,
        )
        .expect("Error in graph construction. This is a bug in tetmesh");
        Self { pattern }
    }

    /// Number of nodes in the graph.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.pattern.major_dim()
    }

    /// Number of entries in the neighbor array,
    /// i.e. twice the number of undirected edges.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.pattern.nnz()
    }

    /// Row offset array of length `node_count + 1`.
    #[inline]
    pub fn row_offsets(&self) -> &[usize] {
        self.pattern.major_offsets()
    }

    /// Flat neighbor array indexed by [`row_offsets`][Self::row_offsets].
    #[inline]
    pub fn neighbor_indices(&self) -> &[usize] {
        self.pattern.minor_indices()
    }

    /// Neighbors of a single node.
    #[inline]
    pub fn neighbors(&self, node: usize) -> &[usize] {
        self.pattern.lane(node)
    }

    /// The underlying sparsity pattern.
    #[inline]
    pub fn pattern(&self) -> &nas::pattern::SparsityPattern {
        &self.pattern
    }
}

/// Graph connecting vertices that share a tetrahedron.
pub fn vertex_graph(mesh: &TetMesh) -> CsrGraph {
    let mut lists = vec![Vec::new(); mesh.vertices().len()];
    for tet in mesh.tets() {
        for &v in tet.vertices() {
            lists[v].extend(tet.vertices().iter().filter(|&&other| other != v));
        }
    }
    CsrGraph::from_neighbor_lists(lists)
}

/// Graph connecting tetrahedra that share a face.
pub fn tet_graph(mesh: &TetMesh) -> CsrGraph {
    let lists = mesh
        .tets()
        .iter()
        .map(|tet| {
            tet.faces()
                .iter()
                .filter_map(|&f| mesh.flip_of(mesh.face(f)).tet())
                .collect()
        })
        .collect();
    CsrGraph::from_neighbor_lists(lists)
}

//
// partitioning
//

/// Error in partitioning a graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Partitioning into zero parts was requested.
    #[error("Cannot partition into zero parts")]
    NoParts,
    /// The partitioner returned the wrong number of colors.
    #[error("Expected one color per node ({expected}), got {found}")]
    WrongColorCount {
        /// Number of nodes in the graph.
        expected: usize,
        /// Number of colors returned.
        found: usize,
    },
    /// The partitioner returned a color outside `0..num_parts`.
    #[error("Node {node} has color {color}, not in 0..{num_parts}")]
    ColorOutOfRange {
        /// The node with the bad color.
        node: usize,
        /// Its color.
        color: usize,
        /// Requested number of parts.
        num_parts: usize,
    },
    /// The partitioning heuristic itself failed.
    #[error("Partitioning failed: {0}")]
    Failed(String),
}

/// Strategy assigning each node of a graph to one of `num_parts` parts.
///
/// Implementations return one color in `0..num_parts` per node.
/// Closures with the same signature as [`partition`][Self::partition]
/// implement this trait too.
pub trait Partitioner {
    /// Color the nodes of `graph` with `num_parts` colors.
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> Result<Vec<usize>, PartitionError>;
}

impl<F> Partitioner for F
where
    F: Fn(&CsrGraph, usize) -> Result<Vec<usize>, PartitionError>,
{
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> Result<Vec<usize>, PartitionError> {
        self(graph, num_parts)
    }
}

/// Assigns node `i` to part `i % num_parts`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobin;

impl Partitioner for RoundRobin {
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> Result<Vec<usize>, PartitionError> {
        if num_parts == 0 {
            return Err(PartitionError::NoParts);
        }
        Ok((0..graph.node_count()).map(|i| i % num_parts).collect())
    }
}

/// Splits the node index range into `num_parts` blocks of (nearly) equal size.
///
/// Since mesh generators tend to number neighboring elements close together,
/// this gives connected-ish parts with far fewer cuts than [`RoundRobin`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Contiguous;

impl Partitioner for Contiguous {
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> Result<Vec<usize>, PartitionError> {
        if num_parts == 0 {
            return Err(PartitionError::NoParts);
        }
        let n = graph.node_count();
        Ok((0..n).map(|i| i * num_parts / n).collect())
    }
}

/// Run a partitioner on a graph and check its output
/// has one color in `0..num_parts` per node.
pub fn color_graph<P>(
    partitioner: &P,
    graph: &CsrGraph,
    num_parts: usize,
) -> Result<Vec<usize>, PartitionError>
where
    P: Partitioner + ?Sized,
{
    if num_parts == 0 {
        return Err(PartitionError::NoParts);
    }
    let colors = partitioner.partition(graph, num_parts)?;
    check_colors(&colors, graph.node_count(), num_parts)?;
    Ok(colors)
}

fn check_colors(colors: &[usize], node_count: usize, num_parts: usize) -> Result<(), PartitionError> {
    if num_parts == 0 {
        return Err(PartitionError::NoParts);
    }
    if colors.len() != node_count {
        return Err(PartitionError::WrongColorCount {
            expected: node_count,
            found: colors.len(),
        });
    }
    match colors.iter().find_position(|&&c| c >= num_parts) {
        Some((node, &color)) => Err(PartitionError::ColorOutOfRange {
            node,
            color,
            num_parts,
        }),
        None => Ok(()),
    }
}

/// Convert a partition coloring into mesh element colors
/// for [`TetMesh::recolor_tets`] or [`TetMesh::recolor_vertices`].
pub fn colors_as_index(colors: &[usize]) -> Vec<Index> {
    colors.iter().map(|&c| c as Index).collect()
}

/// An assignment of tetrahedra to domains,
/// with the per-domain local numbering of vertices and tetrahedra it implies.
///
/// Local indices within a domain follow ascending global index order.
#[derive(Clone, Debug)]
pub struct Partition {
    domain_count: usize,
    tet_colors: Vec<usize>,
    // local index of each global tet in its own domain
    tet_local: Vec<usize>,
    domain_tets: Vec<Vec<usize>>,
    // global -> local vertex map of each domain
    domain_vertices: Vec<BTreeMap<usize, usize>>,
    // every (domain, local index) copy of each global vertex
    vertex_copies: Vec<Vec<Alias>>,
}

impl Partition {
    /// Partition the tetrahedron graph of a mesh with the given strategy.
    pub fn new<P>(
        mesh: &TetMesh,
        partitioner: &P,
        domain_count: usize,
    ) -> Result<Self, PartitionError>
    where
        P: Partitioner + ?Sized,
    {
        let colors = color_graph(partitioner, &tet_graph(mesh), domain_count)?;
        Self::from_tet_colors(mesh, colors, domain_count)
    }

    /// Build the domain maps from an existing tetrahedron coloring.
    pub fn from_tet_colors(
        mesh: &TetMesh,
        tet_colors: Vec<usize>,
        domain_count: usize,
    ) -> Result<Self, PartitionError> {
        check_colors(&tet_colors, mesh.tets().len(), domain_count)?;

        let mut domain_tets = vec![Vec::new(); domain_count];
        let mut tet_local = Vec::with_capacity(tet_colors.len());
        for (tet, &color) in tet_colors.iter().enumerate() {
            tet_local.push(domain_tets[color].len());
            domain_tets[color].push(tet);
        }

        let mut domain_vertices: Vec<BTreeMap<usize, usize>> = vec![BTreeMap::new(); domain_count];
        for (tet, &color) in mesh.tets().iter().zip(&tet_colors) {
            for &v in tet.vertices() {
                domain_vertices[color].insert(v, 0);
            }
        }

        let mut vertex_copies = vec![Vec::new(); mesh.vertices().len()];
        for (domain, map) in domain_vertices.iter_mut().enumerate() {
            for (local, (&global, local_slot)) in map.iter_mut().enumerate() {
                *local_slot = local;
                vertex_copies[global].push(Alias {
                    domain,
                    index: local,
                });
            }
        }

        log::debug!(
            "partitioned {} tetrahedra into {} domains of sizes {:?}",
            tet_colors.len(),
            domain_count,
            domain_tets.iter().map(Vec::len).collect_vec(),
        );

        Ok(Self {
            domain_count,
            tet_colors,
            tet_local,
            domain_tets,
            domain_vertices,
            vertex_copies,
        })
    }

    /// Number of domains.
    #[inline]
    pub fn domain_count(&self) -> usize {
        self.domain_count
    }

    /// Domain of every global tetrahedron.
    #[inline]
    pub fn tet_colors(&self) -> &[usize] {
        &self.tet_colors
    }

    /// Domain of a global tetrahedron.
    #[inline]
    pub fn tet_domain(&self, tet: usize) -> usize {
        self.tet_colors[tet]
    }

    /// Index of a global tetrahedron within its domain.
    #[inline]
    pub fn local_tet(&self, tet: usize) -> usize {
        self.tet_local[tet]
    }

    /// Global tetrahedra of a domain in local order.
    #[inline]
    pub fn domain_tets(&self, domain: usize) -> &[usize] {
        &self.domain_tets[domain]
    }

    /// Map from global to local vertex index of a domain.
    #[inline]
    pub fn domain_vertices(&self, domain: usize) -> &BTreeMap<usize, usize> {
        &self.domain_vertices[domain]
    }

    /// Every domain containing a global vertex, with the vertex's local index there.
    /// Sorted by domain.
    #[inline]
    pub fn vertex_copies(&self, vertex: usize) -> &[Alias] {
        &self.vertex_copies[vertex]
    }

    /// Color of each global vertex, taken as the lowest domain containing it
    /// (or [`BAD_INDEX`][crate::BAD_INDEX] for vertices in no tetrahedron).
    pub fn vertex_colors(&self) -> Vec<Index> {
        self.vertex_copies
            .iter()
            .map(|copies| copies.first().map_or(crate::BAD_INDEX, |a| a.domain as Index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{cube_mesh, two_tet_mesh};
    use crate::MeshElement;

    fn assert_symmetric(graph: &CsrGraph) {
        for node in 0..graph.node_count() {
            for &n in graph.neighbors(node) {
                assert_ne!(n, node, "self-loop at {node}");
                assert!(graph.neighbors(n).contains(&node), "edge {node}-{n} is one-sided");
            }
        }
    }

    #[test]
    fn vertex_graph_of_two_tets() {
        let mesh = two_tet_mesh();
        let graph = vertex_graph(&mesh);

        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.row_offsets(), &[0, 3, 7, 11, 15, 18]);
        assert_eq!(graph.neighbors(0), &[1, 2, 3]);
        assert_eq!(graph.neighbors(1), &[0, 2, 3, 4]);
        assert_eq!(graph.neighbors(4), &[1, 2, 3]);
        assert_eq!(graph.entry_count(), 18);
        assert_eq!(graph.neighbor_indices().len(), 18);
        assert_symmetric(&graph);
    }

    #[test]
    fn tet_graph_follows_shared_faces() {
        let mesh = two_tet_mesh();
        let graph = tet_graph(&mesh);
        assert_eq!(graph.row_offsets(), &[0, 1, 2]);
        assert_eq!(graph.neighbor_indices(), &[1, 0]);

        // in a single cube, each tet shares the two faces along the diagonal
        let mesh = cube_mesh(1);
        let graph = tet_graph(&mesh);
        assert_eq!(graph.node_count(), 6);
        for tet in 0..6 {
            assert_eq!(graph.neighbors(tet).len(), 2);
        }
        assert_symmetric(&graph);

        let mesh = cube_mesh(2);
        let graph = tet_graph(&mesh);
        // interior faces are half of the non-boundary tet faces, counted from both sides
        let interior_faces = 4 * mesh.tets().len() - mesh.boundary_face_count();
        assert_eq!(graph.entry_count(), interior_faces);
        assert_symmetric(&graph);
    }

    #[test]
    fn neighbor_lists_are_compacted() {
        let graph = CsrGraph::from_neighbor_lists(vec![vec![2, 1, 1, 0], vec![], vec![0, 0]]);
        assert_eq!(graph.row_offsets(), &[0, 2, 2, 3]);
        assert_eq!(graph.neighbor_indices(), &[1, 2, 0]);
    }

    #[test]
    fn reference_partitioners() {
        let graph = CsrGraph::from_neighbor_lists(vec![Vec::new(); 5]);
        assert_eq!(RoundRobin.partition(&graph, 2), Ok(vec![0, 1, 0, 1, 0]));
        assert_eq!(Contiguous.partition(&graph, 2), Ok(vec![0, 0, 0, 1, 1]));
        assert_eq!(Contiguous.partition(&graph, 5), Ok(vec![0, 1, 2, 3, 4]));
        assert_eq!(RoundRobin.partition(&graph, 0), Err(PartitionError::NoParts));
        assert_eq!(Contiguous.partition(&graph, 0), Err(PartitionError::NoParts));
    }

    #[test]
    fn bad_partitioner_output_is_rejected() {
        let graph = CsrGraph::from_neighbor_lists(vec![Vec::new(); 3]);

        let too_short =
            |_: &CsrGraph, _: usize| -> Result<Vec<usize>, PartitionError> { Ok(vec![0, 0]) };
        assert_eq!(
            color_graph(&too_short, &graph, 2),
            Err(PartitionError::WrongColorCount {
                expected: 3,
                found: 2
            })
        );

        let out_of_range =
            |_: &CsrGraph, _: usize| -> Result<Vec<usize>, PartitionError> { Ok(vec![0, 1, 2]) };
        assert_eq!(
            color_graph(&out_of_range, &graph, 2),
            Err(PartitionError::ColorOutOfRange {
                node: 2,
                color: 2,
                num_parts: 2
            })
        );

        let failing = |_: &CsrGraph, _: usize| -> Result<Vec<usize>, PartitionError> {
            Err(PartitionError::Failed("no luck".into()))
        };
        assert!(matches!(
            color_graph(&failing, &graph, 2),
            Err(PartitionError::Failed(_))
        ));
    }

    #[test]
    fn partition_maps_of_two_tets() {
        let mesh = two_tet_mesh();
        let partition = Partition::from_tet_colors(&mesh, vec![0, 1], 2).expect("valid coloring");

        assert_eq!(partition.domain_tets(0), &[0]);
        assert_eq!(partition.domain_tets(1), &[1]);
        assert_eq!(partition.local_tet(1), 0);

        itertools::assert_equal(
            partition.domain_vertices(0).iter().map(|(&g, &l)| (g, l)),
            [(0, 0), (1, 1), (2, 2), (3, 3)],
        );
        itertools::assert_equal(
            partition.domain_vertices(1).iter().map(|(&g, &l)| (g, l)),
            [(1, 0), (2, 1), (3, 2), (4, 3)],
        );

        assert_eq!(partition.vertex_copies(0), &[Alias { domain: 0, index: 0 }]);
        assert_eq!(
            partition.vertex_copies(2),
            &[Alias { domain: 0, index: 2 }, Alias { domain: 1, index: 1 }]
        );
        assert_eq!(partition.vertex_colors(), vec![0, 0, 0, 0, 1]);

        let err = Partition::from_tet_colors(&mesh, vec![0, 2], 2).expect_err("color out of range");
        assert!(matches!(err, PartitionError::ColorOutOfRange { node: 1, .. }));
    }

    #[test]
    fn partition_drives_recoloring() {
        let mut mesh = cube_mesh(2);
        let partition = Partition::new(&mesh, &Contiguous, 4).expect("valid partition");

        let total: usize = (0..4).map(|d| partition.domain_tets(d).len()).sum();
        assert_eq!(total, mesh.tets().len());

        mesh.recolor_tets(&colors_as_index(partition.tet_colors()));
        mesh.recolor_vertices(&partition.vertex_colors());
        for (tet_idx, tet) in mesh.tets().iter().enumerate() {
            assert_eq!(tet.color(), partition.tet_domain(tet_idx) as Index);
            // a tet's vertices are colored with a domain no higher than the tet's own
            for &v in tet.vertices() {
                assert!(mesh.vertex(v).color() <= tet.color());
            }
        }
    }
}
