use fixedbitset as fb;

use super::{
    Alias, Face, FaceOwner, FaceVertex, MeshError, TetMesh, Tetrahedron, Vertex,
    TET_FACE_VERTICES,
};
use crate::element::{Index, MeshElement, BAD_INDEX};
use crate::{SimpleMesh, Vec3};

/// Assemble a mesh from raw geometry.
///
/// Vertices, tetrahedra (with their four faces each) and boundary faces
/// are created in input order, then the flip of every face is found
/// from the vertex-to-face incidence lists.
pub fn build_mesh<S>(source: &S) -> Result<TetMesh, MeshError>
where
    S: SimpleMesh + ?Sized,
{
    let mut builder = MeshBuilder::with_capacity(
        source.num_vertices(),
        source.num_tetrahedra(),
        source.num_boundary_faces(),
    );

    for i in 0..source.num_vertices() {
        builder.add_vertex(Vec3::from(source.vertex_coord(i)), BAD_INDEX);
    }
    for i in 0..source.num_tetrahedra() {
        builder.add_tet(source.tet_vertices(i), source.tet_material(i))?;
    }
    for i in 0..source.num_boundary_faces() {
        builder.add_boundary_face(source.boundary_vertices(i), source.boundary_material(i))?;
    }

    builder.resolve_flips()?;
    let mesh = builder.build(0, 1)?;
    log::debug!(
        "assembled mesh with {} vertices, {} tetrahedra, {} faces ({} on the boundary)",
        mesh.vertices.len(),
        mesh.tets.len(),
        mesh.faces.len(),
        mesh.boundary_face_count(),
    );
    Ok(mesh)
}

/// Incrementally constructs a [`TetMesh`].
///
/// Construction happens in two phases.
/// First, entities are added and flips are set or resolved
/// while the builder is mutable.
/// Then [`build`][Self::build] checks every face has a flip,
/// assigns dense indices and freezes the topology.
///
/// All tetrahedra must be added before any boundary face,
/// so that the face collection is ordered tetrahedron faces first.
#[derive(Clone, Debug, Default)]
pub struct MeshBuilder {
    vertices: Vec<Vertex>,
    faces: Vec<Face>,
    tets: Vec<Tetrahedron>,
    flips: Vec<Option<usize>>,
}

impl MeshBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty builder with room for the given numbers of elements.
    pub fn with_capacity(vertices: usize, tets: usize, boundary_faces: usize) -> Self {
        let faces = 4 * tets + boundary_faces;
        Self {
            vertices: Vec::with_capacity(vertices),
            faces: Vec::with_capacity(faces),
            tets: Vec::with_capacity(tets),
            flips: Vec::with_capacity(faces),
        }
    }

    /// Number of vertices added so far.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of tetrahedra added so far.
    #[inline]
    pub fn tet_count(&self) -> usize {
        self.tets.len()
    }

    /// Number of faces (tetrahedron-owned and boundary) added so far.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Add a vertex and return its index.
    pub fn add_vertex(&mut self, r: Vec3, color: Index) -> usize {
        self.vertices.push(Vertex::new(r, color));
        self.vertices.len() - 1
    }

    /// Add a tetrahedron on existing vertices and return its index.
    ///
    /// Also creates the tetrahedron's four faces
    /// at face indices `4 * tet..4 * tet + 4` with no color,
    /// and registers the vertex incidences of the tetrahedron and its faces.
    pub fn add_tet(&mut self, vertices: [usize; 4], color: Index) -> Result<usize, MeshError> {
        assert_eq!(
            self.faces.len(),
            4 * self.tets.len(),
            "tetrahedra must be added before boundary faces"
        );
        self.check_vertices(&vertices)?;

        let tet_idx = self.tets.len();
        let (center, volume) = Tetrahedron::geometry(vertices.map(|v| &self.vertices[v].r));
        if volume <= 0.0 || volume.is_nan() {
            return Err(MeshError::NonPositiveVolume {
                tet: tet_idx,
                volume,
            });
        }

        let mut faces = [0; 4];
        let mut surface_sum = 0.0;
        for (local_face, local_verts) in TET_FACE_VERTICES.iter().enumerate() {
            let face_verts = local_verts.map(|li| vertices[li]);
            let owner = FaceOwner {
                tet: tet_idx,
                local_face,
            };
            let face_idx = self.push_face(face_verts, Some(owner), BAD_INDEX);
            surface_sum += self.faces[face_idx].surface();
            faces[local_face] = face_idx;
        }

        for (local, &v) in vertices.iter().enumerate() {
            self.vertices[v].add_tet(tet_idx, local);
        }
        self.tets.push(Tetrahedron::new(
            vertices,
            faces,
            center,
            volume,
            surface_sum,
            color,
        ));
        Ok(tet_idx)
    }

    /// Add a boundary face (one not owned by any tetrahedron)
    /// and return its face index.
    pub fn add_boundary_face(
        &mut self,
        vertices: [usize; 3],
        color: Index,
    ) -> Result<usize, MeshError> {
        self.check_vertices(&vertices)?;
        Ok(self.push_face(vertices, None, color))
    }

    fn push_face(&mut self, vertices: [usize; 3], owner: Option<FaceOwner>, color: Index) -> usize {
        let face_idx = self.faces.len();
        let positions = vertices.map(|v| &self.vertices[v].r);
        self.faces.push(Face::new(vertices, positions, owner, color));
        self.flips.push(None);
        for (local, &v) in vertices.iter().enumerate() {
            self.vertices[v].add_face(face_idx, local);
        }
        face_idx
    }

    fn check_vertices(&self, vertices: &[usize]) -> Result<(), MeshError> {
        let count = self.vertices.len();
        match vertices.iter().find(|&&v| v >= count) {
            Some(&index) => Err(MeshError::VertexOutOfRange { index, count }),
            None => Ok(()),
        }
    }

    /// Set the color of a vertex.
    pub fn set_vertex_color(&mut self, vertex: usize, color: Index) {
        self.vertices[vertex].set_color(color);
    }

    /// Set the color of a tetrahedron.
    pub fn set_tet_color(&mut self, tet: usize, color: Index) {
        self.tets[tet].set_color(color);
    }

    /// Set the color of a face.
    pub fn set_face_color(&mut self, face: usize, color: Index) {
        self.faces[face].set_color(color);
    }

    /// Get a face added earlier.
    #[inline]
    pub fn face(&self, face: usize) -> &Face {
        &self.faces[face]
    }

    /// Register a copy of a vertex in another domain.
    pub fn add_alias(&mut self, vertex: usize, alias: Alias) {
        self.vertices[vertex].add_alias(alias);
    }

    /// Make two faces each other's flip.
    pub fn link_flips(&mut self, a: usize, b: usize) {
        self.flips[a] = Some(b);
        self.flips[b] = Some(a);
    }

    /// Set the flip of a single face without touching the target's flip.
    pub fn set_flip(&mut self, face: usize, flip: usize) {
        self.flips[face] = Some(flip);
    }

    /// Find the flip of every face that doesn't have one yet.
    ///
    /// The flip of a face is the only other face incident to all three of its vertices.
    /// Each vertex's face list is sorted by face index,
    /// so the common face is found by a merge over the three lists
    /// instead of comparing faces pairwise.
    /// Resolving a face also sets the reverse link, skipping the second search.
    pub fn resolve_flips(&mut self) -> Result<(), MeshError> {
        for vertex in &mut self.vertices {
            vertex.sort_lists();
        }

        let mut resolved = fb::FixedBitSet::with_capacity(self.faces.len());
        for (face_idx, flip) in self.flips.iter().enumerate() {
            if flip.is_some() {
                resolved.insert(face_idx);
            }
        }

        for face_idx in 0..self.faces.len() {
            if resolved.contains(face_idx) {
                continue;
            }
            let vertices = *self.faces[face_idx].vertices();
            let [a, b, c] = vertices.map(|v| self.vertices[v].faces());

            let flip_idx = match find_common_face(a, b, c, face_idx) {
                CommonFace::Unique(f) => f,
                CommonFace::Missing => {
                    return Err(MeshError::FlipNotFound {
                        face: face_idx,
                        vertices,
                    })
                }
                CommonFace::Multiple => {
                    return Err(MeshError::AmbiguousFlip {
                        face: face_idx,
                        vertices,
                    })
                }
            };

            self.flips[face_idx] = Some(flip_idx);
            resolved.insert(face_idx);
            if !resolved.contains(flip_idx) {
                self.flips[flip_idx] = Some(face_idx);
                resolved.insert(flip_idx);
            }
        }

        Ok(())
    }

    /// Freeze the builder into a mesh belonging to the given domain.
    ///
    /// Fails with [`MeshError::FlipNotFound`] if any face is still missing its flip.
    pub fn build(mut self, domain: usize, domain_count: usize) -> Result<TetMesh, MeshError> {
        for (face_idx, (face, flip)) in self.faces.iter_mut().zip(&self.flips).enumerate() {
            let Some(flip) = flip else {
                return Err(MeshError::FlipNotFound {
                    face: face_idx,
                    vertices: *face.vertices(),
                });
            };
            face.set_flip(*flip);
            face.set_idx(face_idx as Index);
        }
        for (idx, vertex) in self.vertices.iter_mut().enumerate() {
            vertex.set_idx(idx as Index);
            vertex.sort_lists();
        }
        for (idx, tet) in self.tets.iter_mut().enumerate() {
            tet.set_idx(idx as Index);
        }

        Ok(TetMesh {
            vertices: self.vertices,
            faces: self.faces,
            tets: self.tets,
            domain,
            domain_count,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommonFace {
    Unique(usize),
    Missing,
    Multiple,
}

/// Find the face other than `except` that appears in all three sorted lists.
fn find_common_face(
    a: &[FaceVertex],
    b: &[FaceVertex],
    c: &[FaceVertex],
    except: usize,
) -> CommonFace {
    let (mut i, mut j, mut k) = (0, 0, 0);
    let mut found = CommonFace::Missing;

    while i < a.len() && j < b.len() && k < c.len() {
        let (x, y, z) = (a[i].face, b[j].face, c[k].face);
        if x == y && y == z {
            if x != except {
                if found != CommonFace::Missing {
                    return CommonFace::Multiple;
                }
                found = CommonFace::Unique(x);
            }
            i += 1;
            j += 1;
            k += 1;
            continue;
        }
        // advance every list that is behind the largest current value
        let max = x.max(y).max(z);
        if x < max {
            i += 1;
        }
        if y < max {
            j += 1;
        }
        if z < max {
            k += 1;
        }
    }

    found
}

//
// tests
//

/// Two tetrahedra glued together on the triangle {1, 2, 3}.
///
/// Vertex 0 is the origin, 1-3 are the unit axes and 4 is (1, 1, 1),
/// so the first tetrahedron is the unit corner tetrahedron
/// and the second sits on its slanted face.
/// Boundary faces get the material 10 + their index.
///
/// This is public for visibility in other modules' tests.
/// It is not meant to be used by users and thus hidden from docs.
#[doc(hidden)]
pub fn two_tet_mesh() -> TetMesh {
    let vertices = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
    ];
    let tets = vec![[1, 2, 3, 0], [2, 1, 3, 4]];
    let mut raw = crate::RawMesh::from_tets(vertices, tets, vec![1, 2]);
    for (i, material) in raw.boundary_materials.iter_mut().enumerate() {
        *material = 10 + i as Index;
    }
    build_mesh(&raw).expect("Error in test mesh construction. This is a bug in the fixture")
}

/// A cube `[0, n]^3` split into `n^3` unit cubes of six tetrahedra each.
///
/// Each unit cube is divided along its (0, 0, 0)-(1, 1, 1) diagonal,
/// which makes the split consistent across neighboring cubes.
/// Tetrahedra are listed cube by cube with x varying fastest,
/// all with material 0.
///
/// This is public for visibility in other modules' tests.
/// It is not meant to be used by users and thus hidden from docs.
#[doc(hidden)]
pub fn cube_mesh(n: usize) -> TetMesh {
    let side = n + 1;
    let vert_idx = |x: usize, y: usize, z: usize| x + side * (y + side * z);

    let mut vertices = Vec::with_capacity(side * side * side);
    for z in 0..side {
        for y in 0..side {
            for x in 0..side {
                vertices.push([x as f64, y as f64, z as f64]);
            }
        }
    }

    // paths from the low corner to the high corner, one axis at a time
    const AXIS_ORDERS: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    let mut tets = Vec::with_capacity(6 * n * n * n);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                for order in AXIS_ORDERS {
                    let mut corner = [x, y, z];
                    let mut tet = [vert_idx(x, y, z), 0, 0, 0];
                    for (step, axis) in order.into_iter().enumerate() {
                        corner[axis] += 1;
                        tet[step + 1] = vert_idx(corner[0], corner[1], corner[2]);
                    }
                    // half of the paths are wound the wrong way
                    let positions = tet.map(|v| Vec3::from(vertices[v]));
                    let [p0, p1, p2, p3] = &positions;
                    let (_, volume) = Tetrahedron::geometry([p0, p1, p2, p3]);
                    if volume < 0.0 {
                        tet.swap(0, 1);
                    }
                    tets.push(tet);
                }
            }
        }
    }

    let materials = vec![0; tets.len()];
    let raw = crate::RawMesh::from_tets(vertices, tets, materials);
    build_mesh(&raw).expect("Error in test mesh construction. This is a bug in the fixture")
}

// Tests here are concerned with the mesh structure being constructed correctly.
// For the full set of structural checks see `validation.rs`
#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawMesh;
    use approx::{abs_diff_eq, assert_relative_eq};

    /// Counts, flips and geometry of the two-tetrahedron fixture.
    #[test]
    fn two_tet_mesh_is_correct() {
        let mesh = two_tet_mesh();

        assert_eq!(mesh.vertices().len(), 5);
        assert_eq!(mesh.tets().len(), 2);
        assert_eq!(mesh.faces().len(), 8 + 6);
        assert_eq!(mesh.boundary_face_count(), 6);

        // exactly one interior pair: face 3 of each tet
        let interior: Vec<usize> = (0..8)
            .filter(|&f| !mesh.flip_of(mesh.face(f)).is_boundary())
            .collect();
        assert_eq!(interior, vec![3, 7]);
        assert_eq!(mesh.face(3).flip(), 7);
        assert_eq!(mesh.face(7).flip(), 3);

        // every other tet face flips onto a boundary face and back
        for f in (0..8).filter(|f| !interior.contains(f)) {
            let flip = mesh.face(f).flip();
            assert!(mesh.boundary_face_range().contains(&flip));
            assert_eq!(mesh.face(flip).flip(), f);
        }

        assert_relative_eq!(mesh.tet(0).volume(), 1.0 / 6.0);
        assert_relative_eq!(mesh.tet(1).volume(), 1.0 / 3.0);
        assert_relative_eq!(mesh.tet(0).center(), &Vec3::new(0.25, 0.25, 0.25));

        // face 0 of the first tet lies in the x = 0 plane with an inward normal
        let f0 = mesh.face(0);
        assert_relative_eq!(f0.normal(), &Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(f0.surface(), 0.5);
        assert_relative_eq!(f0.center(), &Vec3::new(0.0, 1.0 / 3.0, 1.0 / 3.0));

        // materials
        assert_eq!(mesh.tet(0).color(), 1);
        assert_eq!(mesh.tet(1).color(), 2);
        assert!((0..8).all(|f| mesh.face(f).color() == BAD_INDEX));
        for (i, f) in mesh.boundary_face_range().enumerate() {
            assert_eq!(mesh.face(f).color(), 10 + i as Index);
        }

        assert!(mesh.check().is_ok());
    }

    /// Vertex incidence lists point back at the vertex and are sorted.
    #[test]
    fn incidences_are_registered() {
        let mesh = two_tet_mesh();

        // the shared vertices are in both tets
        for v in 1..=3 {
            let tets: Vec<usize> = mesh.vertex(v).tets().iter().map(|tv| tv.tet).collect();
            assert_eq!(tets, vec![0, 1]);
        }
        assert_eq!(mesh.vertex(0).tets().len(), 1);
        assert_eq!(mesh.vertex(4).tets().len(), 1);

        for (v_idx, vertex) in mesh.vertices().iter().enumerate() {
            for tv in vertex.tets() {
                assert_eq!(mesh.tet(tv.tet).vertex(tv.local), v_idx);
            }
            for fv in vertex.faces() {
                assert_eq!(mesh.face(fv.face).vertex(fv.local), v_idx);
            }
            assert!(vertex.faces().windows(2).all(|w| w[0].face < w[1].face));
            assert_eq!(vertex.idx(), v_idx as Index);
        }

        let total_faces: usize = mesh.vertices().iter().map(|v| v.faces().len()).sum();
        assert_eq!(total_faces, 3 * mesh.faces().len());
    }

    /// Every face normal of a tetrahedron points towards its centroid.
    #[test]
    fn tet_face_normals_point_inward() {
        let mesh = cube_mesh(2);
        for tet in mesh.tets() {
            for &f in tet.faces() {
                let face = mesh.face(f);
                let to_center = tet.center() - face.center();
                assert!(face.normal().dot(&to_center) > 0.0);
            }
        }
    }

    #[test]
    fn cube_mesh_counts() {
        let mesh = cube_mesh(1);
        assert_eq!(mesh.vertices().len(), 8);
        assert_eq!(mesh.tets().len(), 6);
        // two triangles per cube side
        assert_eq!(mesh.boundary_face_count(), 12);
        let total_volume: f64 = mesh.tets().iter().map(|t| t.volume()).sum();
        assert_relative_eq!(total_volume, 1.0, epsilon = 1e-12);

        let mesh = cube_mesh(3);
        assert_eq!(mesh.vertices().len(), 64);
        assert_eq!(mesh.tets().len(), 6 * 27);
        assert_eq!(mesh.boundary_face_count(), 6 * 2 * 9);
        let total_volume: f64 = mesh.tets().iter().map(|t| t.volume()).sum();
        assert_relative_eq!(total_volume, 27.0, epsilon = 1e-10);
        assert!(mesh.check().is_ok());
    }

    /// Flips of opposite faces have antiparallel normals.
    #[test]
    fn flips_are_antiparallel() {
        let mesh = cube_mesh(2);
        for face in mesh.faces() {
            let flip = mesh.flip_of(face);
            assert!(abs_diff_eq!(
                face.normal().dot(flip.normal()),
                -1.0,
                epsilon = 1e-10
            ));
            assert!(abs_diff_eq!(face.center(), flip.center(), epsilon = 1e-12));
        }
    }

    #[test]
    fn missing_boundary_face_is_an_error() {
        let mesh = two_tet_mesh();
        let mut raw = RawMesh::from(&mesh);
        raw.boundary_faces.pop();
        raw.boundary_materials.pop();

        let err = TetMesh::from_simple_mesh(&raw).expect_err("mesh has a hole");
        assert!(
            matches!(err, MeshError::FlipNotFound { .. }),
            "unexpected error {err}"
        );
    }

    #[test]
    fn duplicate_boundary_face_is_an_error() {
        let mesh = two_tet_mesh();
        let mut raw = RawMesh::from(&mesh);
        raw.boundary_faces.push(raw.boundary_faces[0]);
        raw.boundary_materials.push(0);

        let err = TetMesh::from_simple_mesh(&raw).expect_err("mesh is non-manifold");
        assert!(matches!(err, MeshError::AmbiguousFlip { .. }));
    }

    #[test]
    fn inverted_tet_is_an_error() {
        let mesh = two_tet_mesh();
        let mut raw = RawMesh::from(&mesh);
        raw.tets[1].swap(0, 1);

        let err = TetMesh::from_simple_mesh(&raw).expect_err("tet is inverted");
        match err {
            MeshError::NonPositiveVolume { tet, volume } => {
                assert_eq!(tet, 1);
                assert_relative_eq!(volume, -1.0 / 3.0);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn out_of_range_vertex_is_an_error() {
        let mesh = two_tet_mesh();
        let mut raw = RawMesh::from(&mesh);
        raw.boundary_faces[2][1] = 42;

        let err = TetMesh::from_simple_mesh(&raw).expect_err("index is out of range");
        assert_eq!(err, MeshError::VertexOutOfRange { index: 42, count: 5 });
    }

    #[test]
    fn builder_requires_every_flip() {
        let mut builder = MeshBuilder::new();
        builder.add_vertex(Vec3::new(0.0, 0.0, 0.0), BAD_INDEX);
        builder.add_vertex(Vec3::new(1.0, 0.0, 0.0), BAD_INDEX);
        builder.add_vertex(Vec3::new(0.0, 1.0, 0.0), BAD_INDEX);
        let a = builder.add_boundary_face([0, 1, 2], 0).unwrap();
        let b = builder.add_boundary_face([0, 2, 1], 0).unwrap();
        builder.set_flip(a, b);

        let err = builder.clone().build(0, 1).expect_err("face b has no flip");
        assert_eq!(
            err,
            MeshError::FlipNotFound {
                face: b,
                vertices: [0, 2, 1]
            }
        );

        builder.link_flips(a, b);
        let mesh = builder.build(0, 1).expect("all flips set");
        assert_eq!(mesh.face(a).flip(), b);
        assert_eq!(mesh.face(b).flip(), a);
    }

    #[test]
    fn common_face_search() {
        let fv = |faces: &[usize]| -> Vec<FaceVertex> {
            faces
                .iter()
                .map(|&face| FaceVertex { face, local: 0 })
                .collect()
        };
        let a = fv(&[0, 2, 5, 9]);
        let b = fv(&[1, 2, 3, 9, 11]);
        let c = fv(&[2, 4, 9]);

        assert_eq!(find_common_face(&a, &b, &c, 2), CommonFace::Unique(9));
        assert_eq!(find_common_face(&a, &b, &c, 9), CommonFace::Unique(2));
        assert_eq!(find_common_face(&a, &b, &c, 5), CommonFace::Multiple);
        assert_eq!(
            find_common_face(&a[..2], &b, &c, 2),
            CommonFace::Missing
        );
    }
}
