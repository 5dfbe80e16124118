//! Binary storage of meshes (typically one file per domain),
//! and a human-readable dump for debugging.
//!
//! All values are little-endian 8-byte integers or floats, laid out as
//!
//! ```text
//! u64 signature
//! u64 domain, domain_count
//! u64 vertex_count (nV), tet_count (nT), boundary_face_count (nB), interface_vertex_count (nI)
//! nV x f64[3]          vertex positions
//! nT x u64[4]          tetrahedron vertices
//! nB x u64[3]          boundary face vertices
//! nV x i64             vertex colors
//! nT x i64             tetrahedron colors
//! (4 nT + nB) x i64    face colors
//! (4 nT + nB) x u64    face flips
//! nI x { u64 vertex, u64 alias_count, alias_count x { u64 domain, u64 index } }
//! ```
//!
//! Tetrahedron faces are not stored; they are rebuilt from the tetrahedra.

use crate::element::{Index, MeshElement, BAD_INDEX};
use crate::mesh::{Alias, MeshBuilder, MeshError, TetMesh};
use crate::Vec3;

use itertools::Itertools;
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

/// Magic number at the start of every mesh file.
pub const SIGNATURE: u64 = u64::from_le_bytes(*b"TETMESH1");

/// Error in reading or writing a mesh file.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The data doesn't start with [`SIGNATURE`].
    #[error("Invalid mesh file format (signature {found:#018x})")]
    InvalidSignature {
        /// The value found in place of the signature.
        found: u64,
    },
    /// The data ended before all declared entries were read.
    #[error("Mesh file is truncated")]
    Truncated,
    /// A stored index points outside the collection it refers to.
    #[error("Invalid {what} index {index} (only {len} available)")]
    IndexOutOfRange {
        /// What the index refers to.
        what: &'static str,
        /// The stored index.
        index: u64,
        /// Size of the referred collection.
        len: usize,
    },
    /// The stored tetrahedra or faces don't form a valid mesh.
    #[error("Invalid mesh data")]
    Mesh(#[from] MeshError),
    /// Reading or writing failed.
    #[error("I/O error")]
    Io(#[from] io::Error),
}

/// Write a mesh in binary form.
///
/// The writer is not buffered here;
/// wrap it in a [`BufWriter`] when writing to a file or socket.
pub fn write<W: Write>(mesh: &TetMesh, mut writer: W) -> Result<(), FormatError> {
    let tet_count = mesh.tets().len();
    let boundary = mesh.boundary_face_range();

    for value in [
        SIGNATURE,
        mesh.domain() as u64,
        mesh.domain_count() as u64,
        mesh.vertices().len() as u64,
        tet_count as u64,
        boundary.len() as u64,
        mesh.interface_vertex_count() as u64,
    ] {
        write_u64(&mut writer, value)?;
    }

    for vertex in mesh.vertices() {
        for coord in vertex.r().iter() {
            writer.write_all(&coord.to_le_bytes())?;
        }
    }
    for tet in mesh.tets() {
        for &v in tet.vertices() {
            write_u64(&mut writer, v as u64)?;
        }
    }
    for face in &mesh.faces()[boundary] {
        for &v in face.vertices() {
            write_u64(&mut writer, v as u64)?;
        }
    }

    for vertex in mesh.vertices() {
        write_i64(&mut writer, vertex.color())?;
    }
    for tet in mesh.tets() {
        write_i64(&mut writer, tet.color())?;
    }
    for face in mesh.faces() {
        write_i64(&mut writer, face.color())?;
    }
    for face in mesh.faces() {
        write_u64(&mut writer, face.flip() as u64)?;
    }

    for (idx, vertex) in mesh.vertices().iter().enumerate() {
        if vertex.aliases().is_empty() {
            continue;
        }
        write_u64(&mut writer, idx as u64)?;
        write_u64(&mut writer, vertex.aliases().len() as u64)?;
        for alias in vertex.aliases() {
            write_u64(&mut writer, alias.domain as u64)?;
            write_u64(&mut writer, alias.index as u64)?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Read a mesh written by [`write`].
///
/// The signature is checked before anything else is read.
/// Entries are read one at a time,
/// so a corrupt header can't cause a huge allocation:
/// a count larger than the actual data results in [`FormatError::Truncated`].
pub fn read<R: Read>(mut reader: R) -> Result<TetMesh, FormatError> {
    let signature = read_u64(&mut reader)?;
    if signature != SIGNATURE {
        return Err(FormatError::InvalidSignature { found: signature });
    }

    let domain = read_count(&mut reader)?;
    let domain_count = read_count(&mut reader)?;
    let vertex_count = read_count(&mut reader)?;
    let tet_count = read_count(&mut reader)?;
    let boundary_count = read_count(&mut reader)?;
    let interface_count = read_count(&mut reader)?;

    let mut builder = MeshBuilder::new();
    for _ in 0..vertex_count {
        let mut r = [0.0; 3];
        for coord in &mut r {
            *coord = read_f64(&mut reader)?;
        }
        builder.add_vertex(Vec3::from(r), BAD_INDEX);
    }
    for _ in 0..tet_count {
        let mut vertices = [0; 4];
        for v in &mut vertices {
            *v = read_index(&mut reader, "vertex", vertex_count)?;
        }
        builder.add_tet(vertices, BAD_INDEX)?;
    }
    for _ in 0..boundary_count {
        let mut vertices = [0; 3];
        for v in &mut vertices {
            *v = read_index(&mut reader, "vertex", vertex_count)?;
        }
        builder.add_boundary_face(vertices, BAD_INDEX)?;
    }

    for vertex in 0..vertex_count {
        builder.set_vertex_color(vertex, read_i64(&mut reader)?);
    }
    for tet in 0..tet_count {
        builder.set_tet_color(tet, read_i64(&mut reader)?);
    }
    let face_count = builder.face_count();
    for face in 0..face_count {
        builder.set_face_color(face, read_i64(&mut reader)?);
    }
    // flips are stored for both sides, set them one way each
    for face in 0..face_count {
        let flip = read_index(&mut reader, "face flip", face_count)?;
        builder.set_flip(face, flip);
    }

    for _ in 0..interface_count {
        let vertex = read_index(&mut reader, "alias vertex", vertex_count)?;
        let alias_count = read_count(&mut reader)?;
        for _ in 0..alias_count {
            let domain = read_count(&mut reader)?;
            let index = read_count(&mut reader)?;
            builder.add_alias(vertex, Alias { domain, index });
        }
    }

    let mesh = builder.build(domain, domain_count)?;
    log::debug!(
        "read mesh of domain {}/{} with {} vertices and {} tetrahedra",
        domain,
        domain_count,
        mesh.vertices().len(),
        mesh.tets().len(),
    );
    Ok(mesh)
}

/// Write a mesh to a file, replacing any existing file.
pub fn save(mesh: &TetMesh, path: impl AsRef<Path>) -> Result<(), FormatError> {
    let file = File::create(path)?;
    write(mesh, BufWriter::new(file))
}

/// Read a mesh from a file written by [`save`].
pub fn load(path: impl AsRef<Path>) -> Result<TetMesh, FormatError> {
    let file = File::open(path)?;
    read(BufReader::new(file))
}

/// Write a human-readable listing of every entity in the mesh.
pub fn dump<W: Write>(mesh: &TetMesh, mut writer: W) -> io::Result<()> {
    writeln!(writer, "domain {} of {}", mesh.domain(), mesh.domain_count())?;

    writeln!(writer, "vertices {}", mesh.vertices().len())?;
    for (idx, v) in mesh.vertices().iter().enumerate() {
        let r = v.r();
        write!(writer, "  {idx}: ({}, {}, {}) color {}", r.x, r.y, r.z, v.color())?;
        if !v.aliases().is_empty() {
            let aliases = v
                .aliases()
                .iter()
                .format_with(", ", |a, f| f(&format_args!("{}:{}", a.domain, a.index)));
            write!(writer, " aliases [{aliases}]")?;
        }
        writeln!(writer)?;
    }

    writeln!(writer, "tetrahedra {}", mesh.tets().len())?;
    for (idx, t) in mesh.tets().iter().enumerate() {
        writeln!(
            writer,
            "  {idx}: vertices {:?} faces {:?} color {} volume {:e} quality {:.3}",
            t.vertices(),
            t.faces(),
            t.color(),
            t.volume(),
            t.quality(),
        )?;
    }

    writeln!(
        writer,
        "faces {} ({} boundary)",
        mesh.faces().len(),
        mesh.boundary_face_count()
    )?;
    for (idx, f) in mesh.faces().iter().enumerate() {
        let owner = match f.owner() {
            Some(o) => format!("tet {}/{}", o.tet, o.local_face),
            None => "boundary".to_string(),
        };
        writeln!(
            writer,
            "  {idx}: vertices {:?} {owner} flip {} color {}",
            f.vertices(),
            f.flip(),
            color_str(f.color()),
        )?;
    }

    Ok(())
}

fn color_str(color: Index) -> String {
    if color == BAD_INDEX {
        "-".to_string()
    } else {
        color.to_string()
    }
}

//
// primitive encoding
//

fn write_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_i64<W: Write>(writer: &mut W, value: i64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<[u8; 8], FormatError> {
    let mut buf = [0; 8];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FormatError::Truncated,
        _ => FormatError::Io(e),
    })?;
    Ok(buf)
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, FormatError> {
    read_bytes(reader).map(u64::from_le_bytes)
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, FormatError> {
    read_bytes(reader).map(i64::from_le_bytes)
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64, FormatError> {
    read_bytes(reader).map(f64::from_le_bytes)
}

/// Read a count or an index that doesn't refer into the mesh being read.
fn read_count<R: Read>(reader: &mut R) -> Result<usize, FormatError> {
    let value = read_u64(reader)?;
    usize::try_from(value).map_err(|_| FormatError::IndexOutOfRange {
        what: "count",
        index: value,
        len: usize::MAX,
    })
}

/// Read an index into a collection of `len` elements.
fn read_index<R: Read>(
    reader: &mut R,
    what: &'static str,
    len: usize,
) -> Result<usize, FormatError> {
    let value = read_u64(reader)?;
    match usize::try_from(value) {
        Ok(index) if index < len => Ok(index),
        _ => Err(FormatError::IndexOutOfRange {
            what,
            index: value,
            len,
        }),
    }
}
