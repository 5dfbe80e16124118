//! Data shared by every kind of mesh entity.

/// Signed index type used for element indices and colors.
///
/// [`BAD_INDEX`] marks an absent or not-yet-assigned value.
pub type Index = i64;

/// Sentinel for an invalid or unassigned [`Index`].
pub const BAD_INDEX: Index = -1;

/// Index and color carried by every vertex, face and tetrahedron.
///
/// The index is the element's position in its owning collection
/// and is assigned once when a mesh is frozen.
/// The color is a caller-defined tag
/// (material id for tetrahedra and faces, partition id for vertices or tetrahedra);
/// the mesh only stores and propagates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Element {
    idx: Index,
    color: Index,
}

impl Default for Element {
    fn default() -> Self {
        Self {
            idx: BAD_INDEX,
            color: BAD_INDEX,
        }
    }
}

impl Element {
    /// Create an element with the given color and no index.
    #[inline]
    pub fn with_color(color: Index) -> Self {
        Self {
            idx: BAD_INDEX,
            color,
        }
    }
}

/// Access to the [`Element`] data embedded in a mesh entity.
pub trait MeshElement {
    #[doc(hidden)]
    fn element(&self) -> &Element;
    #[doc(hidden)]
    fn element_mut(&mut self) -> &mut Element;

    /// Position of this element in its owning collection.
    #[inline]
    fn idx(&self) -> Index {
        self.element().idx
    }

    /// Color tag of this element.
    #[inline]
    fn color(&self) -> Index {
        self.element().color
    }

    /// Replace the color tag of this element.
    #[inline]
    fn set_color(&mut self, color: Index) {
        self.element_mut().color = color;
    }

    #[doc(hidden)]
    #[inline]
    fn set_idx(&mut self, idx: Index) {
        self.element_mut().idx = idx;
    }
}

/// Implement [`MeshElement`] for a struct with an `element: Element` field.
macro_rules! impl_mesh_element {
    ($ty:ty) => {
        impl $crate::element::MeshElement for $ty {
            #[inline]
            fn element(&self) -> &$crate::element::Element {
                &self.element
            }
            #[inline]
            fn element_mut(&mut self) -> &mut $crate::element::Element {
                &mut self.element
            }
        }
    };
}
pub(crate) use impl_mesh_element;
