//! Target ABI: sizes, alignments and struct field offsets.
//!
//! Layouts are computed on demand against a concrete target rather than
//! stored on the interned types, because types are created before the
//! compilation target is known.

use crate::arena::{Handle, UniqueArena};
use crate::types::{Type, TypeInner};

/// Alignment/size/offset rules for a compilation target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetAbi {
    /// Pointer size in bytes.
    pub pointer_size: u32,
    /// Pointer alignment in bytes.
    pub pointer_align: u32,
}

/// The computed layout of a type under a [`TargetAbi`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeLayout {
    /// Total size in bytes, including tail padding.
    pub size: u32,
    /// Required alignment in bytes.
    pub align: u32,
    /// Byte offset of each field (structs and views only).
    pub field_offsets: Vec<u32>,
}

fn align_to(offset: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

impl TargetAbi {
    /// 64-bit pointer ABI used by both shipped targets.
    pub const fn lp64() -> Self {
        Self {
            pointer_size: 8,
            pointer_align: 8,
        }
    }

    /// Size of a type in bytes.
    pub fn size_of(&self, types: &UniqueArena<Type>, ty: Handle<Type>) -> u32 {
        self.layout_of(types, ty).size
    }

    /// Alignment of a type in bytes.
    pub fn align_of(&self, types: &UniqueArena<Type>, ty: Handle<Type>) -> u32 {
        self.layout_of(types, ty).align
    }

    /// Full layout of a type: size, alignment and field offsets.
    pub fn layout_of(&self, types: &UniqueArena<Type>, ty: Handle<Type>) -> TypeLayout {
        match &types[ty].inner {
            TypeInner::Void => TypeLayout {
                size: 0,
                align: 1,
                field_offsets: Vec::new(),
            },
            TypeInner::Primitive(kind) => {
                let size = u32::from(kind.size());
                TypeLayout {
                    size,
                    align: size,
                    field_offsets: Vec::new(),
                }
            }
            TypeInner::Pointer { .. } | TypeInner::String => TypeLayout {
                size: self.pointer_size,
                align: self.pointer_align,
                field_offsets: Vec::new(),
            },
            // A view lays out as struct { elem* ptr; i32 len; }.
            TypeInner::View { .. } => {
                let len_offset = align_to(self.pointer_size, 4);
                let size = align_to(len_offset + 4, self.pointer_align);
                TypeLayout {
                    size,
                    align: self.pointer_align,
                    field_offsets: vec![0, len_offset],
                }
            }
            TypeInner::Array { elem, size } => {
                let elem_layout = self.layout_of(types, *elem);
                let stride = align_to(elem_layout.size, elem_layout.align);
                TypeLayout {
                    size: stride * size,
                    align: elem_layout.align,
                    field_offsets: Vec::new(),
                }
            }
            TypeInner::Struct { fields } => {
                let mut offset = 0u32;
                let mut align = 1u32;
                let mut field_offsets = Vec::with_capacity(fields.len());
                for &field in fields {
                    let layout = self.layout_of(types, field);
                    offset = align_to(offset, layout.align);
                    field_offsets.push(offset);
                    offset += layout.size;
                    align = align.max(layout.align);
                }
                TypeLayout {
                    size: align_to(offset, align),
                    align,
                    field_offsets,
                }
            }
        }
    }
}
