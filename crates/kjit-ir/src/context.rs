//! The IR context: interning, id assignment, method registry.
//!
//! The context exclusively owns all types, methods, blocks and values.
//! A context (and everything it owns) is single-threaded; compilation of
//! distinct methods in distinct contexts may proceed in parallel.

use std::collections::HashMap;

use crate::arena::{Arena, Handle, UniqueArena};
use crate::block::BasicBlock;
use crate::builder::Builder;
use crate::error::IrError;
use crate::method::{Method, MethodDecl, MethodHandle, TransformFlags};
use crate::types::{AddressSpace, PrimitiveKind, Type, TypeInner};
use crate::value::{Value, ValueKind};

/// Owns and interns all IR for one compilation unit.
#[derive(Debug, Default)]
pub struct IrContext {
    /// Deduplicated type arena. Handle equality is type identity.
    pub types: UniqueArena<Type>,
    methods: Arena<Method>,
    registry: HashMap<MethodHandle, Handle<Method>>,
    next_value_id: u32,
}

impl IrContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns the void type.
    pub fn void_type(&mut self) -> Handle<Type> {
        self.types.insert(Type::unnamed(TypeInner::Void))
    }

    /// Interns a primitive type.
    pub fn primitive(&mut self, kind: PrimitiveKind) -> Handle<Type> {
        self.types.insert(Type::unnamed(TypeInner::Primitive(kind)))
    }

    /// Interns a pointer type.
    pub fn pointer_to(&mut self, elem: Handle<Type>, space: AddressSpace) -> Handle<Type> {
        self.types
            .insert(Type::unnamed(TypeInner::Pointer { elem, space }))
    }

    /// Interns a view type.
    pub fn view_of(&mut self, elem: Handle<Type>, space: AddressSpace) -> Handle<Type> {
        self.types
            .insert(Type::unnamed(TypeInner::View { elem, space }))
    }

    /// Interns a fixed-size array type.
    pub fn array_of(&mut self, elem: Handle<Type>, size: u32) -> Handle<Type> {
        self.types
            .insert(Type::unnamed(TypeInner::Array { elem, size }))
    }

    /// Interns a structure type with ordered fields.
    pub fn structure(&mut self, fields: Vec<Handle<Type>>) -> Handle<Type> {
        self.types.insert(Type::unnamed(TypeInner::Struct { fields }))
    }

    /// Interns the string-literal type.
    pub fn string_type(&mut self) -> Handle<Type> {
        self.types.insert(Type::unnamed(TypeInner::String))
    }

    /// Registers a method by handle and creates its entry block and
    /// parameter values.
    ///
    /// Fails with [`IrError::DuplicateMethod`] if the handle is taken.
    pub fn create_method(
        &mut self,
        decl: MethodDecl,
        param_types: &[Handle<Type>],
    ) -> Result<Handle<Method>, IrError> {
        if self.registry.contains_key(&decl.handle) {
            return Err(IrError::DuplicateMethod(decl.handle.name.clone()));
        }
        let handle = decl.handle.clone();

        let mut blocks = Arena::new();
        let entry = blocks.append(BasicBlock::default());

        let mut values = Arena::new();
        let mut params = Vec::with_capacity(param_types.len());
        for (index, &ty) in param_types.iter().enumerate() {
            let id = self.alloc_value_id();
            params.push(values.append(Value {
                id,
                ty,
                block: entry,
                kind: ValueKind::Parameter {
                    index: index as u32,
                },
                operands: Vec::new(),
                uses: Vec::new(),
            }));
        }

        let method = self.methods.append(Method {
            decl,
            params,
            entry,
            blocks,
            values,
            transform: TransformFlags::NONE,
            builder_active: false,
        });
        self.registry.insert(handle, method);
        Ok(method)
    }

    /// Looks up a method by its host handle.
    pub fn lookup_method(&self, handle: &MethodHandle) -> Option<Handle<Method>> {
        self.registry.get(handle).copied()
    }

    /// Returns a method by handle.
    pub fn method(&self, handle: Handle<Method>) -> &Method {
        &self.methods[handle]
    }

    /// Iterates over all registered methods in creation order.
    pub fn methods(&self) -> impl Iterator<Item = (Handle<Method>, &Method)> {
        self.methods.iter()
    }

    /// Acquires the exclusive builder for a method.
    ///
    /// Fails with [`IrError::BuilderInUse`] if another builder is live for
    /// the same method (possible only if a builder was leaked; the borrow
    /// checker otherwise serializes builders).
    pub fn builder(&mut self, method: Handle<Method>) -> Result<Builder<'_>, IrError> {
        let m = &mut self.methods[method];
        if m.builder_active {
            return Err(IrError::BuilderInUse(m.decl.handle.name.clone()));
        }
        m.builder_active = true;
        let entry = m.entry;
        Ok(Builder::new(self, method, entry))
    }

    /// Marks a method as fully transformed: clears the dirty state and
    /// every block's dirty bit (the method-local GC point after a pass
    /// pipeline run).
    pub fn mark_transformed(&mut self, method: Handle<Method>) {
        let m = &mut self.methods[method];
        m.transform.insert(TransformFlags::TRANSFORMED);
        m.transform.remove(TransformFlags::DIRTY);
        m.clear_dirty_blocks();
    }

    pub(crate) fn method_mut(&mut self, handle: Handle<Method>) -> &mut Method {
        &mut self.methods[handle]
    }

    pub(crate) fn alloc_value_id(&mut self) -> u32 {
        let id = self.next_value_id;
        self.next_value_id += 1;
        id
    }
}
