//! IR-type ↔ OpenCL-type-string mapping and variable naming.
//!
//! The mapping is a bijection: every IR type resolves to exactly one
//! OpenCL C type string, with struct and view types materialized as
//! typedefs named after their interned handle (so the text is stable
//! across compilations of the same context).

use std::collections::HashMap;
use std::fmt::Write as _;

use kjit_backend_core::BackendError;
use kjit_ir::{AddressSpace, Handle, PrimitiveKind, Type, TypeInner, UniqueArena, Value};

/// OpenCL address-space qualifier (private is the unqualified default).
pub fn space_qualifier(space: AddressSpace) -> &'static str {
    match space {
        AddressSpace::Global => "__global ",
        AddressSpace::Shared => "__local ",
        AddressSpace::Constant => "__constant ",
        AddressSpace::Local | AddressSpace::Generic => "",
    }
}

/// OpenCL scalar type name.
pub fn scalar_name(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Int1 => "bool",
        PrimitiveKind::Int8 => "char",
        PrimitiveKind::Int16 => "short",
        PrimitiveKind::Int32 => "int",
        PrimitiveKind::Int64 => "long",
        PrimitiveKind::Float32 => "float",
        PrimitiveKind::Float64 => "double",
    }
}

/// Unsigned counterpart, for `UNSIGNED`-flagged operations.
pub fn unsigned_scalar_name(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Int1 => "bool",
        PrimitiveKind::Int8 => "uchar",
        PrimitiveKind::Int16 => "ushort",
        PrimitiveKind::Int32 => "uint",
        PrimitiveKind::Int64 => "ulong",
        PrimitiveKind::Float32 => "float",
        PrimitiveKind::Float64 => "double",
    }
}

/// Generates and caches typedefs for struct and view types.
pub struct TypeGenerator {
    typedefs: String,
    names: HashMap<Handle<Type>, String>,
}

impl TypeGenerator {
    pub fn new() -> Self {
        Self {
            typedefs: String::new(),
            names: HashMap::new(),
        }
    }

    /// All typedef lines generated so far, dependency-ordered.
    pub fn typedefs(&self) -> &str {
        &self.typedefs
    }

    /// The OpenCL type string for an IR type.
    pub fn name(
        &mut self,
        types: &UniqueArena<Type>,
        ty: Handle<Type>,
    ) -> Result<String, BackendError> {
        if let Some(name) = self.names.get(&ty) {
            return Ok(name.clone());
        }
        let name = match &types[ty].inner {
            TypeInner::Void => "void".to_string(),
            TypeInner::Primitive(kind) => scalar_name(*kind).to_string(),
            TypeInner::String => "__constant char*".to_string(),
            TypeInner::Pointer { elem, space } => {
                let elem = self.name(types, *elem)?;
                format!("{}{elem}*", space_qualifier(*space))
            }
            TypeInner::View { elem, space } => {
                let elem_name = self.name(types, *elem)?;
                let name = format!("view_t{}", ty.index());
                let _ = writeln!(
                    self.typedefs,
                    "typedef struct {{ {}{elem_name}* ptr; int len; }} {name};",
                    space_qualifier(*space)
                );
                name
            }
            TypeInner::Struct { fields } => {
                let fields = fields.clone();
                let mut body = String::new();
                for (i, field) in fields.iter().enumerate() {
                    let field_name = self.name(types, *field)?;
                    let _ = write!(body, "{field_name} _f{i}; ");
                }
                let name = format!("struct_t{}", ty.index());
                let _ = writeln!(self.typedefs, "typedef struct {{ {body}}} {name};");
                name
            }
            TypeInner::Array { .. } => {
                return Err(BackendError::NotSupported(
                    "array-typed values in OpenCL output".into(),
                ));
            }
        };
        self.names.insert(ty, name.clone());
        Ok(name)
    }
}

/// The variable bound to an IR value.
pub fn variable(values: &kjit_ir::Arena<Value>, v: Handle<Value>) -> String {
    format!("v{}", values[v].id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::IrContext;

    #[test]
    fn scalar_names_are_c_types() {
        assert_eq!(scalar_name(PrimitiveKind::Int32), "int");
        assert_eq!(scalar_name(PrimitiveKind::Int64), "long");
        assert_eq!(scalar_name(PrimitiveKind::Float64), "double");
        assert_eq!(unsigned_scalar_name(PrimitiveKind::Int8), "uchar");
    }

    #[test]
    fn pointer_types_carry_address_space() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let global = ctx.pointer_to(i32t, AddressSpace::Global);
        let shared = ctx.pointer_to(i32t, AddressSpace::Shared);
        let private = ctx.pointer_to(i32t, AddressSpace::Local);
        let mut generator = TypeGenerator::new();
        assert_eq!(generator.name(&ctx.types, global).unwrap(), "__global int*");
        assert_eq!(generator.name(&ctx.types, shared).unwrap(), "__local int*");
        assert_eq!(generator.name(&ctx.types, private).unwrap(), "int*");
    }

    #[test]
    fn struct_typedef_uses_field_names() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let i64t = ctx.primitive(PrimitiveKind::Int64);
        let st = ctx.structure(vec![i32t, i64t]);
        let mut generator = TypeGenerator::new();
        let name = generator.name(&ctx.types, st).unwrap();
        assert!(name.starts_with("struct_t"));
        assert!(generator.typedefs().contains("int _f0; long _f1;"));
    }

    #[test]
    fn type_mapping_is_a_bijection() {
        let mut ctx = IrContext::new();
        let f32t = ctx.primitive(PrimitiveKind::Float32);
        let v0 = ctx.view_of(f32t, AddressSpace::Global);
        let v1 = ctx.view_of(f32t, AddressSpace::Shared);
        let mut generator = TypeGenerator::new();
        let n0 = generator.name(&ctx.types, v0).unwrap();
        let n0_again = generator.name(&ctx.types, v0).unwrap();
        let n1 = generator.name(&ctx.types, v1).unwrap();
        assert_eq!(n0, n0_again);
        assert_ne!(n0, n1);
        // Typedef emitted once per type.
        assert_eq!(generator.typedefs().matches(&n0).count(), 1);
    }
}
