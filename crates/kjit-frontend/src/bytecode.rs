//! The host bytecode model: a typed, stack-based instruction set.
//!
//! Branch targets are instruction indices into a method's code. Types are
//! described structurally ([`TypeDesc`]) and interned into an IR context
//! at lowering time.

use kjit_ir::{
    AddressSpace, AtomicOp, BarrierKind, BinaryOp, Dim3, Handle, IrContext, MethodFlags,
    MethodHandle, PrimitiveKind, ShuffleMode, Type, UnaryOp,
};

/// A structural type description, resolved against a context on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeDesc {
    Void,
    Prim(PrimitiveKind),
    Ptr(Box<TypeDesc>, AddressSpace),
    View(Box<TypeDesc>, AddressSpace),
    Struct(Vec<TypeDesc>),
}

impl TypeDesc {
    /// Interns this shape into a context.
    pub fn intern(&self, ctx: &mut IrContext) -> Handle<Type> {
        match self {
            Self::Void => ctx.void_type(),
            Self::Prim(kind) => ctx.primitive(*kind),
            Self::Ptr(elem, space) => {
                let elem = elem.intern(ctx);
                ctx.pointer_to(elem, *space)
            }
            Self::View(elem, space) => {
                let elem = elem.intern(ctx);
                ctx.view_of(elem, *space)
            }
            Self::Struct(fields) => {
                let fields = fields.iter().map(|f| f.intern(ctx)).collect();
                ctx.structure(fields)
            }
        }
    }
}

/// A device intrinsic callable from bytecode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intrinsic {
    GridIndex(Dim3),
    GridDim(Dim3),
    GroupIndex(Dim3),
    GroupDim(Dim3),
    LaneIndex,
    WarpSize,
    GroupBarrier,
    MemBarrier(BarrierKind),
    Shuffle(ShuffleMode, u32),
    Atomic(AtomicOp),
    AtomicCas,
    MathUnary(UnaryOp),
    MathBinary(BinaryOp),
}

/// A bytecode instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    Dup,
    Pop,
    LdArg(u16),
    LdLoc(u16),
    StLoc(u16),
    LdLocA(u16),
    LdcI32(i32),
    LdcI64(i64),
    LdcF32(f32),
    LdcF64(f64),
    LdNull(TypeDesc),
    LdStr(String),
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
    Min,
    Max,
    Neg,
    Not,
    Conv(PrimitiveKind),
    ConvUn(PrimitiveKind),
    Ceq,
    Cne,
    Clt,
    CltUn,
    Cle,
    CleUn,
    Cgt,
    CgtUn,
    Cge,
    CgeUn,
    Br(u32),
    BrTrue(u32),
    BrFalse(u32),
    Switch(Vec<u32>),
    Ret,
    Call(u32),
    Intrinsic(Intrinsic),
    LdElem,
    StElem,
    LdElemA,
    LdLen,
    LdFld(u32),
    StFld(u32),
    LdFldA(u32),
    SizeOf(TypeDesc),
}

impl Instruction {
    /// Returns `true` if control never falls through to the next
    /// instruction.
    pub fn ends_block(&self) -> bool {
        matches!(self, Self::Br(_) | Self::Ret)
    }

    /// Returns `true` if this instruction transfers control.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Self::Br(_) | Self::BrTrue(_) | Self::BrFalse(_) | Self::Switch(_) | Self::Ret
        )
    }
}

/// The bytecode of one method.
#[derive(Clone, Debug)]
pub struct MethodBytecode {
    /// Stable host identity; also names the method in symbols.
    pub handle: MethodHandle,
    /// Parameter types.
    pub params: Vec<TypeDesc>,
    /// Local variable types. Locals are zero-initialized.
    pub locals: Vec<TypeDesc>,
    /// Return type.
    pub ret: TypeDesc,
    /// Declaration flags.
    pub flags: MethodFlags,
    /// The instruction stream.
    pub code: Vec<Instruction>,
}

impl MethodBytecode {
    /// Tokens of all directly called methods, in first-occurrence order.
    pub fn call_targets(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for instr in &self.code {
            if let Instruction::Call(token) = instr
                && !out.contains(token)
            {
                out.push(*token);
            }
        }
        out
    }
}

/// A set of methods forming one compilation unit.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// All methods; entry points are selected by token or name.
    pub methods: Vec<MethodBytecode>,
}

impl Program {
    /// Finds a method by token.
    pub fn find(&self, token: u32) -> Option<&MethodBytecode> {
        self.methods.iter().find(|m| m.handle.token == token)
    }

    /// Finds a method by name.
    pub fn find_by_name(&self, name: &str) -> Option<&MethodBytecode> {
        self.methods.iter().find(|m| m.handle.name == name)
    }
}
