//! The method builder: the single mutation path for IR.
//!
//! All value creation, operand wiring, terminator placement and rewriting
//! flows through a [`Builder`], so the use/operand symmetry and the
//! one-terminator invariant are maintained in one place. Structural misuse
//! (appending past a terminator, terminating twice, φ after a non-φ)
//! panics; operand type mismatches are returned as [`IrError`].
//!
//! The builder also performs constant folding: creating an arithmetic,
//! compare or convert operation whose operands are all constants yields a
//! fresh constant (or poison) value instead of the operation node.

use crate::arena::Handle;
use crate::block::{BasicBlock, Terminator};
use crate::context::IrContext;
use crate::display::type_string;
use crate::error::IrError;
use crate::fold::{self, Folded};
use crate::method::{Method, TransformFlags};
use crate::types::{AddressSpace, PrimitiveKind, Type, TypeInner};
use crate::value::{
    ArithFlags, AtomicOp, BarrierKind, BinaryOp, CompareFlags, CompareOp, ConvertFlags, Dim3,
    IntrinsicKind, PrimitiveValue, ShuffleMode, TernaryOp, UnaryOp, Value, ValueKind,
};

/// Exclusive mutation handle for one method.
///
/// Released on drop, which flips the method's `DIRTY` bit.
#[derive(Debug)]
pub struct Builder<'ctx> {
    ctx: &'ctx mut IrContext,
    method: Handle<Method>,
    block: Handle<BasicBlock>,
}

impl Drop for Builder<'_> {
    fn drop(&mut self) {
        let m = self.ctx.method_mut(self.method);
        m.builder_active = false;
        m.transform.insert(TransformFlags::DIRTY);
        m.transform.remove(TransformFlags::TRANSFORMED);
    }
}

impl<'ctx> Builder<'ctx> {
    pub(crate) fn new(
        ctx: &'ctx mut IrContext,
        method: Handle<Method>,
        block: Handle<BasicBlock>,
    ) -> Self {
        Self { ctx, method, block }
    }

    /// The method under construction.
    pub fn method(&self) -> &Method {
        self.ctx.method(self.method)
    }

    /// The handle of the method under construction.
    pub fn method_handle(&self) -> Handle<Method> {
        self.method
    }

    /// Read access to the context's type arena.
    pub fn types(&self) -> &crate::arena::UniqueArena<Type> {
        &self.ctx.types
    }

    /// Read access to the whole context (e.g. for callee inspection).
    pub fn context(&self) -> &IrContext {
        self.ctx
    }

    /// A value by handle.
    pub fn value(&self, v: Handle<Value>) -> &Value {
        &self.method().values[v]
    }

    /// A block by handle.
    pub fn block(&self, b: Handle<BasicBlock>) -> &BasicBlock {
        &self.method().blocks[b]
    }

    // ---- type interning passthroughs ------------------------------------

    /// Interns the void type.
    pub fn void_type(&mut self) -> Handle<Type> {
        self.ctx.void_type()
    }

    /// Interns a primitive type.
    pub fn primitive_type(&mut self, kind: PrimitiveKind) -> Handle<Type> {
        self.ctx.primitive(kind)
    }

    /// Interns a pointer type.
    pub fn pointer_type(&mut self, elem: Handle<Type>, space: AddressSpace) -> Handle<Type> {
        self.ctx.pointer_to(elem, space)
    }

    /// Interns a view type.
    pub fn view_type(&mut self, elem: Handle<Type>, space: AddressSpace) -> Handle<Type> {
        self.ctx.view_of(elem, space)
    }

    /// Interns a structure type.
    pub fn struct_type(&mut self, fields: Vec<Handle<Type>>) -> Handle<Type> {
        self.ctx.structure(fields)
    }

    /// Interns the string-literal type.
    pub fn string_type(&mut self) -> Handle<Type> {
        self.ctx.string_type()
    }

    // ---- blocks ---------------------------------------------------------

    /// Creates a new, unterminated block.
    pub fn create_block(&mut self) -> Handle<BasicBlock> {
        self.ctx.method_mut(self.method).blocks.append(BasicBlock::default())
    }

    /// Moves the insertion point to `block`.
    pub fn select_block(&mut self, block: Handle<BasicBlock>) {
        assert!(
            self.method().blocks.try_get(block).is_some(),
            "selecting a block from another method"
        );
        self.block = block;
    }

    /// The current insertion block.
    pub fn current_block(&self) -> Handle<BasicBlock> {
        self.block
    }

    // ---- raw append -----------------------------------------------------

    /// Appends a value to an explicit block, wiring use edges.
    ///
    /// No type checking is performed; this is the splice primitive for
    /// passes that copy already-validated values. Panics if the block is
    /// terminated.
    pub fn append_raw(
        &mut self,
        block: Handle<BasicBlock>,
        kind: ValueKind,
        ty: Handle<Type>,
        operands: Vec<Handle<Value>>,
    ) -> Handle<Value> {
        let is_phi = kind.is_phi();
        let id = self.ctx.alloc_value_id();
        let m = self.ctx.method_mut(self.method);
        assert!(
            m.blocks[block].terminator.is_none(),
            "cannot append to a terminated block"
        );
        let handle = m.values.append(Value {
            id,
            ty,
            block,
            kind,
            operands: operands.clone(),
            uses: Vec::new(),
        });
        for op in operands {
            m.values[op].uses.push(handle);
        }
        // φ-nodes stay at the head of the block.
        let at = if is_phi {
            m.blocks[block]
                .values
                .iter()
                .position(|&v| !m.values[v].kind.is_phi())
                .unwrap_or(m.blocks[block].values.len())
        } else {
            m.blocks[block].values.len()
        };
        let b = &mut m.blocks[block];
        b.values.insert(at, handle);
        b.dirty = true;
        handle
    }

    fn append(
        &mut self,
        kind: ValueKind,
        ty: Handle<Type>,
        operands: Vec<Handle<Value>>,
    ) -> Handle<Value> {
        self.append_raw(self.block, kind, ty, operands)
    }

    // ---- constants ------------------------------------------------------

    /// Creates a typed literal in the current block.
    pub fn constant(&mut self, v: PrimitiveValue) -> Handle<Value> {
        let ty = self.ctx.primitive(v.kind());
        self.append(ValueKind::Constant(v), ty, Vec::new())
    }

    /// Creates an Int32 literal.
    pub fn int32(&mut self, v: i32) -> Handle<Value> {
        self.constant(PrimitiveValue::Int32(v))
    }

    /// Creates a string literal.
    pub fn string_constant(&mut self, s: impl Into<String>) -> Handle<Value> {
        let ty = self.ctx.string_type();
        self.append(ValueKind::StringConstant(s.into()), ty, Vec::new())
    }

    /// Creates the typed null value.
    pub fn null(&mut self, ty: Handle<Type>) -> Handle<Value> {
        self.append(ValueKind::Null, ty, Vec::new())
    }

    /// Creates a poison value of the given type.
    pub fn poison(&mut self, ty: Handle<Type>) -> Handle<Value> {
        self.append(ValueKind::Poison, ty, Vec::new())
    }

    // ---- arithmetic -----------------------------------------------------

    fn primitive_of(&self, v: Handle<Value>) -> Result<PrimitiveKind, IrError> {
        self.ctx.types[self.value(v).ty]
            .as_primitive()
            .ok_or_else(|| self.mismatch("a primitive type", self.value(v).ty))
    }

    fn mismatch(&self, expected: impl Into<String>, found: Handle<Type>) -> IrError {
        IrError::TypeMismatch {
            expected: expected.into(),
            found: type_string(&self.ctx.types, found),
        }
    }

    fn mismatch_ty(&self, expected: Handle<Type>, found: Handle<Type>) -> IrError {
        IrError::TypeMismatch {
            expected: type_string(&self.ctx.types, expected),
            found: type_string(&self.ctx.types, found),
        }
    }

    fn is_poison(&self, v: Handle<Value>) -> bool {
        matches!(self.value(v).kind, ValueKind::Poison)
    }

    /// Creates (or folds) a unary arithmetic operation.
    pub fn unary(
        &mut self,
        op: UnaryOp,
        flags: ArithFlags,
        x: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let kind = self.primitive_of(x)?;
        if op.is_float_only() && !kind.is_float() {
            return Err(self.mismatch("a float type", self.value(x).ty));
        }
        let ty = self.value(x).ty;
        if self.is_poison(x) {
            return Ok(self.poison(ty));
        }
        if let Some(c) = self.value(x).as_constant()
            && let Some(folded) = fold::unary(op, flags, c)
        {
            return Ok(self.folded(folded, ty));
        }
        Ok(self.append(ValueKind::Unary { op, flags }, ty, vec![x]))
    }

    /// Creates (or folds) a binary arithmetic operation.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        flags: ArithFlags,
        lhs: Handle<Value>,
        rhs: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let lk = self.primitive_of(lhs)?;
        let rk = self.primitive_of(rhs)?;
        if lk != rk {
            return Err(self.mismatch_ty(self.value(lhs).ty, self.value(rhs).ty));
        }
        if lk.is_float() && !op.supports_float() {
            return Err(self.mismatch("an integer type", self.value(lhs).ty));
        }
        if lk.is_int() && !op.supports_int() {
            return Err(self.mismatch("a float type", self.value(lhs).ty));
        }
        let ty = self.value(lhs).ty;
        if self.is_poison(lhs) || self.is_poison(rhs) {
            return Ok(self.poison(ty));
        }
        if let (Some(l), Some(r)) = (self.value(lhs).as_constant(), self.value(rhs).as_constant())
            && let Some(folded) = fold::binary(op, flags, l, r)
        {
            return Ok(self.folded(folded, ty));
        }
        Ok(self.append(ValueKind::Binary { op, flags }, ty, vec![lhs, rhs]))
    }

    /// Creates (or folds) a ternary arithmetic operation.
    pub fn ternary(
        &mut self,
        op: TernaryOp,
        flags: ArithFlags,
        a: Handle<Value>,
        b: Handle<Value>,
        c: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let ak = self.primitive_of(a)?;
        if ak != self.primitive_of(b)? || ak != self.primitive_of(c)? {
            return Err(self.mismatch_ty(self.value(a).ty, self.value(b).ty));
        }
        let ty = self.value(a).ty;
        if self.is_poison(a) || self.is_poison(b) || self.is_poison(c) {
            return Ok(self.poison(ty));
        }
        if let (Some(x), Some(y), Some(z)) = (
            self.value(a).as_constant(),
            self.value(b).as_constant(),
            self.value(c).as_constant(),
        ) && let Some(folded) = fold::ternary(op, flags, x, y, z)
        {
            return Ok(self.folded(folded, ty));
        }
        Ok(self.append(ValueKind::Ternary { op, flags }, ty, vec![a, b, c]))
    }

    fn folded(&mut self, folded: Folded, ty: Handle<Type>) -> Handle<Value> {
        match folded {
            Folded::Value(v) => self.constant(v),
            Folded::Poison => self.poison(ty),
        }
    }

    /// Creates (or folds) a comparison producing Int1.
    pub fn compare(
        &mut self,
        op: CompareOp,
        flags: CompareFlags,
        lhs: Handle<Value>,
        rhs: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let lk = self.primitive_of(lhs)?;
        let rk = self.primitive_of(rhs)?;
        if lk != rk {
            return Err(self.mismatch_ty(self.value(lhs).ty, self.value(rhs).ty));
        }
        let ty = self.ctx.primitive(PrimitiveKind::Int1);
        if self.is_poison(lhs) || self.is_poison(rhs) {
            return Ok(self.poison(ty));
        }
        if let (Some(l), Some(r)) = (self.value(lhs).as_constant(), self.value(rhs).as_constant())
            && let Some(c) = fold::compare(op, flags, l, r)
        {
            return Ok(self.constant(c));
        }
        Ok(self.append(ValueKind::Compare { op, flags }, ty, vec![lhs, rhs]))
    }

    /// Creates (or folds) a primitive conversion.
    pub fn convert(
        &mut self,
        x: Handle<Value>,
        to: PrimitiveKind,
        flags: ConvertFlags,
    ) -> Result<Handle<Value>, IrError> {
        let from = self.primitive_of(x)?;
        let ty = self.ctx.primitive(to);
        if from == to {
            return Ok(x);
        }
        if self.is_poison(x) {
            return Ok(self.poison(ty));
        }
        if let Some(c) = self.value(x).as_constant() {
            let folded = fold::convert(c, to, flags);
            return Ok(self.constant(folded));
        }
        Ok(self.append(ValueKind::Convert { flags }, ty, vec![x]))
    }

    /// Creates (or folds) a bit-preserving cast between same-width kinds.
    pub fn bit_cast(
        &mut self,
        x: Handle<Value>,
        to: PrimitiveKind,
    ) -> Result<Handle<Value>, IrError> {
        let from = self.primitive_of(x)?;
        if from.size() != to.size() {
            return Err(self.mismatch(
                format!("a {}-byte primitive", to.size()),
                self.value(x).ty,
            ));
        }
        if from == to {
            return Ok(x);
        }
        let ty = self.ctx.primitive(to);
        if self.is_poison(x) {
            return Ok(self.poison(ty));
        }
        if let Some(c) = self.value(x).as_constant()
            && let Some(folded) = fold::bit_cast(c, to)
        {
            return Ok(self.constant(folded));
        }
        Ok(self.append(ValueKind::BitCast, ty, vec![x]))
    }

    /// Reinterprets a pointer as another pointer type (element type and/or
    /// address space).
    pub fn pointer_cast(
        &mut self,
        x: Handle<Value>,
        to: Handle<Type>,
    ) -> Result<Handle<Value>, IrError> {
        let from_ty = self.value(x).ty;
        if !matches!(self.ctx.types[from_ty].inner, TypeInner::Pointer { .. }) {
            return Err(self.mismatch("a pointer type", from_ty));
        }
        if !matches!(self.ctx.types[to].inner, TypeInner::Pointer { .. }) {
            return Err(self.mismatch("a pointer type", to));
        }
        if from_ty == to {
            return Ok(x);
        }
        Ok(self.append(ValueKind::PointerCast, to, vec![x]))
    }

    // ---- memory ---------------------------------------------------------

    fn pointee_of(&self, addr: Handle<Value>) -> Result<Handle<Type>, IrError> {
        match self.ctx.types[self.value(addr).ty].inner {
            TypeInner::Pointer { elem, .. } => Ok(elem),
            _ => Err(self.mismatch("a pointer type", self.value(addr).ty)),
        }
    }

    /// Loads a value through a pointer.
    pub fn load(&mut self, addr: Handle<Value>) -> Result<Handle<Value>, IrError> {
        let elem = self.pointee_of(addr)?;
        Ok(self.append(ValueKind::Load, elem, vec![addr]))
    }

    /// Stores a value through a pointer.
    pub fn store(
        &mut self,
        addr: Handle<Value>,
        value: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let elem = self.pointee_of(addr)?;
        let vty = self.value(value).ty;
        if vty != elem {
            return Err(self.mismatch_ty(elem, vty));
        }
        let void = self.ctx.void_type();
        Ok(self.append(ValueKind::Store, void, vec![addr, value]))
    }

    /// Allocates a stack slot, producing a pointer into `space`.
    pub fn alloca(&mut self, elem: Handle<Type>, space: AddressSpace) -> Handle<Value> {
        let ty = self.ctx.pointer_to(elem, space);
        self.append(ValueKind::Alloca { space }, ty, Vec::new())
    }

    /// Emits a memory fence.
    pub fn memory_barrier(&mut self, kind: BarrierKind) -> Handle<Value> {
        let void = self.ctx.void_type();
        self.append(ValueKind::MemoryBarrier { kind }, void, Vec::new())
    }

    // ---- aggregates and views -------------------------------------------

    fn struct_field(&self, ty: Handle<Type>, field: u32) -> Result<Handle<Type>, IrError> {
        match &self.ctx.types[ty].inner {
            TypeInner::Struct { fields } => fields
                .get(field as usize)
                .copied()
                .ok_or_else(|| self.mismatch(format!("a struct with > {field} fields"), ty)),
            _ => Err(self.mismatch("a struct type", ty)),
        }
    }

    /// Reads a field from an aggregate value.
    pub fn get_field(&mut self, agg: Handle<Value>, field: u32) -> Result<Handle<Value>, IrError> {
        let fty = self.struct_field(self.value(agg).ty, field)?;
        Ok(self.append(ValueKind::GetField { field }, fty, vec![agg]))
    }

    /// Produces a new aggregate with one field replaced.
    pub fn set_field(
        &mut self,
        agg: Handle<Value>,
        field: u32,
        value: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let aty = self.value(agg).ty;
        let fty = self.struct_field(aty, field)?;
        if self.value(value).ty != fty {
            return Err(self.mismatch_ty(fty, self.value(value).ty));
        }
        Ok(self.append(ValueKind::SetField { field }, aty, vec![agg, value]))
    }

    /// Takes the address of a struct field behind a pointer.
    pub fn load_field_address(
        &mut self,
        ptr: Handle<Value>,
        field: u32,
    ) -> Result<Handle<Value>, IrError> {
        let (elem, space) = match self.ctx.types[self.value(ptr).ty].inner {
            TypeInner::Pointer { elem, space } => (elem, space),
            _ => return Err(self.mismatch("a pointer to a struct", self.value(ptr).ty)),
        };
        let fty = self.struct_field(elem, field)?;
        let ty = self.ctx.pointer_to(fty, space);
        Ok(self.append(ValueKind::LoadFieldAddress { field }, ty, vec![ptr]))
    }

    /// Takes the address of an element of a view (or pointer).
    pub fn element_address(
        &mut self,
        base: Handle<Value>,
        index: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let (elem, space) = match self.ctx.types[self.value(base).ty].inner {
            TypeInner::View { elem, space } | TypeInner::Pointer { elem, space } => (elem, space),
            _ => return Err(self.mismatch("a view or pointer type", self.value(base).ty)),
        };
        let ik = self.primitive_of(index)?;
        if !ik.is_int() {
            return Err(self.mismatch("an integer index", self.value(index).ty));
        }
        let ty = self.ctx.pointer_to(elem, space);
        Ok(self.append(ValueKind::ElementAddress, ty, vec![base, index]))
    }

    /// Reads the length of a view.
    pub fn view_length(&mut self, view: Handle<Value>) -> Result<Handle<Value>, IrError> {
        if !matches!(
            self.ctx.types[self.value(view).ty].inner,
            TypeInner::View { .. }
        ) {
            return Err(self.mismatch("a view type", self.value(view).ty));
        }
        let ty = self.ctx.primitive(PrimitiveKind::Int32);
        Ok(self.append(ValueKind::ViewLength, ty, vec![view]))
    }

    // ---- atomics --------------------------------------------------------

    /// Emits an atomic read-modify-write, returning the previous value.
    pub fn atomic_rmw(
        &mut self,
        op: AtomicOp,
        flags: ArithFlags,
        addr: Handle<Value>,
        value: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let elem = self.pointee_of(addr)?;
        if self.value(value).ty != elem {
            return Err(self.mismatch_ty(elem, self.value(value).ty));
        }
        Ok(self.append(ValueKind::AtomicRmw { op, flags }, elem, vec![addr, value]))
    }

    /// Emits an atomic compare-and-swap, returning the previous value.
    pub fn atomic_cas(
        &mut self,
        addr: Handle<Value>,
        compare: Handle<Value>,
        value: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let elem = self.pointee_of(addr)?;
        if self.value(compare).ty != elem || self.value(value).ty != elem {
            return Err(self.mismatch_ty(elem, self.value(value).ty));
        }
        Ok(self.append(ValueKind::AtomicCas, elem, vec![addr, compare, value]))
    }

    // ---- φ-nodes, calls, intrinsics -------------------------------------

    /// Creates a φ-node at the head of the current block. Incoming edges
    /// are added with [`Builder::add_phi_incoming`].
    pub fn phi(&mut self, ty: Handle<Type>) -> Handle<Value> {
        self.phi_in(self.block, ty)
    }

    /// Creates a φ-node at the head of an explicit block.
    pub fn phi_in(&mut self, block: Handle<BasicBlock>, ty: Handle<Type>) -> Handle<Value> {
        let id = self.ctx.alloc_value_id();
        let m = self.ctx.method_mut(self.method);
        let handle = m.values.append(Value {
            id,
            ty,
            block,
            kind: ValueKind::Phi {
                incoming: Vec::new(),
            },
            operands: Vec::new(),
            uses: Vec::new(),
        });
        let at = m.blocks[block]
            .values
            .iter()
            .position(|&v| !m.values[v].kind.is_phi())
            .unwrap_or(m.blocks[block].values.len());
        let b = &mut m.blocks[block];
        b.values.insert(at, handle);
        b.dirty = true;
        handle
    }

    /// Adds an incoming edge to a φ-node.
    pub fn add_phi_incoming(
        &mut self,
        phi: Handle<Value>,
        pred: Handle<BasicBlock>,
        value: Handle<Value>,
    ) -> Result<(), IrError> {
        let phi_ty = self.value(phi).ty;
        let vty = self.value(value).ty;
        if phi_ty != vty {
            return Err(self.mismatch_ty(phi_ty, vty));
        }
        let m = self.ctx.method_mut(self.method);
        let ValueKind::Phi { incoming } = &mut m.values[phi].kind else {
            panic!("add_phi_incoming on a non-phi value");
        };
        incoming.push(pred);
        m.values[phi].operands.push(value);
        m.values[value].uses.push(phi);
        Ok(())
    }

    /// Removes the incoming edge from `pred`, if present.
    pub fn remove_phi_incoming(&mut self, phi: Handle<Value>, pred: Handle<BasicBlock>) {
        let m = self.ctx.method_mut(self.method);
        let ValueKind::Phi { incoming } = &mut m.values[phi].kind else {
            panic!("remove_phi_incoming on a non-phi value");
        };
        let Some(at) = incoming.iter().position(|&b| b == pred) else {
            return;
        };
        incoming.remove(at);
        let operand = m.values[phi].operands.remove(at);
        remove_one_use(&mut m.values[operand].uses, phi);
    }

    /// Emits a direct call.
    pub fn call(
        &mut self,
        callee: Handle<Method>,
        args: &[Handle<Value>],
    ) -> Result<Handle<Value>, IrError> {
        let callee_m = self.ctx.method(callee);
        let ret = callee_m.decl.return_type;
        let param_tys: Vec<_> = callee_m
            .params
            .iter()
            .map(|&p| callee_m.values[p].ty)
            .collect();
        if param_tys.len() != args.len() {
            return Err(IrError::TypeMismatch {
                expected: format!("{} arguments", param_tys.len()),
                found: format!("{} arguments", args.len()),
            });
        }
        for (&arg, &pty) in args.iter().zip(&param_tys) {
            if self.value(arg).ty != pty {
                return Err(self.mismatch_ty(pty, self.value(arg).ty));
            }
        }
        Ok(self.append(ValueKind::Call { callee }, ret, args.to_vec()))
    }

    /// Emits a grid-index query.
    pub fn grid_index(&mut self, dim: Dim3) -> Handle<Value> {
        self.int_intrinsic(IntrinsicKind::GridIndex(dim))
    }

    /// Emits a grid-dimension query.
    pub fn grid_dim(&mut self, dim: Dim3) -> Handle<Value> {
        self.int_intrinsic(IntrinsicKind::GridDim(dim))
    }

    /// Emits a group-index query.
    pub fn group_index(&mut self, dim: Dim3) -> Handle<Value> {
        self.int_intrinsic(IntrinsicKind::GroupIndex(dim))
    }

    /// Emits a group-dimension query.
    pub fn group_dim(&mut self, dim: Dim3) -> Handle<Value> {
        self.int_intrinsic(IntrinsicKind::GroupDim(dim))
    }

    /// Emits a lane-index query.
    pub fn lane_index(&mut self) -> Handle<Value> {
        self.int_intrinsic(IntrinsicKind::LaneIndex)
    }

    /// Emits a warp-size query.
    pub fn warp_size(&mut self) -> Handle<Value> {
        self.int_intrinsic(IntrinsicKind::WarpSize)
    }

    fn int_intrinsic(&mut self, kind: IntrinsicKind) -> Handle<Value> {
        let ty = self.ctx.primitive(PrimitiveKind::Int32);
        self.append(ValueKind::Intrinsic(kind), ty, Vec::new())
    }

    /// Emits a group-wide execution barrier.
    pub fn group_barrier(&mut self) -> Handle<Value> {
        let void = self.ctx.void_type();
        self.append(
            ValueKind::Intrinsic(IntrinsicKind::GroupBarrier),
            void,
            Vec::new(),
        )
    }

    /// Emits a warp shuffle of a 32-bit value.
    pub fn shuffle(
        &mut self,
        mode: ShuffleMode,
        width: u32,
        value: Handle<Value>,
        lane: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        let vk = self.primitive_of(value)?;
        if vk.size() != 4 {
            return Err(self.mismatch("a 32-bit primitive", self.value(value).ty));
        }
        let lk = self.primitive_of(lane)?;
        if !lk.is_int() {
            return Err(self.mismatch("an integer lane", self.value(lane).ty));
        }
        let ty = self.value(value).ty;
        Ok(self.append(
            ValueKind::Intrinsic(IntrinsicKind::Shuffle { mode, width }),
            ty,
            vec![value, lane],
        ))
    }

    // ---- terminators ----------------------------------------------------

    fn terminate(&mut self, term: Terminator) {
        let m = self.ctx.method_mut(self.method);
        let b = &mut m.blocks[self.block];
        assert!(
            b.terminator.is_none(),
            "block already has a terminator"
        );
        b.terminator = Some(term);
        b.dirty = true;
    }

    /// Terminates the current block with an unconditional branch.
    pub fn branch(&mut self, target: Handle<BasicBlock>) {
        self.terminate(Terminator::Branch { target });
    }

    /// Terminates the current block with a two-way branch.
    pub fn cond_branch(
        &mut self,
        condition: Handle<Value>,
        on_true: Handle<BasicBlock>,
        on_false: Handle<BasicBlock>,
    ) -> Result<(), IrError> {
        if self.primitive_of(condition)? != PrimitiveKind::Int1 {
            return Err(self.mismatch("i1", self.value(condition).ty));
        }
        self.terminate(Terminator::CondBranch {
            condition,
            on_true,
            on_false,
        });
        Ok(())
    }

    /// Terminates the current block with a multi-way branch.
    pub fn switch(
        &mut self,
        value: Handle<Value>,
        cases: Vec<(i64, Handle<BasicBlock>)>,
        default: Handle<BasicBlock>,
    ) -> Result<(), IrError> {
        let kind = self.primitive_of(value)?;
        if !kind.is_int() {
            return Err(self.mismatch("an integer type", self.value(value).ty));
        }
        self.terminate(Terminator::Switch {
            value,
            cases,
            default,
        });
        Ok(())
    }

    /// Terminates the current block with a return.
    pub fn ret(&mut self, value: Option<Handle<Value>>) -> Result<(), IrError> {
        let ret_ty = self.method().decl.return_type;
        match value {
            Some(v) => {
                if self.value(v).ty != ret_ty {
                    return Err(self.mismatch_ty(ret_ty, self.value(v).ty));
                }
            }
            None => {
                if !self.ctx.types[ret_ty].is_void() {
                    return Err(self.mismatch("a return value", ret_ty));
                }
            }
        }
        self.terminate(Terminator::Return { value });
        Ok(())
    }

    // ---- rewriting (pass support) ---------------------------------------

    /// Replaces a block's terminator, returning the previous one.
    pub fn replace_terminator(
        &mut self,
        block: Handle<BasicBlock>,
        term: Terminator,
    ) -> Option<Terminator> {
        let m = self.ctx.method_mut(self.method);
        let b = &mut m.blocks[block];
        b.dirty = true;
        b.terminator.replace(term)
    }

    /// Removes and returns a block's terminator.
    pub fn take_terminator(&mut self, block: Handle<BasicBlock>) -> Option<Terminator> {
        let m = self.ctx.method_mut(self.method);
        let b = &mut m.blocks[block];
        b.dirty = true;
        b.terminator.take()
    }

    /// Rewrites every use of `old` (operand edges and terminator
    /// references) to `new`.
    pub fn replace_all_uses(&mut self, old: Handle<Value>, new: Handle<Value>) {
        if old == new {
            return;
        }
        let m = self.ctx.method_mut(self.method);
        let users = std::mem::take(&mut m.values[old].uses);
        for &user in &users {
            for op in m.values[user].operands.iter_mut() {
                if *op == old {
                    *op = new;
                }
            }
        }
        // One use edge per rewritten operand edge.
        m.values[new].uses.extend(users.iter().copied());
        for (_, block) in m.blocks.iter_mut() {
            if let Some(term) = block.terminator.as_mut() {
                term.replace_value(old, new);
            }
        }
    }

    /// Unlinks a value with no remaining uses from its block.
    ///
    /// Panics if the value is still used; callers must rewrite uses first.
    pub fn remove_value(&mut self, v: Handle<Value>) {
        let m = self.ctx.method_mut(self.method);
        assert!(
            m.values[v].uses.is_empty(),
            "removing a value that still has uses"
        );
        let operands = std::mem::take(&mut m.values[v].operands);
        for op in operands {
            remove_one_use(&mut m.values[op].uses, v);
        }
        let block = m.values[v].block;
        let b = &mut m.blocks[block];
        if let Some(at) = b.values.iter().position(|&x| x == v) {
            b.values.remove(at);
            b.dirty = true;
        }
    }

    /// Rewrites a value in place into a constant, dropping its operands.
    ///
    /// The constant's kind must match the value's type; used by folding
    /// passes so no insertion-point juggling is needed.
    pub fn replace_with_constant(&mut self, v: Handle<Value>, c: PrimitiveValue) {
        let ty = self.ctx.primitive(c.kind());
        let m = self.ctx.method_mut(self.method);
        debug_assert_eq!(m.values[v].ty, ty, "constant kind must match value type");
        let operands = std::mem::take(&mut m.values[v].operands);
        for op in operands {
            remove_one_use(&mut m.values[op].uses, v);
        }
        m.values[v].kind = ValueKind::Constant(c);
        m.blocks[m.values[v].block].dirty = true;
    }

    /// Rewrites a value in place into poison, dropping its operands.
    pub fn replace_with_poison(&mut self, v: Handle<Value>) {
        let m = self.ctx.method_mut(self.method);
        let operands = std::mem::take(&mut m.values[v].operands);
        for op in operands {
            remove_one_use(&mut m.values[op].uses, v);
        }
        m.values[v].kind = ValueKind::Poison;
        m.blocks[m.values[v].block].dirty = true;
    }

    /// Inserts a value after the leading φ-nodes of a block.
    ///
    /// Unlike [`Builder::append_raw`] this is allowed on terminated
    /// blocks: passes insert into finished CFGs, and the value still
    /// precedes the terminator.
    pub fn insert_at_head(
        &mut self,
        block: Handle<BasicBlock>,
        kind: ValueKind,
        ty: Handle<Type>,
        operands: Vec<Handle<Value>>,
    ) -> Handle<Value> {
        let id = self.ctx.alloc_value_id();
        let m = self.ctx.method_mut(self.method);
        let handle = m.values.append(Value {
            id,
            ty,
            block,
            kind,
            operands: operands.clone(),
            uses: Vec::new(),
        });
        for op in operands {
            m.values[op].uses.push(handle);
        }
        let at = m.blocks[block]
            .values
            .iter()
            .position(|&v| !m.values[v].kind.is_phi())
            .unwrap_or(m.blocks[block].values.len());
        let b = &mut m.blocks[block];
        b.values.insert(at, handle);
        b.dirty = true;
        handle
    }

    /// Splits `block` after `at`: trailing values and the terminator move
    /// to a fresh block, and φ-edges in successors are retargeted.
    pub fn split_block(
        &mut self,
        block: Handle<BasicBlock>,
        at: Handle<Value>,
    ) -> Handle<BasicBlock> {
        let tail = self.create_block();
        let m = self.ctx.method_mut(self.method);
        let pos = m.blocks[block]
            .values
            .iter()
            .position(|&v| v == at)
            .expect("split point must live in the split block");
        let moved: Vec<_> = m.blocks[block].values.split_off(pos + 1);
        for &v in &moved {
            m.values[v].block = tail;
        }
        m.blocks[tail].values = moved;
        m.blocks[tail].terminator = m.blocks[block].terminator.take();
        m.blocks[block].dirty = true;
        m.blocks[tail].dirty = true;

        // Successor φ-edges now come from the tail.
        let succs = m.blocks[tail].successors();
        for succ in succs {
            let phis: Vec<_> = m.blocks[succ].values.clone();
            for v in phis {
                if let ValueKind::Phi { incoming } = &mut m.values[v].kind {
                    for pred in incoming.iter_mut() {
                        if *pred == block {
                            *pred = tail;
                        }
                    }
                }
            }
        }
        tail
    }

    /// Rewrites a φ-node's incoming edge from `old_pred` to `new_pred`.
    pub fn retarget_phi_incoming(
        &mut self,
        phi: Handle<Value>,
        old_pred: Handle<BasicBlock>,
        new_pred: Handle<BasicBlock>,
    ) {
        let m = self.ctx.method_mut(self.method);
        let ValueKind::Phi { incoming } = &mut m.values[phi].kind else {
            panic!("retarget_phi_incoming on a non-phi value");
        };
        for pred in incoming.iter_mut() {
            if *pred == old_pred {
                *pred = new_pred;
            }
        }
    }

    /// Moves every value of `from` to the tail of `to` (block merging).
    ///
    /// `from` must contain no φ-nodes; callers resolve them first.
    pub fn move_block_values(&mut self, from: Handle<BasicBlock>, to: Handle<BasicBlock>) {
        let m = self.ctx.method_mut(self.method);
        let moved = std::mem::take(&mut m.blocks[from].values);
        for &v in &moved {
            debug_assert!(!m.values[v].kind.is_phi(), "merging a block with phis");
            m.values[v].block = to;
        }
        m.blocks[to].values.extend(moved);
        m.blocks[to].dirty = true;
        m.blocks[from].dirty = true;
    }
}

fn remove_one_use(uses: &mut Vec<Handle<Value>>, user: Handle<Value>) {
    if let Some(at) = uses.iter().position(|&u| u == user) {
        uses.swap_remove(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{MethodDecl, MethodFlags, MethodHandle};

    fn test_method(ctx: &mut IrContext, params: &[PrimitiveKind]) -> Handle<Method> {
        let param_tys: Vec<_> = params.iter().map(|&k| ctx.primitive(k)).collect();
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "test"),
            return_type: ctx.void_type(),
            source: None,
            flags: MethodFlags::NONE,
        };
        ctx.create_method(decl, &param_tys).unwrap()
    }

    #[test]
    fn use_edges_are_symmetric() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32, PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let p1 = b.method().params[1];
        let add = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, p1).unwrap();
        assert_eq!(b.value(add).operands, vec![p0, p1]);
        assert!(b.value(p0).uses.contains(&add));
        assert!(b.value(p1).uses.contains(&add));
    }

    #[test]
    fn all_constant_binary_folds_to_constant() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[]);
        let mut b = ctx.builder(m).unwrap();
        let five = b.int32(5);
        let three = b.int32(3);
        let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, five, three).unwrap();
        let two = b.int32(2);
        let product = b.binary(BinaryOp::Mul, ArithFlags::NONE, sum, two).unwrap();
        assert_eq!(
            b.value(product).as_constant(),
            Some(PrimitiveValue::Int32(16))
        );
    }

    #[test]
    fn division_by_zero_builds_poison() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[]);
        let mut b = ctx.builder(m).unwrap();
        let x = b.int32(7);
        let zero = b.int32(0);
        let div = b.binary(BinaryOp::Div, ArithFlags::NONE, x, zero).unwrap();
        assert!(matches!(b.value(div).kind, ValueKind::Poison));
    }

    #[test]
    fn poison_propagates() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let i32t = b.primitive_type(PrimitiveKind::Int32);
        let poison = b.poison(i32t);
        let add = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, poison).unwrap();
        assert!(matches!(b.value(add).kind, ValueKind::Poison));
    }

    #[test]
    fn mixed_operand_types_are_rejected() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32, PrimitiveKind::Int64]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let p1 = b.method().params[1];
        let err = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, p1).unwrap_err();
        assert!(matches!(err, IrError::TypeMismatch { .. }));
    }

    #[test]
    #[should_panic(expected = "terminated block")]
    fn append_past_terminator_panics() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[]);
        let mut b = ctx.builder(m).unwrap();
        b.ret(None).unwrap();
        b.int32(1);
    }

    #[test]
    #[should_panic(expected = "already has a terminator")]
    fn double_termination_panics() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[]);
        let mut b = ctx.builder(m).unwrap();
        b.ret(None).unwrap();
        b.ret(None).unwrap();
    }

    #[test]
    fn phi_nodes_stay_at_block_head() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let join = b.create_block();
        b.select_block(join);
        let c = b.int32(9);
        let _ = c;
        let i32t = b.primitive_type(PrimitiveKind::Int32);
        let phi = b.phi(i32t);
        let first = b.block(join).values[0];
        assert_eq!(first, phi);
    }

    #[test]
    fn replace_all_uses_rewrites_operands_and_terminators() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32, PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let p1 = b.method().params[1];
        let add = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, p0).unwrap();
        b.replace_all_uses(p0, p1);
        assert_eq!(b.value(add).operands, vec![p1, p1]);
        assert!(b.value(p0).uses.is_empty());
        assert_eq!(b.value(p1).uses.iter().filter(|&&u| u == add).count(), 2);
    }

    #[test]
    fn remove_value_unlinks_and_drops_use_edges() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let neg = b.unary(UnaryOp::Neg, ArithFlags::NONE, p0).unwrap();
        let entry = b.current_block();
        assert!(b.block(entry).values.contains(&neg));
        b.remove_value(neg);
        assert!(!b.block(entry).values.contains(&neg));
        assert!(b.value(p0).uses.is_empty());
    }

    #[test]
    fn cond_branch_requires_int1() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let t = b.create_block();
        let f = b.create_block();
        assert!(b.cond_branch(p0, t, f).is_err());
        let zero = b.int32(0);
        let cond = b.compare(CompareOp::Ne, CompareFlags::NONE, p0, zero).unwrap();
        assert!(b.cond_branch(cond, t, f).is_ok());
    }

    #[test]
    fn convert_is_identity_on_same_kind() {
        let mut ctx = IrContext::new();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let same = b.convert(p0, PrimitiveKind::Int32, ConvertFlags::NONE).unwrap();
        assert_eq!(same, p0);
    }

    #[test]
    fn call_checks_arity_and_types() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let callee_decl = MethodDecl {
            handle: MethodHandle::new(2, "callee"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let callee = ctx.create_method(callee_decl, &[i32t]).unwrap();
        let m = test_method(&mut ctx, &[PrimitiveKind::Int32]);
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        assert!(b.call(callee, &[]).is_err());
        let call = b.call(callee, &[p0]).unwrap();
        assert_eq!(b.value(call).ty, i32t);
    }
}
