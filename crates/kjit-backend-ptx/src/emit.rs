//! PTX instruction emission.
//!
//! Walks a method's scope in reverse post-order and prints one PTX
//! instruction (or short sequence) per IR value. Mnemonics come from
//! lookup helpers keyed by operation, primitive type and the fast-math
//! flag. Predicate results live in `.pred` registers and are
//! materialized with `selp` when a data register is required.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use kjit_analysis::{Liveness, Scope};
use kjit_backend_core::{BackendError, BackendOptions};
use kjit_ir::{
    AddressSpace, ArithFlags, AtomicOp, BarrierKind, BasicBlock, BinaryOp, CompareFlags,
    CompareOp, ConvertFlags, Dim3, Handle, IntrinsicKind, IrContext, Method, PrimitiveKind,
    PrimitiveValue, ShuffleMode, TargetAbi, Terminator, TernaryOp, Type, TypeInner, UnaryOp,
    Value, ValueKind,
};

use crate::regalloc::{Mapping, PtxRegister, RegisterAllocator, RegisterKind};

const WARP_SIZE: u32 = 32;

/// Emits a full PTX module for a kernel: string constants, device
/// functions for surviving calls, and the `.entry` itself.
pub fn emit_module(
    ctx: &IrContext,
    kernel: Handle<Method>,
    opts: &BackendOptions,
) -> Result<(String, String), BackendError> {
    if !ctx.types[ctx.method(kernel).decl.return_type].is_void() {
        return Err(BackendError::NotSupported(
            "kernel entry points must return void".into(),
        ));
    }
    let mut out = String::new();
    out.push_str(".version 6.0\n.target sm_50\n.address_size 64\n\n");

    let functions = collect_functions(ctx, kernel);
    for &f in &functions {
        emit_strings(ctx, f, &mut out);
    }

    for &f in &functions {
        if f != kernel {
            emit_function(ctx, f, opts, false, &mut out)?;
        }
    }
    let symbol = entry_symbol(ctx, kernel);
    emit_function(ctx, kernel, opts, true, &mut out)?;
    Ok((symbol, out))
}

/// The entry symbol: `ILGPUKernel<id>`, keyed by the method token.
pub fn entry_symbol(ctx: &IrContext, kernel: Handle<Method>) -> String {
    format!("ILGPUKernel{}", ctx.method(kernel).decl.handle.token)
}

fn device_symbol(ctx: &IrContext, method: Handle<Method>) -> String {
    let handle = &ctx.method(method).decl.handle;
    let name: String = handle
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("fn{}_{name}", handle.token)
}

/// Callees in dependency order: every function precedes its callers.
fn collect_functions(ctx: &IrContext, root: Handle<Method>) -> Vec<Handle<Method>> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root, false)];
    while let Some((m, expanded)) = stack.pop() {
        if expanded {
            order.push(m);
            continue;
        }
        if !visited.insert(m) {
            continue;
        }
        stack.push((m, true));
        let method = ctx.method(m);
        for (_, block) in method.blocks.iter() {
            for &v in &block.values {
                if let ValueKind::Call { callee } = method.values[v].kind {
                    stack.push((callee, false));
                }
            }
        }
    }
    order
}

fn emit_strings(ctx: &IrContext, method: Handle<Method>, out: &mut String) {
    let m = ctx.method(method);
    for (_, block) in m.blocks.iter() {
        for &v in &block.values {
            if let ValueKind::StringConstant(s) = &m.values[v].kind {
                let bytes: Vec<String> = s
                    .bytes()
                    .chain(std::iter::once(0))
                    .map(|b| b.to_string())
                    .collect();
                let _ = writeln!(
                    out,
                    ".global .align 1 .b8 __strconst{}[{}] = {{{}}};",
                    m.values[v].id,
                    bytes.len(),
                    bytes.join(", ")
                );
            }
        }
    }
}

/// Leaf slots of a flattened type, parallel to [`Mapping::leaves`].
#[derive(Clone, Copy, Debug)]
struct Leaf {
    offset: u32,
    kind: LeafKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeafKind {
    Prim(PrimitiveKind),
    Pointer,
}

impl LeafKind {
    /// Memory access suffix; sub-word integers widen sign-extended.
    fn mem_suffix(self) -> &'static str {
        match self {
            Self::Prim(PrimitiveKind::Int1) | Self::Prim(PrimitiveKind::Int8) => "s8",
            Self::Prim(PrimitiveKind::Int16) => "s16",
            Self::Prim(PrimitiveKind::Int32) => "u32",
            Self::Prim(PrimitiveKind::Int64) => "u64",
            Self::Prim(PrimitiveKind::Float32) => "f32",
            Self::Prim(PrimitiveKind::Float64) => "f64",
            Self::Pointer => "u64",
        }
    }

    /// Parameter declaration suffix; sub-word scalars widen to 32 bits.
    fn param_suffix(self) -> &'static str {
        match self {
            Self::Prim(PrimitiveKind::Float32) => "f32",
            Self::Prim(PrimitiveKind::Float64) => "f64",
            Self::Prim(PrimitiveKind::Int64) | Self::Pointer => "u64",
            Self::Prim(_) => "u32",
        }
    }
}

fn flatten_type(
    types: &kjit_ir::UniqueArena<Type>,
    abi: &TargetAbi,
    ty: Handle<Type>,
    base: u32,
    out: &mut Vec<Leaf>,
) -> Result<(), BackendError> {
    match &types[ty].inner {
        TypeInner::Primitive(kind) => {
            out.push(Leaf {
                offset: base,
                kind: LeafKind::Prim(*kind),
            });
            Ok(())
        }
        TypeInner::Pointer { .. } | TypeInner::String => {
            out.push(Leaf {
                offset: base,
                kind: LeafKind::Pointer,
            });
            Ok(())
        }
        TypeInner::View { .. } => {
            let layout = abi.layout_of(types, ty);
            out.push(Leaf {
                offset: base + layout.field_offsets[0],
                kind: LeafKind::Pointer,
            });
            out.push(Leaf {
                offset: base + layout.field_offsets[1],
                kind: LeafKind::Prim(PrimitiveKind::Int32),
            });
            Ok(())
        }
        TypeInner::Struct { fields } => {
            let layout = abi.layout_of(types, ty);
            for (i, &field) in fields.iter().enumerate() {
                flatten_type(types, abi, field, base + layout.field_offsets[i], out)?;
            }
            Ok(())
        }
        TypeInner::Void | TypeInner::Array { .. } => Err(BackendError::NotSupported(
            "this type cannot be flattened into registers".into(),
        )),
    }
}

struct FunctionEmitter<'a> {
    ctx: &'a IrContext,
    method: &'a Method,
    abi: TargetAbi,
    fast_math: bool,
    alloc: RegisterAllocator,
    scope: Scope,
    liveness: Liveness,
    /// Values whose registers may never be recycled (params, φs, allocas
    /// and anything involved in aliasing).
    pinned: HashSet<Handle<Value>>,
    body: String,
    prologue: String,
}

fn convert_suffix(kind: PrimitiveKind, unsigned: bool) -> &'static str {
    match (kind, unsigned) {
        (PrimitiveKind::Int8, false) => "s8",
        (PrimitiveKind::Int8, true) => "u8",
        (PrimitiveKind::Int16, false) => "s16",
        (PrimitiveKind::Int16, true) => "u16",
        (PrimitiveKind::Int32, false) => "s32",
        (PrimitiveKind::Int32, true) => "u32",
        (PrimitiveKind::Int64, false) => "s64",
        (PrimitiveKind::Int64, true) => "u64",
        (PrimitiveKind::Float32, _) => "f32",
        (PrimitiveKind::Float64, _) => "f64",
        (PrimitiveKind::Int1, _) => unreachable!("predicate converts go through selp/setp"),
    }
}

fn kind_suffix(kind: PrimitiveKind, unsigned: bool) -> &'static str {
    match (kind, unsigned) {
        (PrimitiveKind::Int8 | PrimitiveKind::Int16 | PrimitiveKind::Int32, false) => "s32",
        (PrimitiveKind::Int8 | PrimitiveKind::Int16 | PrimitiveKind::Int32, true) => "u32",
        (PrimitiveKind::Int64, false) => "s64",
        (PrimitiveKind::Int64, true) => "u64",
        (PrimitiveKind::Float32, _) => "f32",
        (PrimitiveKind::Float64, _) => "f64",
        (PrimitiveKind::Int1, _) => "pred",
    }
}

fn bit_suffix(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Int64 | PrimitiveKind::Float64 => "b64",
        _ => "b32",
    }
}

fn space_qualifier(space: AddressSpace) -> &'static str {
    match space {
        AddressSpace::Generic => "",
        AddressSpace::Global => ".global",
        AddressSpace::Shared => ".shared",
        AddressSpace::Local => ".local",
        AddressSpace::Constant => ".const",
    }
}

fn emit_function(
    ctx: &IrContext,
    method: Handle<Method>,
    opts: &BackendOptions,
    is_entry: bool,
    out: &mut String,
) -> Result<(), BackendError> {
    let m = ctx.method(method);
    let scope = Scope::compute(m);
    let liveness = Liveness::compute(m, &scope);
    let mut emitter = FunctionEmitter {
        ctx,
        method: m,
        abi: TargetAbi::lp64(),
        fast_math: opts.specialization.fast_math(),
        alloc: RegisterAllocator::new(),
        scope,
        liveness,
        pinned: HashSet::new(),
        body: String::new(),
        prologue: String::new(),
    };

    let ret_ty = m.decl.return_type;
    let ret_leaves = if ctx.types[ret_ty].is_void() {
        Vec::new()
    } else {
        let mut leaves = Vec::new();
        flatten_type(&ctx.types, &emitter.abi, ret_ty, 0, &mut leaves)?;
        if leaves.len() != 1 {
            return Err(BackendError::NotSupported(
                "aggregate return values for device functions".into(),
            ));
        }
        leaves
    };

    // Flattened parameter list.
    let prefix = if is_entry { "_kernel_param" } else { "_param" };
    let mut param_decls = Vec::new();
    let mut param_loads: Vec<(String, Leaf, PtxRegister)> = Vec::new();
    let mut flat_index = 0usize;
    for &p in &m.params {
        let ty = m.values[p].ty;
        let mut leaves = Vec::new();
        flatten_type(&ctx.types, &emitter.abi, ty, 0, &mut leaves)?;
        let mapping = emitter.alloc.bind(&ctx.types, p, ty)?;
        emitter.pinned.insert(p);
        for (leaf, reg) in leaves.iter().zip(mapping.leaves()) {
            let name = format!("{prefix}_{flat_index}");
            param_decls.push(format!(".param .{} {name}", leaf.kind.param_suffix()));
            param_loads.push((name, *leaf, reg));
            flat_index += 1;
        }
    }

    // Header.
    if is_entry {
        let _ = writeln!(out, ".visible .entry {}(", entry_symbol(ctx, method));
    } else if ret_leaves.is_empty() {
        let _ = writeln!(out, ".visible .func {}(", device_symbol(ctx, method));
    } else {
        let _ = writeln!(
            out,
            ".visible .func (.param .{} func_retval0) {}(",
            ret_leaves[0].kind.param_suffix(),
            device_symbol(ctx, method)
        );
    }
    if !param_decls.is_empty() {
        let _ = writeln!(out, "    {}", param_decls.join(",\n    "));
    }
    out.push_str(")\n");
    if is_entry {
        if let Some(n) = opts.specialization.pinned_group_size() {
            let _ = writeln!(out, ".reqntid {n}, 1, 1");
        } else if let Some(n) = opts.specialization.max_group_size {
            let _ = writeln!(out, ".maxntid {n}, 1, 1");
        }
    }
    out.push_str("{\n");

    // Prologue: parameter loads into registers.
    for (name, leaf, reg) in &param_loads {
        match (leaf.kind, reg.kind) {
            (LeafKind::Prim(PrimitiveKind::Int1), RegisterKind::Pred) => {
                let tmp = emitter.alloc.alloc(RegisterKind::Int32);
                let _ = writeln!(emitter.prologue, "\tld.param.u32 {tmp}, [{name}];");
                let _ = writeln!(emitter.prologue, "\tsetp.ne.u32 {reg}, {tmp}, 0;");
                emitter.alloc.release_reg(tmp);
            }
            _ => {
                let _ = writeln!(
                    emitter.prologue,
                    "\tld.param.{} {reg}, [{name}];",
                    leaf.kind.param_suffix()
                );
            }
        }
    }

    // Pre-bind φ registers and alloca addresses.
    let mut local_decls = String::new();
    for &block in emitter.scope.blocks().to_vec().iter() {
        for &v in emitter.method.blocks[block].values.clone().iter() {
            match &emitter.method.values[v].kind {
                ValueKind::Phi { .. } => {
                    let ty = emitter.method.values[v].ty;
                    emitter.alloc.bind(&ctx.types, v, ty)?;
                    emitter.pinned.insert(v);
                }
                ValueKind::Alloca { .. } => {
                    let ty = emitter.method.values[v].ty;
                    let TypeInner::Pointer { elem, .. } = ctx.types[ty].inner else {
                        return Err(BackendError::InvalidCodeGeneration(
                            "alloca without a pointer type".into(),
                        ));
                    };
                    let layout = emitter.abi.layout_of(&ctx.types, elem);
                    let id = emitter.method.values[v].id;
                    let _ = writeln!(
                        local_decls,
                        "\t.local .align {} .b8 __alloca{id}[{}];",
                        layout.align.max(1),
                        layout.size.max(1)
                    );
                    let mapping = emitter.alloc.bind(&ctx.types, v, ty)?;
                    emitter.pinned.insert(v);
                    let reg = mapping.reg()?;
                    let _ = writeln!(emitter.prologue, "\tmov.u64 {reg}, __alloca{id};");
                }
                _ => {}
            }
        }
    }

    // Body.
    for block_pos in 0..emitter.scope.blocks().len() {
        let block = emitter.scope.blocks()[block_pos];
        emitter.emit_block(block, ret_leaves.first().copied())?;
    }

    // Declarations reflect the high-water marks after full emission.
    for (kind, count) in emitter.alloc.declarations() {
        let _ = writeln!(out, "\t.reg {} {}<{}>;", kind.decl(), kind.prefix(), count);
    }
    out.push_str(&local_decls);
    out.push('\n');
    out.push_str(&emitter.prologue);
    out.push_str(&emitter.body);
    out.push_str("}\n\n");
    Ok(())
}

impl<'a> FunctionEmitter<'a> {
    fn types(&self) -> &kjit_ir::UniqueArena<Type> {
        &self.ctx.types
    }

    fn value(&self, v: Handle<Value>) -> &Value {
        &self.method.values[v]
    }

    fn prim_of(&self, v: Handle<Value>) -> Result<PrimitiveKind, BackendError> {
        self.types()[self.value(v).ty].as_primitive().ok_or_else(|| {
            BackendError::InvalidCodeGeneration("expected a primitive operand".into())
        })
    }

    fn reg_of(&self, v: Handle<Value>) -> Result<PtxRegister, BackendError> {
        self.alloc.get(v)?.reg()
    }

    fn fast(&self, flags: ArithFlags) -> bool {
        self.fast_math || flags.contains(ArithFlags::FAST)
    }

    fn line(&mut self, s: impl AsRef<str>) {
        self.body.push('\t');
        self.body.push_str(s.as_ref());
        self.body.push('\n');
    }

    fn emit_block(
        &mut self,
        block: Handle<BasicBlock>,
        ret_leaf: Option<Leaf>,
    ) -> Result<(), BackendError> {
        let _ = writeln!(self.body, "BB{}:", block.index());

        // Block-local last uses, for register recycling.
        let values = self.method.blocks[block].values.clone();
        let mut last_use: HashMap<Handle<Value>, usize> = HashMap::new();
        for (pos, &v) in values.iter().enumerate() {
            for &op in &self.value(v).operands {
                last_use.insert(op, pos);
            }
        }
        if let Some(term) = &self.method.blocks[block].terminator {
            for v in term.used_values() {
                last_use.insert(v, values.len());
            }
        }

        for (pos, &v) in values.iter().enumerate() {
            self.emit_value(v)?;
            self.recycle(block, pos, v, &last_use);
        }

        let term = self.method.blocks[block]
            .terminator
            .clone()
            .ok_or_else(|| {
                BackendError::InvalidCodeGeneration("reachable block without terminator".into())
            })?;
        self.emit_phi_moves(block)?;
        self.emit_terminator(&term, ret_leaf)?;
        Ok(())
    }

    /// Recycles registers whose whole live range sits in this block.
    fn recycle(
        &mut self,
        block: Handle<BasicBlock>,
        pos: usize,
        v: Handle<Value>,
        last_use: &HashMap<Handle<Value>, usize>,
    ) {
        let mut candidates: Vec<Handle<Value>> = self
            .value(v)
            .operands
            .iter()
            .copied()
            .filter(|&op| self.value(op).block == block)
            .collect();
        candidates.push(v);
        for c in candidates {
            let ends_here = match last_use.get(&c) {
                Some(&p) => p == pos,
                None => c == v && self.value(v).uses.is_empty(),
            };
            if ends_here
                && self.value(c).block == block
                && !self.pinned.contains(&c)
                && !self.liveness.live_out(block).contains(&c)
                && self.alloc.is_bound(c)
            {
                self.alloc.release(c);
            }
        }
    }

    fn bind(&mut self, v: Handle<Value>) -> Result<Mapping, BackendError> {
        let ty = self.value(v).ty;
        self.alloc.bind(&self.ctx.types, v, ty)
    }

    fn alias(&mut self, v: Handle<Value>, source: Handle<Value>, mapping: Mapping) {
        self.alloc.bind_alias(v, mapping);
        self.pinned.insert(v);
        self.pinned.insert(source);
    }

    /// Materializes a predicate into a fresh b32 register (`selp`).
    /// The caller releases the register.
    fn pred_to_data(&mut self, pred: PtxRegister) -> PtxRegister {
        let r = self.alloc.alloc(RegisterKind::Int32);
        self.line(format!("selp.b32 {r}, 1, 0, {pred};"));
        r
    }

    fn float_literal(&self, c: PrimitiveValue) -> String {
        match c {
            PrimitiveValue::Float32(f) => format!("0f{:08X}", f.to_bits()),
            PrimitiveValue::Float64(f) => format!("0d{:016X}", f.to_bits()),
            _ => unreachable!("integer literals print decimally"),
        }
    }

    fn emit_constant(&mut self, v: Handle<Value>, c: PrimitiveValue) -> Result<(), BackendError> {
        let mapping = self.bind(v)?;
        let reg = mapping.reg()?;
        match c {
            PrimitiveValue::Int1(b) => {
                self.line(format!("setp.ne.u32 {reg}, {}, 0;", u32::from(b)));
            }
            PrimitiveValue::Int8(x) => self.line(format!("mov.s32 {reg}, {x};")),
            PrimitiveValue::Int16(x) => self.line(format!("mov.s32 {reg}, {x};")),
            PrimitiveValue::Int32(x) => self.line(format!("mov.s32 {reg}, {x};")),
            PrimitiveValue::Int64(x) => self.line(format!("mov.s64 {reg}, {x};")),
            PrimitiveValue::Float32(_) => {
                let lit = self.float_literal(c);
                self.line(format!("mov.f32 {reg}, {lit};"));
            }
            PrimitiveValue::Float64(_) => {
                let lit = self.float_literal(c);
                self.line(format!("mov.f64 {reg}, {lit};"));
            }
        }
        Ok(())
    }

    /// Zero-fills a mapping (null and poison values; null views become
    /// the pair `(0, 0)`).
    fn emit_zero(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let mapping = self.bind(v)?;
        for reg in mapping.leaves() {
            match reg.kind {
                RegisterKind::Pred => self.line(format!("setp.ne.u32 {reg}, 0, 0;")),
                RegisterKind::Int32 => self.line(format!("mov.s32 {reg}, 0;")),
                RegisterKind::Int64 => self.line(format!("mov.s64 {reg}, 0;")),
                RegisterKind::Float32 => self.line(format!("mov.f32 {reg}, 0f00000000;")),
                RegisterKind::Float64 => self.line(format!("mov.f64 {reg}, 0d0000000000000000;")),
                _ => unreachable!("allocated registers are never special"),
            }
        }
        Ok(())
    }

    fn emit_value(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let kind = self.value(v).kind.clone();
        match kind {
            ValueKind::Constant(c) => self.emit_constant(v, c),
            ValueKind::Null | ValueKind::Poison => self.emit_zero(v),
            ValueKind::StringConstant(_) => {
                let mapping = self.bind(v)?;
                let reg = mapping.reg()?;
                let id = self.value(v).id;
                self.line(format!("mov.u64 {reg}, __strconst{id};"));
                Ok(())
            }
            ValueKind::Parameter { .. } => Ok(()),
            ValueKind::Phi { .. } | ValueKind::Alloca { .. } => Ok(()),
            ValueKind::Unary { op, flags } => self.emit_unary(v, op, flags),
            ValueKind::Binary { op, flags } => self.emit_binary(v, op, flags),
            ValueKind::Ternary { op, flags } => self.emit_ternary(v, op, flags),
            ValueKind::Compare { op, flags } => self.emit_compare(v, op, flags),
            ValueKind::Convert { flags } => self.emit_convert(v, flags),
            ValueKind::BitCast => self.emit_bit_cast(v),
            ValueKind::PointerCast => self.emit_pointer_cast(v),
            ValueKind::Load => self.emit_load(v),
            ValueKind::Store => self.emit_store(v),
            ValueKind::MemoryBarrier { kind } => {
                self.line(match kind {
                    BarrierKind::Group => "membar.cta;",
                    BarrierKind::Device => "membar.gl;",
                    BarrierKind::System => "membar.sys;",
                });
                Ok(())
            }
            ValueKind::GetField { field } => {
                let src = self.value(v).operands[0];
                let child = self.alloc.get(src)?.child(field as usize)?.clone();
                self.alias(v, src, child);
                Ok(())
            }
            ValueKind::SetField { field } => self.emit_set_field(v, field),
            ValueKind::LoadFieldAddress { field } => self.emit_field_address(v, field),
            ValueKind::ElementAddress => self.emit_element_address(v),
            ValueKind::ViewLength => {
                let src = self.value(v).operands[0];
                let child = self.alloc.get(src)?.child(1)?.clone();
                self.alias(v, src, child);
                Ok(())
            }
            ValueKind::AtomicRmw { op, flags } => self.emit_atomic_rmw(v, op, flags),
            ValueKind::AtomicCas => self.emit_atomic_cas(v),
            ValueKind::Call { callee } => self.emit_call(v, callee),
            ValueKind::Intrinsic(kind) => self.emit_intrinsic(v, kind),
        }
    }

    fn emit_unary(
        &mut self,
        v: Handle<Value>,
        op: UnaryOp,
        flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let x = self.value(v).operands[0];
        let kind = self.prim_of(v)?;
        let src = self.reg_of(x)?;
        let dst = self.bind(v)?.reg()?;
        let fast = self.fast(flags);

        match (op, kind) {
            (UnaryOp::Not, PrimitiveKind::Int1) => {
                self.line(format!("not.pred {dst}, {src};"));
            }
            (UnaryOp::Not, _) => {
                self.line(format!("not.{} {dst}, {src};", bit_suffix(kind)));
            }
            (UnaryOp::Neg, _) => {
                self.line(format!("neg.{} {dst}, {src};", kind_suffix(kind, false)));
            }
            (UnaryOp::Abs, _) => {
                self.line(format!("abs.{} {dst}, {src};", kind_suffix(kind, false)));
            }
            (UnaryOp::Ceiling, PrimitiveKind::Float32) => {
                self.line(format!("cvt.rpi.f32.f32 {dst}, {src};"));
            }
            (UnaryOp::Ceiling, PrimitiveKind::Float64) => {
                self.line(format!("cvt.rpi.f64.f64 {dst}, {src};"));
            }
            (UnaryOp::Floor, PrimitiveKind::Float32) => {
                self.line(format!("cvt.rmi.f32.f32 {dst}, {src};"));
            }
            (UnaryOp::Floor, PrimitiveKind::Float64) => {
                self.line(format!("cvt.rmi.f64.f64 {dst}, {src};"));
            }
            (UnaryOp::Sqrt, PrimitiveKind::Float32) => {
                let mode = if fast { "approx.ftz" } else { "rn" };
                self.line(format!("sqrt.{mode}.f32 {dst}, {src};"));
            }
            (UnaryOp::Sqrt, PrimitiveKind::Float64) => {
                self.line(format!("sqrt.rn.f64 {dst}, {src};"));
            }
            (UnaryOp::Rsqrt, PrimitiveKind::Float32) => {
                self.line(format!("rsqrt.approx.f32 {dst}, {src};"));
            }
            (UnaryOp::Rsqrt, PrimitiveKind::Float64) => {
                self.line(format!("rsqrt.approx.f64 {dst}, {src};"));
            }
            (UnaryOp::Sin, PrimitiveKind::Float32) => {
                self.line(format!("sin.approx.f32 {dst}, {src};"));
            }
            (UnaryOp::Cos, PrimitiveKind::Float32) => {
                self.line(format!("cos.approx.f32 {dst}, {src};"));
            }
            (UnaryOp::Tanh, PrimitiveKind::Float32) => {
                self.line(format!("tanh.approx.f32 {dst}, {src};"));
            }
            (UnaryOp::Exp2, PrimitiveKind::Float32) => {
                self.line(format!("ex2.approx.f32 {dst}, {src};"));
            }
            (UnaryOp::Log2, PrimitiveKind::Float32) => {
                self.line(format!("lg2.approx.f32 {dst}, {src};"));
            }
            // exp(x) = 2^(x * log2 e), log(x) = lg2(x) * ln 2.
            (UnaryOp::Exp, PrimitiveKind::Float32) => {
                self.line(format!("mul.f32 {dst}, {src}, 0f3FB8AA3B;"));
                self.line(format!("ex2.approx.f32 {dst}, {dst};"));
            }
            (UnaryOp::Log, PrimitiveKind::Float32) => {
                self.line(format!("lg2.approx.f32 {dst}, {src};"));
                self.line(format!("mul.f32 {dst}, {dst}, 0f3F317218;"));
            }
            (_, PrimitiveKind::Float64) => {
                return Err(BackendError::NotSupported(format!(
                    "{op:?} has no native f64 lowering on PTX"
                )));
            }
            _ => {
                return Err(BackendError::NotSupported(format!(
                    "{op:?} on {kind:?} has no PTX lowering"
                )));
            }
        }
        Ok(())
    }

    fn emit_binary(
        &mut self,
        v: Handle<Value>,
        op: BinaryOp,
        flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let (l, r) = (self.value(v).operands[0], self.value(v).operands[1]);
        let kind = self.prim_of(v)?;
        let lr = self.reg_of(l)?;
        let rr = self.reg_of(r)?;
        let dst = self.bind(v)?.reg()?;
        let unsigned = flags.contains(ArithFlags::UNSIGNED);
        let fast = self.fast(flags) && kind == PrimitiveKind::Float32;
        let t = kind_suffix(kind, unsigned);
        let ftz = if fast { ".ftz" } else { "" };

        if kind == PrimitiveKind::Int1 {
            let mnemonic = match op {
                BinaryOp::And => "and.pred",
                BinaryOp::Or => "or.pred",
                BinaryOp::Xor => "xor.pred",
                _ => {
                    return Err(BackendError::NotSupported(format!(
                        "{op:?} on predicates has no PTX lowering"
                    )));
                }
            };
            self.line(format!("{mnemonic} {dst}, {lr}, {rr};"));
            return Ok(());
        }

        match op {
            BinaryOp::Add if kind.is_float() => {
                self.line(format!("add{ftz}.{t} {dst}, {lr}, {rr};"));
            }
            BinaryOp::Add => self.line(format!("add.{t} {dst}, {lr}, {rr};")),
            BinaryOp::Sub if kind.is_float() => {
                self.line(format!("sub{ftz}.{t} {dst}, {lr}, {rr};"));
            }
            BinaryOp::Sub => self.line(format!("sub.{t} {dst}, {lr}, {rr};")),
            BinaryOp::Mul if kind.is_float() => {
                self.line(format!("mul{ftz}.{t} {dst}, {lr}, {rr};"));
            }
            BinaryOp::Mul => self.line(format!("mul.lo.{t} {dst}, {lr}, {rr};")),
            BinaryOp::Div if kind == PrimitiveKind::Float32 => {
                let mode = if fast { "approx.ftz" } else { "rn" };
                self.line(format!("div.{mode}.f32 {dst}, {lr}, {rr};"));
            }
            BinaryOp::Div if kind == PrimitiveKind::Float64 => {
                self.line(format!("div.rn.f64 {dst}, {lr}, {rr};"));
            }
            BinaryOp::Div => self.line(format!("div.{t} {dst}, {lr}, {rr};")),
            BinaryOp::Rem if kind.is_float() => {
                return Err(BackendError::NotSupported(
                    "floating-point remainder has no PTX lowering".into(),
                ));
            }
            BinaryOp::Rem => self.line(format!("rem.{t} {dst}, {lr}, {rr};")),
            BinaryOp::And => self.line(format!("and.{} {dst}, {lr}, {rr};", bit_suffix(kind))),
            BinaryOp::Or => self.line(format!("or.{} {dst}, {lr}, {rr};", bit_suffix(kind))),
            BinaryOp::Xor => self.line(format!("xor.{} {dst}, {lr}, {rr};", bit_suffix(kind))),
            BinaryOp::Shl => self.line(format!("shl.{} {dst}, {lr}, {rr};", bit_suffix(kind))),
            BinaryOp::Shr => self.line(format!("shr.{t} {dst}, {lr}, {rr};")),
            BinaryOp::Min => self.line(format!("min.{t} {dst}, {lr}, {rr};")),
            BinaryOp::Max => self.line(format!("max.{t} {dst}, {lr}, {rr};")),
            // pow(a, b) = 2^(b * lg2 a); f32 only.
            BinaryOp::Pow if kind == PrimitiveKind::Float32 => {
                self.line(format!("lg2.approx.f32 {dst}, {lr};"));
                self.line(format!("mul.f32 {dst}, {dst}, {rr};"));
                self.line(format!("ex2.approx.f32 {dst}, {dst};"));
            }
            BinaryOp::Pow | BinaryOp::Atan2 => {
                return Err(BackendError::NotSupported(format!(
                    "{op:?} on {kind:?} has no PTX lowering"
                )));
            }
        }
        Ok(())
    }

    fn emit_ternary(
        &mut self,
        v: Handle<Value>,
        op: TernaryOp,
        flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let TernaryOp::MultiplyAdd = op;
        let ops = self.value(v).operands.clone();
        let kind = self.prim_of(v)?;
        let a = self.reg_of(ops[0])?;
        let b = self.reg_of(ops[1])?;
        let c = self.reg_of(ops[2])?;
        let dst = self.bind(v)?.reg()?;
        let unsigned = flags.contains(ArithFlags::UNSIGNED);
        match kind {
            PrimitiveKind::Float32 => self.line(format!("fma.rn.f32 {dst}, {a}, {b}, {c};")),
            PrimitiveKind::Float64 => self.line(format!("fma.rn.f64 {dst}, {a}, {b}, {c};")),
            PrimitiveKind::Int1 => {
                return Err(BackendError::NotSupported(
                    "fused multiply-add on predicates".into(),
                ));
            }
            _ => self.line(format!(
                "mad.lo.{} {dst}, {a}, {b}, {c};",
                kind_suffix(kind, unsigned)
            )),
        }
        Ok(())
    }

    fn emit_compare(
        &mut self,
        v: Handle<Value>,
        op: CompareOp,
        flags: CompareFlags,
    ) -> Result<(), BackendError> {
        let (l, r) = (self.value(v).operands[0], self.value(v).operands[1]);
        let kind = self.prim_of(l)?;
        let lr = self.reg_of(l)?;
        let rr = self.reg_of(r)?;
        let dst = self.bind(v)?.reg()?;

        if kind == PrimitiveKind::Int1 {
            match op {
                CompareOp::Ne => self.line(format!("xor.pred {dst}, {lr}, {rr};")),
                CompareOp::Eq => {
                    self.line(format!("xor.pred {dst}, {lr}, {rr};"));
                    self.line(format!("not.pred {dst}, {dst};"));
                }
                _ => {
                    return Err(BackendError::NotSupported(
                        "ordered comparison of predicates".into(),
                    ));
                }
            }
            return Ok(());
        }

        let unordered = flags.contains(CompareFlags::UNORDERED) && kind.is_float();
        let rel = match (op, unordered) {
            (CompareOp::Eq, false) => "eq",
            (CompareOp::Ne, false) => "ne",
            (CompareOp::Lt, false) => "lt",
            (CompareOp::Le, false) => "le",
            (CompareOp::Gt, false) => "gt",
            (CompareOp::Ge, false) => "ge",
            (CompareOp::Eq, true) => "equ",
            (CompareOp::Ne, true) => "neu",
            (CompareOp::Lt, true) => "ltu",
            (CompareOp::Le, true) => "leu",
            (CompareOp::Gt, true) => "gtu",
            (CompareOp::Ge, true) => "geu",
        };
        let t = kind_suffix(kind, flags.contains(CompareFlags::UNSIGNED));
        self.line(format!("setp.{rel}.{t} {dst}, {lr}, {rr};"));
        Ok(())
    }

    fn emit_convert(&mut self, v: Handle<Value>, flags: ConvertFlags) -> Result<(), BackendError> {
        let x = self.value(v).operands[0];
        let from = self.prim_of(x)?;
        let to = self.prim_of(v)?;
        let src_unsigned = flags.contains(ConvertFlags::SOURCE_UNSIGNED);

        // Predicates materialize through selp/setp.
        if from == PrimitiveKind::Int1 {
            let pred = self.reg_of(x)?;
            let dst = self.bind(v)?.reg()?;
            match to {
                PrimitiveKind::Int64 => self.line(format!("selp.b64 {dst}, 1, 0, {pred};")),
                PrimitiveKind::Float32 => {
                    self.line(format!("selp.f32 {dst}, 0f3F800000, 0f00000000, {pred};"));
                }
                PrimitiveKind::Float64 => self.line(format!(
                    "selp.f64 {dst}, 0d3FF0000000000000, 0d0000000000000000, {pred};"
                )),
                _ => self.line(format!("selp.b32 {dst}, 1, 0, {pred};")),
            }
            return Ok(());
        }
        if to == PrimitiveKind::Int1 {
            let src = self.reg_of(x)?;
            let dst = self.bind(v)?.reg()?;
            let t = kind_suffix(from, src_unsigned);
            let zero = if from.is_float() {
                self.float_literal(if from == PrimitiveKind::Float32 {
                    PrimitiveValue::Float32(0.0)
                } else {
                    PrimitiveValue::Float64(0.0)
                })
            } else {
                "0".into()
            };
            self.line(format!("setp.ne.{t} {dst}, {src}, {zero};"));
            return Ok(());
        }

        let src = self.reg_of(x)?;
        let dst = self.bind(v)?.reg()?;
        let from_t = convert_suffix(from, src_unsigned);
        let to_t = convert_suffix(to, false);
        let rounding = match (from.is_float(), to.is_float()) {
            (true, false) => ".rzi",
            (false, true) => ".rn",
            (true, true) if to.size() < from.size() => ".rn",
            _ => "",
        };
        self.line(format!("cvt{rounding}.{to_t}.{from_t} {dst}, {src};"));
        Ok(())
    }

    fn emit_bit_cast(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let x = self.value(v).operands[0];
        let kind = self.prim_of(v)?;
        let src = self.reg_of(x)?;
        let dst = self.bind(v)?.reg()?;
        self.line(format!("mov.{} {dst}, {src};", bit_suffix(kind)));
        Ok(())
    }

    fn emit_pointer_cast(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let x = self.value(v).operands[0];
        let from_space = self.pointer_space(x)?;
        let to_space = self.pointer_space(v)?;
        if from_space == to_space {
            let mapping = self.alloc.get(x)?.clone();
            self.alias(v, x, mapping);
            return Ok(());
        }
        let src = self.reg_of(x)?;
        let dst = self.bind(v)?.reg()?;
        match (from_space, to_space) {
            (AddressSpace::Generic, to) => {
                let q = space_qualifier(to);
                self.line(format!("cvta.to{q}.u64 {dst}, {src};"));
            }
            (from, AddressSpace::Generic) => {
                let q = space_qualifier(from);
                self.line(format!("cvta{q}.u64 {dst}, {src};"));
            }
            (from, to) => {
                self.line(format!("cvta{}.u64 {dst}, {src};", space_qualifier(from)));
                self.line(format!("cvta.to{}.u64 {dst}, {dst};", space_qualifier(to)));
            }
        }
        Ok(())
    }

    fn pointer_space(&self, v: Handle<Value>) -> Result<AddressSpace, BackendError> {
        match self.types()[self.value(v).ty].inner {
            TypeInner::Pointer { space, .. } | TypeInner::View { space, .. } => Ok(space),
            _ => Err(BackendError::InvalidCodeGeneration(
                "expected a pointer-typed value".into(),
            )),
        }
    }

    fn emit_load(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let addr = self.value(v).operands[0];
        let space = self.pointer_space(addr)?;
        let q = space_qualifier(space);
        let addr_reg = self.reg_of(addr)?;
        let ty = self.value(v).ty;
        let mut leaves = Vec::new();
        flatten_type(&self.ctx.types, &self.abi, ty, 0, &mut leaves)?;
        let mapping = self.bind(v)?;
        for (leaf, reg) in leaves.iter().zip(mapping.leaves()) {
            let addr_expr = if leaf.offset == 0 {
                format!("[{addr_reg}]")
            } else {
                format!("[{addr_reg}+{}]", leaf.offset)
            };
            if reg.kind == RegisterKind::Pred {
                let tmp = self.alloc.alloc(RegisterKind::Int32);
                self.line(format!("ld{q}.u8 {tmp}, {addr_expr};"));
                self.line(format!("setp.ne.u32 {reg}, {tmp}, 0;"));
                self.alloc.release_reg(tmp);
            } else {
                self.line(format!("ld{q}.{} {reg}, {addr_expr};", leaf.kind.mem_suffix()));
            }
        }
        Ok(())
    }

    fn emit_store(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let addr = self.value(v).operands[0];
        let value = self.value(v).operands[1];
        let space = self.pointer_space(addr)?;
        let q = space_qualifier(space);
        let addr_reg = self.reg_of(addr)?;
        let ty = self.value(value).ty;
        let mut leaves = Vec::new();
        flatten_type(&self.ctx.types, &self.abi, ty, 0, &mut leaves)?;
        let mapping = self.alloc.get(value)?.clone();
        for (leaf, reg) in leaves.iter().zip(mapping.leaves()) {
            let addr_expr = if leaf.offset == 0 {
                format!("[{addr_reg}]")
            } else {
                format!("[{addr_reg}+{}]", leaf.offset)
            };
            if reg.kind == RegisterKind::Pred {
                let tmp = self.pred_to_data(reg);
                self.line(format!("st{q}.u8 {addr_expr}, {tmp};"));
                self.alloc.release_reg(tmp);
            } else {
                self.line(format!("st{q}.{} {addr_expr}, {reg};", leaf.kind.mem_suffix()));
            }
        }
        Ok(())
    }

    fn emit_set_field(&mut self, v: Handle<Value>, field: u32) -> Result<(), BackendError> {
        let (agg, val) = (self.value(v).operands[0], self.value(v).operands[1]);
        let src = self.alloc.get(agg)?.clone();
        let update = self.alloc.get(val)?.clone();
        let dst = self.bind(v)?;
        let Mapping::Composite(dst_children) = &dst else {
            return Err(BackendError::InvalidCodeGeneration(
                "setfield on a non-composite mapping".into(),
            ));
        };
        for (i, child) in dst_children.iter().enumerate() {
            let from = if i == field as usize {
                update.clone()
            } else {
                src.child(i)?.clone()
            };
            for (d, s) in child.leaves().into_iter().zip(from.leaves()) {
                self.emit_move(d, s);
            }
        }
        Ok(())
    }

    fn emit_field_address(&mut self, v: Handle<Value>, field: u32) -> Result<(), BackendError> {
        let ptr = self.value(v).operands[0];
        let TypeInner::Pointer { elem, .. } = self.types()[self.value(ptr).ty].inner else {
            return Err(BackendError::InvalidCodeGeneration(
                "field address of a non-pointer".into(),
            ));
        };
        let layout = self.abi.layout_of(&self.ctx.types, elem);
        let offset = layout.field_offsets[field as usize];
        if offset == 0 {
            // Zero offsets alias the source pointer.
            let mapping = self.alloc.get(ptr)?.clone();
            self.alias(v, ptr, mapping);
            return Ok(());
        }
        let src = self.reg_of(ptr)?;
        let dst = self.bind(v)?.reg()?;
        self.line(format!("add.s64 {dst}, {src}, {offset};"));
        Ok(())
    }

    fn emit_element_address(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let (base, index) = (self.value(v).operands[0], self.value(v).operands[1]);
        let elem = match self.types()[self.value(base).ty].inner {
            TypeInner::Pointer { elem, .. } | TypeInner::View { elem, .. } => elem,
            _ => {
                return Err(BackendError::InvalidCodeGeneration(
                    "element address of a non-view".into(),
                ));
            }
        };
        let size = self.abi.size_of(&self.ctx.types, elem);
        let base_reg = match self.alloc.get(base)? {
            Mapping::Single(r) => *r,
            composite => composite.child(0)?.reg()?,
        };
        let index_kind = self.prim_of(index)?;
        let index_reg = self.reg_of(index)?;
        let dst = self.bind(v)?.reg()?;
        match index_kind {
            PrimitiveKind::Int64 => {
                self.line(format!("mul.lo.s64 {dst}, {index_reg}, {size};"));
                self.line(format!("add.s64 {dst}, {base_reg}, {dst};"));
            }
            _ => {
                self.line(format!("mul.wide.s32 {dst}, {index_reg}, {size};"));
                self.line(format!("add.s64 {dst}, {base_reg}, {dst};"));
            }
        }
        Ok(())
    }

    fn emit_atomic_rmw(
        &mut self,
        v: Handle<Value>,
        op: AtomicOp,
        flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let (addr, val) = (self.value(v).operands[0], self.value(v).operands[1]);
        let kind = self.prim_of(v)?;
        let space = self.pointer_space(addr)?;
        let q = space_qualifier(space);
        let addr_reg = self.reg_of(addr)?;
        let val_reg = self.reg_of(val)?;
        let dst = self.bind(v)?.reg()?;
        let unsigned = flags.contains(ArithFlags::UNSIGNED);
        let t = match (op, kind) {
            (AtomicOp::Add, PrimitiveKind::Float32) => "f32",
            (AtomicOp::Add, PrimitiveKind::Float64) => "f64",
            (AtomicOp::Min | AtomicOp::Max, k) if k.is_int() => kind_suffix(k, unsigned),
            (AtomicOp::Exchange, k) => bit_suffix(k),
            (AtomicOp::And | AtomicOp::Or | AtomicOp::Xor, k) => bit_suffix(k),
            (AtomicOp::Add, k) if k.is_int() => kind_suffix(k, true),
            _ => {
                return Err(BackendError::NotSupported(format!(
                    "atomic {op:?} on {kind:?} has no PTX lowering"
                )));
            }
        };
        let name = match op {
            AtomicOp::Add => "add",
            AtomicOp::And => "and",
            AtomicOp::Or => "or",
            AtomicOp::Xor => "xor",
            AtomicOp::Min => "min",
            AtomicOp::Max => "max",
            AtomicOp::Exchange => "exch",
        };
        self.line(format!("atom{q}.{name}.{t} {dst}, [{addr_reg}], {val_reg};"));
        Ok(())
    }

    fn emit_atomic_cas(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let ops = self.value(v).operands.clone();
        let kind = self.prim_of(v)?;
        let space = self.pointer_space(ops[0])?;
        let q = space_qualifier(space);
        let addr = self.reg_of(ops[0])?;
        let cmp = self.reg_of(ops[1])?;
        let val = self.reg_of(ops[2])?;
        let dst = self.bind(v)?.reg()?;
        self.line(format!(
            "atom{q}.cas.{} {dst}, [{addr}], {cmp}, {val};",
            bit_suffix(kind)
        ));
        Ok(())
    }

    fn emit_call(
        &mut self,
        v: Handle<Value>,
        callee: Handle<Method>,
    ) -> Result<(), BackendError> {
        let args = self.value(v).operands.clone();
        let target = device_symbol(self.ctx, callee);
        let ret_ty = self.ctx.method(callee).decl.return_type;
        let has_ret = !self.types()[ret_ty].is_void();

        self.line("{");
        let mut param_names = Vec::new();
        let mut flat = 0usize;
        for &arg in &args {
            let ty = self.value(arg).ty;
            let mut leaves = Vec::new();
            flatten_type(&self.ctx.types, &self.abi, ty, 0, &mut leaves)?;
            let mapping = self.alloc.get(arg)?.clone();
            for (leaf, reg) in leaves.iter().zip(mapping.leaves()) {
                let name = format!("param{flat}");
                let suffix = leaf.kind.param_suffix();
                self.line(format!(".param .{suffix} {name};"));
                if reg.kind == RegisterKind::Pred {
                    let tmp = self.pred_to_data(reg);
                    self.line(format!("st.param.u32 [{name}], {tmp};"));
                    self.alloc.release_reg(tmp);
                } else {
                    self.line(format!("st.param.{suffix} [{name}], {reg};"));
                }
                param_names.push(name);
                flat += 1;
            }
        }
        if has_ret {
            let mut ret_leaves = Vec::new();
            flatten_type(&self.ctx.types, &self.abi, ret_ty, 0, &mut ret_leaves)?;
            if ret_leaves.len() != 1 {
                return Err(BackendError::NotSupported(
                    "aggregate return values for device functions".into(),
                ));
            }
            let suffix = ret_leaves[0].kind.param_suffix();
            self.line(format!(".param .{suffix} retval0;"));
            self.line(format!(
                "call.uni (retval0), {target}, ({});",
                param_names.join(", ")
            ));
            let dst = self.bind(v)?.reg()?;
            if dst.kind == RegisterKind::Pred {
                let tmp = self.alloc.alloc(RegisterKind::Int32);
                self.line(format!("ld.param.u32 {tmp}, [retval0];"));
                self.line(format!("setp.ne.u32 {dst}, {tmp}, 0;"));
                self.alloc.release_reg(tmp);
            } else {
                self.line(format!("ld.param.{suffix} {dst}, [retval0];"));
            }
        } else {
            self.line(format!("call.uni {target}, ({});", param_names.join(", ")));
        }
        self.line("}");
        Ok(())
    }

    fn emit_intrinsic(
        &mut self,
        v: Handle<Value>,
        kind: IntrinsicKind,
    ) -> Result<(), BackendError> {
        let special = |dim: Dim3, base: &str| {
            let suffix = match dim {
                Dim3::X => "x",
                Dim3::Y => "y",
                Dim3::Z => "z",
            };
            format!("%{base}.{suffix}")
        };
        match kind {
            IntrinsicKind::GridIndex(d) => {
                let dst = self.bind(v)?.reg()?;
                self.line(format!("mov.u32 {dst}, {};", special(d, "ctaid")));
            }
            IntrinsicKind::GridDim(d) => {
                let dst = self.bind(v)?.reg()?;
                self.line(format!("mov.u32 {dst}, {};", special(d, "nctaid")));
            }
            IntrinsicKind::GroupIndex(d) => {
                let dst = self.bind(v)?.reg()?;
                self.line(format!("mov.u32 {dst}, {};", special(d, "tid")));
            }
            IntrinsicKind::GroupDim(d) => {
                let dst = self.bind(v)?.reg()?;
                self.line(format!("mov.u32 {dst}, {};", special(d, "ntid")));
            }
            IntrinsicKind::LaneIndex => {
                let dst = self.bind(v)?.reg()?;
                self.line(format!("mov.u32 {dst}, %laneid;"));
            }
            IntrinsicKind::WarpSize => {
                let dst = self.bind(v)?.reg()?;
                self.line(format!("mov.u32 {dst}, WARP_SZ;"));
            }
            IntrinsicKind::GroupBarrier => {
                self.line("bar.sync 0;");
            }
            IntrinsicKind::Shuffle { mode, width } => {
                let ops = self.value(v).operands.clone();
                let value = self.reg_of(ops[0])?;
                let lane = self.reg_of(ops[1])?;
                let dst = self.bind(v)?.reg()?;
                // Widths beyond the warp clamp to the warp size.
                let width = width.clamp(1, WARP_SIZE);
                let clamp = if mode == ShuffleMode::Up { 0 } else { 0x1f };
                let c = ((WARP_SIZE - width) << 8) | clamp;
                let mode = match mode {
                    ShuffleMode::Idx => "idx",
                    ShuffleMode::Up => "up",
                    ShuffleMode::Down => "down",
                    ShuffleMode::Xor => "bfly",
                };
                self.line(format!(
                    "shfl.sync.{mode}.b32 {dst}, {value}, {lane}, {c}, 0xffffffff;"
                ));
            }
        }
        Ok(())
    }

    fn emit_move(&mut self, dst: PtxRegister, src: PtxRegister) {
        if dst == src {
            return;
        }
        let t = match dst.kind {
            RegisterKind::Pred => "pred",
            RegisterKind::Int32 => "b32",
            RegisterKind::Int64 => "b64",
            RegisterKind::Float32 => "f32",
            RegisterKind::Float64 => "f64",
            _ => unreachable!("allocated registers are never special"),
        };
        self.line(format!("mov.{t} {dst}, {src};"));
    }

    /// Emits the φ-assignments owed to successors of `block`, resolving
    /// parallel-copy cycles through a temporary.
    fn emit_phi_moves(&mut self, block: Handle<BasicBlock>) -> Result<(), BackendError> {
        let mut moves: Vec<(PtxRegister, PtxRegister)> = Vec::new();
        for succ in self.method.blocks[block].successors() {
            for &pv in &self.method.blocks[succ].values {
                let ValueKind::Phi { incoming } = &self.method.values[pv].kind else {
                    continue;
                };
                for (pred, &input) in incoming.iter().zip(&self.method.values[pv].operands) {
                    if *pred != block {
                        continue;
                    }
                    let dsts = self.alloc.get(pv)?.leaves();
                    let srcs = self.alloc.get(input)?.leaves();
                    for (d, s) in dsts.into_iter().zip(srcs) {
                        if d != s {
                            moves.push((d, s));
                        }
                    }
                }
            }
        }
        moves.sort_by_key(|&(d, _)| (d.kind.prefix(), d.index));
        moves.dedup();

        // Parallel-copy scheduling: emit safe moves first; break cycles by
        // parking the clobbered destination in a scratch register.
        while !moves.is_empty() {
            let safe = moves
                .iter()
                .position(|&(d, _)| !moves.iter().any(|&(_, s)| s == d));
            match safe {
                Some(i) => {
                    let (d, s) = moves.remove(i);
                    self.emit_move(d, s);
                }
                None => {
                    let (d, _) = moves[0];
                    let tmp = self.alloc.alloc(d.kind);
                    self.emit_move(tmp, d);
                    for (_, src) in moves.iter_mut() {
                        if *src == d {
                            *src = tmp;
                        }
                    }
                    // moves[0] is now safe and resolves next iteration;
                    // the scratch stays pinned for the function.
                }
            }
        }
        Ok(())
    }

    fn emit_terminator(
        &mut self,
        term: &Terminator,
        ret_leaf: Option<Leaf>,
    ) -> Result<(), BackendError> {
        match term {
            Terminator::Branch { target } => {
                self.line(format!("bra BB{};", target.index()));
            }
            Terminator::CondBranch {
                condition,
                on_true,
                on_false,
            } => {
                let pred = self.reg_of(*condition)?;
                let _ = writeln!(self.body, "\t@{pred} bra BB{};", on_true.index());
                self.line(format!("bra BB{};", on_false.index()));
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let kind = self.prim_of(*value)?;
                let sel = self.reg_of(*value)?;
                let t = kind_suffix(kind, false);
                let scratch = self.alloc.alloc(RegisterKind::Pred);
                for (case, target) in cases {
                    self.line(format!("setp.eq.{t} {scratch}, {sel}, {case};"));
                    let _ = writeln!(self.body, "\t@{scratch} bra BB{};", target.index());
                }
                self.alloc.release_reg(scratch);
                self.line(format!("bra BB{};", default.index()));
            }
            Terminator::Return { value } => {
                if let (Some(v), Some(leaf)) = (value, ret_leaf) {
                    let reg = self.reg_of(*v)?;
                    if reg.kind == RegisterKind::Pred {
                        let tmp = self.pred_to_data(reg);
                        self.line(format!("st.param.u32 [func_retval0], {tmp};"));
                        self.alloc.release_reg(tmp);
                    } else {
                        self.line(format!(
                            "st.param.{} [func_retval0], {reg};",
                            leaf.kind.param_suffix()
                        ));
                    }
                }
                self.line("ret;");
            }
        }
        Ok(())
    }
}
