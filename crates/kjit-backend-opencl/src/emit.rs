//! OpenCL C statement emission.
//!
//! Basic blocks become labeled positions and branches become `goto`,
//! which preserves the SSA schedule without reconstructing structured
//! control flow. φ-nodes are pre-allocated variables assigned at each
//! predecessor's terminator; their declarations are hoisted to the
//! nearest common dominator of the incoming blocks to satisfy C scoping.

use std::collections::HashMap;
use std::fmt::Write as _;

use kjit_analysis::{Dominators, Scope};
use kjit_backend_core::{BackendError, BackendOptions, Diagnostic, DiagnosticLevel};
use kjit_ir::{
    AddressSpace, ArithFlags, AtomicOp, BarrierKind, BasicBlock, BinaryOp, CompareFlags,
    CompareOp, ConvertFlags, Dim3, Handle, IntrinsicKind, IrContext, Method, PrimitiveKind,
    PrimitiveValue, ShuffleMode, Terminator, TernaryOp, TypeInner, UnaryOp, Value, ValueKind,
};

use crate::vars::{scalar_name, space_qualifier, unsigned_scalar_name, TypeGenerator};

#[derive(Default)]
struct Features {
    fp64: bool,
    subgroups: bool,
    int64_atomics: bool,
}

/// Emits a full OpenCL C translation unit for a kernel.
pub fn emit_module(
    ctx: &IrContext,
    kernel: Handle<Method>,
    opts: &BackendOptions,
) -> Result<(String, String, Vec<Diagnostic>), BackendError> {
    if !ctx.types[ctx.method(kernel).decl.return_type].is_void() {
        return Err(BackendError::NotSupported(
            "kernel entry points must return void".into(),
        ));
    }

    let mut generator = TypeGenerator::new();
    let mut features = Features::default();
    let mut diagnostics = Vec::new();
    let mut functions = String::new();

    let order = collect_functions(ctx, kernel);
    for &f in &order {
        let is_entry = f == kernel;
        let mut emitter = FunctionEmitter::new(ctx, f, opts, &mut generator, &mut features)?;
        let text = emitter.emit(is_entry)?;
        diagnostics.extend(emitter.diagnostics);
        functions.push_str(&text);
        functions.push('\n');
    }

    let mut out = String::new();
    if features.fp64 {
        out.push_str("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n");
    }
    if features.subgroups {
        out.push_str("#pragma OPENCL EXTENSION cl_khr_subgroups : enable\n");
    }
    if features.int64_atomics {
        out.push_str("#pragma OPENCL EXTENSION cl_khr_int64_base_atomics : enable\n");
        out.push_str("#pragma OPENCL EXTENSION cl_khr_int64_extended_atomics : enable\n");
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(generator.typedefs());
    if !generator.typedefs().is_empty() {
        out.push('\n');
    }
    emit_strings(ctx, &order, &mut out);
    out.push_str(&functions);

    Ok(("ILGPUKernel".into(), out, diagnostics))
}

fn collect_functions(ctx: &IrContext, root: Handle<Method>) -> Vec<Handle<Method>> {
    let mut order = Vec::new();
    let mut visited = std::collections::HashSet::new();
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

fn emit_strings(ctx: &IrContext, order: &[Handle<Method>], out: &mut String) {
    let mut any = false;
    for &f in order {
        let m = ctx.method(f);
        for (_, block) in m.blocks.iter() {
            for &v in &block.values {
                if let ValueKind::StringConstant(s) = &m.values[v].kind {
                    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                    let _ = writeln!(
                        out,
                        "__constant char __strconst{}[] = \"{escaped}\";",
                        m.values[v].id
                    );
                    any = true;
                }
            }
        }
    }
    if any {
        out.push('\n');
    }
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

struct FunctionEmitter<'a> {
    ctx: &'a IrContext,
    method: &'a Method,
    generator: &'a mut TypeGenerator,
    features: &'a mut Features,
    scope: Scope,
    doms: Dominators,
    /// Variable names; parameters may override the `v<id>` default.
    names: HashMap<Handle<Value>, String>,
    /// φ declarations hoisted per block arena index.
    hoisted: Vec<Vec<String>>,
    diagnostics: Vec<Diagnostic>,
    out: String,
    indent: usize,
    temp_counter: usize,
    fast_math: bool,
}

impl<'a> FunctionEmitter<'a> {
    fn new(
        ctx: &'a IrContext,
        method: Handle<Method>,
        opts: &BackendOptions,
        generator: &'a mut TypeGenerator,
        features: &'a mut Features,
    ) -> Result<Self, BackendError> {
        let m = ctx.method(method);
        let scope = Scope::compute(m);
        let doms = Dominators::compute(m, &scope);
        Ok(Self {
            ctx,
            method: m,
            generator,
            features,
            scope,
            doms,
            names: HashMap::new(),
            hoisted: vec![Vec::new(); m.blocks.len()],
            diagnostics: Vec::new(),
            out: String::new(),
            indent: 0,
            temp_counter: 0,
            fast_math: opts.specialization.fast_math(),
        })
    }

    fn line(&mut self, s: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(s.as_ref());
        self.out.push('\n');
    }

    fn value(&self, v: Handle<Value>) -> &'a Value {
        &self.method.values[v]
    }

    fn var(&self, v: Handle<Value>) -> String {
        self.names
            .get(&v)
            .cloned()
            .unwrap_or_else(|| format!("v{}", self.value(v).id))
    }

    fn ty_name(&mut self, ty: Handle<kjit_ir::Type>) -> Result<String, BackendError> {
        if let TypeInner::Primitive(PrimitiveKind::Float64) = self.ctx.types[ty].inner {
            self.features.fp64 = true;
        }
        self.generator.name(&self.ctx.types, ty)
    }

    fn prim_of(&self, v: Handle<Value>) -> Result<PrimitiveKind, BackendError> {
        self.ctx.types[self.value(v).ty]
            .as_primitive()
            .ok_or_else(|| {
                BackendError::InvalidCodeGeneration("expected a primitive operand".into())
            })
    }

    fn literal(&mut self, c: PrimitiveValue) -> String {
        match c {
            PrimitiveValue::Int1(b) => if b { "true" } else { "false" }.into(),
            PrimitiveValue::Int8(x) => format!("{x}"),
            PrimitiveValue::Int16(x) => format!("{x}"),
            PrimitiveValue::Int32(x) => format!("{x}"),
            PrimitiveValue::Int64(x) => format!("{x}L"),
            PrimitiveValue::Float32(x) => {
                if x.is_nan() {
                    "NAN".into()
                } else if x.is_infinite() {
                    if x > 0.0 { "INFINITY".into() } else { "-INFINITY".into() }
                } else {
                    format!("{x:?}f")
                }
            }
            PrimitiveValue::Float64(x) => {
                self.features.fp64 = true;
                if x.is_nan() {
                    "NAN".into()
                } else if x.is_infinite() {
                    if x > 0.0 { "INFINITY".into() } else { "-INFINITY".into() }
                } else {
                    format!("{x:?}")
                }
            }
        }
    }

    /// Operand expression: literals render inline, everything else by
    /// variable name.
    fn operand(&mut self, v: Handle<Value>) -> String {
        match &self.value(v).kind {
            ValueKind::Constant(c) => self.literal(*c),
            ValueKind::StringConstant(_) => format!("__strconst{}", self.value(v).id),
            _ => self.var(v),
        }
    }

    fn emit(&mut self, is_entry: bool) -> Result<String, BackendError> {
        // Signature.
        let ret = self.method.decl.return_type;
        let mut header = String::new();
        let mut prologue: Vec<String> = Vec::new();
        if is_entry {
            header.push_str("__kernel void ILGPUKernel(");
        } else {
            let ret_name = self.ty_name(ret)?;
            let _ = write!(header, "static {ret_name} {}(", device_symbol(self.ctx, {
                // The emitter method handle is only reachable through the
                // declaration, so resolve it by registry lookup.
                self.ctx
                    .lookup_method(&self.method.decl.handle)
                    .expect("emitting a registered method")
            }));
        }
        let mut params = Vec::new();
        for (i, &p) in self.method.params.iter().enumerate() {
            let ty = self.value(p).ty;
            if is_entry {
                self.flatten_param(&format!("p{i}"), ty, p, &mut params, &mut prologue)?;
            } else {
                let ty_name = self.ty_name(ty)?;
                params.push(format!("{ty_name} p{i}"));
                self.names.insert(p, format!("p{i}"));
            }
        }
        header.push_str(&params.join(", "));
        header.push(')');
        self.line(format!("{header} {{"));
        self.indent += 1;
        for stmt in prologue {
            self.line(stmt);
        }

        self.hoist_phi_declarations()?;

        for i in 0..self.scope.blocks().len() {
            let block = self.scope.blocks()[i];
            self.emit_block(block)?;
        }

        self.indent -= 1;
        self.line("}");
        Ok(std::mem::take(&mut self.out))
    }

    /// Kernel parameters flatten to scalars and pointers; views split
    /// into a pointer and a length, structs into their leaves. The
    /// original aggregate is rebuilt in the prologue.
    fn flatten_param(
        &mut self,
        name: &str,
        ty: Handle<kjit_ir::Type>,
        value: Handle<Value>,
        params: &mut Vec<String>,
        prologue: &mut Vec<String>,
    ) -> Result<(), BackendError> {
        match self.ctx.types[ty].inner.clone() {
            TypeInner::View { .. } => {
                let ty_name = self.ty_name(ty)?;
                let var = self.var(value);
                let elem = match self.ctx.types[ty].inner {
                    TypeInner::View { elem, space } => {
                        let elem_name = self.ty_name(elem)?;
                        format!("{}{elem_name}*", space_qualifier(space))
                    }
                    _ => unreachable!(),
                };
                params.push(format!("{elem} {name}"));
                params.push(format!("int {name}_len"));
                prologue.push(format!(
                    "{ty_name} {var}; {var}.ptr = {name}; {var}.len = {name}_len;"
                ));
            }
            TypeInner::Struct { fields } => {
                let ty_name = self.ty_name(ty)?;
                let var = self.var(value);
                prologue.push(format!("{ty_name} {var};"));
                for (i, &field) in fields.iter().enumerate() {
                    self.flatten_field(
                        &format!("{name}_f{i}"),
                        &format!("{var}._f{i}"),
                        field,
                        params,
                        prologue,
                    )?;
                }
            }
            _ => {
                let ty_name = self.ty_name(ty)?;
                params.push(format!("{ty_name} {name}"));
                self.names.insert(value, name.to_string());
            }
        }
        Ok(())
    }

    fn flatten_field(
        &mut self,
        name: &str,
        path: &str,
        ty: Handle<kjit_ir::Type>,
        params: &mut Vec<String>,
        prologue: &mut Vec<String>,
    ) -> Result<(), BackendError> {
        match self.ctx.types[ty].inner.clone() {
            TypeInner::View { elem, space } => {
                let elem_name = self.ty_name(elem)?;
                params.push(format!("{}{elem_name}* {name}", space_qualifier(space)));
                params.push(format!("int {name}_len"));
                prologue.push(format!("{path}.ptr = {name}; {path}.len = {name}_len;"));
            }
            TypeInner::Struct { fields } => {
                for (i, &field) in fields.iter().enumerate() {
                    self.flatten_field(
                        &format!("{name}_f{i}"),
                        &format!("{path}._f{i}"),
                        field,
                        params,
                        prologue,
                    )?;
                }
            }
            _ => {
                let ty_name = self.ty_name(ty)?;
                params.push(format!("{ty_name} {name}"));
                prologue.push(format!("{path} = {name};"));
            }
        }
        Ok(())
    }

    /// φ variables declare at the nearest common dominator of their
    /// incoming blocks so every assignment site sees the declaration.
    fn hoist_phi_declarations(&mut self) -> Result<(), BackendError> {
        for i in 0..self.scope.blocks().len() {
            let block = self.scope.blocks()[i];
            for &v in &self.method.blocks[block].values {
                let ValueKind::Phi { incoming } = &self.value(v).kind else {
                    continue;
                };
                let mut nca = incoming.first().copied().unwrap_or(block);
                for &pred in incoming.iter().skip(1) {
                    nca = self.doms.nearest_common_dominator(nca, pred);
                }
                let ty_name = self.ty_name(self.value(v).ty)?;
                let var = self.var(v);
                self.hoisted[nca.index()].push(format!("{ty_name} {var};"));
            }
        }
        Ok(())
    }

    fn emit_block(&mut self, block: Handle<BasicBlock>) -> Result<(), BackendError> {
        let label_indent = self.indent;
        self.indent = 0;
        self.line(format!("BB{}: ;", block.index()));
        self.indent = label_indent;

        for decl in std::mem::take(&mut self.hoisted[block.index()]) {
            self.line(decl);
        }
        for &v in &self.method.blocks[block].values.clone() {
            self.emit_value(v)?;
        }
        self.emit_phi_assignments(block)?;
        let term = self.method.blocks[block]
            .terminator
            .clone()
            .ok_or_else(|| {
                BackendError::InvalidCodeGeneration("reachable block without terminator".into())
            })?;
        self.emit_terminator(&term)?;
        Ok(())
    }

    fn emit_phi_assignments(&mut self, block: Handle<BasicBlock>) -> Result<(), BackendError> {
        // (dst, src, type) triples forming one parallel copy.
        let mut moves: Vec<(String, String, String)> = Vec::new();
        for succ in self.method.blocks[block].successors() {
            for &pv in &self.method.blocks[succ].values {
                let ValueKind::Phi { incoming } = &self.value(pv).kind else {
                    continue;
                };
                for (pred, &input) in incoming.iter().zip(&self.value(pv).operands) {
                    if *pred != block {
                        continue;
                    }
                    let dst = self.var(pv);
                    let src = self.operand(input);
                    if dst != src {
                        let ty = self.ty_name(self.value(pv).ty)?;
                        moves.push((dst, src, ty));
                    }
                }
            }
        }
        moves.sort();
        moves.dedup();

        while !moves.is_empty() {
            let safe = moves
                .iter()
                .position(|(d, _, _)| !moves.iter().any(|(_, s, _)| s == d));
            match safe {
                Some(i) => {
                    let (d, s, _) = moves.remove(i);
                    self.line(format!("{d} = {s};"));
                }
                None => {
                    let (d, _, ty) = moves[0].clone();
                    let tmp = format!("__pcopy{}", self.temp_counter);
                    self.temp_counter += 1;
                    self.line(format!("{ty} {tmp} = {d};"));
                    for (_, s, _) in moves.iter_mut() {
                        if *s == d {
                            *s = tmp.clone();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_terminator(&mut self, term: &Terminator) -> Result<(), BackendError> {
        match term {
            Terminator::Branch { target } => {
                self.line(format!("goto BB{};", target.index()));
            }
            Terminator::CondBranch {
                condition,
                on_true,
                on_false,
            } => {
                let cond = self.operand(*condition);
                self.line(format!("if ({cond}) {{"));
                self.indent += 1;
                self.line(format!("goto BB{};", on_true.index()));
                self.indent -= 1;
                self.line("} else {");
                self.indent += 1;
                self.line(format!("goto BB{};", on_false.index()));
                self.indent -= 1;
                self.line("}");
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let sel = self.operand(*value);
                self.line(format!("switch ({sel}) {{"));
                self.indent += 1;
                for (k, target) in cases {
                    self.line(format!("case {k}: goto BB{};", target.index()));
                }
                self.line(format!("default: goto BB{};", default.index()));
                self.indent -= 1;
                self.line("}");
            }
            Terminator::Return { value } => match value {
                Some(v) => {
                    let expr = self.operand(*v);
                    self.line(format!("return {expr};"));
                }
                None => self.line("return;"),
            },
        }
        Ok(())
    }

    fn assign(&mut self, v: Handle<Value>, expr: String) -> Result<(), BackendError> {
        let ty = self.ty_name(self.value(v).ty)?;
        let var = self.var(v);
        self.line(format!("{ty} {var} = {expr};"));
        Ok(())
    }

    fn emit_value(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let kind = self.value(v).kind.clone();
        match kind {
            // Inline at use sites.
            ValueKind::Constant(_) | ValueKind::StringConstant(_) => Ok(()),
            ValueKind::Parameter { .. } | ValueKind::Phi { .. } => Ok(()),
            ValueKind::Null | ValueKind::Poison => {
                let ty = self.value(v).ty;
                let ty_name = self.ty_name(ty)?;
                let var = self.var(v);
                match self.ctx.types[ty].inner {
                    TypeInner::View { .. } => {
                        self.line(format!("{ty_name} {var}; {var}.ptr = 0; {var}.len = 0;"));
                    }
                    TypeInner::Struct { .. } => {
                        self.line(format!("{ty_name} {var} = {{0}};"));
                    }
                    _ => self.line(format!("{ty_name} {var} = 0;")),
                }
                Ok(())
            }
            ValueKind::Unary { op, flags } => self.emit_unary(v, op, flags),
            ValueKind::Binary { op, flags } => self.emit_binary(v, op, flags),
            ValueKind::Ternary { op, flags } => self.emit_ternary(v, op, flags),
            ValueKind::Compare { op, flags } => self.emit_compare(v, op, flags),
            ValueKind::Convert { flags } => self.emit_convert(v, flags),
            ValueKind::BitCast => self.emit_bit_cast(v),
            ValueKind::PointerCast => {
                let x = self.operand(self.value(v).operands[0]);
                let ty = self.ty_name(self.value(v).ty)?;
                self.assign(v, format!("({ty}){x}"))
            }
            ValueKind::Load => {
                let addr = self.operand(self.value(v).operands[0]);
                self.assign(v, format!("*{addr}"))
            }
            ValueKind::Store => {
                let addr = self.operand(self.value(v).operands[0]);
                let val = self.operand(self.value(v).operands[1]);
                self.line(format!("*{addr} = {val};"));
                Ok(())
            }
            ValueKind::Alloca { space } => {
                let ty = self.value(v).ty;
                let TypeInner::Pointer { elem, .. } = self.ctx.types[ty].inner else {
                    return Err(BackendError::InvalidCodeGeneration(
                        "alloca without a pointer type".into(),
                    ));
                };
                let elem_name = self.ty_name(elem)?;
                let ty_name = self.ty_name(ty)?;
                let var = self.var(v);
                let id = self.value(v).id;
                let qualifier = match space {
                    AddressSpace::Shared => "__local ",
                    _ => "",
                };
                self.line(format!(
                    "{qualifier}{elem_name} __slot{id}; {ty_name} {var} = &__slot{id};"
                ));
                Ok(())
            }
            ValueKind::MemoryBarrier { kind } => {
                self.line(match kind {
                    BarrierKind::Group => "mem_fence(CLK_LOCAL_MEM_FENCE);",
                    BarrierKind::Device => "mem_fence(CLK_GLOBAL_MEM_FENCE);",
                    BarrierKind::System => {
                        "mem_fence(CLK_GLOBAL_MEM_FENCE | CLK_LOCAL_MEM_FENCE);"
                    }
                });
                Ok(())
            }
            ValueKind::GetField { field } => {
                let agg = self.operand(self.value(v).operands[0]);
                self.assign(v, format!("{agg}._f{field}"))
            }
            ValueKind::SetField { field } => {
                let agg = self.operand(self.value(v).operands[0]);
                let val = self.operand(self.value(v).operands[1]);
                let ty = self.ty_name(self.value(v).ty)?;
                let var = self.var(v);
                self.line(format!("{ty} {var} = {agg}; {var}._f{field} = {val};"));
                Ok(())
            }
            ValueKind::LoadFieldAddress { field } => {
                let ptr = self.operand(self.value(v).operands[0]);
                self.assign(v, format!("&({ptr}->_f{field})"))
            }
            ValueKind::ElementAddress => {
                let base_v = self.value(v).operands[0];
                let base = self.operand(base_v);
                let index = self.operand(self.value(v).operands[1]);
                let expr = match self.ctx.types[self.value(base_v).ty].inner {
                    TypeInner::View { .. } => format!("{base}.ptr + {index}"),
                    _ => format!("{base} + {index}"),
                };
                self.assign(v, expr)
            }
            ValueKind::ViewLength => {
                let view = self.operand(self.value(v).operands[0]);
                self.assign(v, format!("{view}.len"))
            }
            ValueKind::AtomicRmw { op, flags } => self.emit_atomic_rmw(v, op, flags),
            ValueKind::AtomicCas => self.emit_atomic(v, "cmpxchg", ArithFlags::NONE),
            ValueKind::Call { callee } => {
                let args: Vec<String> = self
                    .value(v)
                    .operands
                    .clone()
                    .into_iter()
                    .map(|a| self.operand(a))
                    .collect();
                let target = device_symbol(self.ctx, callee);
                let call = format!("{target}({})", args.join(", "));
                if self.ctx.types[self.value(v).ty].is_void() {
                    self.line(format!("{call};"));
                    Ok(())
                } else {
                    self.assign(v, call)
                }
            }
            ValueKind::Intrinsic(kind) => self.emit_intrinsic(v, kind),
        }
    }

    fn emit_unary(
        &mut self,
        v: Handle<Value>,
        op: UnaryOp,
        _flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let kind = self.prim_of(v)?;
        let x = self.operand(self.value(v).operands[0]);
        let native = self.fast_math && kind == PrimitiveKind::Float32;
        let call = |name: &str, native_ok: bool| {
            if native && native_ok {
                format!("native_{name}({x})")
            } else {
                format!("{name}({x})")
            }
        };
        let expr = match op {
            UnaryOp::Neg => format!("-{x}"),
            UnaryOp::Not if kind == PrimitiveKind::Int1 => format!("!{x}"),
            UnaryOp::Not => format!("~{x}"),
            UnaryOp::Abs if kind.is_float() => format!("fabs({x})"),
            UnaryOp::Abs => format!("({})abs({x})", scalar_name(kind)),
            UnaryOp::Ceiling => format!("ceil({x})"),
            UnaryOp::Floor => format!("floor({x})"),
            UnaryOp::Sin => call("sin", true),
            UnaryOp::Cos => call("cos", true),
            UnaryOp::Tanh => format!("tanh({x})"),
            UnaryOp::Exp => call("exp", true),
            UnaryOp::Exp2 => call("exp2", true),
            UnaryOp::Log => call("log", true),
            UnaryOp::Log2 => call("log2", true),
            UnaryOp::Sqrt => call("sqrt", true),
            UnaryOp::Rsqrt => call("rsqrt", true),
        };
        self.assign(v, expr)
    }

    fn emit_binary(
        &mut self,
        v: Handle<Value>,
        op: BinaryOp,
        flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let kind = self.prim_of(v)?;
        let l = self.operand(self.value(v).operands[0]);
        let r = self.operand(self.value(v).operands[1]);
        let unsigned = flags.contains(ArithFlags::UNSIGNED) && kind.is_int();
        let signed_name = scalar_name(kind);
        let uname = unsigned_scalar_name(kind);
        let (ul, ur) = if unsigned {
            (format!("({uname}){l}"), format!("({uname}){r}"))
        } else {
            (l.clone(), r.clone())
        };
        let back = |e: String| {
            if unsigned {
                format!("({signed_name})({e})")
            } else {
                e
            }
        };
        let expr = match op {
            BinaryOp::Add => back(format!("{ul} + {ur}")),
            BinaryOp::Sub => back(format!("{ul} - {ur}")),
            BinaryOp::Mul => back(format!("{ul} * {ur}")),
            BinaryOp::Div if kind.is_float() => format!("{l} / {r}"),
            BinaryOp::Div => back(format!("{ul} / {ur}")),
            BinaryOp::Rem if kind.is_float() => format!("fmod({l}, {r})"),
            BinaryOp::Rem => back(format!("{ul} % {ur}")),
            BinaryOp::And => format!("{l} & {r}"),
            BinaryOp::Or => format!("{l} | {r}"),
            BinaryOp::Xor => format!("{l} ^ {r}"),
            BinaryOp::Shl => format!("{l} << {r}"),
            BinaryOp::Shr => back(format!("{ul} >> {r}")),
            BinaryOp::Min if kind.is_float() => format!("fmin({l}, {r})"),
            BinaryOp::Min => back(format!("min({ul}, {ur})")),
            BinaryOp::Max if kind.is_float() => format!("fmax({l}, {r})"),
            BinaryOp::Max => back(format!("max({ul}, {ur})")),
            BinaryOp::Pow => format!("pow({l}, {r})"),
            BinaryOp::Atan2 => format!("atan2({l}, {r})"),
        };
        self.assign(v, expr)
    }

    fn emit_ternary(
        &mut self,
        v: Handle<Value>,
        op: TernaryOp,
        _flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let TernaryOp::MultiplyAdd = op;
        let kind = self.prim_of(v)?;
        let a = self.operand(self.value(v).operands[0]);
        let b = self.operand(self.value(v).operands[1]);
        let c = self.operand(self.value(v).operands[2]);
        let expr = if kind.is_float() {
            format!("fma({a}, {b}, {c})")
        } else {
            format!("{a} * {b} + {c}")
        };
        self.assign(v, expr)
    }

    fn emit_compare(
        &mut self,
        v: Handle<Value>,
        op: CompareOp,
        flags: CompareFlags,
    ) -> Result<(), BackendError> {
        let lv = self.value(v).operands[0];
        let kind = self.prim_of(lv)?;
        let l = self.operand(lv);
        let r = self.operand(self.value(v).operands[1]);
        let c_op = match op {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        let expr = if kind.is_float() {
            if flags.contains(CompareFlags::UNORDERED) {
                format!("(isnan({l}) || isnan({r}) || {l} {c_op} {r})")
            } else if op == CompareOp::Ne {
                // C `!=` is unordered; the ordered form excludes NaN.
                format!("(!isnan({l}) && !isnan({r}) && {l} != {r})")
            } else {
                format!("{l} {c_op} {r}")
            }
        } else if flags.contains(CompareFlags::UNSIGNED) {
            let uname = unsigned_scalar_name(kind);
            format!("({uname}){l} {c_op} ({uname}){r}")
        } else {
            format!("{l} {c_op} {r}")
        };
        self.assign(v, expr)
    }

    fn emit_convert(&mut self, v: Handle<Value>, flags: ConvertFlags) -> Result<(), BackendError> {
        let x_v = self.value(v).operands[0];
        let from = self.prim_of(x_v)?;
        let to = self.prim_of(v)?;
        let x = self.operand(x_v);
        let expr = if to == PrimitiveKind::Int1 {
            format!("({x} != 0)")
        } else if flags.contains(ConvertFlags::SOURCE_UNSIGNED) && from.is_int() {
            format!(
                "({})({}){x}",
                scalar_name(to),
                unsigned_scalar_name(from)
            )
        } else {
            format!("({}){x}", scalar_name(to))
        };
        self.assign(v, expr)
    }

    fn emit_bit_cast(&mut self, v: Handle<Value>) -> Result<(), BackendError> {
        let to = self.prim_of(v)?;
        let x = self.operand(self.value(v).operands[0]);
        let name = match to {
            PrimitiveKind::Int8 => "as_char",
            PrimitiveKind::Int16 => "as_short",
            PrimitiveKind::Int32 => "as_int",
            PrimitiveKind::Int64 => "as_long",
            PrimitiveKind::Float32 => "as_float",
            PrimitiveKind::Float64 => "as_double",
            PrimitiveKind::Int1 => {
                return Err(BackendError::NotSupported(
                    "bit casts involving bool".into(),
                ));
            }
        };
        self.assign(v, format!("{name}({x})"))
    }

    fn emit_atomic_rmw(
        &mut self,
        v: Handle<Value>,
        op: AtomicOp,
        flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let name = match op {
            AtomicOp::Add => "add",
            AtomicOp::And => "and",
            AtomicOp::Or => "or",
            AtomicOp::Xor => "xor",
            AtomicOp::Min => "min",
            AtomicOp::Max => "max",
            AtomicOp::Exchange => "xchg",
        };
        self.emit_atomic(v, name, flags)
    }

    fn emit_atomic(
        &mut self,
        v: Handle<Value>,
        name: &str,
        flags: ArithFlags,
    ) -> Result<(), BackendError> {
        let kind = self.prim_of(v)?;
        if kind.is_float() {
            return Err(BackendError::NotSupported(
                "floating-point atomics in OpenCL C 1.2".into(),
            ));
        }
        let addr_v = self.value(v).operands[0];
        let TypeInner::Pointer { space, .. } = self.ctx.types[self.value(addr_v).ty].inner else {
            return Err(BackendError::InvalidCodeGeneration(
                "atomic on a non-pointer".into(),
            ));
        };
        let addr = self.operand(addr_v);
        let rest: Vec<String> = self.value(v).operands[1..]
            .to_vec()
            .into_iter()
            .map(|a| self.operand(a))
            .collect();
        let unsigned = flags.contains(ArithFlags::UNSIGNED);
        let elem = if unsigned {
            unsigned_scalar_name(kind)
        } else {
            scalar_name(kind)
        };
        let prefix = if kind.size() == 8 {
            self.features.int64_atomics = true;
            "atom"
        } else {
            "atomic"
        };
        let expr = format!(
            "{prefix}_{name}((volatile {}{elem}*){addr}, {})",
            space_qualifier(space),
            rest.join(", ")
        );
        if unsigned {
            self.assign(v, format!("({})({expr})", scalar_name(kind)))
        } else {
            self.assign(v, expr)
        }
    }

    fn emit_intrinsic(
        &mut self,
        v: Handle<Value>,
        kind: IntrinsicKind,
    ) -> Result<(), BackendError> {
        let dim = |d: Dim3| match d {
            Dim3::X => 0,
            Dim3::Y => 1,
            Dim3::Z => 2,
        };
        match kind {
            IntrinsicKind::GridIndex(d) => {
                self.assign(v, format!("(int)get_group_id({})", dim(d)))
            }
            IntrinsicKind::GridDim(d) => {
                self.assign(v, format!("(int)get_num_groups({})", dim(d)))
            }
            IntrinsicKind::GroupIndex(d) => {
                self.assign(v, format!("(int)get_local_id({})", dim(d)))
            }
            IntrinsicKind::GroupDim(d) => {
                self.assign(v, format!("(int)get_local_size({})", dim(d)))
            }
            IntrinsicKind::LaneIndex => {
                self.features.subgroups = true;
                self.assign(v, "(int)get_sub_group_local_id()".to_string())
            }
            IntrinsicKind::WarpSize => {
                self.features.subgroups = true;
                self.assign(v, "(int)get_max_sub_group_size()".to_string())
            }
            IntrinsicKind::GroupBarrier => {
                self.line("barrier(CLK_LOCAL_MEM_FENCE | CLK_GLOBAL_MEM_FENCE);");
                Ok(())
            }
            IntrinsicKind::Shuffle { mode, width } => {
                self.features.subgroups = true;
                if width < 32 {
                    self.diagnostics.push(Diagnostic {
                        level: DiagnosticLevel::Warning,
                        message: format!(
                            "sub-group shuffle ignores the sub-warp width {width}"
                        ),
                    });
                }
                let value = self.operand(self.value(v).operands[0]);
                let lane = self.operand(self.value(v).operands[1]);
                let name = match mode {
                    ShuffleMode::Idx => "sub_group_shuffle",
                    ShuffleMode::Up => "sub_group_shuffle_up",
                    ShuffleMode::Down => "sub_group_shuffle_down",
                    ShuffleMode::Xor => "sub_group_shuffle_xor",
                };
                self.assign(v, format!("{name}({value}, (uint){lane})"))
            }
        }
    }
}
