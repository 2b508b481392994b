//! Bytecode → SSA lowering.
//!
//! The lowering splits a method's code at branch leaders, then simulates
//! the evaluation stack and local-variable map block by block in reverse
//! post-order. At join points every stack slot and local that may differ
//! across predecessors becomes a φ-node; incoming edges are wired after
//! all blocks have been processed, so loop headers get pessimistic φs
//! that later CFG simplification prunes when trivial.
//!
//! Locals whose address is taken (`ldloca`) are demoted to Alloca slots;
//! the Mem2Reg pass promotes them back once the address use disappears.

use std::collections::HashMap;

use kjit_ir::{
    ArithFlags, BasicBlock, BinaryOp, Builder, CompareFlags, CompareOp, ConvertFlags, Handle,
    IrContext, Method, MethodDecl, PrimitiveKind, PrimitiveValue, TargetAbi, Type, TypeInner,
    UnaryOp, Value,
};

use crate::bytecode::{Instruction, Intrinsic, MethodBytecode, Program, TypeDesc};
use crate::FrontendError;

/// Lowers one method whose call targets are already registered.
pub fn lower_method(
    ctx: &mut IrContext,
    program: &Program,
    mb: &MethodBytecode,
) -> Result<Handle<Method>, FrontendError> {
    let param_tys: Vec<Handle<Type>> = mb.params.iter().map(|t| t.intern(ctx)).collect();
    let local_tys: Vec<Handle<Type>> = mb.locals.iter().map(|t| t.intern(ctx)).collect();
    let return_type = mb.ret.intern(ctx);

    let decl = MethodDecl {
        handle: mb.handle.clone(),
        return_type,
        source: None,
        flags: mb.flags,
    };
    let method = ctx.create_method(decl, &param_tys)?;

    // Pre-resolve call targets to context method handles.
    let mut callees: HashMap<u32, Handle<Method>> = HashMap::new();
    for token in mb.call_targets() {
        let target = program
            .find(token)
            .ok_or(FrontendError::UnknownMethod(token))?;
        let handle = ctx
            .lookup_method(&target.handle)
            .ok_or(FrontendError::UnknownMethod(token))?;
        callees.insert(token, handle);
    }

    let layout = BlockLayout::compute(&mb.code)?;
    let mut builder = ctx.builder(method)?;
    let mut lowering = Lowering::new(&mut builder, mb, layout, local_tys, callees)?;
    lowering.run()?;
    drop(builder);
    Ok(method)
}

/// Leader positions and the bytecode-level CFG.
struct BlockLayout {
    /// Sorted instruction indices that start a block.
    leaders: Vec<u32>,
    /// Leader index per block → successor leader indices.
    successors: Vec<Vec<usize>>,
    /// Reachable-predecessor edge counts per block.
    pred_count: Vec<usize>,
    /// Blocks reachable from the method start.
    reachable: Vec<bool>,
    /// Reverse post-order over block indices.
    rpo: Vec<usize>,
}

impl BlockLayout {
    fn compute(code: &[Instruction]) -> Result<Self, FrontendError> {
        if code.is_empty() {
            return Err(FrontendError::InvalidStackState {
                detail: "method has no instructions".into(),
            });
        }
        let check_target = |t: u32| -> Result<u32, FrontendError> {
            if (t as usize) < code.len() {
                Ok(t)
            } else {
                Err(FrontendError::UnsupportedInstruction(format!(
                    "branch target {t} out of bounds"
                )))
            }
        };

        let mut leaders = vec![0u32];
        for (i, instr) in code.iter().enumerate() {
            match instr {
                Instruction::Br(t) | Instruction::BrTrue(t) | Instruction::BrFalse(t) => {
                    leaders.push(check_target(*t)?);
                }
                Instruction::Switch(targets) => {
                    for &t in targets {
                        leaders.push(check_target(t)?);
                    }
                }
                _ => {}
            }
            if instr.is_branch() && i + 1 < code.len() {
                leaders.push((i + 1) as u32);
            }
        }
        leaders.sort_unstable();
        leaders.dedup();

        let block_of = |target: u32| -> usize {
            leaders
                .binary_search(&target)
                .expect("branch targets are leaders")
        };
        let block_count = leaders.len();
        let mut successors = vec![Vec::new(); block_count];
        for b in 0..block_count {
            let end = leaders.get(b + 1).map_or(code.len(), |&l| l as usize);
            let last = &code[end - 1];
            let fallthrough = || {
                if end < code.len() {
                    Some(block_of(end as u32))
                } else {
                    None
                }
            };
            let succs: Vec<usize> = match last {
                Instruction::Br(t) => vec![block_of(*t)],
                Instruction::BrTrue(t) | Instruction::BrFalse(t) => {
                    let ft = fallthrough().ok_or_else(|| {
                        FrontendError::UnsupportedInstruction(
                            "conditional branch at end of code".into(),
                        )
                    })?;
                    vec![block_of(*t), ft]
                }
                Instruction::Switch(targets) => {
                    let ft = fallthrough().ok_or_else(|| {
                        FrontendError::UnsupportedInstruction("switch at end of code".into())
                    })?;
                    let mut s: Vec<usize> = targets.iter().map(|&t| block_of(t)).collect();
                    s.push(ft);
                    s
                }
                Instruction::Ret => Vec::new(),
                _ => {
                    let ft = fallthrough().ok_or_else(|| {
                        FrontendError::UnsupportedInstruction(
                            "control falls off the end of the method".into(),
                        )
                    })?;
                    vec![ft]
                }
            };
            successors[b] = succs;
        }

        // RPO over the leader graph.
        let mut visited = vec![false; block_count];
        let mut postorder = Vec::new();
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
        visited[0] = true;
        while !stack.is_empty() {
            let next = {
                let (b, at) = stack.last_mut().expect("non-empty stack");
                let next = successors[*b].get(*at).copied();
                *at += 1;
                next
            };
            match next {
                Some(succ) => {
                    if !visited[succ] {
                        visited[succ] = true;
                        stack.push((succ, 0));
                    }
                }
                None => {
                    let (b, _) = stack.pop().expect("non-empty stack");
                    postorder.push(b);
                }
            }
        }
        let rpo: Vec<usize> = postorder.into_iter().rev().collect();

        // Dead bytecode may still branch at live joins; only reachable
        // edges count as predecessors.
        let mut pred_count = vec![0usize; block_count];
        for (b, succs) in successors.iter().enumerate() {
            if !visited[b] {
                continue;
            }
            for &s in succs {
                pred_count[s] += 1;
            }
        }

        Ok(Self {
            leaders,
            successors,
            pred_count,
            reachable: visited,
            rpo,
        })
    }

    fn block_of(&self, target: u32) -> usize {
        self.leaders
            .binary_search(&target)
            .expect("branch targets are leaders")
    }

    fn range(&self, block: usize, code_len: usize) -> std::ops::Range<usize> {
        let start = self.leaders[block] as usize;
        let end = self.leaders.get(block + 1).map_or(code_len, |&l| l as usize);
        start..end
    }
}

/// One local-variable slot during simulation.
#[derive(Clone, Copy)]
enum Slot {
    /// SSA-tracked current value.
    Value(Handle<Value>),
    /// Address-taken local backed by an Alloca.
    Alloca(Handle<Value>),
}

/// Simulation state at a block boundary.
#[derive(Clone)]
struct MachineState {
    stack: Vec<Handle<Value>>,
    locals: Vec<Slot>,
}

struct Lowering<'b, 'ctx> {
    b: &'b mut Builder<'ctx>,
    mb: &'b MethodBytecode,
    layout: BlockLayout,
    callees: HashMap<u32, Handle<Method>>,
    local_tys: Vec<Handle<Type>>,
    blocks: Vec<Handle<BasicBlock>>,
    /// The preamble (method entry) holding local initialization; it
    /// branches to the first leader and acts as its extra predecessor.
    preamble: Handle<BasicBlock>,
    preamble_state: MachineState,
    entry_state: Vec<Option<MachineState>>,
    exit_state: Vec<Option<MachineState>>,
    /// φs created at block entries, to be wired once all exits exist:
    /// (block index, slot index into stack ++ locals, φ handle).
    pending: Vec<(usize, usize, Handle<Value>)>,
}

impl<'b, 'ctx> Lowering<'b, 'ctx> {
    fn new(
        b: &'b mut Builder<'ctx>,
        mb: &'b MethodBytecode,
        layout: BlockLayout,
        local_tys: Vec<Handle<Type>>,
        callees: HashMap<u32, Handle<Method>>,
    ) -> Result<Self, FrontendError> {
        let block_count = layout.leaders.len();
        let preamble = b.method().entry;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(b.create_block());
        }

        // Address-taken locals become Alloca slots in the preamble.
        let mut address_taken = vec![false; mb.locals.len()];
        for instr in &mb.code {
            if let Instruction::LdLocA(i) = instr {
                let slot =
                    address_taken
                        .get_mut(*i as usize)
                        .ok_or(FrontendError::InvalidStackState {
                            detail: format!("ldloca references unknown local {i}"),
                        })?;
                *slot = true;
            }
        }

        b.select_block(preamble);
        let mut locals = Vec::with_capacity(mb.locals.len());
        for (i, &ty) in local_tys.iter().enumerate() {
            if address_taken[i] {
                let alloca = b.alloca(ty, kjit_ir::AddressSpace::Local);
                let init = zero_value(b, ty);
                b.store(alloca, init)?;
                locals.push(Slot::Alloca(alloca));
            } else {
                locals.push(Slot::Value(zero_value(b, ty)));
            }
        }
        b.branch(blocks[0]);

        Ok(Self {
            b,
            mb,
            layout,
            callees,
            local_tys,
            blocks,
            preamble,
            preamble_state: MachineState {
                stack: Vec::new(),
                locals,
            },
            entry_state: vec![None; block_count],
            exit_state: vec![None; block_count],
            pending: Vec::new(),
        })
    }

    fn run(&mut self) -> Result<(), FrontendError> {
        for i in 0..self.layout.rpo.len() {
            let block = self.layout.rpo[i];
            self.lower_block(block)?;
        }
        self.wire_pending_phis()?;
        Ok(())
    }

    /// Total predecessor edge count, counting the preamble for block 0.
    fn pred_edges(&self, block: usize) -> usize {
        self.layout.pred_count[block] + usize::from(block == 0)
    }

    /// Entry state for a block: copied from a unique predecessor, or φs
    /// for every slot when the block joins several paths (or is a loop
    /// header whose back edges are not yet processed).
    fn block_entry_state(&mut self, block: usize) -> Result<MachineState, FrontendError> {
        if let Some(state) = &self.entry_state[block] {
            return Ok(state.clone());
        }
        // A template comes from any processed predecessor; RPO guarantees
        // at least one forward predecessor was handled (block 0 always
        // has the preamble).
        let template = if block == 0 {
            Some(self.preamble_state.clone())
        } else {
            None
        };
        let template = template
            .or_else(|| {
                self.layout
                    .rpo
                    .iter()
                    .filter_map(|&p| {
                        if self.layout.successors[p].contains(&block) {
                            self.exit_state[p].clone()
                        } else {
                            None
                        }
                    })
                    .next()
            })
            .ok_or(FrontendError::InvalidStackState {
                detail: "join block has no processed predecessor".into(),
            })?;

        let state = if self.pred_edges(block) == 1 {
            template
        } else {
            let mut stack = Vec::with_capacity(template.stack.len());
            for (slot, &v) in template.stack.iter().enumerate() {
                let ty = self.b.value(v).ty;
                let phi = self.b.phi_in(self.blocks[block], ty);
                self.pending.push((block, slot, phi));
                stack.push(phi);
            }
            let mut locals = Vec::with_capacity(template.locals.len());
            for (i, slot) in template.locals.iter().enumerate() {
                match slot {
                    // Alloca slots are invariant across the method.
                    Slot::Alloca(a) => locals.push(Slot::Alloca(*a)),
                    Slot::Value(_) => {
                        let ty = self.local_tys[i];
                        let phi = self.b.phi_in(self.blocks[block], ty);
                        self.pending.push((block, template.stack.len() + i, phi));
                        locals.push(Slot::Value(phi));
                    }
                }
            }
            MachineState { stack, locals }
        };
        self.entry_state[block] = Some(state.clone());
        Ok(state)
    }

    fn wire_pending_phis(&mut self) -> Result<(), FrontendError> {
        let pending = std::mem::take(&mut self.pending);
        for (block, slot, phi) in pending {
            if block == 0 {
                let stack_len = self.preamble_state.stack.len();
                let value = if slot < stack_len {
                    self.preamble_state.stack[slot]
                } else {
                    match self.preamble_state.locals[slot - stack_len] {
                        Slot::Value(v) => v,
                        Slot::Alloca(_) => unreachable!("alloca slots never get phis"),
                    }
                };
                self.b.add_phi_incoming(phi, self.preamble, value)?;
            }
            for p in 0..self.layout.leaders.len() {
                if !self.layout.reachable[p] {
                    continue;
                }
                let edges = self.layout.successors[p]
                    .iter()
                    .filter(|&&s| s == block)
                    .count();
                if edges == 0 {
                    continue;
                }
                let expected_depth = self.entry_state[block]
                    .as_ref()
                    .map(|s| s.stack.len())
                    .unwrap_or(0);
                let exit = self.exit_state[p]
                    .as_ref()
                    .ok_or(FrontendError::InvalidStackState {
                        detail: "predecessor of a join was never processed".into(),
                    })?;
                let stack_len = exit.stack.len();
                if stack_len != expected_depth {
                    return Err(FrontendError::InvalidStackState {
                        detail: format!(
                            "stack depth mismatch at join: {stack_len} vs {expected_depth}"
                        ),
                    });
                }
                let value = if slot < stack_len {
                    *exit
                        .stack
                        .get(slot)
                        .ok_or(FrontendError::InvalidStackState {
                            detail: "stack depth mismatch at join".into(),
                        })?
                } else {
                    match exit.locals[slot - stack_len] {
                        Slot::Value(v) => v,
                        Slot::Alloca(_) => unreachable!("alloca slots never get phis"),
                    }
                };
                for _ in 0..edges {
                    self.b.add_phi_incoming(phi, self.blocks[p], value)?;
                }
            }
        }
        Ok(())
    }

    fn lower_block(&mut self, block: usize) -> Result<(), FrontendError> {
        let mut state = self.block_entry_state(block)?;
        self.b.select_block(self.blocks[block]);

        let range = self.layout.range(block, self.mb.code.len());
        let mut terminated = false;
        for pc in range.clone() {
            let instr = self.mb.code[pc].clone();
            if self.lower_instruction(&instr, &mut state, block)? {
                terminated = true;
                break;
            }
        }
        if !terminated {
            // Fall through to the next leader.
            let next = self.layout.block_of(range.end as u32);
            self.b.branch(self.blocks[next]);
        }
        self.exit_state[block] = Some(state);
        Ok(())
    }

    fn pop(&self, state: &mut MachineState) -> Result<Handle<Value>, FrontendError> {
        state.stack.pop().ok_or(FrontendError::InvalidStackState {
            detail: "pop from an empty evaluation stack".into(),
        })
    }

    /// Lowers one instruction; returns `true` when it terminated the block.
    fn lower_instruction(
        &mut self,
        instr: &Instruction,
        state: &mut MachineState,
        block: usize,
    ) -> Result<bool, FrontendError> {
        match instr {
            Instruction::Nop => {}
            Instruction::Dup => {
                let top = *state.stack.last().ok_or(FrontendError::InvalidStackState {
                    detail: "dup on an empty evaluation stack".into(),
                })?;
                state.stack.push(top);
            }
            Instruction::Pop => {
                self.pop(state)?;
            }
            Instruction::LdArg(i) => {
                let param = self
                    .b
                    .method()
                    .params
                    .get(*i as usize)
                    .copied()
                    .ok_or(FrontendError::InvalidStackState {
                        detail: format!("ldarg references unknown parameter {i}"),
                    })?;
                state.stack.push(param);
            }
            Instruction::LdLoc(i) => {
                let slot = *state.locals.get(*i as usize).ok_or(
                    FrontendError::InvalidStackState {
                        detail: format!("ldloc references unknown local {i}"),
                    },
                )?;
                let v = match slot {
                    Slot::Value(v) => v,
                    Slot::Alloca(a) => self.b.load(a)?,
                };
                state.stack.push(v);
            }
            Instruction::StLoc(i) => {
                let v = self.pop(state)?;
                let slot =
                    state
                        .locals
                        .get_mut(*i as usize)
                        .ok_or(FrontendError::InvalidStackState {
                            detail: format!("stloc references unknown local {i}"),
                        })?;
                match slot {
                    Slot::Value(current) => *current = v,
                    Slot::Alloca(a) => {
                        let a = *a;
                        self.b.store(a, v)?;
                    }
                }
            }
            Instruction::LdLocA(i) => {
                let slot = *state.locals.get(*i as usize).ok_or(
                    FrontendError::InvalidStackState {
                        detail: format!("ldloca references unknown local {i}"),
                    },
                )?;
                match slot {
                    Slot::Alloca(a) => state.stack.push(a),
                    Slot::Value(_) => unreachable!("address-taken locals are alloca slots"),
                }
            }
            Instruction::LdcI32(v) => {
                let c = self.b.constant(PrimitiveValue::Int32(*v));
                state.stack.push(c);
            }
            Instruction::LdcI64(v) => {
                let c = self.b.constant(PrimitiveValue::Int64(*v));
                state.stack.push(c);
            }
            Instruction::LdcF32(v) => {
                let c = self.b.constant(PrimitiveValue::Float32(*v));
                state.stack.push(c);
            }
            Instruction::LdcF64(v) => {
                let c = self.b.constant(PrimitiveValue::Float64(*v));
                state.stack.push(c);
            }
            Instruction::LdNull(td) => {
                let ty = self.intern(td);
                let null = self.b.null(ty);
                state.stack.push(null);
            }
            Instruction::LdStr(s) => {
                let v = self.b.string_constant(s.clone());
                state.stack.push(v);
            }

            Instruction::Add => self.binary(state, BinaryOp::Add, ArithFlags::NONE)?,
            Instruction::Sub => self.binary(state, BinaryOp::Sub, ArithFlags::NONE)?,
            Instruction::Mul => self.binary(state, BinaryOp::Mul, ArithFlags::NONE)?,
            Instruction::Div => self.binary(state, BinaryOp::Div, ArithFlags::NONE)?,
            Instruction::DivUn => self.binary(state, BinaryOp::Div, ArithFlags::UNSIGNED)?,
            Instruction::Rem => self.binary(state, BinaryOp::Rem, ArithFlags::NONE)?,
            Instruction::RemUn => self.binary(state, BinaryOp::Rem, ArithFlags::UNSIGNED)?,
            Instruction::And => self.binary(state, BinaryOp::And, ArithFlags::NONE)?,
            Instruction::Or => self.binary(state, BinaryOp::Or, ArithFlags::NONE)?,
            Instruction::Xor => self.binary(state, BinaryOp::Xor, ArithFlags::NONE)?,
            Instruction::Shl => self.binary(state, BinaryOp::Shl, ArithFlags::NONE)?,
            Instruction::Shr => self.binary(state, BinaryOp::Shr, ArithFlags::NONE)?,
            Instruction::ShrUn => self.binary(state, BinaryOp::Shr, ArithFlags::UNSIGNED)?,
            Instruction::Min => self.binary(state, BinaryOp::Min, ArithFlags::NONE)?,
            Instruction::Max => self.binary(state, BinaryOp::Max, ArithFlags::NONE)?,
            Instruction::Neg => {
                let x = self.pop(state)?;
                let v = self.b.unary(UnaryOp::Neg, ArithFlags::NONE, x)?;
                state.stack.push(v);
            }
            Instruction::Not => {
                let x = self.pop(state)?;
                let v = self.b.unary(UnaryOp::Not, ArithFlags::NONE, x)?;
                state.stack.push(v);
            }
            Instruction::Conv(to) => {
                let x = self.pop(state)?;
                let v = self.b.convert(x, *to, ConvertFlags::NONE)?;
                state.stack.push(v);
            }
            Instruction::ConvUn(to) => {
                let x = self.pop(state)?;
                let v = self.b.convert(x, *to, ConvertFlags::SOURCE_UNSIGNED)?;
                state.stack.push(v);
            }

            Instruction::Ceq => self.compare(state, CompareOp::Eq, CompareFlags::NONE)?,
            Instruction::Cne => self.compare(state, CompareOp::Ne, CompareFlags::NONE)?,
            Instruction::Clt => self.compare(state, CompareOp::Lt, CompareFlags::NONE)?,
            Instruction::CltUn => self.compare(state, CompareOp::Lt, CompareFlags::UNSIGNED)?,
            Instruction::Cle => self.compare(state, CompareOp::Le, CompareFlags::NONE)?,
            Instruction::CleUn => self.compare(state, CompareOp::Le, CompareFlags::UNSIGNED)?,
            Instruction::Cgt => self.compare(state, CompareOp::Gt, CompareFlags::NONE)?,
            Instruction::CgtUn => self.compare(state, CompareOp::Gt, CompareFlags::UNSIGNED)?,
            Instruction::Cge => self.compare(state, CompareOp::Ge, CompareFlags::NONE)?,
            Instruction::CgeUn => self.compare(state, CompareOp::Ge, CompareFlags::UNSIGNED)?,

            Instruction::Br(t) => {
                let target = self.layout.block_of(*t);
                self.b.branch(self.blocks[target]);
                return Ok(true);
            }
            Instruction::BrTrue(t) | Instruction::BrFalse(t) => {
                let cond = self.pop(state)?;
                let cond = self.to_predicate(cond)?;
                let target = self.blocks[self.layout.block_of(*t)];
                let fallthrough = self.fallthrough_block(block)?;
                if matches!(instr, Instruction::BrTrue(_)) {
                    self.b.cond_branch(cond, target, fallthrough)?;
                } else {
                    self.b.cond_branch(cond, fallthrough, target)?;
                }
                return Ok(true);
            }
            Instruction::Switch(targets) => {
                let selector = self.pop(state)?;
                let cases: Vec<(i64, Handle<BasicBlock>)> = targets
                    .iter()
                    .enumerate()
                    .map(|(i, &t)| (i as i64, self.blocks[self.layout.block_of(t)]))
                    .collect();
                let default = self.fallthrough_block(block)?;
                self.b.switch(selector, cases, default)?;
                return Ok(true);
            }
            Instruction::Ret => {
                let is_void = matches!(self.mb.ret, TypeDesc::Void);
                let value = if is_void { None } else { Some(self.pop(state)?) };
                self.b.ret(value)?;
                return Ok(true);
            }

            Instruction::Call(token) => {
                let callee = *self
                    .callees
                    .get(token)
                    .ok_or(FrontendError::UnknownMethod(*token))?;
                let arity = self.b.context().method(callee).params.len();
                let mut args = Vec::with_capacity(arity);
                for _ in 0..arity {
                    args.push(self.pop(state)?);
                }
                args.reverse();
                let result = self.b.call(callee, &args)?;
                let ret_ty = self.b.value(result).ty;
                if !self.b.types()[ret_ty].is_void() {
                    state.stack.push(result);
                }
            }
            Instruction::Intrinsic(intrinsic) => self.intrinsic(state, *intrinsic)?,

            Instruction::LdElem => {
                let index = self.pop(state)?;
                let base = self.pop(state)?;
                let addr = self.b.element_address(base, index)?;
                let v = self.b.load(addr)?;
                state.stack.push(v);
            }
            Instruction::StElem => {
                let value = self.pop(state)?;
                let index = self.pop(state)?;
                let base = self.pop(state)?;
                let addr = self.b.element_address(base, index)?;
                self.b.store(addr, value)?;
            }
            Instruction::LdElemA => {
                let index = self.pop(state)?;
                let base = self.pop(state)?;
                let addr = self.b.element_address(base, index)?;
                state.stack.push(addr);
            }
            Instruction::LdLen => {
                let base = self.pop(state)?;
                let len = self.b.view_length(base)?;
                state.stack.push(len);
            }

            Instruction::LdFld(field) => {
                let target = self.pop(state)?;
                let ty = self.b.value(target).ty;
                let v = match self.b.types()[ty].inner {
                    TypeInner::Pointer { .. } => {
                        let addr = self.b.load_field_address(target, *field)?;
                        self.b.load(addr)?
                    }
                    _ => self.b.get_field(target, *field)?,
                };
                state.stack.push(v);
            }
            Instruction::StFld(field) => {
                let value = self.pop(state)?;
                let target = self.pop(state)?;
                let addr = self.b.load_field_address(target, *field)?;
                self.b.store(addr, value)?;
            }
            Instruction::LdFldA(field) => {
                let target = self.pop(state)?;
                let addr = self.b.load_field_address(target, *field)?;
                state.stack.push(addr);
            }
            Instruction::SizeOf(td) => {
                // Folded immediately; never becomes an IR node.
                let ty = self.intern(td);
                let size = TargetAbi::lp64().size_of(self.b.types(), ty);
                let c = self.b.constant(PrimitiveValue::Int32(size as i32));
                state.stack.push(c);
            }
        }
        Ok(false)
    }

    fn intern(&mut self, td: &TypeDesc) -> Handle<Type> {
        match td {
            TypeDesc::Void => self.b.void_type(),
            TypeDesc::Prim(kind) => self.b.primitive_type(*kind),
            TypeDesc::Ptr(elem, space) => {
                let elem = self.intern(elem);
                self.b.pointer_type(elem, *space)
            }
            TypeDesc::View(elem, space) => {
                let elem = self.intern(elem);
                self.b.view_type(elem, *space)
            }
            TypeDesc::Struct(fields) => {
                let fields = fields.iter().map(|f| self.intern(f)).collect::<Vec<_>>();
                self.b.struct_type(fields)
            }
        }
    }

    fn binary(
        &mut self,
        state: &mut MachineState,
        op: BinaryOp,
        flags: ArithFlags,
    ) -> Result<(), FrontendError> {
        let rhs = self.pop(state)?;
        let lhs = self.pop(state)?;
        // Shift amounts follow the value's width.
        let rhs = if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            let lk = self.prim_of(lhs)?;
            self.b.convert(rhs, lk, ConvertFlags::NONE)?
        } else {
            rhs
        };
        let v = self.b.binary(op, flags, lhs, rhs)?;
        state.stack.push(v);
        Ok(())
    }

    fn compare(
        &mut self,
        state: &mut MachineState,
        op: CompareOp,
        flags: CompareFlags,
    ) -> Result<(), FrontendError> {
        let rhs = self.pop(state)?;
        let lhs = self.pop(state)?;
        let v = self.b.compare(op, flags, lhs, rhs)?;
        state.stack.push(v);
        Ok(())
    }

    fn prim_of(&self, v: Handle<Value>) -> Result<PrimitiveKind, FrontendError> {
        let ty = self.b.value(v).ty;
        self.b.types()[ty]
            .as_primitive()
            .ok_or(FrontendError::InvalidStackState {
                detail: "expected a primitive operand".into(),
            })
    }

    fn to_predicate(&mut self, cond: Handle<Value>) -> Result<Handle<Value>, FrontendError> {
        if self.prim_of(cond)? == PrimitiveKind::Int1 {
            return Ok(cond);
        }
        let kind = self.prim_of(cond)?;
        let zero = self.b.constant(zero_primitive(kind));
        Ok(self.b.compare(CompareOp::Ne, CompareFlags::NONE, cond, zero)?)
    }

    fn fallthrough_block(&self, block: usize) -> Result<Handle<BasicBlock>, FrontendError> {
        let end = self.layout.range(block, self.mb.code.len()).end;
        if end >= self.mb.code.len() {
            return Err(FrontendError::UnsupportedInstruction(
                "conditional control at end of code".into(),
            ));
        }
        Ok(self.blocks[self.layout.block_of(end as u32)])
    }

    fn intrinsic(
        &mut self,
        state: &mut MachineState,
        intrinsic: Intrinsic,
    ) -> Result<(), FrontendError> {
        match intrinsic {
            Intrinsic::GridIndex(d) => {
                let v = self.b.grid_index(d);
                state.stack.push(v);
            }
            Intrinsic::GridDim(d) => {
                let v = self.b.grid_dim(d);
                state.stack.push(v);
            }
            Intrinsic::GroupIndex(d) => {
                let v = self.b.group_index(d);
                state.stack.push(v);
            }
            Intrinsic::GroupDim(d) => {
                let v = self.b.group_dim(d);
                state.stack.push(v);
            }
            Intrinsic::LaneIndex => {
                let v = self.b.lane_index();
                state.stack.push(v);
            }
            Intrinsic::WarpSize => {
                let v = self.b.warp_size();
                state.stack.push(v);
            }
            Intrinsic::GroupBarrier => {
                self.b.group_barrier();
            }
            Intrinsic::MemBarrier(kind) => {
                self.b.memory_barrier(kind);
            }
            Intrinsic::Shuffle(mode, width) => {
                let lane = self.pop(state)?;
                let value = self.pop(state)?;
                let v = self.b.shuffle(mode, width, value, lane)?;
                state.stack.push(v);
            }
            Intrinsic::Atomic(op) => {
                let value = self.pop(state)?;
                let addr = self.pop(state)?;
                let v = self.b.atomic_rmw(op, ArithFlags::NONE, addr, value)?;
                state.stack.push(v);
            }
            Intrinsic::AtomicCas => {
                let value = self.pop(state)?;
                let compare = self.pop(state)?;
                let addr = self.pop(state)?;
                let v = self.b.atomic_cas(addr, compare, value)?;
                state.stack.push(v);
            }
            Intrinsic::MathUnary(op) => {
                let x = self.pop(state)?;
                let v = self.b.unary(op, ArithFlags::NONE, x)?;
                state.stack.push(v);
            }
            Intrinsic::MathBinary(op) => {
                let rhs = self.pop(state)?;
                let lhs = self.pop(state)?;
                let v = self.b.binary(op, ArithFlags::NONE, lhs, rhs)?;
                state.stack.push(v);
            }
        }
        Ok(())
    }
}

fn zero_primitive(kind: PrimitiveKind) -> PrimitiveValue {
    match kind {
        PrimitiveKind::Int1 => PrimitiveValue::Int1(false),
        PrimitiveKind::Int8 => PrimitiveValue::Int8(0),
        PrimitiveKind::Int16 => PrimitiveValue::Int16(0),
        PrimitiveKind::Int32 => PrimitiveValue::Int32(0),
        PrimitiveKind::Int64 => PrimitiveValue::Int64(0),
        PrimitiveKind::Float32 => PrimitiveValue::Float32(0.0),
        PrimitiveKind::Float64 => PrimitiveValue::Float64(0.0),
    }
}

/// Zero-initialization for a local slot; non-primitive locals start null.
fn zero_value(b: &mut Builder<'_>, ty: Handle<Type>) -> Handle<Value> {
    match b.types()[ty].as_primitive() {
        Some(kind) => b.constant(zero_primitive(kind)),
        None => b.null(ty),
    }
}
