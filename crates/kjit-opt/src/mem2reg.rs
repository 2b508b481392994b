//! Memory-to-register promotion.
//!
//! Promotes Alloca slots that are only loaded and stored (address never
//! escapes) into SSA values, inserting φ-nodes on the iterated dominance
//! frontier of the store blocks and renaming along the dominator tree.
//! φ-placement is pruned by a per-slot liveness check so stores feeding
//! nothing do not spawn φ-webs.

use std::collections::HashSet;

use kjit_analysis::{Dominators, Scope};
use kjit_ir::{
    BasicBlock, Builder, Handle, IrContext, Method, Type, TypeInner, Value, ValueKind,
};

use crate::Pass;

/// Promotes non-escaping Alloca slots to SSA values.
#[derive(Debug)]
pub struct Mem2Reg;

impl Pass for Mem2Reg {
    fn name(&self) -> &str {
        "mem2reg"
    }

    fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool {
        let candidates: Vec<(Handle<Value>, Handle<Type>)> =
            promotable_allocas(ctx.method(method))
                .into_iter()
                .map(|a| {
                    let ty = ctx.method(method).values[a].ty;
                    let TypeInner::Pointer { elem, .. } = ctx.types[ty].inner else {
                        unreachable!("alloca values have pointer types")
                    };
                    (a, elem)
                })
                .collect();
        if candidates.is_empty() {
            return false;
        }
        let scope = Scope::compute(ctx.method(method));
        let doms = Dominators::compute(ctx.method(method), &scope);
        let frontiers = doms.frontiers(ctx.method(method), &scope);

        // Dominator-tree children in deterministic handle order.
        let mut children: Vec<Vec<Handle<BasicBlock>>> =
            vec![Vec::new(); ctx.method(method).blocks.len()];
        for &block in scope.blocks() {
            if let Some(idom) = doms.idom(block) {
                children[idom.index()].push(block);
            }
        }
        for c in &mut children {
            c.sort();
        }

        let mut builder = ctx.builder(method).expect("no live builder during passes");
        for (alloca, elem_ty) in candidates {
            promote(&mut builder, &scope, &frontiers, &children, alloca, elem_ty);
        }
        true
    }
}

/// Allocas whose every use is a load or a store-through (never stored as a
/// value, never an operand of anything else).
fn promotable_allocas(m: &Method) -> Vec<Handle<Value>> {
    let mut out = Vec::new();
    for (_, block) in m.blocks.iter() {
        for &v in &block.values {
            let ValueKind::Alloca { .. } = m.values[v].kind else {
                continue;
            };
            let promotable = m.values[v].uses.iter().all(|&user| match &m.values[user].kind {
                ValueKind::Load => m.values[user].operands[0] == v,
                ValueKind::Store => {
                    m.values[user].operands[0] == v && m.values[user].operands[1] != v
                }
                _ => false,
            });
            if promotable {
                out.push(v);
            }
        }
    }
    out
}

#[derive(Clone, Copy)]
enum Event {
    Load(Handle<Value>),
    Store(Handle<Value>),
}

fn promote(
    builder: &mut Builder<'_>,
    scope: &Scope,
    frontiers: &[Vec<Handle<BasicBlock>>],
    children: &[Vec<Handle<BasicBlock>>],
    alloca: Handle<Value>,
    elem_ty: Handle<Type>,
) {
    let block_count = builder.method().blocks.len();

    // Per-block load/store events in program order, plus liveness seeds.
    let mut events: Vec<Vec<Event>> = vec![Vec::new(); block_count];
    let mut exposed = vec![false; block_count];
    let mut kills = vec![false; block_count];
    let mut store_blocks = Vec::new();
    {
        let m = builder.method();
        for &block in scope.blocks() {
            for &v in &m.blocks[block].values {
                match &m.values[v].kind {
                    ValueKind::Load if m.values[v].operands[0] == alloca => {
                        if !kills[block.index()] {
                            exposed[block.index()] = true;
                        }
                        events[block.index()].push(Event::Load(v));
                    }
                    ValueKind::Store if m.values[v].operands[0] == alloca => {
                        if !kills[block.index()] {
                            store_blocks.push(block);
                        }
                        kills[block.index()] = true;
                        events[block.index()].push(Event::Store(v));
                    }
                    _ => {}
                }
            }
        }
    }

    // Per-slot liveness: live_in = exposed ∨ (live_out ∧ ¬kill).
    let mut live_in = exposed.clone();
    let mut changed = true;
    while changed {
        changed = false;
        for &block in scope.blocks().iter().rev() {
            let i = block.index();
            if live_in[i] || kills[i] {
                continue;
            }
            let live = builder
                .block(block)
                .successors()
                .iter()
                .any(|s| live_in[s.index()]);
            if live && !live_in[i] {
                live_in[i] = true;
                changed = true;
            }
        }
    }

    // φ-placement on the iterated dominance frontier of the stores.
    let mut phi_at: Vec<Option<Handle<Value>>> = vec![None; block_count];
    let mut placed: HashSet<Handle<BasicBlock>> = HashSet::new();
    let mut worklist = store_blocks;
    while let Some(block) = worklist.pop() {
        for &f in &frontiers[block.index()] {
            if !live_in[f.index()] || !placed.insert(f) {
                continue;
            }
            phi_at[f.index()] = Some(builder.phi_in(f, elem_ty));
            worklist.push(f);
        }
    }

    // Rename along the dominator tree.
    let mut undef: Option<Handle<Value>> = None;
    let entry = builder.method().entry;
    let mut stack: Vec<(Handle<BasicBlock>, Option<Handle<Value>>)> = vec![(entry, None)];
    while let Some((block, mut def)) = stack.pop() {
        if let Some(phi) = phi_at[block.index()] {
            def = Some(phi);
        }
        for event in events[block.index()].clone() {
            match event {
                Event::Load(load) => {
                    let def = reaching_def(builder, &mut undef, &mut def, elem_ty);
                    builder.replace_all_uses(load, def);
                    builder.remove_value(load);
                }
                Event::Store(store) => {
                    // Read the live operand: earlier rewrites may have
                    // replaced the recorded one.
                    def = Some(builder.value(store).operands[1]);
                    builder.remove_value(store);
                }
            }
        }
        for succ in builder.block(block).successors() {
            if let Some(phi) = phi_at[succ.index()] {
                let def = reaching_def(builder, &mut undef, &mut def, elem_ty);
                builder
                    .add_phi_incoming(phi, block, def)
                    .expect("slot type matches its phi");
            }
        }
        for &child in &children[block.index()] {
            stack.push((child, def));
        }
    }

    builder.remove_value(alloca);
}

/// The current definition, materializing a poison "undefined" value at
/// the entry head for loads that precede every store.
fn reaching_def(
    builder: &mut Builder<'_>,
    undef: &mut Option<Handle<Value>>,
    def: &mut Option<Handle<Value>>,
    elem_ty: Handle<Type>,
) -> Handle<Value> {
    if let Some(d) = *def {
        return d;
    }
    let u = *undef.get_or_insert_with(|| {
        let entry = builder.method().entry;
        builder.insert_at_head(entry, ValueKind::Poison, elem_ty, Vec::new())
    });
    *def = Some(u);
    u
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::{
        AddressSpace, ArithFlags, BinaryOp, CompareFlags, CompareOp, MethodDecl, MethodFlags,
        MethodHandle, PrimitiveKind, PrimitiveValue,
    };

    fn no_allocas(ctx: &IrContext, m: Handle<Method>) -> bool {
        let method = ctx.method(m);
        method
            .blocks
            .iter()
            .flat_map(|(_, b)| b.values.iter())
            .all(|&v| !matches!(method.values[v].kind, ValueKind::Alloca { .. }))
    }

    #[test]
    fn single_block_slot_is_promoted() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "slot"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        {
            let mut b = ctx.builder(m).unwrap();
            let p0 = b.method().params[0];
            let slot = b.alloca(i32t, AddressSpace::Local);
            b.store(slot, p0).unwrap();
            let loaded = b.load(slot).unwrap();
            let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, loaded, loaded).unwrap();
            b.ret(Some(sum)).unwrap();
        }
        assert!(Mem2Reg.run(&mut ctx, m));
        assert!(no_allocas(&ctx, m));
        // The add now reads the stored value directly.
        let method = ctx.method(m);
        let add = method.blocks[method.entry]
            .values
            .iter()
            .find(|&&v| matches!(method.values[v].kind, ValueKind::Binary { .. }))
            .copied()
            .unwrap();
        assert_eq!(method.values[add].operands, vec![method.params[0]; 2]);
    }

    #[test]
    fn diamond_slot_gets_a_phi_at_the_join() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "diamond"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        let join = {
            let mut b = ctx.builder(m).unwrap();
            let p0 = b.method().params[0];
            let slot = b.alloca(i32t, AddressSpace::Local);
            let left = b.create_block();
            let right = b.create_block();
            let join = b.create_block();
            let zero = b.int32(0);
            let cond = b.compare(CompareOp::Lt, CompareFlags::NONE, p0, zero).unwrap();
            b.cond_branch(cond, left, right).unwrap();
            b.select_block(left);
            let one = b.int32(1);
            b.store(slot, one).unwrap();
            b.branch(join);
            b.select_block(right);
            let two = b.int32(2);
            b.store(slot, two).unwrap();
            b.branch(join);
            b.select_block(join);
            let out = b.load(slot).unwrap();
            b.ret(Some(out)).unwrap();
            join
        };
        assert!(Mem2Reg.run(&mut ctx, m));
        assert!(no_allocas(&ctx, m));
        let method = ctx.method(m);
        let phis: Vec<_> = method.blocks[join]
            .values
            .iter()
            .filter(|&&v| method.values[v].kind.is_phi())
            .collect();
        assert_eq!(phis.len(), 1);
        let phi = *phis[0];
        let incoming: Vec<_> = method.values[phi]
            .operands
            .iter()
            .map(|&op| method.values[op].as_constant())
            .collect();
        assert!(incoming.contains(&Some(PrimitiveValue::Int32(1))));
        assert!(incoming.contains(&Some(PrimitiveValue::Int32(2))));
    }

    #[test]
    fn escaping_alloca_is_kept() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let void = ctx.void_type();
        let ptr = ctx.pointer_to(i32t, AddressSpace::Local);
        let callee_decl = MethodDecl {
            handle: MethodHandle::new(2, "sink"),
            return_type: void,
            source: None,
            flags: MethodFlags::NONE,
        };
        let callee = ctx.create_method(callee_decl, &[ptr]).unwrap();
        {
            let mut b = ctx.builder(callee).unwrap();
            b.ret(None).unwrap();
        }
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "escape"),
            return_type: void,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[]).unwrap();
        {
            let mut b = ctx.builder(m).unwrap();
            let slot = b.alloca(i32t, AddressSpace::Local);
            b.call(callee, &[slot]).unwrap();
            b.ret(None).unwrap();
        }
        assert!(!Mem2Reg.run(&mut ctx, m));
        assert!(!no_allocas(&ctx, m));
    }

    #[test]
    fn load_before_any_store_reads_poison() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "undef"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[]).unwrap();
        {
            let mut b = ctx.builder(m).unwrap();
            let slot = b.alloca(i32t, AddressSpace::Local);
            let out = b.load(slot).unwrap();
            b.ret(Some(out)).unwrap();
        }
        assert!(Mem2Reg.run(&mut ctx, m));
        let method = ctx.method(m);
        assert!(matches!(
            method.blocks[method.entry].terminator,
            Some(kjit_ir::Terminator::Return { value: Some(v) })
                if matches!(method.values[v].kind, ValueKind::Poison)
        ));
    }
}
