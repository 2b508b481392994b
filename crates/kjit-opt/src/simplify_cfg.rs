//! CFG simplification pass.
//!
//! Four rewrites to a fixed point within one run: trivial φ elimination,
//! unreachable-block removal, empty-block elision, and single-successor
//! chain folding.

use kjit_analysis::Scope;
use kjit_ir::{BasicBlock, Handle, IrContext, Method, Terminator, Value, ValueKind};

use crate::Pass;

/// Removes empty blocks and folds single-successor chains.
#[derive(Debug)]
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &str {
        "simplify-cfg"
    }

    fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool {
        let mut changed = false;
        loop {
            let mut local = false;
            local |= remove_trivial_phis(ctx, method);
            local |= remove_unreachable_blocks(ctx, method);
            local |= elide_empty_blocks(ctx, method);
            local |= fold_chains(ctx, method);
            if !local {
                break;
            }
            changed = true;
        }
        changed
    }
}

/// Replaces φ-nodes whose incoming values are all the same (ignoring
/// self-references) with that value.
fn remove_trivial_phis(ctx: &mut IrContext, method: Handle<Method>) -> bool {
    let mut changed = false;
    loop {
        let trivial: Option<(Handle<Value>, Handle<Value>)> = {
            let m = ctx.method(method);
            let mut found = None;
            'outer: for (_, block) in m.blocks.iter() {
                for &v in &block.values {
                    if !m.values[v].kind.is_phi() {
                        continue;
                    }
                    let mut unique = None;
                    let mut trivial = true;
                    for &op in &m.values[v].operands {
                        if op == v {
                            continue;
                        }
                        match unique {
                            None => unique = Some(op),
                            Some(u) if u == op => {}
                            Some(_) => {
                                trivial = false;
                                break;
                            }
                        }
                    }
                    if trivial && let Some(u) = unique {
                        found = Some((v, u));
                        break 'outer;
                    }
                }
            }
            found
        };
        let Some((phi, replacement)) = trivial else {
            break;
        };
        let mut b = ctx.builder(method).expect("no live builder during passes");
        b.replace_all_uses(phi, replacement);
        b.remove_value(phi);
        changed = true;
    }
    changed
}

fn remove_unreachable_blocks(ctx: &mut IrContext, method: Handle<Method>) -> bool {
    let scope = Scope::compute(ctx.method(method));
    let unreachable: Vec<Handle<BasicBlock>> = ctx
        .method(method)
        .blocks
        .iter()
        .filter(|(h, b)| !scope.contains(*h) && (!b.values.is_empty() || b.terminator.is_some()))
        .map(|(h, _)| h)
        .collect();
    if unreachable.is_empty() {
        return false;
    }

    // Reachable φs may still name unreachable predecessors.
    let stale_edges: Vec<(Handle<Value>, Handle<BasicBlock>)> = {
        let m = ctx.method(method);
        let mut stale = Vec::new();
        for &block in scope.blocks() {
            for &v in &m.blocks[block].values {
                if let ValueKind::Phi { incoming } = &m.values[v].kind {
                    for &pred in incoming {
                        if !scope.contains(pred) {
                            stale.push((v, pred));
                        }
                    }
                }
            }
        }
        stale
    };

    let mut b = ctx.builder(method).expect("no live builder during passes");
    for (phi, pred) in stale_edges {
        b.remove_phi_incoming(phi, pred);
    }
    // Clear operand edges first so removal order does not matter.
    let doomed: Vec<Handle<Value>> = unreachable
        .iter()
        .flat_map(|&block| b.block(block).values.clone())
        .collect();
    for &v in &doomed {
        b.replace_with_poison(v);
    }
    for &v in &doomed {
        b.remove_value(v);
    }
    for &block in &unreachable {
        b.take_terminator(block);
    }
    true
}

/// Redirects predecessors of empty forwarding blocks straight to their
/// target.
fn elide_empty_blocks(ctx: &mut IrContext, method: Handle<Method>) -> bool {
    let scope = Scope::compute(ctx.method(method));
    let m = ctx.method(method);
    let entry = m.entry;

    let mut candidate = None;
    for &block in scope.blocks() {
        if block == entry || !m.blocks[block].values.is_empty() {
            continue;
        }
        let Some(Terminator::Branch { target }) = m.blocks[block].terminator else {
            continue;
        };
        if target == block {
            continue;
        }
        let preds = scope.predecessors(block);
        if preds.is_empty() {
            continue;
        }
        // A φ in the target keyed to this block can only be retargeted
        // when the forwarding block has a unique predecessor that does not
        // already feed the φ through another edge.
        let target_has_phi_from_block = m.blocks[target].values.iter().any(|&v| {
            matches!(&m.values[v].kind, ValueKind::Phi { incoming } if incoming.contains(&block))
        });
        if target_has_phi_from_block {
            if preds.len() != 1 {
                continue;
            }
            let duplicate_edge = m.blocks[target].values.iter().any(|&v| {
                matches!(&m.values[v].kind, ValueKind::Phi { incoming }
                    if incoming.contains(&block) && incoming.contains(&preds[0]))
            });
            if duplicate_edge {
                continue;
            }
        }
        candidate = Some((block, target, preds.to_vec()));
        break;
    }
    let Some((block, target, preds)) = candidate else {
        return false;
    };

    let phis_in_target: Vec<Handle<Value>> = m.blocks[target]
        .values
        .iter()
        .copied()
        .filter(|&v| m.values[v].kind.is_phi())
        .collect();

    let mut b = ctx.builder(method).expect("no live builder during passes");
    for &pred in &preds {
        let mut term = b.take_terminator(pred).expect("predecessor is terminated");
        term.retarget(block, target);
        b.replace_terminator(pred, term);
    }
    for phi in phis_in_target {
        // Unique predecessor, checked above.
        b.retarget_phi_incoming(phi, block, preds[0]);
    }
    b.take_terminator(block);
    true
}

/// Merges `b → t` when the branch is unconditional and `t` has no other
/// predecessors.
fn fold_chains(ctx: &mut IrContext, method: Handle<Method>) -> bool {
    let scope = Scope::compute(ctx.method(method));
    let m = ctx.method(method);
    let entry = m.entry;

    let mut candidate = None;
    for &block in scope.blocks() {
        let Some(Terminator::Branch { target }) = m.blocks[block].terminator else {
            continue;
        };
        if target == block || target == entry {
            continue;
        }
        if scope.predecessors(target).len() != 1 {
            continue;
        }
        candidate = Some((block, target));
        break;
    }
    let Some((block, target)) = candidate else {
        return false;
    };

    let phis: Vec<Handle<Value>> = m.blocks[target]
        .values
        .iter()
        .copied()
        .filter(|&v| m.values[v].kind.is_phi())
        .collect();

    let mut b = ctx.builder(method).expect("no live builder during passes");
    // Single-predecessor φs are trivial by construction.
    for phi in phis {
        let replacement = b.value(phi).operands.first().copied();
        match replacement {
            Some(r) if r != phi => {
                b.replace_all_uses(phi, r);
                b.remove_value(phi);
            }
            _ => {
                // Degenerate φ (no incoming, or self only): drop its edges.
                let incoming: Vec<_> = match &b.value(phi).kind {
                    ValueKind::Phi { incoming } => incoming.clone(),
                    _ => Vec::new(),
                };
                for pred in incoming {
                    b.remove_phi_incoming(phi, pred);
                }
                b.remove_value(phi);
            }
        }
    }
    b.take_terminator(block);
    b.move_block_values(target, block);
    let term = b.take_terminator(target);
    if let Some(term) = term {
        for succ in term.successors() {
            let succ_phis: Vec<Handle<Value>> = b
                .block(succ)
                .values
                .iter()
                .copied()
                .filter(|&v| b.value(v).kind.is_phi())
                .collect();
            for phi in succ_phis {
                b.retarget_phi_incoming(phi, target, block);
            }
        }
        b.replace_terminator(block, term);
    }
    true
}
