//! Scope: the blocks reachable from a method's entry, in reverse
//! post-order, together with predecessor lists.
//!
//! Every iteration that affects generated output walks the scope, so the
//! order must be deterministic: successors are visited in terminator
//! order and blocks are discovered by arena handle, never by hash order.

use kjit_ir::{BasicBlock, Handle, Method};

/// Reachable blocks of a method in deterministic reverse post-order.
#[derive(Debug)]
pub struct Scope {
    rpo: Vec<Handle<BasicBlock>>,
    /// RPO position per block arena index; `None` for unreachable blocks.
    rpo_index: Vec<Option<u32>>,
    /// Predecessors per block arena index (reachable predecessors only).
    predecessors: Vec<Vec<Handle<BasicBlock>>>,
}

impl Scope {
    /// Computes the scope of a method.
    pub fn compute(method: &Method) -> Self {
        let block_count = method.blocks.len();
        let mut visited = vec![false; block_count];
        let mut postorder = Vec::with_capacity(block_count);

        // Iterative DFS; each frame tracks the next successor to visit.
        let mut stack: Vec<(Handle<BasicBlock>, Vec<Handle<BasicBlock>>, usize)> = Vec::new();
        visited[method.entry.index()] = true;
        stack.push((method.entry, method.blocks[method.entry].successors(), 0));
        while !stack.is_empty() {
            let next = {
                let (_, succs, at) = stack.last_mut().expect("non-empty stack");
                let next = succs.get(*at).copied();
                *at += 1;
                next
            };
            match next {
                Some(succ) => {
                    if !visited[succ.index()] {
                        visited[succ.index()] = true;
                        stack.push((succ, method.blocks[succ].successors(), 0));
                    }
                }
                None => {
                    let (block, _, _) = stack.pop().expect("non-empty stack");
                    postorder.push(block);
                }
            }
        }

        let rpo: Vec<_> = postorder.into_iter().rev().collect();
        let mut rpo_index = vec![None; block_count];
        for (i, &block) in rpo.iter().enumerate() {
            rpo_index[block.index()] = Some(i as u32);
        }

        let mut predecessors = vec![Vec::new(); block_count];
        for &block in &rpo {
            for succ in method.blocks[block].successors() {
                if rpo_index[succ.index()].is_some() {
                    predecessors[succ.index()].push(block);
                }
            }
        }

        Self {
            rpo,
            rpo_index,
            predecessors,
        }
    }

    /// Reachable blocks in reverse post-order; the entry block is first.
    pub fn blocks(&self) -> &[Handle<BasicBlock>] {
        &self.rpo
    }

    /// Number of reachable blocks.
    pub fn len(&self) -> usize {
        self.rpo.len()
    }

    /// Returns `true` if no blocks are reachable (never for a valid method).
    pub fn is_empty(&self) -> bool {
        self.rpo.is_empty()
    }

    /// Returns `true` if `block` is reachable from the entry.
    pub fn contains(&self, block: Handle<BasicBlock>) -> bool {
        self.rpo_index
            .get(block.index())
            .is_some_and(Option::is_some)
    }

    /// RPO position of a reachable block.
    pub fn rpo_index(&self, block: Handle<BasicBlock>) -> Option<usize> {
        self.rpo_index
            .get(block.index())
            .copied()
            .flatten()
            .map(|i| i as usize)
    }

    /// Reachable predecessors of a block, in RPO discovery order.
    /// A predecessor appears once per CFG edge.
    pub fn predecessors(&self, block: Handle<BasicBlock>) -> &[Handle<BasicBlock>] {
        &self.predecessors[block.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::{
        ArithFlags, BinaryOp, CompareFlags, CompareOp, IrContext, MethodDecl, MethodFlags,
        MethodHandle, PrimitiveKind,
    };

    fn diamond(ctx: &mut IrContext) -> kjit_ir::Handle<Method> {
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let void = ctx.void_type();
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "diamond"),
            return_type: void,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();
        let zero = b.int32(0);
        let cond = b.compare(CompareOp::Lt, CompareFlags::NONE, p0, zero).unwrap();
        b.cond_branch(cond, left, right).unwrap();
        b.select_block(left);
        b.branch(join);
        b.select_block(right);
        b.branch(join);
        b.select_block(join);
        b.ret(None).unwrap();
        drop(b);
        m
    }

    #[test]
    fn diamond_rpo_starts_at_entry() {
        let mut ctx = IrContext::new();
        let m = diamond(&mut ctx);
        let scope = Scope::compute(ctx.method(m));
        assert_eq!(scope.len(), 4);
        assert_eq!(scope.blocks()[0], ctx.method(m).entry);
        // The join block comes after both branch sides.
        let join = scope.blocks()[3];
        assert_eq!(scope.predecessors(join).len(), 2);
    }

    #[test]
    fn unreachable_blocks_are_excluded() {
        let mut ctx = IrContext::new();
        let void = ctx.void_type();
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "dead"),
            return_type: void,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        let dead = b.create_block();
        b.ret(None).unwrap();
        b.select_block(dead);
        b.ret(None).unwrap();
        drop(b);
        let scope = Scope::compute(ctx.method(m));
        assert_eq!(scope.len(), 1);
        assert!(!scope.contains(dead));
    }

    #[test]
    fn loop_back_edge_is_a_predecessor() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let void = ctx.void_type();
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "looped"),
            return_type: void,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let header = b.create_block();
        let exit = b.create_block();
        b.branch(header);
        b.select_block(header);
        let one = b.int32(1);
        let dec = b.binary(BinaryOp::Sub, ArithFlags::NONE, p0, one).unwrap();
        let zero = b.int32(0);
        let cond = b.compare(CompareOp::Gt, CompareFlags::NONE, dec, zero).unwrap();
        b.cond_branch(cond, header, exit).unwrap();
        b.select_block(exit);
        b.ret(None).unwrap();
        drop(b);
        let scope = Scope::compute(ctx.method(m));
        assert_eq!(scope.predecessors(header).len(), 2);
        let entry = ctx.method(m).entry;
        assert!(scope.predecessors(header).contains(&entry));
        assert!(scope.predecessors(header).contains(&header));
    }
}
