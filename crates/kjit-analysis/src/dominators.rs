//! Immediate dominators via the semi-NCA algorithm, plus dominance
//! frontiers.
//!
//! Semi-NCA first computes semidominators with the Lengauer-Tarjan
//! forest (path compression), then rebuilds immediate dominators in
//! preorder by walking partially-built dominator chains up to the
//! semidominator.

use kjit_ir::{BasicBlock, Handle, Method};

use crate::scope::Scope;

/// The dominator tree of a method's scope.
#[derive(Debug)]
pub struct Dominators {
    /// Immediate dominator per block arena index; `None` for the entry
    /// block and unreachable blocks.
    idom: Vec<Option<Handle<BasicBlock>>>,
    /// Dominator-tree depth per block arena index (entry = 0).
    depth: Vec<u32>,
}

struct Forest {
    ancestor: Vec<Option<u32>>,
    label: Vec<u32>,
}

impl Forest {
    fn new(n: usize) -> Self {
        Self {
            ancestor: vec![None; n],
            label: (0..n as u32).collect(),
        }
    }

    /// Path-compressing eval: the vertex with minimal semidominator on the
    /// forest path from `v` up to (excluding) the root of `v`'s tree.
    fn eval(&mut self, v: u32, sdom: &[u32]) -> u32 {
        if self.ancestor[v as usize].is_none() {
            return v;
        }
        // Collect the vertices whose ancestor is not a root, then compress
        // top-down; the root's own label is never merged.
        let mut path = Vec::new();
        let mut top = v;
        while let Some(a) = self.ancestor[top as usize] {
            if self.ancestor[a as usize].is_none() {
                break;
            }
            path.push(top);
            top = a;
        }
        let root = self.ancestor[top as usize].expect("top has a root ancestor");
        for &u in path.iter().rev() {
            let a = self.ancestor[u as usize].expect("path vertices have ancestors");
            if sdom[self.label[a as usize] as usize] < sdom[self.label[u as usize] as usize] {
                self.label[u as usize] = self.label[a as usize];
            }
            self.ancestor[u as usize] = Some(root);
        }
        self.label[v as usize]
    }

    fn link(&mut self, parent: u32, v: u32) {
        self.ancestor[v as usize] = Some(parent);
    }
}

impl Dominators {
    /// Computes immediate dominators for the scope of a method.
    pub fn compute(method: &Method, scope: &Scope) -> Self {
        let block_count = method.blocks.len();

        // DFS preorder over the scope.
        let mut pre_of = vec![None::<u32>; block_count];
        let mut verts: Vec<Handle<BasicBlock>> = Vec::with_capacity(scope.len());
        let mut parent: Vec<u32> = Vec::with_capacity(scope.len());
        let mut stack = vec![(method.entry, 0u32)];
        while let Some((block, par)) = stack.pop() {
            if pre_of[block.index()].is_some() {
                continue;
            }
            let num = verts.len() as u32;
            pre_of[block.index()] = Some(num);
            verts.push(block);
            parent.push(par);
            // Reverse push keeps successor visit order deterministic.
            for succ in method.blocks[block].successors().into_iter().rev() {
                if pre_of[succ.index()].is_none() {
                    stack.push((succ, num));
                }
            }
        }
        let n = verts.len();

        // Predecessors in preorder numbers.
        let mut preds_pre: Vec<Vec<u32>> = vec![Vec::new(); n];
        for (v, &block) in verts.iter().enumerate() {
            for &pred in scope.predecessors(block) {
                if let Some(p) = pre_of[pred.index()] {
                    preds_pre[v].push(p);
                }
            }
        }

        // Phase 1: semidominators.
        let mut sdom: Vec<u32> = (0..n as u32).collect();
        let mut forest = Forest::new(n);
        for w in (1..n as u32).rev() {
            for i in 0..preds_pre[w as usize].len() {
                let u = preds_pre[w as usize][i];
                let x = forest.eval(u, &sdom);
                sdom[w as usize] = sdom[w as usize].min(sdom[x as usize]);
            }
            forest.link(parent[w as usize], w);
        }

        // Phase 2: NCA rebuild in preorder.
        let mut idom_pre: Vec<u32> = vec![0; n];
        for w in 1..n as u32 {
            let mut cand = parent[w as usize];
            while cand > sdom[w as usize] {
                cand = idom_pre[cand as usize];
            }
            idom_pre[w as usize] = cand;
        }

        let mut idom = vec![None; block_count];
        let mut depth = vec![0u32; block_count];
        for w in 1..n {
            let block = verts[w];
            let dom = verts[idom_pre[w] as usize];
            idom[block.index()] = Some(dom);
        }
        // Depths in preorder: a vertex's idom always precedes it.
        for w in 1..n {
            let block = verts[w];
            let dom = verts[idom_pre[w] as usize];
            depth[block.index()] = depth[dom.index()] + 1;
        }

        Self { idom, depth }
    }

    /// The immediate dominator of a block (`None` for the entry).
    pub fn idom(&self, block: Handle<BasicBlock>) -> Option<Handle<BasicBlock>> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// Dominator-tree depth of a block (entry = 0).
    pub fn depth(&self, block: Handle<BasicBlock>) -> u32 {
        self.depth[block.index()]
    }

    /// Returns `true` if `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: Handle<BasicBlock>, b: Handle<BasicBlock>) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }

    /// The nearest common dominator of two blocks.
    pub fn nearest_common_dominator(
        &self,
        mut a: Handle<BasicBlock>,
        mut b: Handle<BasicBlock>,
    ) -> Handle<BasicBlock> {
        while a != b {
            while self.depth(a) > self.depth(b) {
                a = self.idom(a).expect("deeper block has an idom");
            }
            while self.depth(b) > self.depth(a) {
                b = self.idom(b).expect("deeper block has an idom");
            }
            if a != b {
                a = self.idom(a).expect("non-entry block has an idom");
                b = self.idom(b).expect("non-entry block has an idom");
            }
        }
        a
    }

    /// Dominance frontiers per block arena index.
    ///
    /// `frontiers[b]` is sorted and deduplicated.
    pub fn frontiers(&self, method: &Method, scope: &Scope) -> Vec<Vec<Handle<BasicBlock>>> {
        let mut frontiers: Vec<Vec<Handle<BasicBlock>>> = vec![Vec::new(); method.blocks.len()];
        for &block in scope.blocks() {
            let preds = scope.predecessors(block);
            if preds.len() < 2 {
                continue;
            }
            let Some(idom) = self.idom(block) else {
                continue;
            };
            for &pred in preds {
                let mut runner = pred;
                while runner != idom {
                    frontiers[runner.index()].push(block);
                    match self.idom(runner) {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }
        for f in &mut frontiers {
            f.sort();
            f.dedup();
        }
        frontiers
    }
}
