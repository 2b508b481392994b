//! Basic blocks and terminators.

use crate::arena::Handle;
use crate::value::Value;

/// Control transfer at the tail of a basic block.
///
/// Terminators are block data rather than values in the instruction list,
/// which makes the one-terminator-per-block invariant structural: a block
/// has exactly one `Option<Terminator>` slot.
#[derive(Clone, Debug)]
pub enum Terminator {
    /// Unconditional branch.
    Branch { target: Handle<BasicBlock> },
    /// Two-way branch on an Int1 condition.
    CondBranch {
        condition: Handle<Value>,
        on_true: Handle<BasicBlock>,
        on_false: Handle<BasicBlock>,
    },
    /// Multi-way branch on an integer value.
    Switch {
        value: Handle<Value>,
        cases: Vec<(i64, Handle<BasicBlock>)>,
        default: Handle<BasicBlock>,
    },
    /// Return from the method.
    Return { value: Option<Handle<Value>> },
}

impl Terminator {
    /// Successor blocks in deterministic order.
    pub fn successors(&self) -> Vec<Handle<BasicBlock>> {
        match self {
            Self::Branch { target } => vec![*target],
            Self::CondBranch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            Self::Switch { cases, default, .. } => {
                let mut succs: Vec<_> = cases.iter().map(|&(_, b)| b).collect();
                succs.push(*default);
                succs
            }
            Self::Return { .. } => Vec::new(),
        }
    }

    /// Values read by this terminator. These act as liveness/DCE roots
    /// alongside value-operand edges.
    pub fn used_values(&self) -> Vec<Handle<Value>> {
        match self {
            Self::Branch { .. } => Vec::new(),
            Self::CondBranch { condition, .. } => vec![*condition],
            Self::Switch { value, .. } => vec![*value],
            Self::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Rewrites every reference to `old` with `new` in the successor list.
    pub fn retarget(&mut self, old: Handle<BasicBlock>, new: Handle<BasicBlock>) {
        match self {
            Self::Branch { target } => {
                if *target == old {
                    *target = new;
                }
            }
            Self::CondBranch {
                on_true, on_false, ..
            } => {
                if *on_true == old {
                    *on_true = new;
                }
                if *on_false == old {
                    *on_false = new;
                }
            }
            Self::Switch { cases, default, .. } => {
                for (_, target) in cases.iter_mut() {
                    if *target == old {
                        *target = new;
                    }
                }
                if *default == old {
                    *default = new;
                }
            }
            Self::Return { .. } => {}
        }
    }

    /// Rewrites every value reference from `old` to `new`.
    pub fn replace_value(&mut self, old: Handle<Value>, new: Handle<Value>) {
        match self {
            Self::Branch { .. } => {}
            Self::CondBranch { condition, .. } => {
                if *condition == old {
                    *condition = new;
                }
            }
            Self::Switch { value, .. } => {
                if *value == old {
                    *value = new;
                }
            }
            Self::Return { value: Some(v) } => {
                if *v == old {
                    *v = new;
                }
            }
            Self::Return { value: None } => {}
        }
    }
}

/// A maximal straight-line sequence of values ending in one terminator.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    /// Values in execution order; φ-nodes first.
    pub values: Vec<Handle<Value>>,
    /// The single terminator, set once the block is complete.
    pub terminator: Option<Terminator>,
    /// Set when the block was modified since the last local GC sweep.
    pub dirty: bool,
}

impl BasicBlock {
    /// Successors derived from the terminator (empty while unterminated).
    pub fn successors(&self) -> Vec<Handle<BasicBlock>> {
        self.terminator
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_handle(index: u32) -> Handle<BasicBlock> {
        let mut arena = crate::arena::Arena::new();
        let mut handle = arena.append(BasicBlock::default());
        for _ in 0..index {
            handle = arena.append(BasicBlock::default());
        }
        handle
    }

    #[test]
    fn branch_successors() {
        let b1 = block_handle(1);
        let term = Terminator::Branch { target: b1 };
        assert_eq!(term.successors(), vec![b1]);
        assert!(term.used_values().is_empty());
    }

    #[test]
    fn switch_successors_include_default_last() {
        let b1 = block_handle(1);
        let b2 = block_handle(2);
        let b3 = block_handle(3);
        let term = Terminator::Switch {
            value: Handle::DANGLING,
            cases: vec![(0, b1), (1, b2)],
            default: b3,
        };
        assert_eq!(term.successors(), vec![b1, b2, b3]);
    }

    #[test]
    fn retarget_rewrites_all_edges() {
        let b1 = block_handle(1);
        let b2 = block_handle(2);
        let mut term = Terminator::CondBranch {
            condition: Handle::DANGLING,
            on_true: b1,
            on_false: b1,
        };
        term.retarget(b1, b2);
        assert_eq!(term.successors(), vec![b2, b2]);
    }

    #[test]
    fn return_has_no_successors() {
        let term = Terminator::Return { value: None };
        assert!(term.successors().is_empty());
    }
}
