//! CFG analyses for kjit.
//!
//! [`Scope`] enumerates the blocks reachable from a method's entry in
//! deterministic reverse post-order; [`Dominators`] computes immediate
//! dominators with semi-NCA (plus dominance frontiers); [`Liveness`]
//! produces per-block live sets for register allocation.

mod dominators;
mod liveness;
mod scope;

pub use dominators::Dominators;
pub use liveness::Liveness;
pub use scope::Scope;
