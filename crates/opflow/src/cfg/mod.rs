//! Control flow graphs
//!
//! [`ControlFlowGraph::build`] lowers an operation tree into basic blocks
//! arranged in a tree of regions, packs the result and marks reachability.

mod block;
mod builder;
pub mod graph;
mod pack;
mod reachability;
mod region;
pub mod verify;

pub use block::{BasicBlockKind, BranchSemantics, ConditionKind};
pub use graph::{
    AnonymousFunctionEntry, BasicBlock, Branch, BranchRef, ControlFlowGraph, LocalFunctionEntry, Region,
    SharedSemantics,
};
pub use region::RegionKind;
