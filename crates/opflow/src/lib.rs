//! Opflow
//!
//! Builds control flow graphs from resolved operation trees:
//! - **Operations**: the input tree and the statements stored in blocks (`operation` module)
//! - **Graphs**: lowering, packing, reachability and verification (`cfg` module)
//! - **Semantics**: well-known members the lowering calls into (`semantic` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use opflow::{ControlFlowGraph, DefaultSemantics, Operation, MethodId};
//!
//! let body = Operation::block(
//!     Vec::new(),
//!     vec![Operation::expression_statement(Operation::call(MethodId(1), Vec::new(), None))],
//! );
//! let graph = ControlFlowGraph::build(&body, Arc::new(DefaultSemantics::new())).unwrap();
//! assert_eq!(graph.blocks().len(), 3);
//! ```

#![warn(rust_2018_idioms)]

pub mod cfg;
pub mod error;
pub mod operation;
pub mod options;
pub mod semantic;

pub use cfg::{BasicBlock, BasicBlockKind, BranchSemantics, ConditionKind, ControlFlowGraph, RegionKind, SharedSemantics};
pub use error::{CfgError, Result};
pub use operation::{CaptureId, LabelId, LocalId, MethodId, OpRef, Operation, OperationKind, TypeRef};
pub use options::BuildOptions;
pub use semantic::{DefaultSemantics, SemanticContext, WellKnownMember};
