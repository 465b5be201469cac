//! Shared helpers for the graph integration tests

#![allow(dead_code)]

use std::sync::Arc;

use opflow::{
    BasicBlock, BuildOptions, ControlFlowGraph, DefaultSemantics, MethodId, OpRef, Operation, OperationKind,
    RegionKind, TypeRef,
};

pub fn build(statements: Vec<OpRef>) -> ControlFlowGraph {
    build_with(statements, &BuildOptions::default())
}

pub fn build_unpacked(statements: Vec<OpRef>) -> ControlFlowGraph {
    build_with(statements, &BuildOptions::unpacked())
}

/// Builds with structural verification on, whatever the profile
pub fn build_with(statements: Vec<OpRef>, options: &BuildOptions) -> ControlFlowGraph {
    let body = Operation::block(Vec::new(), statements);
    let options = BuildOptions {
        verify: true,
        ..options.clone()
    };
    ControlFlowGraph::build_with(&body, Arc::new(DefaultSemantics::new()), &options).expect("graph builds")
}

/// `M<id>();`
pub fn call(id: u32) -> OpRef {
    Operation::expression_statement(Operation::call(MethodId(id), Vec::new(), None))
}

pub fn flag(index: u32) -> OpRef {
    Operation::parameter(index, TypeRef::boolean())
}

pub fn object(index: u32) -> OpRef {
    Operation::parameter(index, TypeRef::class("Widget"))
}

fn calls_method(statement: &Operation, id: u32) -> bool {
    match &statement.kind {
        OperationKind::ExpressionStatement(e) => calls_method(e, id),
        OperationKind::Invocation { method, .. } => *method == MethodId(id),
        _ => false,
    }
}

/// The block holding the call to `M<id>`
pub fn block_calling(graph: &ControlFlowGraph, id: u32) -> &BasicBlock {
    graph
        .blocks()
        .iter()
        .find(|block| block.statements.iter().any(|s| calls_method(s, id)))
        .unwrap_or_else(|| panic!("no block calls M{id}"))
}

pub fn region_kinds(graph: &ControlFlowGraph) -> Vec<RegionKind> {
    graph.regions().iter().map(|r| r.kind).collect()
}

/// Kind of the innermost region holding the call to `M<id>`
pub fn region_of_call(graph: &ControlFlowGraph, id: u32) -> RegionKind {
    graph.region(block_calling(graph, id).region).kind
}

pub fn capture_count(graph: &ControlFlowGraph) -> usize {
    graph
        .blocks()
        .iter()
        .flat_map(|b| b.statements.iter())
        .filter(|s| matches!(s.kind, OperationKind::FlowCapture { .. }))
        .count()
}
