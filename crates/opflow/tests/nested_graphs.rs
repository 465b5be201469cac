//! Graphs of local functions and lambdas, built on demand
//!
//! Run with: cargo test -p opflow --test nested_graphs

mod common;

use common::*;
use opflow::{CfgError, LocalId, MethodId, OpRef, Operation, OperationKind, RegionKind, TypeRef};
use rustc_hash::FxHashSet;

fn local_function(method: u32, statements: Vec<OpRef>) -> OpRef {
    Operation::new(OperationKind::LocalFunction {
        method: MethodId(method),
        body: Operation::block(Vec::new(), statements),
    })
    .into_ref()
}

fn lambda(method: u32, statements: Vec<OpRef>) -> OpRef {
    Operation::new(OperationKind::AnonymousFunction {
        method: MethodId(method),
        body: Operation::block(Vec::new(), statements),
    })
    .with_type(TypeRef::class("Action"))
    .into_ref()
}

fn store_lambda(local: u32, function: OpRef) -> OpRef {
    Operation::expression_statement(Operation::assign(
        Operation::local(LocalId(local), TypeRef::class("Action")),
        function,
    ))
}

/// The hoisted lambda stored by the first assignment in the graph
fn flow_function(graph: &opflow::ControlFlowGraph) -> OpRef {
    graph
        .blocks()
        .iter()
        .flat_map(|b| b.statements.iter())
        .find_map(|s| match &s.kind {
            OperationKind::ExpressionStatement(e) => match &e.kind {
                OperationKind::SimpleAssignment { value, .. }
                    if matches!(value.kind, OperationKind::FlowAnonymousFunction { .. }) =>
                {
                    Some(value.clone())
                }
                _ => None,
            },
            _ => None,
        })
        .expect("hoisted lambda")
}

fn ternary_statement(local: u32) -> OpRef {
    let value = Operation::ternary(
        flag(0),
        Operation::int_literal(1),
        Operation::int_literal(2),
        TypeRef::int32(),
    );
    Operation::expression_statement(Operation::assign(Operation::local(LocalId(local), TypeRef::int32()), value))
}

fn capture_ids(graph: &opflow::ControlFlowGraph) -> FxHashSet<opflow::CaptureId> {
    graph
        .blocks()
        .iter()
        .flat_map(|b| b.statements.iter())
        .filter_map(|s| match s.kind {
            OperationKind::FlowCapture { id, .. } => Some(id),
            _ => None,
        })
        .collect()
}

#[test]
fn test_local_function_is_declared_in_scope() {
    let graph = build(vec![local_function(100, vec![call(1)]), call(2)]);

    let functions = graph.local_functions();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].method, MethodId(100));
    let scope = graph.region(functions[0].region);
    assert_eq!(scope.kind, RegionKind::LocalLifetime);
    assert_eq!(scope.local_functions, vec![MethodId(100)]);
    // The declaration itself emits nothing
    assert!(block_calling(&graph, 2).is_reachable);
    assert!(graph.blocks().iter().all(|b| b.statements.len() <= 1));
}

#[test]
fn test_local_function_graph_is_built_once() {
    let graph = build(vec![local_function(100, vec![call(1)]), call(2)]);

    let first = graph.local_function_graph(MethodId(100)).unwrap();
    let second = graph.local_function_graph(MethodId(100)).unwrap();
    assert!(std::ptr::eq(first, second));
    assert!(block_calling(first, 1).is_reachable);
    assert_eq!(first.enclosing_region(), Some(graph.local_functions()[0].region));
}

#[test]
fn test_unknown_local_function() {
    let graph = build(vec![call(1)]);
    let err = graph.local_function_graph(MethodId(5)).err();
    assert!(matches!(err, Some(CfgError::UnknownLocalFunction(m)) if m == MethodId(5)));
}

#[test]
fn test_lambda_is_hoisted() {
    let graph = build(vec![store_lambda(1, lambda(200, vec![call(3)]))]);

    assert_eq!(graph.anonymous_functions().len(), 1);
    let function = flow_function(&graph);
    assert!(matches!(function.kind, OperationKind::FlowAnonymousFunction { ordinal: 0, .. }));

    let nested = graph.anonymous_function_graph(&function).unwrap();
    assert!(block_calling(nested, 3).is_reachable);
    assert!(std::ptr::eq(nested, graph.anonymous_function_graph(&function).unwrap()));
}

#[test]
fn test_lambda_lookup_needs_flow_function() {
    let graph = build(vec![store_lambda(1, lambda(200, vec![call(3)]))]);
    let err = graph.anonymous_function_graph(&Operation::new(OperationKind::Empty)).err();
    assert!(matches!(err, Some(CfgError::UnsupportedOperation { .. })));
}

#[test]
fn test_nested_graphs_share_capture_numbering() {
    let graph = build(vec![
        ternary_statement(1),
        store_lambda(2, lambda(200, vec![ternary_statement(3)])),
    ]);
    let nested = graph.anonymous_function_graph(&flow_function(&graph)).unwrap();

    let outer = capture_ids(&graph);
    let inner = capture_ids(nested);
    assert!(!outer.is_empty());
    assert!(!inner.is_empty());
    assert!(outer.is_disjoint(&inner));
}
