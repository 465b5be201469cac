//! Value-producing control flow inside expressions
//!
//! Run with: cargo test -p opflow --test expressions

mod common;

use common::*;
use opflow::operation::{BinaryOperatorKind, ConstantValue, Pattern, SwitchArm, UnaryOperatorKind};
use opflow::{
    BranchSemantics, CaptureId, ConditionKind, ControlFlowGraph, DefaultSemantics, LocalId, MethodId, OpRef,
    Operation, OperationKind, TypeRef, WellKnownMember,
};
use rustc_hash::FxHashMap;

fn assign_local(id: u32, ty: TypeRef, value: OpRef) -> OpRef {
    Operation::expression_statement(Operation::assign(Operation::local(LocalId(id), ty), value))
}

/// How many times each capture is written
fn capture_writes(graph: &ControlFlowGraph) -> FxHashMap<CaptureId, usize> {
    let mut writes = FxHashMap::default();
    for statement in graph.blocks().iter().flat_map(|b| b.statements.iter()) {
        if let OperationKind::FlowCapture { id, .. } = statement.kind {
            *writes.entry(id).or_insert(0) += 1;
        }
    }
    writes
}

/// Captures written on more than one path
fn merged_results(graph: &ControlFlowGraph) -> usize {
    capture_writes(graph).values().filter(|n| **n > 1).count()
}

fn mentions(graph: &ControlFlowGraph, method: MethodId) -> bool {
    format!("{:?}", graph.blocks()).contains(&format!("{method:?}"))
}

fn widget() -> TypeRef {
    TypeRef::class("Widget")
}

// =============================================================================
// SHORT-CIRCUIT OPERATORS
// =============================================================================

mod logical {
    use super::*;

    fn and(left: OpRef, right: OpRef, ty: TypeRef) -> OpRef {
        Operation::binary(BinaryOperatorKind::ConditionalAnd, left, right, ty)
    }

    #[test]
    fn test_and_in_condition_needs_no_captures() {
        let graph = build(vec![Operation::if_statement(
            and(flag(0), flag(1), TypeRef::boolean()),
            call(1),
            None,
        )]);

        assert_eq!(capture_count(&graph), 0);
        let tests: Vec<_> = graph
            .blocks()
            .iter()
            .filter(|b| b.condition_kind == ConditionKind::WhenFalse)
            .collect();
        assert_eq!(tests.len(), 2);
        let targets: Vec<_> = tests
            .iter()
            .map(|b| b.conditional.as_ref().and_then(|c| c.destination))
            .collect();
        assert_eq!(targets[0], targets[1]);
    }

    #[test]
    fn test_and_as_value_merges_into_one_capture() {
        let graph = build(vec![assign_local(
            1,
            TypeRef::boolean(),
            and(flag(0), flag(1), TypeRef::boolean()),
        )]);

        assert_eq!(merged_results(&graph), 1);
        let last = graph.block(graph.blocks().len() - 2);
        let OperationKind::ExpressionStatement(assignment) = &last.statements[0].kind else {
            panic!("assignment expected, got {:?}", last.statements[0]);
        };
        let OperationKind::SimpleAssignment { value, .. } = &assignment.kind else {
            panic!("assignment expected");
        };
        assert!(matches!(value.kind, OperationKind::FlowCaptureReference(_)));
    }

    fn logical_test(graph: &ControlFlowGraph) -> Option<(UnaryOperatorKind, Option<MethodId>)> {
        graph.blocks().iter().find_map(|b| match b.branch_value.as_ref().map(|v| &v.kind) {
            Some(OperationKind::Unary { op, operator_method, .. }) => Some((*op, *operator_method)),
            _ => None,
        })
    }

    #[test]
    fn test_user_defined_and_asks_operator_false() {
        let value = Operation::new(OperationKind::Binary {
            op: BinaryOperatorKind::ConditionalAnd,
            left: object(0),
            right: object(1),
            operator_method: Some(MethodId(80)),
            unary_operator_method: Some(MethodId(81)),
            is_lifted: false,
        })
        .with_type(widget())
        .into_ref();
        let graph = build(vec![assign_local(1, widget(), value)]);

        assert_eq!(merged_results(&graph), 1);
        assert_eq!(logical_test(&graph), Some((UnaryOperatorKind::False, Some(MethodId(81)))));
        assert!(mentions(&graph, MethodId(80)));
    }

    #[test]
    fn test_dynamic_or_asks_operator_true() {
        let dynamic = TypeRef::Dynamic;
        let value = Operation::binary(
            BinaryOperatorKind::ConditionalOr,
            Operation::parameter(0, dynamic.clone()),
            Operation::parameter(1, dynamic.clone()),
            dynamic.clone(),
        );
        let graph = build(vec![assign_local(1, dynamic, value)]);

        assert_eq!(merged_results(&graph), 1);
        assert_eq!(logical_test(&graph), Some((UnaryOperatorKind::True, None)));
    }

    #[test]
    fn test_object_and_boxes_both_outcomes() {
        let value = and(
            Operation::parameter(0, TypeRef::object()),
            Operation::parameter(1, TypeRef::object()),
            TypeRef::object(),
        );
        let graph = build(vec![assign_local(1, TypeRef::object(), value)]);

        assert_eq!(merged_results(&graph), 1);
        let results: Vec<_> = graph
            .blocks()
            .iter()
            .flat_map(|b| b.statements.iter())
            .filter_map(|s| match &s.kind {
                OperationKind::FlowCapture { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|v| v.ty == Some(TypeRef::object()) && matches!(v.kind, OperationKind::Conversion { .. })));
        let boxed_false = results.iter().any(|v| match &v.kind {
            OperationKind::Conversion { operand, .. } => operand.constant == Some(ConstantValue::Bool(false)),
            _ => false,
        });
        assert!(boxed_false);
    }

    #[test]
    fn test_nullable_and_reads_values_through_helpers() {
        let nullable = TypeRef::nullable(TypeRef::boolean());
        let graph = build(vec![assign_local(
            1,
            nullable.clone(),
            and(
                Operation::parameter(0, nullable.clone()),
                Operation::parameter(1, nullable.clone()),
                nullable,
            ),
        )]);

        assert_eq!(merged_results(&graph), 1);
        assert!(mentions(
            &graph,
            DefaultSemantics::method_for(WellKnownMember::NullableGetValueOrDefault)
        ));
    }
}

// =============================================================================
// CONDITIONAL OPERATOR
// =============================================================================

mod ternary {
    use super::*;

    #[test]
    fn test_ternary_value_merges_arms() {
        let value = Operation::ternary(
            flag(0),
            Operation::int_literal(1),
            Operation::int_literal(2),
            TypeRef::int32(),
        );
        let graph = build(vec![assign_local(1, TypeRef::int32(), value)]);
        assert_eq!(merged_results(&graph), 1);
    }

    #[test]
    fn test_throwing_arm_writes_no_result() {
        let exception = Operation::local(LocalId(9), TypeRef::class("System.Exception"));
        let value = Operation::ternary(
            flag(0),
            Operation::int_literal(1),
            Operation::throw(Some(exception)),
            TypeRef::int32(),
        );
        let graph = build(vec![assign_local(1, TypeRef::int32(), value)]);

        assert_eq!(merged_results(&graph), 0);
        assert!(graph
            .blocks()
            .iter()
            .any(|b| b.fallthrough.as_ref().is_some_and(|f| f.semantics == BranchSemantics::Throw)));
    }

    #[test]
    fn test_pending_arguments_spill_before_branching() {
        let value = Operation::ternary(
            flag(1),
            Operation::int_literal(1),
            Operation::int_literal(2),
            TypeRef::int32(),
        );
        let statement = Operation::expression_statement(Operation::call(
            MethodId(1),
            vec![Operation::parameter(0, TypeRef::int32()), value],
            None,
        ));
        let graph = build(vec![statement]);

        let block = block_calling(&graph, 1);
        let call = block
            .statements
            .iter()
            .find_map(|s| match &s.kind {
                OperationKind::ExpressionStatement(e) => Some(e.clone()),
                _ => None,
            })
            .expect("call statement");
        let OperationKind::Invocation { arguments, .. } = &call.kind else {
            panic!("invocation expected");
        };
        assert_eq!(arguments.len(), 2);
        assert!(arguments
            .iter()
            .all(|a| matches!(a.kind, OperationKind::FlowCaptureReference(_))));
    }
}

// =============================================================================
// NULL-AWARE OPERATORS
// =============================================================================

mod null_aware {
    use super::*;

    fn null_tests(graph: &ControlFlowGraph) -> usize {
        graph
            .blocks()
            .iter()
            .filter(|b| {
                b.condition_kind == ConditionKind::WhenTrue
                    && b.branch_value
                        .as_ref()
                        .is_some_and(|v| matches!(v.kind, OperationKind::IsNull(_)))
            })
            .count()
    }

    #[test]
    fn test_coalesce_tests_for_null_once() {
        let value = Operation::new(OperationKind::Coalesce {
            value: object(0),
            when_null: object(1),
        })
        .with_type(widget())
        .into_ref();
        let graph = build(vec![assign_local(1, widget(), value)]);

        assert_eq!(null_tests(&graph), 1);
        assert_eq!(merged_results(&graph), 1);
    }

    fn coalesce_assign(target: u32, value: OpRef) -> OpRef {
        Operation::new(OperationKind::CoalesceAssignment {
            target: Operation::local(LocalId(target), widget()),
            value,
        })
        .with_type(widget())
        .into_ref()
    }

    #[test]
    fn test_coalesce_assignment_statement_assigns_when_null() {
        let graph = build(vec![Operation::expression_statement(coalesce_assign(1, object(0))), call(2)]);

        assert_eq!(null_tests(&graph), 1);
        assert_eq!(merged_results(&graph), 0);
        let assigns = graph
            .blocks()
            .iter()
            .filter(|b| {
                b.statements.iter().any(|s| match &s.kind {
                    OperationKind::ExpressionStatement(e) => matches!(e.kind, OperationKind::SimpleAssignment { .. }),
                    _ => false,
                })
            })
            .count();
        assert_eq!(assigns, 1);
        assert!(block_calling(&graph, 2).is_reachable);
    }

    #[test]
    fn test_coalesce_assignment_value_merges_results() {
        let graph = build(vec![assign_local(2, widget(), coalesce_assign(1, object(0)))]);

        assert_eq!(null_tests(&graph), 1);
        assert_eq!(merged_results(&graph), 1);
    }

    #[test]
    fn test_coalesce_with_throw_writes_one_result() {
        let exception = Operation::local(LocalId(9), TypeRef::class("System.Exception"));
        let value = Operation::new(OperationKind::Coalesce {
            value: object(0),
            when_null: Operation::throw(Some(exception)),
        })
        .with_type(widget())
        .into_ref();
        let graph = build(vec![assign_local(1, widget(), value)]);

        assert_eq!(merged_results(&graph), 0);
        let writes_invalid = graph
            .blocks()
            .iter()
            .flat_map(|b| b.statements.iter())
            .any(|s| matches!(&s.kind, OperationKind::FlowCapture { value, .. } if matches!(value.kind, OperationKind::Invalid(_))));
        assert!(!writes_invalid);
        assert!(graph
            .blocks()
            .iter()
            .any(|b| b.fallthrough.as_ref().is_some_and(|f| f.semantics == BranchSemantics::Throw)));
    }

    #[test]
    fn test_conditional_access_statement_calls_on_capture() {
        let instance = Operation::new(OperationKind::ConditionalAccessInstance)
            .with_type(widget())
            .into_ref();
        let access = Operation::new(OperationKind::ConditionalAccess {
            receiver: object(0),
            when_not_null: Operation::call_on(instance, MethodId(5), Vec::new(), None),
        })
        .into_ref();
        let graph = build(vec![Operation::expression_statement(access), call(6)]);

        assert_eq!(null_tests(&graph), 1);
        assert_eq!(merged_results(&graph), 0);
        let block = block_calling(&graph, 5);
        let invocation = block
            .statements
            .iter()
            .find_map(|s| match &s.kind {
                OperationKind::ExpressionStatement(e) if s.is_implicit => Some(e.clone()),
                _ => None,
            })
            .expect("call on receiver wrapped in a statement");
        let OperationKind::Invocation { instance, .. } = &invocation.kind else {
            panic!("invocation expected");
        };
        let instance = instance.as_ref().expect("receiver");
        assert!(matches!(instance.kind, OperationKind::FlowCaptureReference(_)));
        assert!(block_calling(&graph, 6).is_reachable);
    }

    #[test]
    fn test_conditional_access_value_defaults_to_null() {
        let instance = Operation::new(OperationKind::ConditionalAccessInstance)
            .with_type(widget())
            .into_ref();
        let access = Operation::new(OperationKind::ConditionalAccess {
            receiver: object(0),
            when_not_null: Operation::call_on(instance, MethodId(5), Vec::new(), Some(widget())),
        })
        .with_type(widget())
        .into_ref();
        let graph = build(vec![assign_local(1, widget(), access)]);

        assert_eq!(merged_results(&graph), 1);
        let null_default = graph
            .blocks()
            .iter()
            .flat_map(|b| b.statements.iter())
            .any(|s| match &s.kind {
                OperationKind::FlowCapture { value, .. } => value.constant == Some(ConstantValue::Null),
                _ => false,
            });
        assert!(null_default);
    }

    #[test]
    fn test_conditional_access_value_is_lifted_to_nullable() {
        let instance = Operation::new(OperationKind::ConditionalAccessInstance)
            .with_type(widget())
            .into_ref();
        let lifted = TypeRef::nullable(TypeRef::int32());
        let access = Operation::new(OperationKind::ConditionalAccess {
            receiver: object(0),
            when_not_null: Operation::call_on(instance, MethodId(5), Vec::new(), Some(TypeRef::int32())),
        })
        .with_type(lifted.clone())
        .into_ref();
        let graph = build(vec![assign_local(1, lifted.clone(), access)]);

        let converted = graph
            .blocks()
            .iter()
            .flat_map(|b| b.statements.iter())
            .find_map(|s| match &s.kind {
                OperationKind::FlowCapture { value, .. } => match &value.kind {
                    OperationKind::Conversion { operand, .. } => Some((value.ty.clone(), operand.clone())),
                    _ => None,
                },
                _ => None,
            })
            .expect("converted result");
        assert_eq!(converted.0, Some(lifted));
        assert!(matches!(converted.1.kind, OperationKind::Invocation { .. }));
    }
}

// =============================================================================
// SWITCH EXPRESSION
// =============================================================================

mod switch_expression {
    use super::*;

    #[test]
    fn test_unmatched_switch_expression_throws() {
        let value = Operation::new(OperationKind::SwitchExpression {
            value: Operation::parameter(0, TypeRef::int32()),
            arms: vec![
                SwitchArm {
                    locals: Vec::new(),
                    pattern: Pattern::Constant(Operation::int_literal(1)),
                    guard: None,
                    value: Operation::int_literal(10),
                },
                SwitchArm {
                    locals: Vec::new(),
                    pattern: Pattern::Constant(Operation::int_literal(2)),
                    guard: Some(flag(1)),
                    value: Operation::int_literal(20),
                },
            ],
        })
        .with_type(TypeRef::int32())
        .into_ref();
        let graph = build(vec![assign_local(1, TypeRef::int32(), value)]);

        let ctor = DefaultSemantics::method_for(WellKnownMember::MatchFailureExceptionCtor);
        let failure = graph
            .blocks()
            .iter()
            .find(|b| b.fallthrough.as_ref().is_some_and(|f| f.semantics == BranchSemantics::Throw))
            .expect("no-match throw");
        let thrown = failure.branch_value.as_ref().expect("thrown value");
        assert!(matches!(
            thrown.kind,
            OperationKind::ObjectCreation { constructor: Some(c), .. } if c == ctor
        ));
        assert_eq!(thrown.ty, Some(TypeRef::class("System.InvalidOperationException")));
        assert_eq!(capture_writes(&graph).values().filter(|n| **n == 2).count(), 1);
    }
}
