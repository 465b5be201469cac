//! Block layout of statement-level control flow
//!
//! Run with: cargo test -p opflow --test graph_shape

mod common;

use common::*;
use opflow::operation::{BinaryOperatorKind, BranchKind, CaseClause, CaseClauseKind, Pattern, SwitchCase, VariableDeclarator};
use opflow::{
    BasicBlockKind, BranchSemantics, ConditionKind, ControlFlowGraph, LabelId, LocalId, MethodId, OpRef, Operation,
    OperationKind, RegionKind, TypeRef,
};

// =============================================================================
// IF / ELSE
// =============================================================================

mod conditionals {
    use super::*;

    #[test]
    fn test_if_else_packs_to_two_arms() {
        let graph = build(vec![Operation::if_statement(flag(0), call(1), Some(call(2)))]);

        assert_eq!(graph.blocks().len(), 5);
        assert_eq!(graph.regions().len(), 1);

        let test = graph.block(1);
        assert_eq!(test.condition_kind, ConditionKind::WhenFalse);
        assert!(test.statements.is_empty());
        assert_eq!(test.conditional.as_ref().and_then(|b| b.destination), Some(3));
        assert_eq!(test.fallthrough.as_ref().and_then(|b| b.destination), Some(2));

        let exit = graph.exit();
        assert_eq!(exit.kind, BasicBlockKind::Exit);
        let sources: Vec<usize> = exit.predecessors.iter().map(|p| p.source).collect();
        assert_eq!(sources, vec![2, 3]);
    }

    #[test]
    fn test_if_else_then_call_has_four_inner_blocks() {
        let graph = build(vec![Operation::if_statement(flag(0), call(1), Some(call(2))), call(3)]);

        assert_eq!(graph.blocks().len(), 6);
        let merge = block_calling(&graph, 3);
        assert_eq!(merge.ordinal, 4);
        let sources: Vec<usize> = merge.predecessors.iter().map(|p| p.source).collect();
        assert_eq!(sources, vec![2, 3]);
        assert_eq!(graph.block(1).conditional.as_ref().and_then(|b| b.destination), Some(3));
    }

    #[test]
    fn test_unpacked_if_keeps_join_block_and_scope() {
        let graph = build_unpacked(vec![Operation::if_statement(flag(0), call(1), Some(call(2)))]);

        assert_eq!(graph.blocks().len(), 6);
        assert_eq!(region_kinds(&graph), vec![RegionKind::Root, RegionKind::LocalLifetime]);
        let join = graph.block(4);
        assert!(join.statements.is_empty());
        assert_eq!(join.predecessors.len(), 2);
    }

    #[test]
    fn test_if_without_else_falls_through() {
        let graph = build(vec![Operation::if_statement(flag(0), call(1), None), call(2)]);

        let then = block_calling(&graph, 1);
        let after = block_calling(&graph, 2);
        assert_eq!(then.fallthrough.as_ref().and_then(|b| b.destination), Some(after.ordinal));
        assert_eq!(graph.block(1).conditional.as_ref().and_then(|b| b.destination), Some(after.ordinal));
    }
}

// =============================================================================
// JUMPS
// =============================================================================

mod jumps {
    use super::*;

    #[test]
    fn test_goto_missing_label_is_error_branch() {
        let graph = build(vec![Operation::goto(LabelId(7))]);

        let jump = graph.block(1);
        let branch = jump.fallthrough.as_ref().expect("jump has an edge");
        assert_eq!(branch.semantics, BranchSemantics::Error);
        assert_eq!(branch.destination, None);
        assert!(!graph.exit().is_reachable);
    }

    #[test]
    fn test_backward_goto_forms_loop() {
        let label = LabelId(1);
        let graph = build(vec![
            Operation::labeled(label, Some(call(1))),
            Operation::if_statement(flag(0), Operation::goto(label), None),
            call(2),
        ]);

        let head = block_calling(&graph, 1);
        assert!(head.is_reachable);
        assert!(head.predecessors.iter().any(|p| p.source >= head.ordinal));
        assert!(block_calling(&graph, 2).is_reachable);
    }

    #[test]
    fn test_end_terminates_program() {
        let graph = build(vec![call(1), Operation::new(OperationKind::End).into_ref(), call(2)]);

        let ending = block_calling(&graph, 1);
        let branch = ending.fallthrough.as_ref().expect("terminal edge");
        assert_eq!(branch.semantics, BranchSemantics::ProgramTermination);
        assert!(!block_calling(&graph, 2).is_reachable);
    }
}

// =============================================================================
// LOOPS
// =============================================================================

mod loops {
    use super::*;

    fn while_loop(condition_is_top: bool) -> opflow::OpRef {
        Operation::new(OperationKind::While {
            locals: vec![LocalId(5)],
            condition: Some(flag(0)),
            body: call(1),
            condition_is_top,
            condition_is_until: false,
            continue_label: LabelId(1),
            exit_label: LabelId(2),
        })
        .into_ref()
    }

    #[test]
    fn test_while_body_jumps_back() {
        let graph = build(vec![while_loop(true), call(2)]);

        let body = block_calling(&graph, 1);
        let back = body.fallthrough.as_ref().and_then(|b| b.destination).expect("back edge");
        assert!(back < body.ordinal);
        assert_eq!(region_of_call(&graph, 1), RegionKind::LocalLifetime);
        assert!(block_calling(&graph, 2).is_reachable);
    }

    #[test]
    fn test_do_while_tests_at_bottom() {
        let graph = build(vec![while_loop(false), call(2)]);

        let body = block_calling(&graph, 1);
        let test = graph
            .blocks()
            .iter()
            .find(|b| b.condition_kind == ConditionKind::WhenTrue)
            .expect("bottom test");
        assert!(test.ordinal >= body.ordinal);
        let target = test.conditional.as_ref().and_then(|b| b.destination).expect("loop edge");
        assert!(target <= body.ordinal);
    }

    #[test]
    fn test_break_leaves_loop() {
        let body = Operation::block(
            Vec::new(),
            vec![
                call(1),
                Operation::new(OperationKind::Branch {
                    kind: BranchKind::Break,
                    target: LabelId(2),
                })
                .into_ref(),
            ],
        );
        let infinite = Operation::new(OperationKind::While {
            locals: Vec::new(),
            condition: None,
            body,
            condition_is_top: true,
            condition_is_until: false,
            continue_label: LabelId(1),
            exit_label: LabelId(2),
        })
        .into_ref();
        let graph = build(vec![infinite, call(2)]);

        let after = block_calling(&graph, 2);
        assert!(after.is_reachable);
        assert!(block_calling(&graph, 1).is_reachable);
    }
}

// =============================================================================
// SWITCH
// =============================================================================

mod switch {
    use super::*;

    fn brk() -> OpRef {
        Operation::new(OperationKind::Branch {
            kind: BranchKind::Break,
            target: LabelId(9),
        })
        .into_ref()
    }

    #[test]
    fn test_switch_sections_and_default() {
        let switch = Operation::new(OperationKind::Switch {
            locals: Vec::new(),
            value: Operation::parameter(0, TypeRef::int32()),
            cases: vec![
                SwitchCase {
                    locals: Vec::new(),
                    clauses: vec![CaseClause {
                        label: None,
                        kind: CaseClauseKind::SingleValue(Operation::int_literal(1)),
                    }],
                    condition: None,
                    body: vec![call(1), brk()],
                },
                SwitchCase {
                    locals: Vec::new(),
                    clauses: vec![CaseClause {
                        label: None,
                        kind: CaseClauseKind::Default,
                    }],
                    condition: None,
                    body: vec![call(2), brk()],
                },
            ],
            exit_label: LabelId(9),
        })
        .into_ref();
        let graph = build(vec![switch, call(3)]);

        for id in 1..=3 {
            assert!(block_calling(&graph, id).is_reachable, "M{id} reachable");
        }
        assert_eq!(capture_count(&graph), 1);
        assert_eq!(region_of_call(&graph, 1), RegionKind::LocalLifetime);
        assert_eq!(region_of_call(&graph, 3), RegionKind::Root);
    }

    fn section(kind: CaseClauseKind, id: u32) -> SwitchCase {
        SwitchCase {
            locals: Vec::new(),
            clauses: vec![CaseClause { label: None, kind }],
            condition: None,
            body: vec![call(id), brk()],
        }
    }

    fn branches_on(graph: &ControlFlowGraph, pred: impl Fn(&OperationKind) -> bool) -> usize {
        graph
            .blocks()
            .iter()
            .filter_map(|b| b.branch_value.as_ref())
            .filter(|v| pred(&v.kind))
            .count()
    }

    fn compares(kind: &OperationKind, expected: BinaryOperatorKind) -> bool {
        matches!(kind, OperationKind::Binary { op, .. } if *op == expected)
    }

    #[test]
    fn test_range_relational_and_pattern_clauses() {
        let switch = Operation::new(OperationKind::Switch {
            locals: Vec::new(),
            value: Operation::parameter(0, TypeRef::int32()),
            cases: vec![
                section(
                    CaseClauseKind::Range {
                        min: Operation::int_literal(1),
                        max: Operation::int_literal(5),
                    },
                    1,
                ),
                section(
                    CaseClauseKind::Relational {
                        op: BinaryOperatorKind::GreaterThan,
                        value: Operation::int_literal(100),
                    },
                    2,
                ),
                section(
                    CaseClauseKind::Pattern {
                        pattern: Pattern::Type(TypeRef::int32()),
                        guard: Some(flag(1)),
                    },
                    3,
                ),
            ],
            exit_label: LabelId(9),
        })
        .into_ref();
        let graph = build(vec![switch, call(4)]);

        for id in 1..=4 {
            assert!(block_calling(&graph, id).is_reachable, "M{id} reachable");
        }
        assert_eq!(capture_count(&graph), 1);
        // Both range bounds are tested separately, each skipping to the next clause
        assert_eq!(branches_on(&graph, |k| compares(k, BinaryOperatorKind::GreaterThanOrEqual)), 1);
        assert_eq!(branches_on(&graph, |k| compares(k, BinaryOperatorKind::LessThanOrEqual)), 1);
        assert_eq!(branches_on(&graph, |k| compares(k, BinaryOperatorKind::GreaterThan)), 1);
        assert_eq!(branches_on(&graph, |k| matches!(k, OperationKind::IsPattern { .. })), 1);
        assert_eq!(branches_on(&graph, |k| matches!(k, OperationKind::ParameterReference(1))), 1);
        assert!(graph
            .blocks()
            .iter()
            .filter(|b| b.branch_value.is_some())
            .all(|b| b.condition_kind == ConditionKind::WhenFalse));
    }
}

// =============================================================================
// DECLARATIONS
// =============================================================================

mod declarations {
    use super::*;

    #[test]
    fn test_static_local_initialized_under_semaphore() {
        let declaration = Operation::new(OperationKind::VariableDeclarationGroup(vec![VariableDeclarator {
            local: LocalId(3),
            ty: TypeRef::int32(),
            initializer: Some(Operation::call(MethodId(40), Vec::new(), Some(TypeRef::int32()))),
            is_static: true,
        }]))
        .into_ref();
        let graph = build(vec![declaration, call(2)]);

        assert!(region_kinds(&graph).contains(&RegionKind::StaticLocalInitializer));
        let test = graph
            .blocks()
            .iter()
            .find(|b| {
                b.branch_value
                    .as_ref()
                    .is_some_and(|v| matches!(v.kind, OperationKind::StaticLocalInitializationSemaphore(LocalId(3))))
            })
            .expect("semaphore test");
        assert_eq!(test.condition_kind, ConditionKind::WhenFalse);

        let init = graph
            .blocks()
            .iter()
            .find(|b| graph.region(b.region).kind == RegionKind::StaticLocalInitializer)
            .expect("initializer block");
        assert!(init
            .statements
            .iter()
            .any(|s| matches!(s.kind, OperationKind::SimpleAssignment { .. })));
        let after = block_calling(&graph, 2);
        assert_eq!(test.conditional.as_ref().and_then(|b| b.destination), Some(after.ordinal));
        assert!(after.is_reachable);
    }

    #[test]
    fn test_plain_local_initializer_is_inline() {
        let declaration = Operation::new(OperationKind::VariableDeclarationGroup(vec![VariableDeclarator {
            local: LocalId(3),
            ty: TypeRef::int32(),
            initializer: Some(Operation::int_literal(7)),
            is_static: false,
        }]))
        .into_ref();
        let graph = build(vec![declaration, call(2)]);

        assert_eq!(graph.blocks().len(), 3);
        assert!(!region_kinds(&graph).contains(&RegionKind::StaticLocalInitializer));
    }
}

// =============================================================================
// PACKING AND DETERMINISM
// =============================================================================

mod packing {
    use super::*;

    fn program() -> Vec<opflow::OpRef> {
        vec![
            call(1),
            Operation::if_statement(flag(0), Operation::block(Vec::new(), vec![call(2)]), None),
            Operation::block(Vec::new(), vec![call(3)]),
        ]
    }

    #[test]
    fn test_packing_never_adds_blocks() {
        let packed = build(program());
        let unpacked = build_unpacked(program());
        assert!(packed.blocks().len() < unpacked.blocks().len());
        assert!(packed.regions().len() <= unpacked.regions().len());
        for id in 1..=3 {
            assert!(block_calling(&packed, id).is_reachable);
            assert!(block_calling(&unpacked, id).is_reachable);
        }
    }

    #[test]
    fn test_straight_line_merges_into_one_block() {
        let graph = build(vec![call(1), Operation::block(Vec::new(), vec![call(2)]), call(3)]);
        assert_eq!(graph.blocks().len(), 3);
        assert_eq!(graph.block(1).statements.len(), 3);
    }

    #[test]
    fn test_builds_are_deterministic() {
        let first = build(program());
        let second = build(program());
        assert_eq!(format!("{:?}", first.blocks()), format!("{:?}", second.blocks()));
        assert_eq!(format!("{:?}", first.regions()), format!("{:?}", second.regions()));
    }

    #[test]
    fn test_verify_accepts_built_graphs() {
        opflow::cfg::verify::verify(&build(program())).unwrap();
        opflow::cfg::verify::verify(&build_unpacked(program())).unwrap();
    }
}
