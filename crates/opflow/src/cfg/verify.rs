//! Structural checks on a frozen graph
//!
//! Run after every build when `BuildOptions::verify` is set. A failure
//! means the builder produced an inconsistent graph; the message names
//! the first broken rule found.

use super::block::{BasicBlockKind, BranchSemantics, ConditionKind};
use super::graph::{BasicBlock, BranchRef, ControlFlowGraph, Region};
use super::region::RegionKind;
use crate::error::{CfgError, Result};
use crate::operation::{CaptureId, OpRef, OperationKind};
use rustc_hash::FxHashSet;

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(CfgError::Verification(format!($($arg)+)));
        }
    };
}

/// Check block layout, edges, predecessor lists and the region tree
pub fn verify(graph: &ControlFlowGraph) -> Result<()> {
    verify_blocks(graph)?;
    verify_predecessors(graph)?;
    verify_regions(graph)?;
    verify_block_regions(graph)?;
    verify_captures(graph)?;
    Ok(())
}

fn verify_blocks(graph: &ControlFlowGraph) -> Result<()> {
    let blocks = graph.blocks();
    ensure!(blocks.len() >= 2, "graph has {} blocks, expected entry and exit", blocks.len());
    let last = blocks.len() - 1;

    for (index, block) in blocks.iter().enumerate() {
        ensure!(block.ordinal == index, "block at {index} has ordinal {}", block.ordinal);
        let expected = match index {
            0 => BasicBlockKind::Entry,
            i if i == last => BasicBlockKind::Exit,
            _ => BasicBlockKind::Block,
        };
        ensure!(block.kind == expected, "block {index} is {:?}, expected {expected:?}", block.kind);
        verify_edges(block, blocks.len())?;
    }

    let entry = graph.entry();
    ensure!(entry.predecessors.is_empty(), "entry block has predecessors");
    ensure!(entry.statements.is_empty(), "entry block has statements");
    ensure!(entry.branch_value.is_none(), "entry block has a branch value");
    ensure!(entry.region == 0, "entry block sits in region {}", entry.region);
    let exit = graph.exit();
    ensure!(exit.statements.is_empty(), "exit block has statements");
    ensure!(exit.branch_value.is_none(), "exit block has a branch value");
    ensure!(exit.region == 0, "exit block sits in region {}", exit.region);
    ensure!(
        exit.fallthrough.as_ref().and_then(|b| b.destination).is_none(),
        "exit block has an outgoing edge"
    );
    ensure!(exit.conditional.is_none(), "exit block has a conditional edge");

    for block in blocks {
        verify_branch_semantics(graph, block)?;
    }
    Ok(())
}

fn verify_branch_semantics(graph: &ControlFlowGraph, block: &BasicBlock) -> Result<()> {
    let ordinal = block.ordinal;
    if let Some(conditional) = &block.conditional {
        ensure!(
            !matches!(
                conditional.semantics,
                BranchSemantics::Return
                    | BranchSemantics::Throw
                    | BranchSemantics::Rethrow
                    | BranchSemantics::StructuredExceptionHandling
            ),
            "conditional edge of block {ordinal} is {:?}",
            conditional.semantics
        );
    }
    let Some(fallthrough) = &block.fallthrough else {
        return Ok(());
    };
    if fallthrough.semantics == BranchSemantics::StructuredExceptionHandling {
        ensure!(fallthrough.destination.is_none(), "dispatch from block {ordinal} has a destination");
        let region = graph.region(block.region);
        ensure!(
            matches!(region.kind, RegionKind::Filter | RegionKind::Finally) && region.last_block == ordinal,
            "dispatch from block {ordinal} does not end a filter or finally region"
        );
    }
    if block.branch_value.is_some() && block.condition_kind == ConditionKind::None {
        ensure!(
            matches!(fallthrough.semantics, BranchSemantics::Return | BranchSemantics::Throw),
            "block {ordinal} has a branch value on a {:?} edge",
            fallthrough.semantics
        );
    }
    for branch in block.conditional.iter().chain(std::iter::once(fallthrough)) {
        if branch.destination.is_none() {
            ensure!(
                graph.leaving_regions(branch).is_empty()
                    && graph.entering_regions(branch).is_empty()
                    && graph.finally_regions(branch).is_empty(),
                "edge of block {ordinal} without a destination crosses regions"
            );
        }
    }
    Ok(())
}

fn verify_edges(block: &BasicBlock, len: usize) -> Result<()> {
    let ordinal = block.ordinal;
    match &block.conditional {
        Some(branch) => {
            ensure!(branch.is_conditional, "conditional edge of block {ordinal} is not marked conditional");
            ensure!(
                block.condition_kind != ConditionKind::None,
                "block {ordinal} has a conditional edge but no condition kind"
            );
            ensure!(block.branch_value.is_some(), "block {ordinal} branches on nothing");
        }
        None => ensure!(
            block.condition_kind == ConditionKind::None,
            "block {ordinal} has a condition kind but no conditional edge"
        ),
    }
    for branch in block.conditional.iter().chain(block.fallthrough.iter()) {
        ensure!(branch.source == ordinal, "edge of block {ordinal} names source {}", branch.source);
        if let Some(destination) = branch.destination {
            ensure!(destination < len, "block {ordinal} jumps to missing block {destination}");
            ensure!(destination != 0, "block {ordinal} jumps to the entry block");
        }
    }
    if let (Some(conditional), Some(fallthrough)) = (&block.conditional, &block.fallthrough) {
        ensure!(
            conditional.destination.is_none() || conditional.destination != fallthrough.destination,
            "both edges of block {ordinal} lead to the same block"
        );
    }
    Ok(())
}

fn verify_predecessors(graph: &ControlFlowGraph) -> Result<()> {
    let mut expected: Vec<Vec<BranchRef>> = vec![Vec::new(); graph.blocks().len()];
    for block in graph.blocks() {
        for branch in block.conditional.iter().chain(block.fallthrough.iter()) {
            if let Some(destination) = branch.destination {
                expected[destination].push(BranchRef {
                    source: branch.source,
                    is_conditional: branch.is_conditional,
                });
            }
        }
    }
    for (block, mut expected) in graph.blocks().iter().zip(expected) {
        expected.sort_by_key(|p| (p.source, !p.is_conditional));
        ensure!(
            block.predecessors == expected,
            "predecessors of block {} are {:?}, edges say {:?}",
            block.ordinal,
            block.predecessors,
            expected
        );
    }
    Ok(())
}

fn verify_regions(graph: &ControlFlowGraph) -> Result<()> {
    let regions = graph.regions();
    let root = graph.root_region();
    ensure!(root.kind == RegionKind::Root, "region 0 is {:?}", root.kind);
    ensure!(root.enclosing.is_none(), "root region has an enclosing region");
    ensure!(
        root.first_block == 0 && root.last_block == graph.blocks().len() - 1,
        "root region spans {}..={}",
        root.first_block,
        root.last_block
    );

    for (index, region) in regions.iter().enumerate() {
        ensure!(
            region.first_block <= region.last_block,
            "region {index} spans {}..={}",
            region.first_block,
            region.last_block
        );
        if index > 0 {
            ensure!(region.kind != RegionKind::Root, "region {index} is a second root");
            let Some(parent) = region.enclosing else {
                return Err(CfgError::Verification(format!("region {index} has no enclosing region")));
            };
            ensure!(
                regions[parent].nested.contains(&index),
                "region {index} is missing from the nested list of region {parent}"
            );
        }

        let mut previous_last: Option<usize> = None;
        for child in &region.nested {
            let nested = &regions[*child];
            ensure!(nested.enclosing == Some(index), "region {child} names the wrong parent");
            ensure!(
                nested.first_block >= region.first_block && nested.last_block <= region.last_block,
                "region {child} escapes region {index}"
            );
            if let Some(previous) = previous_last {
                ensure!(nested.first_block > previous, "nested regions of {index} overlap or are out of order");
            }
            previous_last = Some(nested.last_block);
        }
        verify_pairing(graph, index, region)?;
    }
    Ok(())
}

/// Exception regions only come in fixed shapes
fn verify_pairing(graph: &ControlFlowGraph, index: usize, region: &Region) -> Result<()> {
    let kinds: Vec<RegionKind> = region.nested.iter().map(|n| graph.region(*n).kind).collect();
    match region.kind {
        RegionKind::TryAndFinally => ensure!(
            kinds == [RegionKind::Try, RegionKind::Finally],
            "try/finally region {index} holds {kinds:?}"
        ),
        RegionKind::TryAndCatch => {
            ensure!(
                kinds.len() >= 2 && kinds[0] == RegionKind::Try,
                "try/catch region {index} holds {kinds:?}"
            );
            ensure!(
                kinds[1..]
                    .iter()
                    .all(|k| matches!(k, RegionKind::Catch | RegionKind::FilterAndHandler)),
                "try/catch region {index} holds {kinds:?}"
            );
        }
        RegionKind::FilterAndHandler => ensure!(
            kinds == [RegionKind::Filter, RegionKind::Catch],
            "filter region {index} holds {kinds:?}"
        ),
        _ => {}
    }
    match region.kind {
        RegionKind::TryAndCatch | RegionKind::TryAndFinally => ensure!(
            region.locals.is_empty() && region.capture_ids.is_empty(),
            "exception region {index} declares locals or captures"
        ),
        RegionKind::LocalLifetime if graph.is_packed() => ensure!(
            !(region.locals.is_empty() && region.local_functions.is_empty() && region.capture_ids.is_empty()),
            "local lifetime region {index} declares nothing"
        ),
        _ => {}
    }
    if let (RegionKind::Try | RegionKind::Filter, Some(parent)) = (region.kind, region.enclosing) {
        ensure!(
            region.first_block == graph.region(parent).first_block,
            "region {index} does not start its enclosing region"
        );
    }

    let parent = region.enclosing.map(|p| graph.region(p).kind);
    match region.kind {
        RegionKind::Try => ensure!(
            matches!(parent, Some(RegionKind::TryAndCatch | RegionKind::TryAndFinally)),
            "try region {index} sits in {parent:?}"
        ),
        RegionKind::Finally => ensure!(
            parent == Some(RegionKind::TryAndFinally),
            "finally region {index} sits in {parent:?}"
        ),
        RegionKind::Filter => ensure!(
            parent == Some(RegionKind::FilterAndHandler),
            "filter region {index} sits in {parent:?}"
        ),
        _ => {}
    }
    Ok(())
}

/// Every block belongs to exactly one region: the innermost one covering it
fn verify_block_regions(graph: &ControlFlowGraph) -> Result<()> {
    for block in graph.blocks() {
        let region = graph.region(block.region);
        ensure!(
            region.contains_block(block.ordinal),
            "block {} lies outside its region {}",
            block.ordinal,
            block.region
        );
        let covered = region
            .nested
            .iter()
            .find(|n| graph.region(**n).contains_block(block.ordinal));
        ensure!(
            covered.is_none(),
            "block {} belongs to region {} but nested region {:?} covers it",
            block.ordinal,
            block.region,
            covered
        );
    }
    Ok(())
}

/// Every capture is written, in block order, before it is read
fn verify_captures(graph: &ControlFlowGraph) -> Result<()> {
    let mut written = FxHashSet::default();
    for block in graph.blocks() {
        for operation in block.statements.iter().chain(block.branch_value.iter()) {
            check_capture_reads(operation, block.ordinal, &mut written)?;
        }
    }
    Ok(())
}

fn check_capture_reads(operation: &OpRef, ordinal: usize, written: &mut FxHashSet<CaptureId>) -> Result<()> {
    for child in operation.kind.children() {
        check_capture_reads(child, ordinal, written)?;
    }
    match operation.kind {
        OperationKind::FlowCaptureReference(id) => ensure!(
            written.contains(&id),
            "block {ordinal} reads capture {id} before any write"
        ),
        OperationKind::FlowCapture { id, .. } => {
            written.insert(id);
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::verify;
    use crate::cfg::graph::ControlFlowGraph;
    use crate::error::CfgError;
    use crate::operation::{CaptureId, MethodId, OpRef, Operation, OperationKind, TypeRef};
    use crate::options::BuildOptions;
    use crate::semantic::DefaultSemantics;

    fn call(id: u32) -> OpRef {
        Operation::expression_statement(Operation::call(MethodId(id), Vec::new(), None))
    }

    fn build(body: OpRef, pack: bool) -> ControlFlowGraph {
        let options = BuildOptions {
            pack,
            verify: false,
            ..BuildOptions::default()
        };
        ControlFlowGraph::build_with(&body, Arc::new(DefaultSemantics::new()), &options).unwrap()
    }

    #[test]
    fn test_straight_line_graph_verifies() {
        let graph = build(Operation::block(Vec::new(), vec![call(1), call(2)]), true);
        verify(&graph).unwrap();
    }

    #[test]
    fn test_unpacked_try_finally_verifies() {
        let body = Operation::new(OperationKind::Try {
            body: call(1),
            catches: Vec::new(),
            finally: Some(call(2)),
            exit_label: None,
        })
        .into_ref();
        for pack in [false, true] {
            let graph = build(Operation::block(Vec::new(), vec![body.clone(), call(3)]), pack);
            verify(&graph).unwrap();
        }
    }

    #[test]
    fn test_missing_predecessor_is_reported() {
        let mut graph = build(Operation::block(Vec::new(), vec![call(1)]), true);
        let exit = graph.blocks().len() - 1;
        graph.blocks_mut()[exit].predecessors.clear();
        let err = verify(&graph).unwrap_err();
        assert!(matches!(err, CfgError::Verification(ref m) if m.contains("predecessors")));
    }

    #[test]
    fn test_conditional_graph_verifies() {
        let body = Operation::if_statement(Operation::bool_literal(true), call(1), Some(call(2)));
        for pack in [false, true] {
            verify(&build(body.clone(), pack)).unwrap();
        }
    }

    #[test]
    fn test_ternary_captures_verify() {
        let value = Operation::ternary(
            Operation::parameter(0, TypeRef::boolean()),
            Operation::int_literal(1),
            Operation::int_literal(2),
            TypeRef::int32(),
        );
        let body = Operation::block(Vec::new(), vec![Operation::return_value(Some(value))]);
        for pack in [false, true] {
            verify(&build(body.clone(), pack)).unwrap();
        }
    }

    #[test]
    fn test_read_of_unwritten_capture_is_reported() {
        let mut graph = build(Operation::block(Vec::new(), vec![call(1)]), true);
        let read = Operation::new(OperationKind::FlowCaptureReference(CaptureId(7)))
            .with_type(TypeRef::int32())
            .into_ref();
        graph.blocks_mut()[1]
            .statements
            .push(Operation::expression_statement(read));
        let err = verify(&graph).unwrap_err();
        assert!(matches!(err, CfgError::Verification(ref m) if m.contains("capture7")));
    }
}
