//! Graph Builder
//!
//! Lowers an operation tree into blocks and regions. The walk is split by
//! construct family:
//! - `stmt`: blocks, declarations, `if`, jumps, labels, `switch`
//! - `expr`: expressions, including short-circuiting and null-propagating
//!   operators
//! - `loops`: `while`, `do`, `for`, `foreach` and `For ... To`
//! - `handlers`: `try`, `using` and `lock`
//!
//! Partially evaluated operands live on an explicit evaluation stack.
//! Before any control flow is emitted the stack is spilled: every pending
//! operand is written to a flow capture owned by a stack-spill region, and
//! its slot is replaced by a reference to that capture.

mod expr;
mod handlers;
mod loops;
mod stmt;

use std::sync::atomic::Ordering;

use rustc_hash::FxHashMap;
use tracing::{debug, debug_span, trace};

use super::block::{BasicBlockKind, BlockArena, BlockId, BranchBuilder, BranchSemantics, ConditionKind};
use super::graph::{self, ControlFlowGraph, FrozenParts, GraphFamily};
use super::pack;
use super::reachability;
use super::region::{RegionArena, RegionBuilder, RegionId, RegionKind};
use super::verify;
use crate::error::{CfgError, Result};
use crate::operation::{CaptureId, LabelId, MethodId, OpRef, Operation, OperationKind, TypeRef};
use crate::semantic::WellKnownMember;

/// One slot of the evaluation stack
#[derive(Debug, Clone)]
enum StackEntry {
    /// Marks where a visit began; owns the spill region for operands
    /// pushed above it, once one is needed
    Frame(Option<RegionId>),
    Operand(OpRef),
}

/// Handle returned by [`GraphBuilder::push_stack_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
struct Frame(usize);

pub(crate) struct GraphBuilder {
    family: GraphFamily,
    blocks: BlockArena,
    /// Appended blocks; position is the ordinal
    order: Vec<BlockId>,
    regions: RegionArena,
    root: RegionId,
    current_region: RegionId,
    current_block: Option<BlockId>,
    exit: BlockId,
    eval_stack: Vec<StackEntry>,
    /// Operands below this depth are already spilled
    start_spilling_at: usize,
    labeled_blocks: FxHashMap<LabelId, BlockId>,
    local_functions: Vec<(MethodId, RegionId, OpRef)>,
    anonymous_functions: Vec<(MethodId, RegionId, OpRef)>,
    /// Receiver capture of the innermost conditional access being lowered
    conditional_access_instance: Option<OpRef>,
}

/// Lower `body` into a frozen graph
pub(crate) fn build(body: &OpRef, family: GraphFamily, enclosing_region: Option<usize>) -> Result<ControlFlowGraph> {
    let _span = debug_span!(
        "build_cfg",
        kind = body.kind_name(),
        nested = enclosing_region.is_some()
    )
    .entered();

    let mut builder = GraphBuilder::new(family.clone());
    builder.visit_statement(body)?;
    let exit = builder.exit;
    builder.append_new_block(exit, true);

    if !builder.eval_stack.is_empty() {
        return Err(CfgError::UnbalancedEvalStack {
            expected: 0,
            found: builder.eval_stack.len(),
        });
    }
    builder.resolve_missing_labels();

    debug!(
        blocks = builder.order.len(),
        regions = builder.regions.len(),
        "lowered operation tree"
    );

    let options = family.options.clone();
    if options.pack {
        let mut state = pack::PackState {
            blocks: &mut builder.blocks,
            order: &mut builder.order,
            regions: &mut builder.regions,
            root: builder.root,
        };
        let rounds = pack::pack(&mut state, options.max_pack_iterations);
        debug!(rounds, blocks = builder.order.len(), "packed graph");
    }

    let parts = FrozenParts {
        blocks: builder.blocks,
        order: builder.order,
        regions: builder.regions,
        root: builder.root,
        local_functions: builder.local_functions,
        anonymous_functions: builder.anonymous_functions,
    };
    let mut graph = graph::freeze(parts, family, enclosing_region);
    reachability::mark_reachable(&mut graph, options.fold_constant_conditions);

    if options.verify {
        verify::verify(&graph)?;
    }
    Ok(graph)
}

impl GraphBuilder {
    fn new(family: GraphFamily) -> Self {
        let mut blocks = BlockArena::new();
        let mut regions = RegionArena::new();
        let root = regions.alloc(RegionBuilder::new(RegionKind::Root));
        let entry = blocks.alloc(BasicBlockKind::Entry);
        let exit = blocks.alloc(BasicBlockKind::Exit);
        let mut builder = Self {
            family,
            blocks,
            order: Vec::new(),
            regions,
            root,
            current_region: root,
            current_block: None,
            exit,
            eval_stack: Vec::new(),
            start_spilling_at: 0,
            labeled_blocks: FxHashMap::default(),
            local_functions: Vec::new(),
            anonymous_functions: Vec::new(),
            conditional_access_instance: None,
        };
        builder.append_new_block(entry, false);
        builder.current_block = None;
        builder
    }

    // ---------------------------------------------------------------------
    // Blocks
    // ---------------------------------------------------------------------

    fn new_block(&mut self) -> BlockId {
        self.blocks.alloc(BasicBlockKind::Block)
    }

    /// Put `block` at the end of the block order and make it current. With
    /// `link`, a previous block that has no exit yet falls through into it.
    fn append_new_block(&mut self, block: BlockId, link: bool) {
        if link {
            if let Some(&prev) = self.order.last() {
                if self.blocks[prev].fallthrough.is_unlinked() {
                    self.link_blocks(prev, block, BranchSemantics::Regular);
                }
            }
        }
        debug_assert!(self.blocks[block].ordinal.is_none(), "block appended twice");
        self.blocks[block].ordinal = Some(self.order.len());
        self.order.push(block);
        self.current_block = Some(block);
        self.regions
            .extend_to_include(self.current_region, block, &self.blocks);
        self.blocks[block].region = Some(self.current_region);
    }

    /// Append a fresh block unless one is already open
    fn current_block(&mut self) -> BlockId {
        match self.current_block {
            Some(block) => block,
            None => {
                let block = self.new_block();
                self.append_new_block(block, true);
                block
            }
        }
    }

    fn add_statement(&mut self, statement: OpRef) {
        let block = self.current_block();
        self.blocks[block].add_statement(Some(statement));
    }

    fn link_blocks(&mut self, from: BlockId, to: BlockId, semantics: BranchSemantics) {
        self.blocks[from].fallthrough = BranchBuilder::to(to, semantics);
        self.blocks[to].predecessors.insert(from);
    }

    fn unconditional_branch(&mut self, destination: BlockId) {
        let block = self.current_block();
        self.link_blocks(block, destination, BranchSemantics::Regular);
        self.current_block = None;
    }

    fn conditional_branch(&mut self, condition: OpRef, jump_if_true: bool, destination: BlockId) {
        let block = self.current_block();
        let b = &mut self.blocks[block];
        b.branch_value = Some(condition);
        b.condition_kind = if jump_if_true {
            ConditionKind::WhenTrue
        } else {
            ConditionKind::WhenFalse
        };
        b.conditional = BranchBuilder::to(destination, BranchSemantics::Regular);
        self.blocks[destination].predecessors.insert(block);
        self.current_block = None;
    }

    /// End the current block with a terminal edge
    fn link_terminal(&mut self, semantics: BranchSemantics, value: Option<OpRef>) {
        let block = self.current_block();
        let b = &mut self.blocks[block];
        debug_assert!(b.fallthrough.is_unlinked() && !b.has_condition());
        b.branch_value = value;
        b.fallthrough = BranchBuilder::terminal(semantics);
        self.current_block = None;
    }

    /// Append an empty block that ends a filter or finally region
    fn append_dispatch_block(&mut self) {
        let block = self.new_block();
        self.append_new_block(block, true);
        self.blocks[block].fallthrough = BranchBuilder::terminal(BranchSemantics::StructuredExceptionHandling);
        self.current_block = None;
    }

    fn labeled_or_new_block(&mut self, label: Option<LabelId>) -> BlockId {
        let Some(label) = label else {
            return self.new_block();
        };
        if let Some(block) = self.labeled_blocks.get(&label) {
            return *block;
        }
        let block = self.new_block();
        self.labeled_blocks.insert(label, block);
        block
    }

    fn visit_label(&mut self, label: LabelId) {
        let mut block = self.labeled_or_new_block(Some(label));
        if self.blocks[block].ordinal.is_some() {
            // Duplicate label; the first definition wins
            block = self.new_block();
        }
        self.append_new_block(block, true);
    }

    /// Branches to labels that were never defined become error branches
    fn resolve_missing_labels(&mut self) {
        for index in 0..self.order.len() {
            let id = self.order[index];
            for conditional in [true, false] {
                let branch = if conditional {
                    self.blocks[id].conditional
                } else {
                    self.blocks[id].fallthrough
                };
                let Some(destination) = branch.destination else {
                    continue;
                };
                if self.blocks[destination].ordinal.is_some() {
                    continue;
                }
                trace!(block = %id, "branch to undefined label");
                self.blocks[destination].predecessors.remove(id);
                let error = BranchBuilder::terminal(BranchSemantics::Error);
                if conditional {
                    self.blocks[id].conditional = error;
                } else {
                    self.blocks[id].fallthrough = error;
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Regions
    // ---------------------------------------------------------------------

    fn enter_region(&mut self, region: RegionBuilder) -> RegionId {
        self.spill_eval_stack();
        let id = self.regions.alloc(region);
        self.enter_region_core(id);
        id
    }

    fn enter_region_core(&mut self, region: RegionId) {
        self.regions.add(self.current_region, region);
        self.current_region = region;
        self.current_block = None;
    }

    fn leave_region(&mut self) {
        if self.regions[self.current_region].is_empty() {
            let block = self.new_block();
            self.append_new_block(block, true);
        }
        let enclosed = self.current_region;
        let Some(parent) = self.regions[enclosed].enclosing else {
            debug_assert!(false, "cannot leave the root region");
            return;
        };
        self.current_region = parent;
        if let Some(last) = self.regions[enclosed].last_block {
            self.regions.extend_to_include(parent, last, &self.blocks);
        }
        self.current_block = None;
    }

    fn next_capture_id(&mut self, owner: RegionId) -> CaptureId {
        let id = CaptureId(self.family.captures.fetch_add(1, Ordering::Relaxed));
        self.regions[owner].capture_ids.push(id);
        id
    }

    // ---------------------------------------------------------------------
    // Evaluation stack
    // ---------------------------------------------------------------------

    fn push_stack_frame(&mut self) -> Frame {
        let frame = Frame(self.eval_stack.len());
        self.eval_stack.push(StackEntry::Frame(None));
        frame
    }

    /// Pop `frame`. Spill regions opened above its own are merged into it;
    /// its region stays open and passes to the frame below when that frame
    /// has none, so captures stay alive until their reader is emitted.
    fn pop_stack_frame(&mut self, frame: Frame) {
        if let Some(region) = self.pop_frame_core(frame) {
            if let Some(below) = self.nearest_frame_index() {
                if let StackEntry::Frame(slot @ None) = &mut self.eval_stack[below] {
                    *slot = Some(region);
                }
            }
        }
    }

    /// Pop `frame` and close the spill region it owns
    fn pop_stack_frame_and_leave_region(&mut self, frame: Frame) {
        if self.pop_frame_core(frame).is_some() {
            self.leave_region();
        }
    }

    fn pop_frame_core(&mut self, frame: Frame) -> Option<RegionId> {
        let depth = self.eval_stack.len();
        debug_assert_eq!(frame.0 + 1, depth, "stack frames popped out of order");
        if self.start_spilling_at == depth {
            self.start_spilling_at -= 1;
        }
        let Some(StackEntry::Frame(region)) = self.eval_stack.pop() else {
            debug_assert!(false, "expected a stack frame on top of the eval stack");
            return None;
        };
        let region = region?;
        while self.current_region != region {
            let to_merge = self.current_region;
            debug_assert!(self.regions[to_merge].is_stack_spill);
            self.leave_region();
            self.regions.merge_into_parent(to_merge, &mut self.blocks);
        }
        Some(region)
    }

    fn nearest_frame_index(&self) -> Option<usize> {
        self.eval_stack
            .iter()
            .rposition(|entry| matches!(entry, StackEntry::Frame(_)))
    }

    fn push_operand(&mut self, operand: OpRef) {
        self.eval_stack.push(StackEntry::Operand(operand));
    }

    fn pop_operand(&mut self) -> OpRef {
        let depth = self.eval_stack.len();
        if self.start_spilling_at == depth {
            self.start_spilling_at -= 1;
        }
        match self.eval_stack.pop() {
            Some(StackEntry::Operand(operand)) => operand,
            other => {
                debug_assert!(false, "expected an operand, found {:?}", other);
                Operation::invalid(Vec::new(), None)
            }
        }
    }

    /// Materialize every operand pushed since the last spill
    fn spill_eval_stack(&mut self) {
        let mut current_frame = self.eval_stack[..self.start_spilling_at]
            .iter()
            .rposition(|entry| matches!(entry, StackEntry::Frame(_)));

        for index in self.start_spilling_at..self.eval_stack.len() {
            let operand = match &self.eval_stack[index] {
                StackEntry::Frame(_) => {
                    current_frame = Some(index);
                    continue;
                }
                StackEntry::Operand(operand) => operand.clone(),
            };
            if matches!(operand.kind, OperationKind::FlowCaptureReference(_)) {
                continue;
            }
            let Some(frame_index) = current_frame else {
                debug_assert!(false, "operand pushed outside of any stack frame");
                continue;
            };
            let region = self.ensure_spill_region(frame_index);
            let id = self.next_capture_id(region);
            trace!(capture = %id, kind = operand.kind_name(), "spilling operand");
            self.add_statement(Operation::flow_capture(id, operand.clone()));
            self.eval_stack[index] = StackEntry::Operand(Operation::capture_reference(id, &operand));
        }
        self.start_spilling_at = self.eval_stack.len();
    }

    fn ensure_spill_region(&mut self, frame_index: usize) -> RegionId {
        if let StackEntry::Frame(Some(region)) = self.eval_stack[frame_index] {
            return region;
        }
        let region = self.regions.alloc(RegionBuilder::stack_spill());
        self.enter_region_core(region);
        self.eval_stack[frame_index] = StackEntry::Frame(Some(region));
        region
    }

    /// Visit `operation` and write its value to capture `id`
    fn visit_and_capture_into(&mut self, operation: &OpRef, id: CaptureId) -> Result<()> {
        let frame = self.push_stack_frame();
        let result = self.visit_expression(operation)?;
        self.capture_result_if_not_already(id, result);
        self.pop_stack_frame_and_leave_region(frame);
        Ok(())
    }

    /// Visit `operation` and capture its value in the current spill scope
    fn visit_and_capture(&mut self, operation: &OpRef) -> Result<OpRef> {
        let frame = self.push_stack_frame();
        let value = self.visit_expression(operation)?;
        self.push_operand(value);
        self.spill_eval_stack();
        let result = self.pop_operand();
        self.pop_stack_frame(frame);
        Ok(result)
    }

    fn capture_result_if_not_already(&mut self, id: CaptureId, result: OpRef) {
        if let OperationKind::FlowCaptureReference(existing) = result.kind {
            if existing == id {
                return;
            }
        }
        self.spill_eval_stack();
        self.add_statement(Operation::flow_capture(id, result));
    }

    /// Evaluate `operations` left to right, keeping earlier results on the
    /// stack so control flow in later ones spills them
    fn visit_array(&mut self, operations: &[OpRef]) -> Result<Vec<OpRef>> {
        for operation in operations {
            let value = self.visit_expression(operation)?;
            self.push_operand(value);
        }
        let mut result: Vec<OpRef> = (0..operations.len()).map(|_| self.pop_operand()).collect();
        result.reverse();
        Ok(result)
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Call a runtime helper, or an invalid operation when it is missing
    fn helper_call(
        &self,
        member: WellKnownMember,
        instance: Option<OpRef>,
        arguments: Vec<OpRef>,
        ty: Option<TypeRef>,
    ) -> OpRef {
        match self.family.semantics.well_known_member(member) {
            Some(method) => match instance {
                Some(instance) => Operation::call_on(instance, method, arguments, ty),
                None => Operation::call(method, arguments, ty),
            },
            None => {
                let mut children: Vec<OpRef> = instance.into_iter().collect();
                children.extend(arguments);
                let mut invalid = Operation::new(OperationKind::Invalid(children)).implicit();
                invalid.ty = ty;
                invalid.into_ref()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::operation::{LocalId, TypeRef};
    use crate::options::BuildOptions;
    use crate::semantic::DefaultSemantics;

    fn family() -> GraphFamily {
        GraphFamily {
            semantics: Arc::new(DefaultSemantics::new()),
            captures: Arc::new(std::sync::atomic::AtomicU32::new(0)),
            options: BuildOptions::unpacked(),
        }
    }

    #[test]
    fn test_spill_creates_region_for_frame() {
        let mut builder = GraphBuilder::new(family());
        let frame = builder.push_stack_frame();
        builder.push_operand(Operation::local(LocalId(0), TypeRef::int32()));
        builder.spill_eval_stack();

        let StackEntry::Frame(Some(region)) = builder.eval_stack[0] else {
            panic!("frame should own a spill region");
        };
        assert!(builder.regions[region].is_stack_spill);
        assert_eq!(builder.regions[region].capture_ids.len(), 1);
        let reference = builder.pop_operand();
        assert!(matches!(reference.kind, OperationKind::FlowCaptureReference(_)));

        builder.pop_stack_frame_and_leave_region(frame);
        assert_eq!(builder.current_region, builder.root);
        assert!(builder.eval_stack.is_empty());
    }

    #[test]
    fn test_popped_region_passes_to_outer_frame() {
        let mut builder = GraphBuilder::new(family());
        let outer = builder.push_stack_frame();
        let inner = builder.push_stack_frame();
        builder.push_operand(Operation::int_literal(1));
        builder.spill_eval_stack();
        let _ = builder.pop_operand();
        builder.pop_stack_frame(inner);

        assert!(matches!(builder.eval_stack[0], StackEntry::Frame(Some(_))));
        builder.pop_stack_frame_and_leave_region(outer);
        assert_eq!(builder.current_region, builder.root);
    }

    #[test]
    fn test_nested_spill_regions_merge_on_pop() {
        let mut builder = GraphBuilder::new(family());
        let outer = builder.push_stack_frame();
        builder.push_operand(Operation::int_literal(1));
        builder.spill_eval_stack();
        let inner = builder.push_stack_frame();
        builder.push_operand(Operation::int_literal(2));
        builder.spill_eval_stack();
        let _ = builder.pop_operand();
        builder.pop_stack_frame(inner);
        let _ = builder.pop_operand();

        let StackEntry::Frame(Some(region)) = builder.eval_stack[0] else {
            panic!("outer frame should own a spill region");
        };
        builder.pop_stack_frame_and_leave_region(outer);
        assert_eq!(builder.regions[region].capture_ids.len(), 2);
        assert!(builder.regions[region].children.is_empty());
    }
}
