//! Graph Packing
//!
//! Cleanup run on the builder arenas before freezing. Lowering is
//! deliberately naive: it leaves empty join blocks, chains of blocks that
//! always run back to back and lifetime regions that declare nothing.
//! Packing removes those, round after round, until nothing changes.
//!
//! Block rules:
//! - a block whose only predecessor falls straight into it, in the same
//!   region, is appended to that predecessor
//! - an empty block that just falls through is bypassed and removed
//! - a `try`/`finally` whose finally does nothing loses both regions
//!
//! Region rules:
//! - a lifetime region that declares nothing is merged into its parent
//! - a lifetime region that is the only child of a lifetime region with
//!   the same block range is merged into it
//! - a lifetime region around a single empty block is dropped

use tracing::{trace, warn};

use super::block::{BasicBlockKind, BlockArena, BlockId, BranchBuilder, BranchSemantics};
use super::region::{RegionArena, RegionId, RegionKind};

pub(crate) struct PackState<'a> {
    pub blocks: &'a mut BlockArena,
    pub order: &'a mut Vec<BlockId>,
    pub regions: &'a mut RegionArena,
    pub root: RegionId,
}

/// Pack until a fixed point or `max_iterations` rounds; returns the number
/// of rounds run
pub(crate) fn pack(state: &mut PackState<'_>, max_iterations: usize) -> usize {
    let mut rounds = 0;
    while rounds < max_iterations {
        rounds += 1;
        let regions_changed = state.pack_regions();
        let blocks_changed = state.pack_blocks();
        if !regions_changed && !blocks_changed {
            return rounds;
        }
    }
    if max_iterations > 0 {
        warn!(rounds, "packing stopped before reaching a fixed point");
    }
    rounds
}

impl PackState<'_> {
    fn pack_regions(&mut self) -> bool {
        let mut changed = false;
        for index in 0..self.regions.len() {
            let id = RegionId(index as u32);
            let region = &self.regions[id];
            if region.freed || id == self.root || region.kind != RegionKind::LocalLifetime {
                continue;
            }

            if !region.has_declarations() {
                trace!(region = %id, "merging region without declarations");
                self.regions.merge_into_parent(id, self.blocks);
                changed = true;
                continue;
            }

            if let [only] = region.children[..] {
                let child = &self.regions[only];
                if child.kind == RegionKind::LocalLifetime
                    && child.first_block == region.first_block
                    && child.last_block == region.last_block
                {
                    trace!(region = %only, into = %id, "merging sole nested region");
                    self.regions.merge_into_parent(only, self.blocks);
                    changed = true;
                    continue;
                }
            }

            let single_empty_block = match (region.first_block, region.last_block) {
                (Some(first), Some(last)) => first == last && self.blocks[first].is_empty(),
                _ => false,
            };
            if single_empty_block && region.local_functions.is_empty() && region.children.is_empty() {
                trace!(region = %id, "dropping region around an empty block");
                let region = &mut self.regions[id];
                region.locals.clear();
                region.capture_ids.clear();
                self.regions.merge_into_parent(id, self.blocks);
                changed = true;
            }
        }
        changed
    }

    fn pack_blocks(&mut self) -> bool {
        let mut changed = false;
        let mut position = 1;
        while position + 1 < self.order.len() {
            let block = self.order[position];
            if self.try_merge_into_predecessor(block) || self.try_remove_empty_block(block) {
                changed = true;
                // The next block now sits at `position`
                continue;
            }
            position += 1;
        }

        for index in 0..self.regions.len() {
            let id = RegionId(index as u32);
            if !self.regions[id].freed && self.regions[id].kind == RegionKind::TryAndFinally {
                changed |= self.try_collapse_empty_finally(id);
            }
        }
        changed
    }

    fn region_of(&self, block: BlockId) -> RegionId {
        self.blocks[block].region.unwrap_or(self.root)
    }

    fn ordinal(&self, block: BlockId) -> usize {
        self.blocks[block].ordinal.unwrap_or(usize::MAX)
    }

    /// Handler, protected and initializer regions are entered at their
    /// first block, which must stay in place
    fn starts_structured_region(&self, block: BlockId) -> bool {
        (0..self.regions.len()).any(|index| {
            let region = &self.regions[RegionId(index as u32)];
            !region.freed
                && region.first_block == Some(block)
                && !matches!(region.kind, RegionKind::LocalLifetime | RegionKind::Root)
        })
    }

    fn is_sole_block(&self, block: BlockId) -> bool {
        (0..self.regions.len()).any(|index| {
            let region = &self.regions[RegionId(index as u32)];
            !region.freed && region.first_block == Some(block) && region.last_block == Some(block)
        })
    }

    fn try_merge_into_predecessor(&mut self, block: BlockId) -> bool {
        let b = &self.blocks[block];
        if b.kind != BasicBlockKind::Block || !b.has_statements() {
            return false;
        }
        let Some(pred) = b.predecessors.single() else {
            return false;
        };
        let p = &self.blocks[pred];
        if p.kind == BasicBlockKind::Entry
            || p.has_condition()
            || p.branch_value.is_some()
            || p.fallthrough != BranchBuilder::to(block, BranchSemantics::Regular)
            || self.region_of(pred) != self.region_of(block)
            || self.ordinal(pred) >= self.ordinal(block)
        {
            return false;
        }

        trace!(block = %block, into = %pred, "merging block into predecessor");
        self.blocks.move_statements(block, pred);
        let b = &mut self.blocks[block];
        let branch_value = b.branch_value.take();
        let condition_kind = std::mem::take(&mut b.condition_kind);
        let conditional = std::mem::take(&mut b.conditional);
        let fallthrough = std::mem::take(&mut b.fallthrough);
        b.predecessors = Default::default();

        for successor in conditional.destination.into_iter().chain(fallthrough.destination) {
            self.blocks[successor].predecessors.remove(block);
            self.blocks[successor].predecessors.insert(pred);
        }
        let p = &mut self.blocks[pred];
        p.branch_value = branch_value;
        p.condition_kind = condition_kind;
        p.conditional = conditional;
        p.fallthrough = fallthrough;

        self.remove_from_order(block);
        true
    }

    fn try_remove_empty_block(&mut self, block: BlockId) -> bool {
        let b = &self.blocks[block];
        if b.kind != BasicBlockKind::Block || !b.is_empty() || b.has_condition() {
            return false;
        }
        if self.starts_structured_region(block) || self.is_sole_block(block) {
            return false;
        }
        let predecessors = b.predecessors.to_vec();

        let fallthrough = b.fallthrough;
        if predecessors.is_empty() {
            // Unreachable filler left behind by a jump or a throw
            if !matches!(fallthrough.semantics, BranchSemantics::Regular | BranchSemantics::None) {
                return false;
            }
            trace!(block = %block, "removing unreachable empty block");
            self.unlink_successors(block);
            self.remove_from_order(block);
            return true;
        }

        let Some(destination) = fallthrough.destination else {
            return self.try_forward_terminal(block, &predecessors);
        };
        if fallthrough.semantics != BranchSemantics::Regular || destination == block {
            return false;
        }
        if !self.can_bypass(block, destination, &predecessors) {
            return false;
        }

        trace!(block = %block, to = %destination, "bypassing empty block");
        for pred in &predecessors {
            let p = &mut self.blocks[*pred];
            if p.conditional.destination == Some(block) {
                p.conditional.destination = Some(destination);
            }
            if p.fallthrough.destination == Some(block) {
                p.fallthrough.destination = Some(destination);
            }
            self.blocks[destination].predecessors.insert(*pred);
        }
        self.unlink_successors(block);
        self.blocks[block].predecessors = Default::default();
        self.remove_from_order(block);
        true
    }

    /// Hand the terminal edge of an empty `block` to the one block that
    /// falls into it
    fn try_forward_terminal(&mut self, block: BlockId, predecessors: &[BlockId]) -> bool {
        let terminal = self.blocks[block].fallthrough;
        let [pred] = predecessors else {
            return false;
        };
        let pred = *pred;
        let p = &self.blocks[pred];
        if !terminal.semantics.is_terminal()
            || p.kind != BasicBlockKind::Block
            || p.has_condition()
            || p.branch_value.is_some()
            || p.fallthrough != BranchBuilder::to(block, BranchSemantics::Regular)
            || self.region_of(pred) != self.region_of(block)
            || self.ordinal(pred) >= self.ordinal(block)
        {
            return false;
        }

        trace!(block = %block, into = %pred, semantics = ?terminal.semantics, "forwarding terminal edge");
        self.blocks[pred].fallthrough = terminal;
        let b = &mut self.blocks[block];
        b.fallthrough = BranchBuilder::default();
        b.predecessors = Default::default();
        self.remove_from_order(block);
        true
    }

    /// Whether every predecessor can jump straight to `destination` and
    /// cross exactly the regions it crossed through `block`
    fn can_bypass(&self, block: BlockId, destination: BlockId, predecessors: &[BlockId]) -> bool {
        let block_region = self.region_of(block);
        let same_region = block_region == self.region_of(destination)
            || predecessors
                .iter()
                .all(|pred| self.region_of(*pred) == block_region);
        if !same_region {
            return false;
        }

        predecessors.iter().all(|pred| {
            let p = &self.blocks[*pred];
            if p.kind == BasicBlockKind::Entry && self.ordinal(destination) != self.ordinal(block) + 1 {
                return false;
            }
            // Both edges of a conditional landing on one block would lose
            // the test
            let conditional = p.conditional.destination.map(|d| if d == block { destination } else { d });
            let fallthrough = p.fallthrough.destination.map(|d| if d == block { destination } else { d });
            !(p.has_condition() && conditional.is_some() && conditional == fallthrough)
        })
    }

    fn try_collapse_empty_finally(&mut self, try_and_finally: RegionId) -> bool {
        let [protected, finally] = self.regions[try_and_finally].children[..] else {
            return false;
        };
        let f = &self.regions[finally];
        if f.kind != RegionKind::Finally
            || !f.children.is_empty()
            || f.has_declarations()
            || self.regions[protected].has_declarations()
        {
            return false;
        }
        let (Some(first), Some(last)) = (f.first_block, f.last_block) else {
            return false;
        };
        let finally_blocks: Vec<BlockId> = self.order[self.ordinal(first)..=self.ordinal(last)].to_vec();
        if finally_blocks.iter().any(|b| !self.blocks[*b].is_empty()) {
            return false;
        }

        trace!(region = %try_and_finally, "collapsing try with an empty finally");
        for block in &finally_blocks {
            self.unlink_successors(*block);
            self.blocks[*block].predecessors = Default::default();
            self.remove_from_order(*block);
        }
        self.regions.remove(try_and_finally, finally);
        self.regions.merge_into_parent(protected, self.blocks);
        self.regions.merge_into_parent(try_and_finally, self.blocks);
        true
    }

    /// Drop `block` from its successors' predecessor sets and clear its edges
    fn unlink_successors(&mut self, block: BlockId) {
        let b = &mut self.blocks[block];
        let successors: Vec<BlockId> = b.successors().collect();
        b.conditional = BranchBuilder::default();
        b.fallthrough = BranchBuilder::default();
        b.condition_kind = Default::default();
        for successor in successors {
            self.blocks[successor].predecessors.remove(block);
        }
    }

    /// Take `block` out of the block order and renumber what follows
    fn remove_from_order(&mut self, block: BlockId) {
        let Some(position) = self.blocks[block].ordinal else {
            return;
        };
        let prev = position.checked_sub(1).map(|p| self.order[p]);
        let next = self.order.get(position + 1).copied();
        self.regions.forget_block(block, prev, next);
        self.order.remove(position);
        for (ordinal, id) in self.order.iter().enumerate().skip(position) {
            self.blocks[*id].ordinal = Some(ordinal);
        }
        self.blocks[block].ordinal = None;
    }
}
