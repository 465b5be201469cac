//! Reachability
//!
//! Marks the blocks of a frozen graph that control can reach from the
//! entry. Leaving a `try` runs its finally first, so an edge out of a
//! protected region only continues when every finally on the way can
//! complete normally. Each finally is walked once on its own and the
//! outcome memoized. Any reachable block may throw: the exception is
//! dispatched up the region tree into the catch and filter regions of
//! every enclosing `try`.

use rustc_hash::{FxHashMap, FxHashSet};

use super::block::{BranchSemantics, ConditionKind};
use super::graph::{Branch, ControlFlowGraph};
use super::region::RegionKind;

pub(crate) fn mark_reachable(graph: &mut ControlFlowGraph, fold_constant_conditions: bool) {
    let reachable = Reachability::new(graph, fold_constant_conditions).run();
    for (block, reachable) in graph.blocks_mut().iter_mut().zip(reachable) {
        block.is_reachable = reachable;
    }
}

struct Reachability<'g> {
    graph: &'g ControlFlowGraph,
    fold_constant_conditions: bool,
    reachable: Vec<bool>,
    /// Whether control can run off the end of each finally region
    finally_completes: FxHashMap<usize, bool>,
    /// Regions exceptions have already been dispatched from
    dispatched: FxHashSet<usize>,
}

impl<'g> Reachability<'g> {
    fn new(graph: &'g ControlFlowGraph, fold_constant_conditions: bool) -> Self {
        Self {
            graph,
            fold_constant_conditions,
            reachable: vec![false; graph.blocks().len()],
            finally_completes: FxHashMap::default(),
            dispatched: FxHashSet::default(),
        }
    }

    fn run(mut self) -> Vec<bool> {
        self.walk(0, None);
        self.reachable
    }

    /// Depth-first walk from `start`. When walking the body of finally
    /// region `finally`, reports whether its end was reached.
    fn walk(&mut self, start: usize, finally: Option<usize>) -> bool {
        let graph = self.graph;
        let mut completes = false;
        let mut stack = vec![start];

        while let Some(ordinal) = stack.pop() {
            if self.reachable[ordinal] {
                continue;
            }
            self.reachable[ordinal] = true;
            let block = &graph.blocks()[ordinal];
            self.dispatch_exception(block.region, &mut stack);

            let folded = if self.fold_constant_conditions {
                block.branch_value.as_ref().and_then(|value| value.constant_bool())
            } else {
                None
            };
            let (follow_conditional, follow_fallthrough) = match (block.condition_kind, folded) {
                (ConditionKind::None, _) => (false, true),
                (kind, Some(value)) => {
                    let taken = value == (kind == ConditionKind::WhenTrue);
                    (taken, !taken)
                }
                (_, None) => (true, true),
            };

            if follow_conditional {
                if let Some(branch) = &block.conditional {
                    self.follow(branch, &mut stack);
                }
            }
            if follow_fallthrough {
                if let Some(branch) = &block.fallthrough {
                    // Filters nested in the finally end the same way; only the finally's own block counts
                    let ends_finally = branch.semantics == BranchSemantics::StructuredExceptionHandling
                        && finally.is_some_and(|f| block.region == f);
                    if ends_finally {
                        completes = true;
                    }
                    self.follow(branch, &mut stack);
                }
            }
        }
        completes
    }

    fn follow(&mut self, branch: &'g Branch, stack: &mut Vec<usize>) {
        let Some(destination) = branch.destination else {
            return;
        };
        for finally in self.graph.finally_regions(branch) {
            if !self.finally_completes(*finally) {
                return;
            }
        }
        stack.push(destination);
    }

    fn finally_completes(&mut self, finally: usize) -> bool {
        if let Some(completes) = self.finally_completes.get(&finally) {
            return *completes;
        }
        // Provisional answer for re-entrant queries while the body is walked
        self.finally_completes.insert(finally, false);
        let first = self.graph.region(finally).first_block;
        let completes = self.walk(first, Some(finally));
        self.finally_completes.insert(finally, completes);
        completes
    }

    /// Simulate an exception escaping from `region`
    fn dispatch_exception(&mut self, region: usize, stack: &mut Vec<usize>) {
        let graph = self.graph;
        let mut current = Some(region);
        while let Some(index) = current {
            if !self.dispatched.insert(index) {
                return;
            }
            let r = graph.region(index);
            let enclosing = r.enclosing;
            match (r.kind, enclosing.map(|e| graph.region(e))) {
                (RegionKind::Try, Some(parent)) if parent.kind == RegionKind::TryAndFinally => {
                    if let Some(finally) = parent.nested.get(1) {
                        if !self.finally_completes(*finally) {
                            return;
                        }
                    }
                }
                (RegionKind::Try, Some(parent)) if parent.kind == RegionKind::TryAndCatch => {
                    self.enter_handlers(&parent.nested[1..], stack);
                }
                (RegionKind::Filter, Some(handler)) => {
                    // An exception thrown by a filter moves on to the next handler
                    if let (Some(own), Some(try_and_catch)) = (enclosing, handler.enclosing) {
                        let siblings = &graph.region(try_and_catch).nested;
                        if let Some(position) = siblings.iter().position(|n| *n == own) {
                            self.enter_handlers(&siblings[position + 1..], stack);
                        }
                    }
                }
                _ => {}
            }
            current = enclosing;
        }
    }

    fn enter_handlers(&mut self, handlers: &[usize], stack: &mut Vec<usize>) {
        for handler in handlers {
            stack.push(self.graph.region(*handler).first_block);
        }
    }
}
