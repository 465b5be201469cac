//! Basic Block Builders
//!
//! Mutable blocks used while lowering. Blocks live in a [`BlockArena`] and
//! refer to each other by [`BlockId`]; the ordinal, the position in the
//! final block array, is assigned when a block is appended and rewritten
//! whenever packing removes blocks.

use std::fmt;
use std::ops::{Index, IndexMut};

use rustc_hash::FxHashSet;

use super::region::RegionId;
use crate::operation::OpRef;

/// Arena index of a block builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicBlockKind {
    Entry,
    Exit,
    Block,
}

/// What happens when control leaves a block along an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BranchSemantics {
    /// Not linked yet
    #[default]
    None,
    Regular,
    Return,
    Throw,
    Rethrow,
    /// Resume exception dispatch, or leave a finally
    StructuredExceptionHandling,
    ProgramTermination,
    /// Branch to a label that was never defined
    Error,
}

impl BranchSemantics {
    /// Semantics that never carry a destination
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BranchSemantics::Throw
                | BranchSemantics::Rethrow
                | BranchSemantics::StructuredExceptionHandling
                | BranchSemantics::ProgramTermination
                | BranchSemantics::Error
        )
    }
}

/// Which evaluation of the branch value takes the conditional edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConditionKind {
    #[default]
    None,
    WhenTrue,
    WhenFalse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchBuilder {
    pub destination: Option<BlockId>,
    pub semantics: BranchSemantics,
}

impl BranchBuilder {
    pub fn to(destination: BlockId, semantics: BranchSemantics) -> Self {
        Self {
            destination: Some(destination),
            semantics,
        }
    }

    pub fn terminal(semantics: BranchSemantics) -> Self {
        Self {
            destination: None,
            semantics,
        }
    }

    /// Neither a destination nor a semantics has been assigned
    pub fn is_unlinked(&self) -> bool {
        self.destination.is_none() && self.semantics == BranchSemantics::None
    }
}

/// Incoming-edge set that avoids allocating for up to two predecessors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Predecessors {
    #[default]
    Empty,
    One(BlockId),
    Two(BlockId, BlockId),
    Many(FxHashSet<BlockId>),
}

impl Predecessors {
    pub fn insert(&mut self, block: BlockId) {
        *self = match std::mem::take(self) {
            Predecessors::Empty => Predecessors::One(block),
            Predecessors::One(a) if a == block => Predecessors::One(a),
            Predecessors::One(a) => Predecessors::Two(a, block),
            Predecessors::Two(a, b) if a == block || b == block => Predecessors::Two(a, b),
            Predecessors::Two(a, b) => {
                let mut set = FxHashSet::default();
                set.insert(a);
                set.insert(b);
                set.insert(block);
                Predecessors::Many(set)
            }
            Predecessors::Many(mut set) => {
                set.insert(block);
                Predecessors::Many(set)
            }
        };
    }

    pub fn remove(&mut self, block: BlockId) {
        *self = match std::mem::take(self) {
            Predecessors::One(a) if a == block => Predecessors::Empty,
            Predecessors::Two(a, b) if a == block => Predecessors::One(b),
            Predecessors::Two(a, b) if b == block => Predecessors::One(a),
            Predecessors::Many(mut set) => {
                set.remove(&block);
                Predecessors::Many(set)
            }
            other => other,
        };
    }

    /// The only predecessor, if there is exactly one
    pub fn single(&self) -> Option<BlockId> {
        match self {
            Predecessors::One(a) => Some(*a),
            Predecessors::Many(set) if set.len() == 1 => set.iter().next().copied(),
            _ => None,
        }
    }

    /// Snapshot in arena order
    pub fn to_vec(&self) -> Vec<BlockId> {
        let mut result = match self {
            Predecessors::Empty => Vec::new(),
            Predecessors::One(a) => vec![*a],
            Predecessors::Two(a, b) => vec![*a, *b],
            Predecessors::Many(set) => set.iter().copied().collect(),
        };
        result.sort();
        result
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlockBuilder {
    pub kind: BasicBlockKind,
    /// Position in the block order once appended
    pub ordinal: Option<usize>,
    statements: Vec<OpRef>,
    pub branch_value: Option<OpRef>,
    pub condition_kind: ConditionKind,
    pub conditional: BranchBuilder,
    pub fallthrough: BranchBuilder,
    pub predecessors: Predecessors,
    /// Innermost region containing this block
    pub region: Option<RegionId>,
}

impl BasicBlockBuilder {
    pub fn new(kind: BasicBlockKind) -> Self {
        Self {
            kind,
            ordinal: None,
            statements: Vec::new(),
            branch_value: None,
            condition_kind: ConditionKind::None,
            conditional: BranchBuilder::default(),
            fallthrough: BranchBuilder::default(),
            predecessors: Predecessors::Empty,
            region: None,
        }
    }

    pub fn add_statement(&mut self, statement: Option<OpRef>) {
        if let Some(statement) = statement {
            self.statements.push(statement);
        }
    }

    pub fn statements(&self) -> &[OpRef] {
        &self.statements
    }

    pub fn has_statements(&self) -> bool {
        !self.statements.is_empty()
    }

    pub fn take_statements(&mut self) -> Vec<OpRef> {
        std::mem::take(&mut self.statements)
    }

    pub fn has_condition(&self) -> bool {
        self.condition_kind != ConditionKind::None
    }

    /// Nothing executes in this block and it does not test anything
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.branch_value.is_none()
    }

    /// Destinations of both edges, conditional first
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.conditional
            .destination
            .into_iter()
            .chain(self.fallthrough.destination)
    }
}

/// Owner of every block builder of one build
#[derive(Debug, Default)]
pub struct BlockArena {
    blocks: Vec<BasicBlockBuilder>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: BasicBlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlockBuilder::new(kind));
        id
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Append `from`'s statements to `to`, leaving `from` empty
    pub fn move_statements(&mut self, from: BlockId, to: BlockId) {
        let moved = self.blocks[from.index()].take_statements();
        self.blocks[to.index()].statements.extend(moved);
    }
}

impl Index<BlockId> for BlockArena {
    type Output = BasicBlockBuilder;

    fn index(&self, id: BlockId) -> &BasicBlockBuilder {
        &self.blocks[id.index()]
    }
}

impl IndexMut<BlockId> for BlockArena {
    fn index_mut(&mut self, id: BlockId) -> &mut BasicBlockBuilder {
        &mut self.blocks[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predecessors_grow_and_shrink() {
        let mut preds = Predecessors::default();
        preds.insert(BlockId(3));
        preds.insert(BlockId(3));
        assert_eq!(preds, Predecessors::One(BlockId(3)));

        preds.insert(BlockId(1));
        assert!(matches!(preds, Predecessors::Two(_, _)));

        preds.insert(BlockId(7));
        assert_eq!(preds.to_vec(), vec![BlockId(1), BlockId(3), BlockId(7)]);

        preds.remove(BlockId(3));
        preds.remove(BlockId(7));
        assert_eq!(preds.single(), Some(BlockId(1)));
        preds.remove(BlockId(1));
        assert!(preds.to_vec().is_empty());
    }

    #[test]
    fn test_two_slot_removal_keeps_other() {
        let mut preds = Predecessors::Two(BlockId(4), BlockId(9));
        preds.remove(BlockId(4));
        assert_eq!(preds, Predecessors::One(BlockId(9)));
        assert_eq!(preds.to_vec(), vec![BlockId(9)]);
    }

    #[test]
    fn test_move_statements() {
        use crate::operation::Operation;

        let mut arena = BlockArena::new();
        let a = arena.alloc(BasicBlockKind::Block);
        let b = arena.alloc(BasicBlockKind::Block);
        arena[a].add_statement(Some(Operation::int_literal(1)));
        arena[b].add_statement(Some(Operation::int_literal(2)));
        arena[b].add_statement(None);
        arena.move_statements(b, a);
        assert_eq!(arena[a].statements().len(), 2);
        assert!(arena[b].is_empty());
    }
}
